//! Chunked FIFO worklist.
//!
//! Each worker owns a private *producer* chunk and *consumer* chunk of fixed
//! capacity. Pushes fill the producer chunk; when it is full it is appended
//! to a shared linked list of chunks. Pops drain the consumer chunk, then
//! take a chunk from the shared list, and only then fall back to adopting
//! the worker's own producer chunk. One lock acquisition moves a whole chunk
//! of items, so lock traffic is amortized by the chunk capacity — and the
//! shared list doubles as a stealing channel: any worker may take a chunk
//! another worker filled.
//!
//! Chunks live in a [`FixedSizeHeap`], whose alloc/free counters make chunk
//! leaks observable.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr;

use crate::mem::FixedSizeHeap;
use crate::substrate::{PaddedLock, PerThread, Topology};

use super::{Worklist, WorklistSpec};

/// Fixed-capacity ring of items; single-owner, externally synchronized.
struct FixedRing<T, const N: usize> {
    head: usize,
    len: usize,
    items: [MaybeUninit<T>; N],
}

impl<T, const N: usize> FixedRing<T, N> {
    fn new() -> Self {
        Self {
            head: 0,
            len: 0,
            items: [const { MaybeUninit::uninit() }; N],
        }
    }

    fn push_back(&mut self, value: T) -> Result<(), T> {
        if self.len == N {
            return Err(value);
        }
        self.items[(self.head + self.len) % N].write(value);
        self.len += 1;
        Ok(())
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        // Safety: slots within `head..head+len` are initialized.
        let value = unsafe { self.items[self.head].assume_init_read() };
        self.head = (self.head + 1) % N;
        self.len -= 1;
        Some(value)
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn is_full(&self) -> bool {
        self.len == N
    }
}

impl<T, const N: usize> Drop for FixedRing<T, N> {
    fn drop(&mut self) {
        while self.pop_front().is_some() {}
    }
}

struct Chunk<T, const N: usize> {
    ring: FixedRing<T, N>,
    next: *mut Chunk<T, N>,
}

struct SharedList<T, const N: usize> {
    head: *mut Chunk<T, N>,
    tail: *mut Chunk<T, N>,
}

// Safety: chunk pointers are only dereferenced under the list lock.
unsafe impl<T: Send, const N: usize> Send for SharedList<T, N> {}

struct Slots<T, const N: usize> {
    consumer: *mut Chunk<T, N>,
    producer: *mut Chunk<T, N>,
}

/// The chunked FIFO worklist. `CHUNK` is the per-chunk item capacity.
pub struct ChunkedFifo<T: Send, const CHUNK: usize = 64> {
    heap: FixedSizeHeap,
    shared: PaddedLock<SharedList<T, CHUNK>>,
    workers: PerThread<UnsafeCell<Slots<T, CHUNK>>>,
}

// Safety: per-worker slots are touched only by their owning worker; chunks
// in flight are handed over through the locked shared list.
unsafe impl<T: Send, const N: usize> Send for ChunkedFifo<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for ChunkedFifo<T, N> {}

impl<T: Send, const CHUNK: usize> ChunkedFifo<T, CHUNK> {
    /// Creates a chunked FIFO for `topo`.
    pub fn new(topo: &Topology) -> Self {
        Self {
            heap: FixedSizeHeap::new(
                core::mem::size_of::<Chunk<T, CHUNK>>(),
                core::mem::align_of::<Chunk<T, CHUNK>>(),
            ),
            shared: PaddedLock::new(SharedList {
                head: ptr::null_mut(),
                tail: ptr::null_mut(),
            }),
            workers: PerThread::new_with(topo.threads(), |_| {
                UnsafeCell::new(Slots {
                    consumer: ptr::null_mut(),
                    producer: ptr::null_mut(),
                })
            }),
        }
    }

    /// Chunks handed out since construction; for leak accounting.
    pub fn chunks_allocated(&self) -> usize {
        self.heap.allocated()
    }

    /// Chunks recycled since construction; for leak accounting.
    pub fn chunks_freed(&self) -> usize {
        self.heap.freed()
    }

    fn alloc_chunk(&self) -> *mut Chunk<T, CHUNK> {
        let raw = self.heap.alloc().as_ptr().cast::<Chunk<T, CHUNK>>();
        // Safety: the heap block covers a `Chunk` at its alignment.
        unsafe {
            ptr::write(
                raw,
                Chunk {
                    ring: FixedRing::new(),
                    next: ptr::null_mut(),
                },
            );
        }
        raw
    }

    /// # Safety
    /// `chunk` must be exclusively owned by the caller.
    unsafe fn free_chunk(&self, chunk: *mut Chunk<T, CHUNK>) {
        ptr::drop_in_place(chunk);
        self.heap
            .free(ptr::NonNull::new(chunk.cast()).expect("chunk pointers are nonnull"));
    }

    fn append_shared(&self, chunk: *mut Chunk<T, CHUNK>) {
        let mut list = self.shared.lock();
        // Safety: the chunk is ours until it is linked in.
        unsafe {
            (*chunk).next = ptr::null_mut();
            if list.tail.is_null() {
                list.head = chunk;
            } else {
                (*list.tail).next = chunk;
            }
        }
        list.tail = chunk;
    }

    fn pop_shared(&self) -> Option<*mut Chunk<T, CHUNK>> {
        let mut list = self.shared.lock();
        let head = list.head;
        if head.is_null() {
            return None;
        }
        // Safety: `head` is linked, hence valid, under the lock.
        list.head = unsafe { (*head).next };
        if list.head.is_null() {
            list.tail = ptr::null_mut();
        }
        Some(head)
    }

    /// The calling worker's slots; owner-only access.
    #[allow(clippy::mut_from_ref)]
    fn slots(&self) -> &mut Slots<T, CHUNK> {
        // Safety: each slot belongs to exactly one worker and is never
        // reached from another thread.
        unsafe { &mut *self.workers.local().get() }
    }
}

impl<T: Send, const CHUNK: usize> Worklist<T> for ChunkedFifo<T, CHUNK> {
    fn push(&self, item: T) {
        let slots = self.slots();
        // Safety: producer/consumer chunks are owned by this worker.
        unsafe {
            if !slots.producer.is_null() && (*slots.producer).ring.is_full() {
                self.append_shared(slots.producer);
                slots.producer = ptr::null_mut();
            }
            if slots.producer.is_null() {
                slots.producer = self.alloc_chunk();
            }
            (*slots.producer)
                .ring
                .push_back(item)
                .ok()
                .expect("fresh producer chunk has room");
        }
    }

    fn pop(&self) -> Option<T> {
        let slots = self.slots();
        // Safety: see `push`; shared chunks are transferred whole, so once
        // adopted they are exclusively ours.
        unsafe {
            if !slots.consumer.is_null() && (*slots.consumer).ring.is_empty() {
                self.free_chunk(slots.consumer);
                slots.consumer = ptr::null_mut();
            }
            if slots.consumer.is_null() {
                if let Some(chunk) = self.pop_shared() {
                    slots.consumer = chunk;
                } else {
                    slots.consumer = slots.producer;
                    slots.producer = ptr::null_mut();
                    if slots.consumer.is_null() {
                        return None;
                    }
                }
            }
            (*slots.consumer).ring.pop_front()
        }
    }

    fn empty(&self) -> bool {
        let slots = self.slots();
        // Safety: owner-only reads of our own chunks.
        unsafe {
            if !slots.consumer.is_null() && !(*slots.consumer).ring.is_empty() {
                return false;
            }
            if !slots.producer.is_null() && !(*slots.producer).ring.is_empty() {
                return false;
            }
        }
        self.shared.lock().head.is_null()
    }

    fn push_initial<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        for item in items {
            self.push(item);
        }
        // Publish the partial producer chunk so seeded work is stealable.
        let slots = self.slots();
        if !slots.producer.is_null() {
            self.append_shared(slots.producer);
            slots.producer = ptr::null_mut();
        }
    }
}

impl<T: Send, const CHUNK: usize> Drop for ChunkedFifo<T, CHUNK> {
    fn drop(&mut self) {
        let mut orphans = Vec::new();
        for slot in self.workers.iter_mut() {
            let slots = slot.get_mut();
            for chunk in [slots.consumer, slots.producer] {
                if !chunk.is_null() {
                    orphans.push(chunk);
                }
            }
            slots.consumer = ptr::null_mut();
            slots.producer = ptr::null_mut();
        }
        for chunk in orphans {
            // Safety: `&mut self` proves no worker is running.
            unsafe { self.free_chunk(chunk) };
        }
        while let Some(chunk) = self.pop_shared() {
            // Safety: unlinked; exclusively ours.
            unsafe { self.free_chunk(chunk) };
        }
    }
}

/// Builds a [`ChunkedFifo`] with the default chunk capacity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkedFifoSpec;

impl<T: Send> WorklistSpec<T> for ChunkedFifoSpec {
    type Wl = ChunkedFifo<T>;

    fn build(&self, topo: &Topology) -> Self::Wl {
        ChunkedFifo::new(topo)
    }
}
