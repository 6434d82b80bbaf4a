//! Process-wide page allocator.
//!
//! Pages are private anonymous mappings, huge-page-preferring on Linux with
//! populate and plain fallbacks. Each page is stamped with the worker that
//! first mapped it; freeing a page returns it to the *owner's* free list, so
//! memory a worker first touched keeps being handed back to that worker and
//! NUMA placement does not drift. The page-to-owner map is sharded by address
//! bits to keep the bookkeeping off any single lock.
//!
//! Out-of-memory is fatal: the allocator logs a diagnostic and aborts.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::substrate::{current_tid, CachePadded, PaddedLock};

/// Allocation granule. Matches the transparent huge page size on common
/// Linux configurations; plain 4 KiB mappings back it elsewhere.
pub const PAGE_SIZE: usize = 2 * 1024 * 1024;

// Free lists are indexed by owner tid; ids beyond the table fold back in.
const FREE_LIST_SLOTS: usize = 256;
const OWNER_SHARDS: usize = 64;

struct FreeList {
    head: *mut u8,
}

// Safety: the raw head pointer is only ever dereferenced under the list's
// lock, and the pages it chains are process-owned mappings.
unsafe impl Send for FreeList {}

struct PageState {
    free: Box<[CachePadded<PaddedLock<FreeList>>]>,
    owners: Box<[Mutex<HashMap<usize, usize>>]>,
    mapped: AtomicUsize,
}

static STATE: OnceLock<PageState> = OnceLock::new();

fn state() -> &'static PageState {
    STATE.get_or_init(|| PageState {
        free: (0..FREE_LIST_SLOTS)
            .map(|_| CachePadded::new(PaddedLock::new(FreeList { head: core::ptr::null_mut() })))
            .collect(),
        owners: (0..OWNER_SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        mapped: AtomicUsize::new(0),
    })
}

#[inline]
fn free_slot(tid: usize) -> usize {
    tid % FREE_LIST_SLOTS
}

#[inline]
fn owner_shard(addr: usize) -> usize {
    (addr >> 21) & (OWNER_SHARDS - 1)
}

#[cold]
fn fatal_oom(bytes: usize) -> ! {
    tracing::error!(bytes, "out of memory mapping pages");
    std::process::abort()
}

/// Pops a page from the calling worker's free list, else maps a fresh one.
pub fn page_alloc() -> NonNull<u8> {
    let st = state();
    let tid = current_tid();
    {
        let mut list = st.free[free_slot(tid)].lock();
        if !list.head.is_null() {
            let page = list.head;
            // Safety: pages on the free list store the next link in their
            // first word.
            list.head = unsafe { *page.cast::<*mut u8>() };
            // Safety: free-list pages are valid mappings.
            return unsafe { NonNull::new_unchecked(page) };
        }
    }
    map_fresh_page(tid)
}

/// Returns `page` to the free list of the worker that first mapped it.
///
/// # Panics
/// Panics if `page` was not produced by [`page_alloc`].
pub fn page_free(page: NonNull<u8>) {
    let st = state();
    let addr = page.as_ptr() as usize;
    let owner = st.owners[owner_shard(addr)]
        .lock()
        .get(&addr)
        .copied()
        .unwrap_or_else(|| panic!("freeing a page the page allocator never issued: {addr:#x}"));
    let mut list = st.free[free_slot(owner)].lock();
    // Safety: the page is unused by the caller from here on; its first word
    // becomes the free-list link.
    unsafe {
        *page.as_ptr().cast::<*mut u8>() = list.head;
    }
    list.head = page.as_ptr();
}

/// Maps `n` fresh pages and parks them on the calling worker's free list.
pub fn page_prealloc(n: usize) {
    let tid = current_tid();
    for _ in 0..n {
        page_free(map_fresh_page(tid));
    }
}

/// Number of pages mapped from the OS over the process lifetime.
pub fn pages_mapped() -> usize {
    state().mapped.load(Ordering::Relaxed)
}

fn map_fresh_page(tid: usize) -> NonNull<u8> {
    let st = state();
    let ptr = map_from_os(PAGE_SIZE, true).unwrap_or_else(|| fatal_oom(PAGE_SIZE));
    st.owners[owner_shard(ptr.as_ptr() as usize)]
        .lock()
        .insert(ptr.as_ptr() as usize, tid);
    st.mapped.fetch_add(1, Ordering::Relaxed);
    ptr
}

/// Maps a region of at least `bytes` (rounded up to whole pages), outside
/// the ownership map. `prefault` asks the OS to populate the region up
/// front.
pub fn large_alloc(bytes: usize, prefault: bool) -> NonNull<u8> {
    let size = round_to_pages(bytes);
    map_from_os(size, prefault).unwrap_or_else(|| fatal_oom(size))
}

/// Unmaps a region obtained from [`large_alloc`] with the same `bytes`.
pub fn large_free(ptr: NonNull<u8>, bytes: usize) {
    let size = round_to_pages(bytes);
    os_unmap(ptr, size);
}

#[inline]
fn round_to_pages(bytes: usize) -> usize {
    bytes.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE
}

#[cfg(unix)]
fn map_from_os(size: usize, prefault: bool) -> Option<NonNull<u8>> {
    use core::ffi::c_void;

    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let base = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;

    unsafe {
        #[cfg(target_os = "linux")]
        let mut ptr: *mut c_void = {
            let mut p = libc::mmap(core::ptr::null_mut(), size, prot, base | libc::MAP_HUGETLB, -1, 0);
            if p == libc::MAP_FAILED && prefault {
                p = libc::mmap(core::ptr::null_mut(), size, prot, base | libc::MAP_POPULATE, -1, 0);
            }
            p
        };
        #[cfg(not(target_os = "linux"))]
        let mut ptr: *mut c_void = {
            let _ = prefault;
            libc::MAP_FAILED
        };
        if ptr == libc::MAP_FAILED {
            ptr = libc::mmap(core::ptr::null_mut(), size, prot, base, -1, 0);
        }
        if ptr == libc::MAP_FAILED {
            None
        } else {
            NonNull::new(ptr.cast::<u8>())
        }
    }
}

#[cfg(unix)]
fn os_unmap(ptr: NonNull<u8>, size: usize) {
    // Safety: the region was mapped by `map_from_os` with this size.
    unsafe {
        libc::munmap(ptr.as_ptr().cast(), size);
    }
}

#[cfg(not(unix))]
fn map_from_os(size: usize, _prefault: bool) -> Option<NonNull<u8>> {
    use std::alloc::{alloc_zeroed, Layout};

    let layout = Layout::from_size_align(size, PAGE_SIZE).ok()?;
    // Safety: layout is nonzero.
    NonNull::new(unsafe { alloc_zeroed(layout) })
}

#[cfg(not(unix))]
fn os_unmap(ptr: NonNull<u8>, size: usize) {
    use std::alloc::{dealloc, Layout};

    let layout = Layout::from_size_align(size, PAGE_SIZE).expect("size was rounded to pages");
    // Safety: the region came from `alloc_zeroed` with this layout.
    unsafe { dealloc(ptr.as_ptr(), layout) }
}
