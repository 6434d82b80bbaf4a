//! Memory primitives: the page allocator, the fixed-size block heap that
//! backs worklist chunks, and the per-iteration bump arena.

mod arena;
mod fixed;
pub mod pages;

pub use arena::IterArena;
pub use fixed::FixedSizeHeap;
pub use pages::PAGE_SIZE;
