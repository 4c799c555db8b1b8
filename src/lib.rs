//! General purpose dynamic memory allocator managing a single contiguous,
//! monotonically growing heap on behalf of one client. The heap itself comes
//! from a [`HeapSource`], which only knows how to grow at the tail and report
//! its bounds; everything else, including the allocator's own bookkeeping,
//! lives inside the heap bytes:
//!
//! ```text
//! +--------------------+  <- lo()
//! | 20 free list heads |     one link word per size class
//! +--------------------+
//! | pad word           |     realigns the payloads that follow
//! +--------------------+
//! | prologue hdr (8|a) |     synthetic allocated block bounding
//! | prologue ftr (8|a) |     backward navigation
//! +--------------------+
//! | block | block | .. |     boundary tagged blocks in address order,
//! |  ...  |  ...  | .. |     payloads aligned to 8 bytes
//! +--------------------+
//! | epilogue hdr (0|a) |     zero size allocated header bounding
//! +--------------------+     forward navigation
//!                        <- hi()
//! ```
//!
//! Every block carries its size and an allocated bit in a one word header,
//! duplicated in a footer so both neighbours can be reached in constant time.
//! Free blocks thread a doubly linked list through their first two payload
//! words; twenty such lists, segregated by size class, hang off the table at
//! the base of the heap. The classes step by 8 bytes up to 128 and grow
//! geometrically afterwards, which keeps internal fragmentation low for the
//! small object churn that dominates real traces.
//!
//! Placement is best fit within the first class that yields any fit, with
//! blocks split when the remainder can stand on its own. Freed blocks merge
//! with free neighbours immediately and are pushed onto the head of their
//! list. Reallocation works hard to stay in place: shrinks keep the whole
//! block, growth absorbs a free successor or extends the heap when the block
//! sits at the tail, and the surplus is never split off so that repeated
//! growth settles into no-ops. See [`Allocator`] for the public API.
//!
//! # Examples
//!
//! ```rust
//! use segalloc::{Allocator, FixedHeap};
//!
//! let mut allocator = Allocator::new(FixedHeap::with_capacity(1 << 20)).unwrap();
//!
//! let ptr = allocator.malloc(128).unwrap();
//! assert_eq!(ptr.as_ptr() as usize % 8, 0);
//!
//! unsafe {
//!     ptr.as_ptr().write_bytes(42, 128);
//!     allocator.free(Some(ptr));
//! }
//! ```

use std::ptr::NonNull;

mod allocator;
mod block;
mod check;
mod class;
mod error;
mod freelist;
mod heap;
mod platform;
mod view;

/// Non-null pointer to `T`, or nothing. Used instead of `*mut T` wherever an
/// operation can fail or a link can be absent, so the compiler forces code to
/// handle the `None` case.
pub type Pointer<T> = Option<NonNull<T>>;

pub use allocator::Allocator;
pub use error::AllocError;
pub use heap::{FixedHeap, HeapSource, SystemHeap};
