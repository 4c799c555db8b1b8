use std::{alloc, ptr::NonNull};

use crate::{block, platform, Pointer};

/// Address space reserved by [`SystemHeap::new`]. Reservations cost no
/// physical memory, pages are only committed as the break advances.
const DEFAULT_RESERVATION: usize = 1 << 28;

/// The lower level memory library the allocator sits on: one contiguous
/// byte range `[lo, hi)` that can only grow at the tail.
///
/// Implementations guarantee that:
///
/// - `lo` is fixed for the lifetime of the source and aligned to at least
///   8 bytes;
/// - `extend` preserves every byte below the old break and returns the old
///   break, so `[lo, hi)` stays contiguous and byte addressable;
/// - a failed `extend` changes nothing.
///
/// [`crate::Allocator::new`] additionally expects a fresh source, one whose
/// break still sits at `lo`, because it lays its bookkeeping out at the base
/// of the range.
pub trait HeapSource {
    /// Grows the heap by exactly `size` bytes and returns the address of
    /// the first newly added byte, or `None` if the source cannot grow.
    fn extend(&mut self, size: usize) -> Pointer<u8>;

    /// Current low address.
    fn lo(&self) -> NonNull<u8>;

    /// Current exclusive high address. Advances with every successful
    /// [`HeapSource::extend`].
    fn hi(&self) -> NonNull<u8>;
}

/// [`HeapSource`] backed by the kernel's virtual memory. The whole range is
/// reserved up front so that growing never relocates existing bytes; pages
/// are committed lazily as the break crosses them.
pub struct SystemHeap {
    base: NonNull<u8>,
    reserved: usize,
    committed: usize,
    brk: usize,
}

impl SystemHeap {
    /// Reserves [`DEFAULT_RESERVATION`] bytes of address space. `None` when
    /// the kernel refuses the reservation.
    pub fn new() -> Option<Self> {
        Self::with_reservation(DEFAULT_RESERVATION)
    }

    /// Reserves `max_size` bytes of address space, the hard ceiling for
    /// this heap's growth. The reservation is clamped to the largest range
    /// the allocator's one word boundary tags can span.
    pub fn with_reservation(max_size: usize) -> Option<Self> {
        let reserved = max_size.min(block::MAX_HEAP_SIZE);
        let base = unsafe { platform::reserve(reserved)? };

        Some(Self {
            base,
            reserved,
            committed: 0,
            brk: 0,
        })
    }
}

impl HeapSource for SystemHeap {
    fn extend(&mut self, size: usize) -> Pointer<u8> {
        let new_brk = self.brk.checked_add(size)?;

        if new_brk > self.reserved {
            return None;
        }

        // Commit whole pages past the already usable prefix.
        if new_brk > self.committed {
            let page = platform::page_size();
            let target = (new_brk.checked_add(page - 1)? / page * page).min(self.reserved);
            let address = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.committed)) };

            if !unsafe { platform::commit(address, target - self.committed) } {
                return None;
            }

            self.committed = target;
        }

        let old_brk = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.brk)) };
        self.brk = new_brk;

        Some(old_brk)
    }

    fn lo(&self) -> NonNull<u8> {
        self.base
    }

    fn hi(&self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.brk)) }
    }
}

impl Drop for SystemHeap {
    fn drop(&mut self) {
        unsafe { platform::release(self.base, self.reserved) };
    }
}

/// [`HeapSource`] backed by one fixed slab from the global allocator. Tests
/// and benches use it for deterministic capacity: exhaustion is exact, and a
/// failed extension leaves the break where it was so the heap stays usable.
pub struct FixedHeap {
    base: NonNull<u8>,
    capacity: usize,
    brk: usize,
}

impl FixedHeap {
    /// Allocates a slab able to hold `capacity` bytes of heap.
    ///
    /// # Panics
    ///
    /// Panics if the global allocator cannot provide the slab.
    pub fn with_capacity(capacity: usize) -> Self {
        let layout = Self::layout(capacity);
        let base = NonNull::new(unsafe { alloc::alloc(layout) })
            .unwrap_or_else(|| alloc::handle_alloc_error(layout));

        Self {
            base,
            capacity,
            brk: 0,
        }
    }

    fn layout(capacity: usize) -> alloc::Layout {
        // Payload alignment is relative to `lo`, so the slab itself must sit
        // on an 8 byte boundary for it to mean anything.
        alloc::Layout::from_size_align(capacity.max(1), block::ALIGNMENT as usize).unwrap()
    }
}

impl HeapSource for FixedHeap {
    fn extend(&mut self, size: usize) -> Pointer<u8> {
        let new_brk = self.brk.checked_add(size)?;

        if new_brk > self.capacity {
            return None;
        }

        let old_brk = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.brk)) };
        self.brk = new_brk;

        Some(old_brk)
    }

    fn lo(&self) -> NonNull<u8> {
        self.base
    }

    fn hi(&self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.brk)) }
    }
}

impl Drop for FixedHeap {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base.as_ptr(), Self::layout(self.capacity)) };
    }
}
