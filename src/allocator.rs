use crate::{
    block::{self, request_size, Block, ALIGNMENT, MAX_HEAP_SIZE, MIN_BLOCK_SIZE},
    class::{class_of, CLASS_COUNT},
    error::AllocError,
    freelist,
    heap::HeapSource,
    view::{HeapView, WORD_SIZE},
    Pointer,
};

/// Bytes added per ordinary heap extension. Allocation misses round their
/// extension up to this, so the heap grows in page sized strides instead of
/// one block at a time.
pub(crate) const CHUNK_SIZE: u32 = 4096;

/// The allocator proper. It owns its [`HeapSource`] and keeps no state of
/// its own beyond it: the class table, the boundary tags and the free list
/// links all live inside the heap, laid out as pictured in the
/// [crate documentation](crate).
///
/// The allocator is single client and none of its operations are reentrant;
/// wrap it in whatever synchronization the surrounding code needs. Dropping
/// it drops the source, which owns the bytes.
///
/// # Examples
///
/// ```rust
/// use segalloc::{Allocator, FixedHeap};
///
/// let mut allocator = Allocator::new(FixedHeap::with_capacity(1 << 20)).unwrap();
///
/// let ptr = allocator.malloc(24).unwrap();
/// let ptr = unsafe { allocator.realloc(Some(ptr), 640).unwrap() };
/// unsafe { allocator.free(Some(ptr)) };
///
/// assert!(allocator.check());
/// ```
pub struct Allocator<S: HeapSource> {
    source: S,
}

impl<S: HeapSource> Allocator<S> {
    /// Lays the allocator's state out at the base of `source` and primes the
    /// heap with one [`CHUNK_SIZE`] free block. Fails with
    /// [`AllocError::Oom`] if the source cannot provide the initial bytes.
    ///
    /// Expects a fresh source whose break still sits at `lo`.
    /// Reinitialization means building a new `Allocator` over a new source.
    pub fn new(source: S) -> Result<Self, AllocError> {
        let mut allocator = Self { source };

        // Class table, pad word, prologue header and footer, and the first
        // epilogue.
        let preamble = freelist::TABLE_SIZE + 4 * WORD_SIZE;
        if allocator.source.extend(preamble as usize).is_none() {
            return Err(AllocError::Oom);
        }

        let mut view = allocator.view();
        freelist::clear(&mut view);

        // The pad word realigns everything after the table so that payloads
        // land on 8 byte boundaries.
        view.set_word(freelist::TABLE_SIZE, 0);

        let prologue = Block::at_payload(freelist::TABLE_SIZE + 2 * WORD_SIZE);
        prologue.write_tags(&mut view, ALIGNMENT, true);

        // Initial epilogue, immediately swallowed by the priming extension.
        view.set_word(prologue.payload() + WORD_SIZE, block::pack(0, true));

        if allocator.extend_heap(CHUNK_SIZE / WORD_SIZE).is_none() {
            return Err(AllocError::Oom);
        }

        Ok(allocator)
    }

    /// The heap source, for bounds queries. `hi() - lo()` is the managed
    /// range; it only ever grows.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fresh snapshot of the heap bounds. Must be retaken after any source
    /// extension.
    pub(crate) fn view(&self) -> HeapView {
        let len = self.source.hi().as_ptr() as usize - self.source.lo().as_ptr() as usize;
        unsafe { HeapView::new(self.source.lo(), len) }
    }

    /// Allocates `size` bytes and returns their 8 byte aligned address, or
    /// `None` when `size` is zero or the heap cannot grow to fit the
    /// request. The heap is unchanged on failure.
    pub fn malloc(&mut self, size: usize) -> Pointer<u8> {
        if size == 0 {
            return None;
        }

        let asize = request_size(size)?;

        let block = match self.find_fit(asize) {
            Some(block) => block,
            None => self.extend_heap(asize.max(CHUNK_SIZE) / WORD_SIZE)?,
        };

        self.place(block, asize);

        Some(self.view().payload_ptr(block.payload()))
    }

    /// Releases an allocation. `None` is a no-op. The block merges with any
    /// free neighbour immediately and becomes the head of its class's list.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or a pointer obtained from this allocator's
    /// [`Self::malloc`]/[`Self::realloc`] and not freed since.
    pub unsafe fn free(&mut self, ptr: Pointer<u8>) {
        let Some(ptr) = ptr else { return };

        let mut view = self.view();
        let block = Block::at_payload(view.offset_of(ptr));
        let size = block.size(&view);

        block.write_tags(&mut view, size, false);
        self.coalesce(block);
    }

    /// Resizes the allocation at `ptr` to at least `size` bytes, preserving
    /// the leading `min(old payload, size)` bytes. Follows the classical
    /// contract: `(None, size)` allocates, `(ptr, 0)` frees and returns
    /// `None`, and on failure the result is `None` with the original block
    /// untouched and still valid.
    ///
    /// Growth is served in place whenever possible, and the in place paths
    /// deliberately keep the whole surplus instead of splitting it off: a
    /// block that grew once tends to grow again, and the retained buffer
    /// turns the next few calls into no-ops.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::free`].
    pub unsafe fn realloc(&mut self, ptr: Pointer<u8>, size: usize) -> Pointer<u8> {
        let Some(ptr) = ptr else {
            return self.malloc(size);
        };

        if size == 0 {
            self.free(Some(ptr));
            return None;
        }

        let new_size = request_size(size)?;

        let mut view = self.view();
        let block = Block::at_payload(view.offset_of(ptr));
        let old_size = block.size(&view);

        // Shrink or stay: hand the same block back, slack included.
        if new_size <= old_size {
            return Some(ptr);
        }

        let next = block.next(&view);
        let next_size = next.size(&view);

        // Absorb a free successor when the two together cover the request.
        if !next.is_allocated(&view) && old_size + next_size >= new_size {
            freelist::remove(&mut view, next);
            block.write_tags(&mut view, old_size + next_size, true);
            return Some(ptr);
        }

        // At the heap tail (the successor is the epilogue): grow the source
        // by exactly the deficit and rebuild the epilogue past the block.
        if next_size == 0 {
            self.grow_source(new_size - old_size)?;

            let mut view = self.view();
            block.write_tags(&mut view, new_size, true);
            view.set_word(block.payload() + new_size - WORD_SIZE, block::pack(0, true));

            return Some(ptr);
        }

        // Move: a fresh block, the old payload bytes, and the old block
        // goes back to its list.
        let new_ptr = self.malloc(size)?;

        let mut view = self.view();
        let dst = view.offset_of(new_ptr);
        view.copy_payload(block.payload(), dst, old_size - ALIGNMENT);

        self.free(Some(ptr));

        Some(new_ptr)
    }

    /// Best fit bounded to one class: walk the class of the request and
    /// every larger one, returning the tightest block of the first class
    /// that produced any candidate. Bounding the search this way keeps the
    /// scan short while still picking the smallest surplus available where
    /// it matters.
    fn find_fit(&self, asize: u32) -> Option<Block> {
        let view = self.view();

        for class in class_of(asize)..CLASS_COUNT {
            let mut best: Option<(u32, Block)> = None;
            let mut cursor = freelist::head(&view, class);

            while let Some(candidate) = cursor {
                let size = candidate.size(&view);

                if size >= asize {
                    let diff = size - asize;

                    if diff == 0 {
                        return Some(candidate);
                    }

                    if best.map_or(true, |(min_diff, _)| diff < min_diff) {
                        best = Some((diff, candidate));
                    }
                }

                cursor = candidate.succ(&view);
            }

            if let Some((_, block)) = best {
                return Some(block);
            }
        }

        None
    }

    /// Turns a free block into an allocated block of `asize` bytes. The
    /// remainder becomes a new free block when it can stand on its own;
    /// otherwise the whole block is handed out.
    fn place(&mut self, block: Block, asize: u32) {
        let mut view = self.view();
        let total = block.size(&view);

        freelist::remove(&mut view, block);

        if total - asize >= MIN_BLOCK_SIZE {
            block.write_tags(&mut view, asize, true);

            let remainder = block.next(&view);
            remainder.write_tags(&mut view, total - asize, false);
            freelist::insert(&mut view, remainder);
        } else {
            block.write_tags(&mut view, total, true);
        }
    }

    /// Immediate boundary tag coalescing of a freshly freed block. The
    /// prologue and epilogue are allocated sentinels, so both neighbour
    /// probes are always well defined. Returns the block now covering the
    /// freed bytes, already inserted into its list.
    fn coalesce(&mut self, block: Block) -> Block {
        let mut view = self.view();

        let prev = block.prev(&view);
        let next = block.next(&view);
        let prev_allocated = prev.is_allocated(&view);
        let next_allocated = next.is_allocated(&view);

        let mut merged = block;
        let mut size = block.size(&view);

        if prev_allocated && !next_allocated {
            freelist::remove(&mut view, next);
            size += next.size(&view);
            merged.write_tags(&mut view, size, false);
        } else if !prev_allocated && next_allocated {
            freelist::remove(&mut view, prev);
            size += prev.size(&view);
            merged = prev;
            merged.write_tags(&mut view, size, false);
        } else if !prev_allocated && !next_allocated {
            freelist::remove(&mut view, prev);
            freelist::remove(&mut view, next);
            size += prev.size(&view) + next.size(&view);
            merged = prev;
            merged.write_tags(&mut view, size, false);
        }

        freelist::insert(&mut view, merged);
        merged
    }

    /// Grows the heap by `words` words, rounded up to even so payloads stay
    /// 8 byte aligned, shapes the new bytes into a free block whose header
    /// overwrites the old epilogue, writes a fresh epilogue behind it and
    /// merges with a free tail block if there is one.
    fn extend_heap(&mut self, words: u32) -> Option<Block> {
        let words = words + words % 2;
        let size = words * WORD_SIZE;

        let old_break = self.view().len();
        self.grow_source(size)?;

        let mut view = self.view();
        let block = Block::at_payload(old_break);
        block.write_tags(&mut view, size, false);
        view.set_word(block.payload() + size - WORD_SIZE, block::pack(0, true));

        Some(self.coalesce(block))
    }

    /// Asks the source for `bytes` more heap, refusing growth past what the
    /// one word tags can address.
    fn grow_source(&mut self, bytes: u32) -> Option<()> {
        if self.view().len() as u64 + bytes as u64 > MAX_HEAP_SIZE as u64 {
            return None;
        }

        self.source.extend(bytes as usize).map(|_| ())
    }
}
