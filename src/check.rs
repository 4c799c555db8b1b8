//! Heap audit. [`Allocator::check`] walks the whole heap and then all
//! twenty free lists, verifying every structural invariant the allocator
//! relies on. Violations are fatal programming errors, not recoverable
//! conditions: the audit panics naming the offending offset, and a clean
//! pass returns `true`.

use std::fmt::Write;

use crate::{
    allocator::Allocator,
    block::{Block, ALIGNMENT, MIN_BLOCK_SIZE},
    class::{class_of, CLASS_COUNT},
    freelist,
    heap::HeapSource,
    view::{HeapView, WORD_SIZE},
};

/// Offset of the prologue block's payload.
fn prologue() -> Block {
    Block::at_payload(freelist::TABLE_SIZE + 2 * WORD_SIZE)
}

impl<S: HeapSource> Allocator<S> {
    /// Audits the heap. The walk verifies the prologue's shape, every
    /// block's alignment, tag agreement and size bounds, that no two free
    /// blocks sit next to each other, that the block sizes account for every
    /// byte between `lo` and `hi`, and the epilogue's shape. The list pass
    /// verifies that every link stays in bounds, that listed blocks are free
    /// and filed under the class their size maps to, and that the pred
    /// chain mirrors the succ chain. Finally both passes must have seen the
    /// same number of free blocks.
    ///
    /// # Panics
    ///
    /// Panics on the first violation found, naming the offending offset.
    pub fn check(&self) -> bool {
        let view = self.view();

        let prologue = prologue();
        if prologue.size(&view) != ALIGNMENT || !prologue.is_allocated(&view) {
            panic!("bad prologue header at offset {:#x}", prologue.payload());
        }

        let mut accounted = (freelist::TABLE_SIZE + 4 * WORD_SIZE) as u64;
        let mut free_by_walk = 0usize;
        let mut block = prologue.next(&view);

        while block.size(&view) > 0 {
            check_block(&view, block);

            if !block.is_allocated(&view) {
                if !block.next(&view).is_allocated(&view) {
                    panic!(
                        "contiguous free blocks not coalesced at offset {:#x}",
                        block.payload()
                    );
                }

                free_by_walk += 1;
            }

            accounted += block.size(&view) as u64;
            block = block.next(&view);
        }

        // The walk ends on a zero size header, which must be the allocated
        // epilogue sitting exactly at the break.
        if !block.is_allocated(&view) || block.payload() != view.len() {
            panic!("bad epilogue header at offset {:#x}", block.payload());
        }

        if accounted != view.len() as u64 {
            panic!(
                "heap accounting mismatch, blocks cover {} of {} bytes",
                accounted,
                view.len()
            );
        }

        let mut free_by_list = 0usize;

        for class in 0..CLASS_COUNT {
            let mut prev: Option<Block> = None;
            let mut cursor = freelist::head(&view, class);

            while let Some(entry) = cursor {
                if !view.contains(entry.payload()) {
                    panic!(
                        "free list link out of bounds at offset {:#x} in class {}",
                        entry.payload(),
                        class
                    );
                }

                if entry.is_allocated(&view) {
                    panic!(
                        "allocated block in free list at offset {:#x} in class {}",
                        entry.payload(),
                        class
                    );
                }

                if class_of(entry.size(&view)) != class {
                    panic!(
                        "block of size {} filed under class {} at offset {:#x}",
                        entry.size(&view),
                        class,
                        entry.payload()
                    );
                }

                if entry.pred(&view) != prev {
                    panic!("pred link inconsistency at offset {:#x}", entry.payload());
                }

                free_by_list += 1;
                prev = cursor;
                cursor = entry.succ(&view);
            }
        }

        if free_by_walk != free_by_list {
            panic!(
                "free block count mismatch, heap walk found {}, lists hold {}",
                free_by_walk, free_by_list
            );
        }

        true
    }

    /// Renders every block in address order, one line each. Troubleshooting
    /// companion to [`Self::check`].
    pub fn dump(&self) -> String {
        let view = self.view();
        let mut out = String::new();
        let mut block = prologue();

        loop {
            let size = block.size(&view);
            let tag = if block.is_allocated(&view) { 'a' } else { 'f' };

            if size == 0 {
                let _ = writeln!(out, "{:#010x}: epilogue [{}]", block.payload(), tag);
                return out;
            }

            let _ = writeln!(out, "{:#010x}: size {:>8} [{}]", block.payload(), size, tag);
            block = block.next(&view);
        }
    }

    /// Number of free blocks found by a heap walk.
    pub fn free_block_count(&self) -> usize {
        let view = self.view();
        let mut count = 0;
        let mut block = prologue().next(&view);

        while block.size(&view) > 0 {
            if !block.is_allocated(&view) {
                count += 1;
            }

            block = block.next(&view);
        }

        count
    }
}

fn check_block(view: &HeapView, block: Block) {
    if block.payload() % ALIGNMENT != 0 {
        panic!(
            "payload not double word aligned at offset {:#x}",
            block.payload()
        );
    }

    if !block.tags_agree(view) {
        panic!(
            "header does not match footer at offset {:#x}",
            block.payload()
        );
    }

    let size = block.size(view);
    if size < MIN_BLOCK_SIZE || size % ALIGNMENT != 0 {
        panic!("bad block size {} at offset {:#x}", size, block.payload());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block, heap::FixedHeap};

    fn allocator() -> Allocator<FixedHeap> {
        Allocator::new(FixedHeap::with_capacity(1 << 20)).unwrap()
    }

    #[test]
    fn clean_heaps_pass() {
        let mut allocator = allocator();
        assert!(allocator.check());

        let a = allocator.malloc(24);
        let b = allocator.malloc(100);
        let c = allocator.malloc(3000);
        assert!(allocator.check());

        unsafe {
            allocator.free(b);
            assert!(allocator.check());

            let a = allocator.realloc(a, 512);
            assert!(allocator.check());

            allocator.free(a);
            allocator.free(c);
        }
        assert!(allocator.check());
    }

    #[test]
    fn dump_renders_the_walk() {
        let mut allocator = allocator();
        allocator.malloc(24).unwrap();

        let dump = allocator.dump();
        assert!(dump.contains("[a]"));
        assert!(dump.contains("[f]"));
        assert!(dump.contains("epilogue"));
    }

    #[test]
    #[should_panic(expected = "allocated block in free list")]
    fn flipped_tag_is_caught_in_the_list_pass() {
        let mut allocator = allocator();

        let ptr = allocator.malloc(24).unwrap();
        allocator.malloc(24).unwrap();
        unsafe { allocator.free(Some(ptr)) };

        // Flip the freed block's tags back to allocated behind the
        // allocator's back; it is still linked into its class list.
        let mut view = allocator.view();
        let block = Block::at_payload(unsafe { view.offset_of(ptr) });
        let size = block.size(&view);
        block.write_tags(&mut view, size, true);

        allocator.check();
    }

    #[test]
    #[should_panic(expected = "header does not match footer")]
    fn torn_tags_are_caught_in_the_walk()  {
        let mut allocator = allocator();

        let ptr = allocator.malloc(24).unwrap();
        let mut view = allocator.view();
        let block = Block::at_payload(unsafe { view.offset_of(ptr) });
        let size = block.size(&view);

        // Clear the allocated bit in the header only; the footer still
        // carries the old tag.
        view.set_word(block.payload() - 4, block::pack(size, false));

        allocator.check();
    }
}
