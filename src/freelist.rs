//! Maintenance of the segregated free lists. The table of list heads lives
//! in the first [`TABLE_SIZE`] bytes of the heap itself; each head starts a
//! doubly linked list threaded through the link words of its free blocks.
//! Both operations are O(1).

use crate::{
    block::{decode, encode, Block},
    class::{class_of, CLASS_COUNT},
    view::{HeapView, WORD_SIZE},
};

/// Bytes occupied by the class table at the base of the heap.
pub(crate) const TABLE_SIZE: u32 = CLASS_COUNT as u32 * WORD_SIZE;

fn head_slot(class: usize) -> u32 {
    debug_assert!(class < CLASS_COUNT);
    class as u32 * WORD_SIZE
}

/// First free block of a class, if any.
pub(crate) fn head(view: &HeapView, class: usize) -> Option<Block> {
    decode(view.word(head_slot(class)))
}

fn set_head(view: &mut HeapView, class: usize, head: Option<Block>) {
    view.set_word(head_slot(class), encode(head));
}

/// Empties every list. Runs once, over a freshly extended table.
pub(crate) fn clear(view: &mut HeapView) {
    for class in 0..CLASS_COUNT {
        set_head(view, class, None);
    }
}

/// Pushes a free block onto the head of its class's list. Recently freed
/// blocks are likely still cache hot, and head insertion makes them the
/// first candidates handed back out.
pub(crate) fn insert(view: &mut HeapView, block: Block) {
    let class = class_of(block.size(view));
    let old_head = head(view, class);

    block.set_succ(view, old_head);
    block.set_pred(view, None);

    if let Some(old_head) = old_head {
        old_head.set_pred(view, Some(block));
    }

    set_head(view, class, Some(block));
}

/// Unlinks a block from the list its size maps to. The block's link words
/// keep their values; whoever removes a block overwrites them next.
pub(crate) fn remove(view: &mut HeapView, block: Block) {
    let pred = block.pred(view);
    let succ = block.succ(view);

    match pred {
        Some(pred) => pred.set_succ(view, succ),
        None => set_head(view, class_of(block.size(view)), succ),
    }

    if let Some(succ) = succ {
        succ.set_pred(view, pred);
    }
}
