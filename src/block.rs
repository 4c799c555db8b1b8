use crate::view::{HeapView, WORD_SIZE};

/// Payloads are aligned to 8 bytes and block sizes are multiples of 8, so
/// the low three bits of a size word are free to carry flags.
pub(crate) const ALIGNMENT: u32 = 2 * WORD_SIZE;

/// Smallest block that can exist: header, the two link words a free block
/// needs, and the footer. The placement rule never leaves a remainder below
/// this.
pub(crate) const MIN_BLOCK_SIZE: u32 = 2 * ALIGNMENT;

/// Largest range the one word boundary tags can span. Bounds both heap
/// growth and request rounding.
pub(crate) const MAX_HEAP_SIZE: usize = (u32::MAX & !(ALIGNMENT - 1)) as usize;

const ALLOCATED: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

/// Packs a block size and its allocated bit into one tag word.
pub(crate) fn pack(size: u32, allocated: bool) -> u32 {
    debug_assert!((size & !SIZE_MASK) == 0);
    size | u32::from(allocated)
}

/// A block, identified by the offset of its payload from the heap's low
/// address. The handle is nothing but the offset; every query goes through
/// the current [`HeapView`], so no size or flag can go stale across
/// mutations.
///
/// ```text
///            +--------------------+
/// header  -> | size     ...  |a/f |   one word, low bit set when allocated
///            +--------------------+
/// payload -> | pred link word     |   client bytes while allocated, free
///            +--------------------+   list links while free
///            | succ link word     |
///            +--------------------+
///            |        ...         |
///            +--------------------+
/// footer  -> | size     ...  |a/f |   copy of the header
///            +--------------------+
/// ```
///
/// The accessors assume the handle points at a real block. The epilogue
/// (size zero) only ever has its header read, through the handle produced by
/// [`Block::next`] on the last real block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Block {
    payload: u32,
}

impl Block {
    pub fn at_payload(offset: u32) -> Self {
        debug_assert!(offset % ALIGNMENT == 0, "misaligned payload offset {offset:#x}");
        Self { payload: offset }
    }

    pub fn payload(self) -> u32 {
        self.payload
    }

    fn header(self) -> u32 {
        self.payload - WORD_SIZE
    }

    fn footer(self, view: &HeapView) -> u32 {
        self.payload + self.size(view) - 2 * WORD_SIZE
    }

    /// Total block size in bytes: header, payload and footer.
    pub fn size(self, view: &HeapView) -> u32 {
        view.word(self.header()) & SIZE_MASK
    }

    pub fn is_allocated(self, view: &HeapView) -> bool {
        view.word(self.header()) & ALLOCATED != 0
    }

    /// Writes both boundary tags. The footer position follows from `size`,
    /// so the new extent takes effect for neighbour navigation the moment
    /// this returns.
    pub fn write_tags(self, view: &mut HeapView, size: u32, allocated: bool) {
        let tag = pack(size, allocated);
        view.set_word(self.header(), tag);
        view.set_word(self.payload + size - 2 * WORD_SIZE, tag);
    }

    /// Header equals footer, the invariant the auditor leans on.
    pub fn tags_agree(self, view: &HeapView) -> bool {
        view.word(self.header()) == view.word(self.footer(view))
    }

    /// The block starting where this one ends. With the epilogue in place
    /// this is well defined for every real block.
    pub fn next(self, view: &HeapView) -> Block {
        Block::at_payload(self.payload + self.size(view))
    }

    /// The block ending where this one starts, reached through its footer.
    /// The prologue bounds this on the left, so it is well defined for every
    /// real block.
    pub fn prev(self, view: &HeapView) -> Block {
        let prev_size = view.word(self.payload - 2 * WORD_SIZE) & SIZE_MASK;
        Block::at_payload(self.payload - prev_size)
    }

    // While a block is free, its first two payload words hold the links of
    // its size class list. Links are payload offsets; offset 0 is the class
    // table itself, never a payload, and doubles as "no link".

    pub fn pred(self, view: &HeapView) -> Option<Block> {
        decode(view.word(self.payload))
    }

    pub fn succ(self, view: &HeapView) -> Option<Block> {
        decode(view.word(self.payload + WORD_SIZE))
    }

    pub fn set_pred(self, view: &mut HeapView, pred: Option<Block>) {
        view.set_word(self.payload, encode(pred));
    }

    pub fn set_succ(self, view: &mut HeapView, succ: Option<Block>) {
        view.set_word(self.payload + WORD_SIZE, encode(succ));
    }
}

pub(crate) fn encode(link: Option<Block>) -> u32 {
    link.map_or(0, Block::payload)
}

pub(crate) fn decode(word: u32) -> Option<Block> {
    (word != 0).then(|| Block::at_payload(word))
}

/// Rounds a requested payload size up to the block size that carries it:
/// room for both tags, at least [`MIN_BLOCK_SIZE`], a multiple of
/// [`ALIGNMENT`]. `None` when the request cannot be represented in a tag.
pub(crate) fn request_size(size: usize) -> Option<u32> {
    let align = ALIGNMENT as usize;

    if size <= align {
        return Some(MIN_BLOCK_SIZE);
    }

    let rounded = size.checked_add(2 * align - 1)? & !(align - 1);
    u32::try_from(rounded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{FixedHeap, HeapSource};

    fn view_over(heap: &mut FixedHeap, len: usize) -> HeapView {
        heap.extend(len).unwrap();
        unsafe { HeapView::new(heap.lo(), len) }
    }

    #[test]
    fn tags_and_navigation() {
        let mut heap = FixedHeap::with_capacity(256);
        let mut view = view_over(&mut heap, 256);

        // Two adjacent blocks a word into the heap.
        let first = Block::at_payload(8);
        first.write_tags(&mut view, 48, true);
        let second = first.next(&view);
        second.write_tags(&mut view, 32, false);

        assert_eq!(first.size(&view), 48);
        assert!(first.is_allocated(&view));
        assert!(first.tags_agree(&view));

        assert_eq!(second.payload(), 56);
        assert!(!second.is_allocated(&view));
        assert_eq!(second.prev(&view), first);
    }

    #[test]
    fn links_live_in_the_payload() {
        let mut heap = FixedHeap::with_capacity(128);
        let mut view = view_over(&mut heap, 128);

        let block = Block::at_payload(8);
        block.write_tags(&mut view, 16, false);
        let other = Block::at_payload(64);
        other.write_tags(&mut view, 16, false);

        block.set_pred(&mut view, None);
        block.set_succ(&mut view, Some(other));

        assert_eq!(block.pred(&view), None);
        assert_eq!(block.succ(&view), Some(other));
        assert_eq!(view.word(block.payload()), 0);
        assert_eq!(view.word(block.payload() + WORD_SIZE), 64);
    }

    #[test]
    fn requests_round_up_to_whole_blocks() {
        // Anything up to 8 bytes fits the minimum block.
        assert_eq!(request_size(1), Some(MIN_BLOCK_SIZE));
        assert_eq!(request_size(8), Some(MIN_BLOCK_SIZE));

        // Above that: payload plus both tags, rounded to 8.
        assert_eq!(request_size(9), Some(24));
        assert_eq!(request_size(16), Some(24));
        assert_eq!(request_size(24), Some(32));
        assert_eq!(request_size(4088), Some(4096));

        // Unrepresentable requests are refused, not wrapped.
        assert_eq!(request_size(usize::MAX), None);
        assert_eq!(request_size(u32::MAX as usize), None);
    }
}
