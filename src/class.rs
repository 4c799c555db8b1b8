//! Size class partition for the segregated free lists. Small blocks get one
//! class per 8 byte step so that the binary trace workloads dominated by
//! small object churn waste almost nothing to internal fragmentation; past
//! 128 bytes the classes double.

/// Number of segregated free lists.
pub(crate) const CLASS_COUNT: usize = 20;

/// Maps a block size in bytes to the index of the free list that holds
/// blocks of that size. Insertion files a block under its own size;
/// allocation starts at the class of the requested size and escalates
/// through the larger ones.
pub(crate) fn class_of(size: u32) -> usize {
    match size {
        0..=16 => 0,
        17..=24 => 1,
        25..=32 => 2,
        33..=40 => 3,
        41..=48 => 4,
        49..=56 => 5,
        57..=64 => 6,
        65..=72 => 7,
        73..=80 => 8,
        81..=88 => 9,
        89..=96 => 10,
        97..=104 => 11,
        105..=112 => 12,
        113..=128 => 13,
        129..=256 => 14,
        257..=512 => 15,
        513..=1024 => 16,
        1025..=2048 => 17,
        2049..=4096 => 18,
        _ => 19,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fine_classes_step_by_eight() {
        for (class, upper) in (16..=112).step_by(8).enumerate() {
            assert_eq!(class_of(upper), class);
            assert_eq!(class_of(upper - 7), class);
        }

        // The last fine class covers two steps.
        assert_eq!(class_of(120), 13);
        assert_eq!(class_of(128), 13);
    }

    #[test]
    fn geometric_classes_double() {
        for (class, upper) in [(14, 256), (15, 512), (16, 1024), (17, 2048), (18, 4096)] {
            assert_eq!(class_of(upper), class);
            assert_eq!(class_of(upper / 2 + 1), class);
        }
    }

    #[test]
    fn everything_else_lands_in_the_last_class() {
        assert_eq!(class_of(4097), 19);
        assert_eq!(class_of(1 << 20), 19);
        assert_eq!(class_of(u32::MAX), 19);
    }
}
