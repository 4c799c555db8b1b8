/// Failure reported by [`crate::Allocator::new`] when the heap source refuses
/// to provide the initial bytes. `malloc` and `realloc` report the same
/// condition as `None`, matching the classical contract where a failed
/// allocation returns null and leaves the allocator consistent, so the caller
/// may retry with a smaller size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    Oom,
}
