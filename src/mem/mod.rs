pub mod allocator;
pub mod block;
pub mod check;
mod coalesce;
pub mod free_list;
mod grow;
mod split;

/// Offset of a byte inside the heap region. Payload pointers handed out to callers are
/// `HeapPtr`s too; `0` is never a payload address.
pub type HeapPtr = u64;

pub(crate) const EMPTY_PTR: HeapPtr = 0;

pub const WORD_SIZE: u64 = 8;
pub const DOUBLE_WORD_SIZE: u64 = 2 * WORD_SIZE;
pub const ALIGNMENT: u64 = DOUBLE_WORD_SIZE;

/// header + footer
pub const BLOCK_OVERHEAD: u64 = DOUBLE_WORD_SIZE;
/// Room for the header, the footer and the two free-list links.
pub const MIN_BLOCK_SIZE: u64 = 2 * DOUBLE_WORD_SIZE;

/// Prologue is an allocated block with an empty payload.
pub const PROLOGUE_SIZE: u64 = DOUBLE_WORD_SIZE;
/// Bytes granted by the region that no block accounts for: the leading alignment padding word
/// and the epilogue header.
pub const SENTINEL_OVERHEAD: u64 = 2 * WORD_SIZE;
pub(crate) const INITIAL_HEAP_SIZE: u64 = 4 * WORD_SIZE;

#[inline]
pub(crate) const fn align_up(value: u64, align: u64) -> u64 {
    value.saturating_add(align - 1) & !(align - 1)
}

/// Block size needed to serve a request of `size` payload bytes, or `None` when the request is
/// too big to ever be represented.
pub(crate) fn adjusted_size(size: usize) -> Option<u64> {
    let size = u64::try_from(size).ok()?;

    if size <= DOUBLE_WORD_SIZE {
        return Some(MIN_BLOCK_SIZE);
    }

    let with_overhead = size.checked_add(BLOCK_OVERHEAD + ALIGNMENT - 1)?;

    Some(with_overhead & !(ALIGNMENT - 1))
}
