//! Boundary tags and block address arithmetic.
//!
//! Every block looks like this in the region (`ptr` is the payload pointer):
//!
//! ```text
//!         v ptr
//! [header][payload ...                  ][footer]
//!  8 bytes                                8 bytes
//! ```
//!
//! Header and footer hold the same tag word: the block size (a multiple of 16, overhead
//! included) with the allocated flag packed into the lowest bit. A free block reuses the first
//! two payload words for its free-list links: `[header][prev free][next free]...[footer]`.
use crate::mem::{HeapPtr, DOUBLE_WORD_SIZE, EMPTY_PTR, WORD_SIZE};
use crate::utils::heap_region::HeapRegion;
use std::fmt::{Debug, Formatter};

const ALLOCATED_FLAG: u64 = 0x1;
const SIZE_MASK: u64 = !0xF;

/// A packed `(size, allocated)` boundary tag.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Tag(u64);

impl Tag {
    #[inline]
    pub const fn pack(size: u64, allocated: bool) -> Self {
        Self((size & SIZE_MASK) | allocated as u64)
    }

    #[inline]
    pub const fn from_raw(word: u64) -> Self {
        Self(word)
    }

    #[inline]
    pub const fn unpack(self) -> (u64, bool) {
        (self.size(), self.is_allocated())
    }

    #[inline]
    pub const fn size(self) -> u64 {
        self.0 & SIZE_MASK
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED_FLAG == ALLOCATED_FLAG
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (size, allocated) = self.unpack();

        write!(f, "[{}:{}]", size, if allocated { "allocated" } else { "free" })
    }
}

#[inline]
pub const fn header_ptr(ptr: HeapPtr) -> u64 {
    ptr - WORD_SIZE
}

#[inline]
pub const fn footer_ptr(ptr: HeapPtr, size: u64) -> u64 {
    ptr + size - DOUBLE_WORD_SIZE
}

#[inline]
pub const fn next_block_ptr(ptr: HeapPtr, size: u64) -> HeapPtr {
    ptr + size
}

/// The footer of the previous block sits right before this block's header.
#[inline]
pub const fn prev_footer_ptr(ptr: HeapPtr) -> u64 {
    ptr - DOUBLE_WORD_SIZE
}

#[inline]
pub fn read_header<R: HeapRegion>(region: &R, ptr: HeapPtr) -> Tag {
    Tag::from_raw(region.read_word(header_ptr(ptr)))
}

#[inline]
pub fn read_footer<R: HeapRegion>(region: &R, ptr: HeapPtr, size: u64) -> Tag {
    Tag::from_raw(region.read_word(footer_ptr(ptr, size)))
}

#[inline]
pub fn size_of_block<R: HeapRegion>(region: &R, ptr: HeapPtr) -> u64 {
    read_header(region, ptr).size()
}

/// Tag of the block physically before `ptr`, read from its footer.
#[inline]
pub fn prev_tag<R: HeapRegion>(region: &R, ptr: HeapPtr) -> Tag {
    Tag::from_raw(region.read_word(prev_footer_ptr(ptr)))
}

/// Tag of the block physically after `ptr`, read from its header.
#[inline]
pub fn next_tag<R: HeapRegion>(region: &R, ptr: HeapPtr) -> Tag {
    read_header(region, next_block_ptr(ptr, size_of_block(region, ptr)))
}

#[inline]
pub fn prev_block_ptr<R: HeapRegion>(region: &R, ptr: HeapPtr) -> HeapPtr {
    ptr - prev_tag(region, ptr).size()
}

#[inline]
pub fn next_block<R: HeapRegion>(region: &R, ptr: HeapPtr) -> HeapPtr {
    next_block_ptr(ptr, size_of_block(region, ptr))
}

/// Writes the same tag into the header and the footer of the block at `ptr`.
#[inline]
pub fn write_tags<R: HeapRegion>(region: &mut R, ptr: HeapPtr, size: u64, allocated: bool) {
    let tag = Tag::pack(size, allocated);

    region.write_word(header_ptr(ptr), tag.raw());
    region.write_word(footer_ptr(ptr, size), tag.raw());
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlockState {
    Free { prev: HeapPtr, next: HeapPtr },
    Allocated,
}

/// A decoded view of one block. Links of a free block are only meaningful while it sits in the
/// free-list index.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Block {
    pub ptr: HeapPtr,
    pub size: u64,
    pub state: BlockState,
}

impl Block {
    pub fn read_at<R: HeapRegion>(region: &R, ptr: HeapPtr) -> Self {
        let (size, allocated) = read_header(region, ptr).unpack();

        let state = if allocated || size == 0 {
            BlockState::Allocated
        } else {
            BlockState::Free {
                prev: get_prev_free(region, ptr),
                next: get_next_free(region, ptr),
            }
        };

        Self { ptr, size, state }
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        matches!(self.state, BlockState::Allocated)
    }

    #[inline]
    pub fn usable_size(&self) -> u64 {
        self.size.saturating_sub(DOUBLE_WORD_SIZE)
    }

    #[inline]
    pub fn next_ptr(&self) -> HeapPtr {
        next_block_ptr(self.ptr, self.size)
    }
}

#[inline]
pub(crate) fn get_prev_free<R: HeapRegion>(region: &R, ptr: HeapPtr) -> HeapPtr {
    region.read_word(ptr)
}

#[inline]
pub(crate) fn set_prev_free<R: HeapRegion>(region: &mut R, ptr: HeapPtr, prev: HeapPtr) {
    region.write_word(ptr, prev)
}

#[inline]
pub(crate) fn get_next_free<R: HeapRegion>(region: &R, ptr: HeapPtr) -> HeapPtr {
    region.read_word(ptr + WORD_SIZE)
}

#[inline]
pub(crate) fn set_next_free<R: HeapRegion>(region: &mut R, ptr: HeapPtr, next: HeapPtr) {
    region.write_word(ptr + WORD_SIZE, next)
}

#[inline]
pub(crate) fn clear_free_links<R: HeapRegion>(region: &mut R, ptr: HeapPtr) {
    set_prev_free(region, ptr, EMPTY_PTR);
    set_next_free(region, ptr, EMPTY_PTR);
}
