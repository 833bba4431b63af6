use crate::mem::allocator::SegregatedAllocator;
use crate::mem::block::{next_block_ptr, prev_tag, read_header, size_of_block, write_tags};
use crate::mem::{HeapPtr, MIN_BLOCK_SIZE};
use crate::utils::heap_region::HeapRegion;

/// Where the requested part of a split block goes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Placement {
    /// `[requested][remainder]`
    Front,
    /// `[remainder][requested]`
    Back,
}

/// Picks the side of the requested part by looking at the sizes of both physical neighbours of
/// the block being split, allocated or not.
///
/// A request at least as big as the neighbours' average goes next to the bigger neighbour, a
/// smaller one goes next to the smaller neighbour, so similar sizes end up side by side. With
/// equal neighbours the request always goes to the front.
pub(crate) fn choose_placement(asize: u64, prev_size: u64, next_size: u64) -> Placement {
    let biggest = prev_size.max(next_size);
    let avg = (prev_size + next_size) / 2;

    if asize >= avg {
        if biggest == prev_size {
            Placement::Front
        } else {
            Placement::Back
        }
    } else if biggest == next_size {
        Placement::Front
    } else {
        Placement::Back
    }
}

impl<R: HeapRegion> SegregatedAllocator<R> {
    /// Marks `asize` bytes of the free block at `ptr` as allocated, splitting off the rest as a
    /// free block when it is big enough to stand on its own. The block must already be out of
    /// the index. Returns the payload pointer of the allocated part.
    pub(crate) fn place(&mut self, ptr: HeapPtr, asize: u64) -> HeapPtr {
        let bsize = size_of_block(&self.region, ptr);
        debug_assert!(bsize >= asize);

        let remaining = bsize - asize;
        if remaining < MIN_BLOCK_SIZE {
            write_tags(&mut self.region, ptr, bsize, true);
            return ptr;
        }

        let prev_size = prev_tag(&self.region, ptr).size();
        let next_size = read_header(&self.region, next_block_ptr(ptr, bsize)).size();

        let placement = choose_placement(asize, prev_size, next_size);
        let (allocated_ptr, free_ptr) = match placement {
            Placement::Front => {
                write_tags(&mut self.region, ptr, asize, true);
                write_tags(&mut self.region, ptr + asize, remaining, false);

                (ptr, ptr + asize)
            }
            Placement::Back => {
                write_tags(&mut self.region, ptr, remaining, false);
                write_tags(&mut self.region, ptr + remaining, asize, true);

                (ptr + remaining, ptr)
            }
        };

        // a free block never has free neighbours, so the remainder can't merge with anything
        self.free_list.insert(&mut self.region, free_ptr);

        log::trace!(
            "split {:#x} ({} bytes): {:?}, {} allocated at {:#x}",
            ptr,
            bsize,
            placement,
            asize,
            allocated_ptr
        );

        allocated_ptr
    }

    /// Shrinks the allocated block at `ptr` to `asize`, giving the tail back when it is big
    /// enough to be a block.
    pub(crate) fn crop(&mut self, ptr: HeapPtr, asize: u64) {
        let bsize = size_of_block(&self.region, ptr);
        debug_assert!(bsize >= asize);

        let remaining = bsize - asize;
        if remaining < MIN_BLOCK_SIZE {
            return;
        }

        write_tags(&mut self.region, ptr, asize, true);
        write_tags(&mut self.region, ptr + asize, remaining, false);

        // the next block may be free here
        self.coalesce(ptr + asize);

        log::trace!("cropped {:#x} to {} bytes", ptr, asize);
    }
}
