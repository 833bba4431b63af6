use crate::mem::allocator::SegregatedAllocator;
use crate::mem::block::{header_ptr, write_tags, Tag};
use crate::mem::{align_up, HeapPtr, ALIGNMENT};
use crate::utils::heap_region::{HeapRegion, OutOfMemory};

impl<R: HeapRegion> SegregatedAllocator<R> {
    /// Grows the region by `max(asize, chunk_size)` bytes and turns the new space into a free
    /// block in place of the old epilogue. The block is coalesced with a free block that may have
    /// preceded the epilogue and ends up in the index; its payload pointer is returned.
    ///
    /// On failure nothing is changed.
    pub(crate) fn extend_heap(&mut self, asize: u64) -> Result<HeapPtr, OutOfMemory> {
        let size = align_up(asize.max(self.chunk_size), ALIGNMENT);

        let old_break = self.region.grow(size)?;
        debug_assert_eq!(old_break, self.epilogue);

        // the new block's header overwrites the old epilogue
        let ptr = self.epilogue;
        write_tags(&mut self.region, ptr, size, false);

        self.epilogue = ptr + size;
        self.region
            .write_word(header_ptr(self.epilogue), Tag::pack(0, true).raw());

        log::debug!(
            "heap grown by {} bytes, epilogue moved to {:#x}",
            size,
            self.epilogue
        );

        Ok(self.coalesce(ptr))
    }
}
