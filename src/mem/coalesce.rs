use crate::mem::allocator::SegregatedAllocator;
use crate::mem::block::{next_block_ptr, prev_tag, read_header, size_of_block, write_tags};
use crate::mem::HeapPtr;
use crate::utils::heap_region::HeapRegion;

impl<R: HeapRegion> SegregatedAllocator<R> {
    /// Merges the free block at `ptr` (tags already written, not in the index) with its free
    /// neighbours and links the result into the index. Returns the payload pointer of the merged
    /// block.
    pub(crate) fn coalesce(&mut self, ptr: HeapPtr) -> HeapPtr {
        let size = size_of_block(&self.region, ptr);

        let prev = prev_tag(&self.region, ptr);
        let next_ptr = next_block_ptr(ptr, size);
        let next = read_header(&self.region, next_ptr);

        let (merged_ptr, merged_size) = match (prev.is_allocated(), next.is_allocated()) {
            (true, true) => (ptr, size),
            (true, false) => {
                self.free_list.remove(&mut self.region, next_ptr);

                (ptr, size + next.size())
            }
            (false, true) => {
                let prev_ptr = ptr - prev.size();
                self.free_list.remove(&mut self.region, prev_ptr);

                (prev_ptr, prev.size() + size)
            }
            (false, false) => {
                let prev_ptr = ptr - prev.size();
                self.free_list.remove(&mut self.region, prev_ptr);
                self.free_list.remove(&mut self.region, next_ptr);

                (prev_ptr, prev.size() + size + next.size())
            }
        };

        if merged_size != size {
            write_tags(&mut self.region, merged_ptr, merged_size, false);
            log::trace!(
                "coalesced {:#x} into {:#x} ({} bytes)",
                ptr,
                merged_ptr,
                merged_size
            );
        }

        self.free_list.insert(&mut self.region, merged_ptr);

        merged_ptr
    }
}

#[cfg(test)]
mod tests {
    use crate::config::AllocatorConfig;
    use crate::mem::allocator::SegregatedAllocator;
    use crate::mem::block::{read_footer, read_header, write_tags, Tag};
    use crate::utils::heap_region::VecHeapRegion;

    // three exact-fit blocks of 64 bytes each followed by a guard of 32
    fn three_blocks() -> (SegregatedAllocator<VecHeapRegion>, [u64; 3]) {
        let config = AllocatorConfig {
            chunk_size: 0,
            ..AllocatorConfig::default()
        };
        let mut sma = SegregatedAllocator::init(VecHeapRegion::new(), config).unwrap();

        let a = sma.allocate(48).unwrap();
        let b = sma.allocate(48).unwrap();
        let c = sma.allocate(48).unwrap();
        sma.allocate(16).unwrap();

        (sma, [a, b, c])
    }

    fn mark_free(sma: &mut SegregatedAllocator<VecHeapRegion>, ptr: u64) {
        write_tags(&mut sma.region, ptr, 64, false);
    }

    #[test]
    fn both_allocated_works_fine() {
        let (mut sma, [_, b, _]) = three_blocks();

        mark_free(&mut sma, b);
        assert_eq!(sma.coalesce(b), b);

        assert_eq!(read_header(&sma.region, b), Tag::pack(64, false));
        assert_eq!(sma.free_list.occurrences(&sma.region, b), 1);
        assert!(sma.check_consistency());
    }

    #[test]
    fn next_free_works_fine() {
        let (mut sma, [_, b, c]) = three_blocks();

        mark_free(&mut sma, c);
        sma.coalesce(c);
        mark_free(&mut sma, b);

        assert_eq!(sma.coalesce(b), b);
        assert_eq!(read_header(&sma.region, b), Tag::pack(128, false));
        assert_eq!(read_footer(&sma.region, b, 128), Tag::pack(128, false));
        assert!(!sma.free_list.contains(&sma.region, c));
        assert!(sma.check_consistency());
    }

    #[test]
    fn prev_free_works_fine() {
        let (mut sma, [a, b, _]) = three_blocks();

        mark_free(&mut sma, a);
        sma.coalesce(a);
        mark_free(&mut sma, b);

        assert_eq!(sma.coalesce(b), a);
        assert_eq!(read_header(&sma.region, a), Tag::pack(128, false));
        assert_eq!(read_footer(&sma.region, a, 128), Tag::pack(128, false));
        assert_eq!(sma.free_list.occurrences(&sma.region, a), 1);
        assert!(sma.check_consistency());
    }

    #[test]
    fn both_free_works_fine() {
        let (mut sma, [a, b, c]) = three_blocks();

        mark_free(&mut sma, a);
        sma.coalesce(a);
        mark_free(&mut sma, c);
        sma.coalesce(c);
        mark_free(&mut sma, b);

        assert_eq!(sma.coalesce(b), a);
        assert_eq!(read_header(&sma.region, a), Tag::pack(192, false));
        assert_eq!(read_footer(&sma.region, a, 192), Tag::pack(192, false));
        assert!(!sma.free_list.contains(&sma.region, c));
        assert_eq!(sma.stats().free_blocks, 1);
        assert!(sma.check_consistency());
    }
}
