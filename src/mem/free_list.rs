use crate::mem::block::{
    clear_free_links, get_next_free, get_prev_free, set_next_free, set_prev_free, size_of_block,
};
use crate::mem::{HeapPtr, DOUBLE_WORD_SIZE, EMPTY_PTR, MIN_BLOCK_SIZE};
use crate::utils::heap_region::HeapRegion;

pub type SizeClassId = usize;

/// Enough buckets to cover every `u64` block size.
pub const MAX_SIZE_CLASSES: usize = 64;

/// Segregated explicit free list.
///
/// Bucket `i` serves blocks of size `[MIN_BLOCK_SIZE << i, (MIN_BLOCK_SIZE << (i + 1)) - 1]`, the
/// last one catches everything bigger. Each bucket is a doubly linked list threaded through the
/// free blocks themselves and kept sorted largest-first, so looking at the head of a bucket is
/// enough to know whether anything in it fits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegregatedFreeList {
    heads: Vec<HeapPtr>,
}

impl SegregatedFreeList {
    pub fn new(size_classes: usize) -> Self {
        Self {
            heads: vec![EMPTY_PTR; size_classes.clamp(1, MAX_SIZE_CLASSES)],
        }
    }

    #[inline]
    pub fn size_classes(&self) -> usize {
        self.heads.len()
    }

    pub fn size_class(&self, size: u64) -> SizeClassId {
        let max_class = self.heads.len() - 1;
        let mut ceiling = 2 * MIN_BLOCK_SIZE - 1;
        let mut class = 0;

        while size > ceiling && class < max_class {
            ceiling = next_ceiling(ceiling);
            class += 1;
        }

        class
    }

    #[inline]
    pub fn head(&self, class: SizeClassId) -> Option<HeapPtr> {
        match self.heads[class] {
            EMPTY_PTR => None,
            ptr => Some(ptr),
        }
    }

    /// Links the free block at `ptr` into its bucket, right before the first entry that is not
    /// bigger than it.
    pub fn insert<R: HeapRegion>(&mut self, region: &mut R, ptr: HeapPtr) {
        let size = size_of_block(region, ptr);
        let class = self.size_class(size);

        let mut prev = EMPTY_PTR;
        let mut cur = self.heads[class];

        while cur != EMPTY_PTR {
            if size >= size_of_block(region, cur) {
                break;
            }

            prev = cur;
            cur = get_next_free(region, cur);
        }

        set_prev_free(region, ptr, prev);
        set_next_free(region, ptr, cur);

        if prev == EMPTY_PTR {
            self.heads[class] = ptr;
        } else {
            set_next_free(region, prev, ptr);
        }

        if cur != EMPTY_PTR {
            set_prev_free(region, cur, ptr);
        }

        log::trace!("free list: inserted {:#x} ({} bytes) into class {}", ptr, size, class);
    }

    /// Unlinks the free block at `ptr`. The block must be in the bucket matching its current
    /// size, so callers remove a block before rewriting its tags.
    pub fn remove<R: HeapRegion>(&mut self, region: &mut R, ptr: HeapPtr) {
        let size = size_of_block(region, ptr);
        let class = self.size_class(size);

        let prev = get_prev_free(region, ptr);
        let next = get_next_free(region, ptr);

        if prev == EMPTY_PTR {
            debug_assert_eq!(self.heads[class], ptr, "free block is not the head of its class");
            self.heads[class] = next;
        } else {
            set_next_free(region, prev, next);
        }

        if next != EMPTY_PTR {
            set_prev_free(region, next, prev);
        }

        clear_free_links(region, ptr);

        log::trace!("free list: removed {:#x} ({} bytes) from class {}", ptr, size, class);
    }

    /// First fit, looking only at bucket heads, starting from the class of `size`.
    pub fn find_fit<R: HeapRegion>(&self, region: &R, size: u64) -> Option<HeapPtr> {
        (self.size_class(size)..self.heads.len())
            .filter_map(|class| self.head(class))
            .find(|head| size_of_block(region, *head) >= size)
    }

    /// Entries of one bucket, head first.
    pub fn iter_class<'a, R: HeapRegion>(
        &self,
        region: &'a R,
        class: SizeClassId,
    ) -> FreeListIter<'a, R> {
        FreeListIter {
            region,
            cur: self.heads[class],
            // a corrupted (cyclic) list must not hang the caller
            remaining: region.size_bytes() / MIN_BLOCK_SIZE + 1,
        }
    }

    pub fn contains<R: HeapRegion>(&self, region: &R, ptr: HeapPtr) -> bool {
        self.occurrences(region, ptr) > 0
    }

    /// How many times `ptr` appears across all buckets.
    pub fn occurrences<R: HeapRegion>(&self, region: &R, ptr: HeapPtr) -> usize {
        (0..self.heads.len())
            .map(|class| {
                self.iter_class(region, class)
                    .filter(|it| *it == ptr)
                    .count()
            })
            .sum()
    }
}

/// Inclusive upper bound of the bucket after the one ending at `ceiling`.
#[inline]
pub(crate) const fn next_ceiling(ceiling: u64) -> u64 {
    ceiling.saturating_add(1).saturating_mul(2) - 1
}

pub struct FreeListIter<'a, R: HeapRegion> {
    region: &'a R,
    cur: HeapPtr,
    remaining: u64,
}

impl<'a, R: HeapRegion> Iterator for FreeListIter<'a, R> {
    type Item = HeapPtr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == EMPTY_PTR
            || self.remaining == 0
            || self.cur.saturating_add(DOUBLE_WORD_SIZE) > self.region.size_bytes()
        {
            return None;
        }

        let it = self.cur;
        self.cur = get_next_free(self.region, it);
        self.remaining -= 1;

        Some(it)
    }
}

#[cfg(test)]
mod tests {
    use crate::mem::block::{get_next_free, get_prev_free, write_tags};
    use crate::mem::free_list::{SegregatedFreeList, MAX_SIZE_CLASSES};
    use crate::mem::{HeapPtr, EMPTY_PTR};
    use crate::utils::heap_region::{HeapRegion, VecHeapRegion};

    fn region_with_free_blocks(sizes: &[u64]) -> (VecHeapRegion, Vec<HeapPtr>) {
        let mut region = VecHeapRegion::new();
        let total: u64 = sizes.iter().sum();
        region.grow(total + 32).unwrap();

        let mut ptrs = vec![];
        let mut ptr = 16;
        for size in sizes {
            write_tags(&mut region, ptr, *size, false);
            ptrs.push(ptr);
            ptr += size;
        }

        (region, ptrs)
    }

    #[test]
    fn size_class_works_fine() {
        let list = SegregatedFreeList::new(14);

        assert_eq!(list.size_class(32), 0);
        assert_eq!(list.size_class(48), 0);
        assert_eq!(list.size_class(64), 1);
        assert_eq!(list.size_class(96), 1);
        assert_eq!(list.size_class(112), 1);
        assert_eq!(list.size_class(128), 2);
        assert_eq!(list.size_class(4080), 6);
        assert_eq!(list.size_class(4096), 7);
        assert_eq!(list.size_class(4112), 7);
        assert_eq!(list.size_class(8192), 8);
        assert_eq!(list.size_class(32 << 13), 13);
        assert_eq!(list.size_class(u64::MAX & !0xF), 13);

        let list = SegregatedFreeList::new(3);
        assert_eq!(list.size_class(1 << 20), 2);

        let list = SegregatedFreeList::new(0);
        assert_eq!(list.size_classes(), 1);
        assert_eq!(list.size_class(4096), 0);

        let list = SegregatedFreeList::new(u32::MAX as usize);
        assert_eq!(list.size_classes(), MAX_SIZE_CLASSES);
        assert_eq!(list.size_class(32 << 40), 40);
        assert_eq!(list.size_class(u64::MAX & !0xF), 58);
    }

    #[test]
    fn insert_keeps_descending_order() {
        // all in class 2 (128..=255)
        let (mut region, ptrs) = region_with_free_blocks(&[160, 240, 144, 208, 160]);
        let mut list = SegregatedFreeList::new(14);

        for ptr in &ptrs {
            list.insert(&mut region, *ptr);
        }

        let sizes: Vec<_> = list
            .iter_class(&region, 2)
            .map(|it| crate::mem::block::size_of_block(&region, it))
            .collect();
        assert_eq!(sizes, vec![240, 208, 160, 160, 144]);

        // equal sizes: the newer one goes first
        let order: Vec<_> = list.iter_class(&region, 2).collect();
        assert_eq!(order[2], ptrs[4]);
        assert_eq!(order[3], ptrs[0]);

        // back links mirror forward links
        assert_eq!(get_prev_free(&region, order[0]), EMPTY_PTR);
        for pair in order.windows(2) {
            assert_eq!(get_next_free(&region, pair[0]), pair[1]);
            assert_eq!(get_prev_free(&region, pair[1]), pair[0]);
        }
        assert_eq!(get_next_free(&region, order[4]), EMPTY_PTR);
    }

    #[test]
    fn remove_works_fine() {
        let (mut region, ptrs) = region_with_free_blocks(&[160, 240, 144]);
        let mut list = SegregatedFreeList::new(14);

        for ptr in &ptrs {
            list.insert(&mut region, *ptr);
        }

        // middle
        list.remove(&mut region, ptrs[0]);
        assert_eq!(list.iter_class(&region, 2).collect::<Vec<_>>(), vec![ptrs[1], ptrs[2]]);
        assert_eq!(get_prev_free(&region, ptrs[2]), ptrs[1]);

        // head
        list.remove(&mut region, ptrs[1]);
        assert_eq!(list.head(2), Some(ptrs[2]));
        assert_eq!(get_prev_free(&region, ptrs[2]), EMPTY_PTR);

        // sole entry
        list.remove(&mut region, ptrs[2]);
        assert_eq!(list.head(2), None);
        assert!(!list.contains(&region, ptrs[2]));
    }

    #[test]
    fn find_fit_works_fine() {
        let (mut region, ptrs) = region_with_free_blocks(&[48, 96, 1024]);
        let mut list = SegregatedFreeList::new(14);

        assert_eq!(list.find_fit(&region, 32), None);

        for ptr in &ptrs {
            list.insert(&mut region, *ptr);
        }

        assert_eq!(list.find_fit(&region, 32), Some(ptrs[0]));
        assert_eq!(list.find_fit(&region, 48), Some(ptrs[0]));
        // the search for 64 starts above the 48 block's class
        assert_eq!(list.find_fit(&region, 64), Some(ptrs[1]));
        assert_eq!(list.find_fit(&region, 96), Some(ptrs[1]));
        assert_eq!(list.find_fit(&region, 112), Some(ptrs[2]));
        assert_eq!(list.find_fit(&region, 1024), Some(ptrs[2]));
        assert_eq!(list.find_fit(&region, 1040), None);
    }

    #[test]
    fn occurrences_work_fine() {
        let (mut region, ptrs) = region_with_free_blocks(&[32, 64]);
        let mut list = SegregatedFreeList::new(4);

        list.insert(&mut region, ptrs[1]);

        assert_eq!(list.occurrences(&region, ptrs[0]), 0);
        assert_eq!(list.occurrences(&region, ptrs[1]), 1);
    }
}
