use crate::config::AllocatorConfig;
use crate::mem::block::{
    next_block_ptr, prev_tag, read_header, size_of_block, write_tags, Block, Tag,
};
use crate::mem::free_list::{next_ceiling, SegregatedFreeList};
use crate::mem::{
    adjusted_size, align_up, HeapPtr, ALIGNMENT, BLOCK_OVERHEAD, INITIAL_HEAP_SIZE,
    MIN_BLOCK_SIZE, PROLOGUE_SIZE, WORD_SIZE,
};
use crate::utils::heap_region::{HeapRegion, OutOfMemory};
use crate::utils::isoprint;
use std::cmp::min;
use std::fmt::{Debug, Formatter};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OutOfBounds;

/// Segregated-fit allocator managing one growable heap region.
///
/// The heap starts with an allocated 16-byte prologue and always ends with a zero-size allocated
/// epilogue header:
///
/// ```text
/// [pad][prologue hdr][prologue ftr][block]...[block][epilogue hdr]
/// ```
///
/// Blocks are appended in front of the epilogue when the heap grows and never given back. Free
/// blocks are coalesced eagerly, so no two free blocks are ever neighbours.
///
/// The allocator is not synchronized in any way: callers that share it between threads have to
/// serialize every call themselves.
pub struct SegregatedAllocator<R: HeapRegion> {
    pub(crate) region: R,
    pub(crate) free_list: SegregatedFreeList,
    pub(crate) config: AllocatorConfig,
    pub(crate) chunk_size: u64,
    pub(crate) heap_start: u64,
    pub(crate) prologue: HeapPtr,
    pub(crate) epilogue: HeapPtr,
}

impl<R: HeapRegion> SegregatedAllocator<R> {
    /// Takes ownership of `region` and lays out the prologue and the epilogue with a single grow
    /// request. If the region is already non-empty the heap starts at its next 16-byte boundary.
    pub fn init(mut region: R, config: AllocatorConfig) -> Result<Self, OutOfMemory> {
        let cur_size = region.size_bytes();
        let padding = align_up(cur_size, ALIGNMENT) - cur_size;

        let heap_start = region.grow(padding + INITIAL_HEAP_SIZE)? + padding;
        let prologue = heap_start + PROLOGUE_SIZE;
        let epilogue = prologue + PROLOGUE_SIZE;

        region.write_word(heap_start, 0);
        write_tags(&mut region, prologue, PROLOGUE_SIZE, true);
        region.write_word(epilogue - WORD_SIZE, Tag::pack(0, true).raw());

        let chunk_size = align_up(config.chunk_size.max(MIN_BLOCK_SIZE), ALIGNMENT);
        let free_list = SegregatedFreeList::new(config.size_classes as usize);

        log::debug!(
            "heap initialized at {:#x}, chunk size {}, {} size classes",
            heap_start,
            chunk_size,
            free_list.size_classes()
        );

        Ok(Self {
            region,
            free_list,
            config,
            chunk_size,
            heap_start,
            prologue,
            epilogue,
        })
    }

    /// Returns a 16-byte aligned payload of at least `size` bytes, or `None` for a zero-size
    /// request or when the heap region can't grow any further.
    pub fn allocate(&mut self, size: usize) -> Option<HeapPtr> {
        let result = self.allocate_block(size);
        log::trace!("allocate({}) -> {:x?}", size, result);

        self.after_operation("allocate");

        result
    }

    /// Gives the block back. Passing `None` does nothing.
    ///
    /// `ptr` has to be a live pointer returned by this allocator; anything else corrupts the heap.
    pub fn release<P: Into<Option<HeapPtr>>>(&mut self, ptr: P) {
        if let Some(ptr) = ptr.into() {
            log::trace!("release({:#x})", ptr);
            self.release_block(ptr);
        }

        self.after_operation("release");
    }

    /// Changes the size of the allocation at `ptr`, keeping the first `min(old, new)` payload
    /// bytes.
    ///
    /// Works like `allocate` for `None` and like `release` for a zero `size`. Shrinking never moves
    /// the payload, growing first tries to absorb free neighbours and only then falls back to a new
    /// allocation plus a copy. When that fallback allocation fails, `None` is returned and the
    /// original block is left untouched.
    pub fn resize<P: Into<Option<HeapPtr>>>(&mut self, ptr: P, size: usize) -> Option<HeapPtr> {
        let ptr = ptr.into();

        let result = match ptr {
            None => self.allocate_block(size),
            Some(ptr) if size == 0 => {
                self.release_block(ptr);
                None
            }
            Some(ptr) => self.resize_block(ptr, size),
        };
        log::trace!("resize({:x?}, {}) -> {:x?}", ptr, size, result);

        self.after_operation("resize");

        result
    }

    /// Number of payload bytes the allocation at `ptr` can hold.
    pub fn usable_size(&self, ptr: HeapPtr) -> usize {
        (size_of_block(&self.region, ptr) - BLOCK_OVERHEAD) as usize
    }

    pub fn read(&self, ptr: HeapPtr, offset: usize, buf: &mut [u8]) -> Result<(), OutOfBounds> {
        self.check_bounds(ptr, offset, buf.len())?;
        self.region.read(ptr + offset as u64, buf);

        Ok(())
    }

    pub fn write(&mut self, ptr: HeapPtr, offset: usize, buf: &[u8]) -> Result<(), OutOfBounds> {
        self.check_bounds(ptr, offset, buf.len())?;
        self.region.write(ptr + offset as u64, buf);

        Ok(())
    }

    #[inline]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    #[inline]
    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn into_region(self) -> R {
        self.region
    }

    /// Every block between the prologue and the epilogue, in address order.
    pub fn blocks(&self) -> HeapBlocks<'_, R> {
        HeapBlocks {
            region: &self.region,
            cur: self.prologue + PROLOGUE_SIZE,
            end: self.epilogue,
        }
    }

    fn check_bounds(&self, ptr: HeapPtr, offset: usize, len: usize) -> Result<(), OutOfBounds> {
        match offset.checked_add(len) {
            Some(end) if end <= self.usable_size(ptr) => Ok(()),
            _ => Err(OutOfBounds),
        }
    }

    pub(crate) fn allocate_block(&mut self, size: usize) -> Option<HeapPtr> {
        if size == 0 {
            return None;
        }

        let asize = adjusted_size(size)?;

        let ptr = match self.free_list.find_fit(&self.region, asize) {
            Some(ptr) => ptr,
            None => self.extend_heap(asize).ok()?,
        };

        self.free_list.remove(&mut self.region, ptr);

        Some(self.place(ptr, asize))
    }

    pub(crate) fn release_block(&mut self, ptr: HeapPtr) {
        let size = size_of_block(&self.region, ptr);
        write_tags(&mut self.region, ptr, size, false);

        self.coalesce(ptr);
    }

    fn resize_block(&mut self, ptr: HeapPtr, size: usize) -> Option<HeapPtr> {
        let asize = adjusted_size(size)?;
        let cur_size = size_of_block(&self.region, ptr);

        if cur_size >= asize {
            self.crop(ptr, asize);
            return Some(ptr);
        }

        if let Some(new_ptr) = self.grow_in_place(ptr, cur_size, asize) {
            return Some(new_ptr);
        }

        log::trace!("resize({:#x}): no room around the block, moving", ptr);

        let new_ptr = self.allocate_block(size)?;
        let copy_size = min(cur_size - BLOCK_OVERHEAD, size as u64) as usize;
        self.region.copy_within(ptr, new_ptr, copy_size);

        self.release_block(ptr);

        Some(new_ptr)
    }

    /// Tries to reach `asize` by absorbing free neighbours: the next one alone first (no data
    /// movement), then the previous one (alone or together with the next one), which moves the
    /// payload down to the previous block's start.
    fn grow_in_place(&mut self, ptr: HeapPtr, cur_size: u64, asize: u64) -> Option<HeapPtr> {
        let prev = prev_tag(&self.region, ptr);
        let next_ptr = next_block_ptr(ptr, cur_size);
        let next = read_header(&self.region, next_ptr);

        let next_free = !next.is_allocated();
        let prev_free = !prev.is_allocated();

        if next_free && cur_size + next.size() >= asize {
            self.free_list.remove(&mut self.region, next_ptr);
            write_tags(&mut self.region, ptr, cur_size + next.size(), true);

            self.crop(ptr, asize);

            log::trace!("resize({:#x}): grown forward", ptr);
            return Some(ptr);
        }

        if !prev_free {
            return None;
        }

        let prev_ptr = ptr - prev.size();
        let total = if next_free {
            cur_size + prev.size() + next.size()
        } else {
            cur_size + prev.size()
        };

        if total < asize {
            return None;
        }

        self.free_list.remove(&mut self.region, prev_ptr);
        if next_free {
            self.free_list.remove(&mut self.region, next_ptr);
        }

        write_tags(&mut self.region, prev_ptr, total, true);
        self.region
            .copy_within(ptr, prev_ptr, (cur_size - BLOCK_OVERHEAD) as usize);

        self.crop(prev_ptr, asize);

        log::trace!("resize({:#x}): grown backward to {:#x}", ptr, prev_ptr);
        Some(prev_ptr)
    }

    fn after_operation(&self, operation: &str) {
        if self.config.strict_checks && !self.check_consistency() {
            log::warn!("heap is inconsistent after {}", operation);
        }

        if self.config.verbose {
            isoprint(&format!("heap after {}:\n{}", operation, self.dump_heap()));
        }
    }
}

pub struct HeapBlocks<'a, R: HeapRegion> {
    region: &'a R,
    cur: HeapPtr,
    end: HeapPtr,
}

impl<'a, R: HeapRegion> Iterator for HeapBlocks<'a, R> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur >= self.end {
            return None;
        }

        let block = Block::read_at(self.region, self.cur);
        if block.size == 0 || block.next_ptr() > self.end {
            // corrupted heap, nothing sensible to walk into
            self.cur = self.end;
            return None;
        }

        self.cur = block.next_ptr();

        Some(block)
    }
}

impl<R: HeapRegion> Debug for SegregatedAllocator<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("SegregatedAllocator");

        d.field("heap_start", &self.heap_start)
            .field("epilogue", &self.epilogue)
            .field("granted", &(self.region.size_bytes() - self.heap_start));

        let mut ceiling = 2 * MIN_BLOCK_SIZE - 1;
        for class in 0..self.free_list.size_classes() {
            let seg_class: Vec<_> = self
                .free_list
                .iter_class(&self.region, class)
                .map(|ptr| format!("{:#x} ({})", ptr, size_of_block(&self.region, ptr)))
                .collect();

            let name = if class + 1 == self.free_list.size_classes() {
                String::from("the rest")
            } else {
                format!("up to {}", ceiling)
            };

            d.field(name.as_str(), &seg_class);
            ceiling = next_ceiling(ceiling);
        }

        d.finish()
    }
}
