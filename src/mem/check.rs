use crate::mem::allocator::SegregatedAllocator;
use crate::mem::block::{
    get_prev_free, read_footer, read_header, size_of_block, Block, BlockState, Tag,
};
use crate::mem::free_list::SizeClassId;
use crate::mem::{HeapPtr, ALIGNMENT, EMPTY_PTR, PROLOGUE_SIZE, SENTINEL_OVERHEAD};
use crate::utils::heap_region::HeapRegion;
use crate::utils::isoprint;
use candid::CandidType;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Write};

/// Something the consistency checker found broken in the heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeapViolation {
    BadPrologue { header: Tag, footer: Tag },
    BadEpilogue { ptr: HeapPtr, tag: Tag },
    ZeroSizeBlock { ptr: HeapPtr },
    MisalignedBlock { ptr: HeapPtr },
    OutOfHeap { ptr: HeapPtr, size: u64 },
    TagMismatch { ptr: HeapPtr, header: Tag, footer: Tag },
    AdjacentFreeBlocks { first: HeapPtr, second: HeapPtr },
    /// A free block must be linked exactly once.
    FreeBlockMembership { ptr: HeapPtr, occurrences: usize },
    WrongSizeClass {
        ptr: HeapPtr,
        class: SizeClassId,
        expected: SizeClassId,
    },
    AllocatedBlockIndexed { ptr: HeapPtr },
    UnknownIndexEntry { ptr: HeapPtr, class: SizeClassId },
    UnsortedClass { ptr: HeapPtr, class: SizeClassId },
    BrokenBackLink { ptr: HeapPtr, class: SizeClassId },
    ConservationMismatch { accounted: u64, granted: u64 },
}

impl Display for HeapViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HeapViolation::BadPrologue { header, footer } => {
                write!(f, "bad prologue: header {:?}, footer {:?}", header, footer)
            }
            HeapViolation::BadEpilogue { ptr, tag } => {
                write!(f, "bad epilogue at {:#x}: {:?}", ptr, tag)
            }
            HeapViolation::ZeroSizeBlock { ptr } => {
                write!(f, "zero-size block at {:#x} before the epilogue", ptr)
            }
            HeapViolation::MisalignedBlock { ptr } => {
                write!(f, "block at {:#x} is not {}-byte aligned", ptr, ALIGNMENT)
            }
            HeapViolation::OutOfHeap { ptr, size } => {
                write!(f, "block at {:#x} ({} bytes) runs past the epilogue", ptr, size)
            }
            HeapViolation::TagMismatch {
                ptr,
                header,
                footer,
            } => write!(
                f,
                "block at {:#x}: header {:?} does not match footer {:?}",
                ptr, header, footer
            ),
            HeapViolation::AdjacentFreeBlocks { first, second } => write!(
                f,
                "free blocks at {:#x} and {:#x} were not coalesced",
                first, second
            ),
            HeapViolation::FreeBlockMembership { ptr, occurrences } => write!(
                f,
                "free block at {:#x} is linked {} times",
                ptr, occurrences
            ),
            HeapViolation::WrongSizeClass {
                ptr,
                class,
                expected,
            } => write!(
                f,
                "free block at {:#x} is in class {} instead of {}",
                ptr, class, expected
            ),
            HeapViolation::AllocatedBlockIndexed { ptr } => {
                write!(f, "allocated block at {:#x} is in the free list", ptr)
            }
            HeapViolation::UnknownIndexEntry { ptr, class } => write!(
                f,
                "class {} links {:#x} which is not a block of this heap",
                class, ptr
            ),
            HeapViolation::UnsortedClass { ptr, class } => write!(
                f,
                "class {} is not sorted largest-first at {:#x}",
                class, ptr
            ),
            HeapViolation::BrokenBackLink { ptr, class } => write!(
                f,
                "class {}: back link of {:#x} does not point to its predecessor",
                class, ptr
            ),
            HeapViolation::ConservationMismatch { accounted, granted } => write!(
                f,
                "blocks account for {} bytes, but {} bytes were granted",
                accounted, granted
            ),
        }
    }
}

#[derive(CandidType, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Bytes the heap got from its region, sentinels included.
    pub granted_bytes: u64,
    pub allocated_bytes: u64,
    pub free_bytes: u64,
    pub allocated_blocks: u64,
    pub free_blocks: u64,
    pub largest_free_block: u64,
    pub free_blocks_per_class: Vec<u64>,
}

impl<R: HeapRegion> SegregatedAllocator<R> {
    /// Block sizes are counted with their overhead. The prologue is not counted.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            granted_bytes: self.granted_bytes(),
            ..HeapStats::default()
        };

        for block in self.blocks() {
            if block.is_allocated() {
                stats.allocated_bytes += block.size;
                stats.allocated_blocks += 1;
            } else {
                stats.free_bytes += block.size;
                stats.free_blocks += 1;
                stats.largest_free_block = stats.largest_free_block.max(block.size);
            }
        }

        stats.free_blocks_per_class = (0..self.free_list.size_classes())
            .map(|class| self.free_list.iter_class(&self.region, class).count() as u64)
            .collect();

        stats
    }

    /// Logs every violation found and returns `true` when there are none.
    pub fn check_consistency(&self) -> bool {
        let violations = self.violations();

        for violation in &violations {
            log::warn!("heap violation: {}", violation);
            isoprint(&format!("heap violation: {}", violation));
        }

        violations.is_empty()
    }

    /// Walks the whole heap and the whole free-list index, collecting everything that breaks the
    /// heap invariants. Never modifies anything.
    pub fn violations(&self) -> Vec<HeapViolation> {
        let mut violations = vec![];
        let first_block = self.prologue + PROLOGUE_SIZE;

        // where every index entry is linked: ptr -> classes
        let mut linked: BTreeMap<HeapPtr, Vec<SizeClassId>> = BTreeMap::new();

        for class in 0..self.free_list.size_classes() {
            let mut prev = EMPTY_PTR;
            let mut prev_size = u64::MAX;

            for ptr in self.free_list.iter_class(&self.region, class) {
                linked.entry(ptr).or_default().push(class);

                if ptr < first_block || ptr >= self.epilogue {
                    violations.push(HeapViolation::UnknownIndexEntry { ptr, class });
                    break;
                }

                if get_prev_free(&self.region, ptr) != prev {
                    violations.push(HeapViolation::BrokenBackLink { ptr, class });
                }

                let size = size_of_block(&self.region, ptr);
                if size > prev_size {
                    violations.push(HeapViolation::UnsortedClass { ptr, class });
                }

                prev = ptr;
                prev_size = size;
            }
        }

        let prologue_header = read_header(&self.region, self.prologue);
        let prologue_footer = read_footer(&self.region, self.prologue, PROLOGUE_SIZE);
        let prologue_tag = Tag::pack(PROLOGUE_SIZE, true);

        if prologue_header != prologue_tag || prologue_footer != prologue_tag {
            violations.push(HeapViolation::BadPrologue {
                header: prologue_header,
                footer: prologue_footer,
            });
        }

        let mut accounted = PROLOGUE_SIZE + SENTINEL_OVERHEAD;
        let mut prev_free: Option<HeapPtr> = None;
        let mut ptr = first_block;

        while ptr < self.epilogue {
            let block = Block::read_at(&self.region, ptr);

            if block.size == 0 {
                violations.push(HeapViolation::ZeroSizeBlock { ptr });
                break;
            }

            if ptr % ALIGNMENT != 0 {
                violations.push(HeapViolation::MisalignedBlock { ptr });
            }

            if block.next_ptr() > self.epilogue {
                violations.push(HeapViolation::OutOfHeap {
                    ptr,
                    size: block.size,
                });
                break;
            }

            let header = read_header(&self.region, ptr);
            let footer = read_footer(&self.region, ptr, block.size);
            if header != footer {
                violations.push(HeapViolation::TagMismatch {
                    ptr,
                    header,
                    footer,
                });
            }

            let classes = linked.remove(&ptr).unwrap_or_default();

            match block.state {
                BlockState::Free { .. } => {
                    if let Some(first) = prev_free {
                        violations.push(HeapViolation::AdjacentFreeBlocks { first, second: ptr });
                    }

                    if classes.len() != 1 {
                        violations.push(HeapViolation::FreeBlockMembership {
                            ptr,
                            occurrences: classes.len(),
                        });
                    }

                    let expected = self.free_list.size_class(block.size);
                    for class in classes.into_iter().filter(|it| *it != expected) {
                        violations.push(HeapViolation::WrongSizeClass {
                            ptr,
                            class,
                            expected,
                        });
                    }

                    prev_free = Some(ptr);
                }
                BlockState::Allocated => {
                    if !classes.is_empty() {
                        violations.push(HeapViolation::AllocatedBlockIndexed { ptr });
                    }

                    prev_free = None;
                }
            }

            accounted += block.size;
            ptr = block.next_ptr();
        }

        // what is left was never met during the walk
        for (ptr, classes) in linked {
            if ptr >= first_block && ptr < self.epilogue {
                for class in classes {
                    violations.push(HeapViolation::UnknownIndexEntry { ptr, class });
                }
            }
        }

        let epilogue_tag = read_header(&self.region, self.epilogue);
        if ptr != self.epilogue
            || epilogue_tag != Tag::pack(0, true)
            || self.epilogue != self.region.size_bytes()
        {
            violations.push(HeapViolation::BadEpilogue {
                ptr: self.epilogue,
                tag: epilogue_tag,
            });
        }

        let granted = self.granted_bytes();
        if accounted != granted {
            violations.push(HeapViolation::ConservationMismatch { accounted, granted });
        }

        violations
    }

    /// Every block in address order, one per line, sentinels included.
    pub fn dump_heap(&self) -> String {
        let mut out = format!(
            "heap {:#x}..{:#x} ({} bytes granted)\n",
            self.heap_start,
            self.region.size_bytes(),
            self.granted_bytes()
        );

        let _ = writeln!(
            out,
            "{:#x}: prologue {:?}",
            self.prologue,
            read_header(&self.region, self.prologue)
        );

        for block in self.blocks() {
            let header = read_header(&self.region, block.ptr);
            let footer = read_footer(&self.region, block.ptr, block.size);

            let _ = match block.state {
                BlockState::Free { prev, next } => writeln!(
                    out,
                    "{:#x}: header {:?} footer {:?} prev {:#x} next {:#x}",
                    block.ptr, header, footer, prev, next
                ),
                BlockState::Allocated => writeln!(
                    out,
                    "{:#x}: header {:?} footer {:?}",
                    block.ptr, header, footer
                ),
            };
        }

        let _ = write!(
            out,
            "{:#x}: epilogue {:?}",
            self.epilogue,
            read_header(&self.region, self.epilogue)
        );

        out
    }

    fn granted_bytes(&self) -> u64 {
        self.region.size_bytes() - self.heap_start
    }
}
