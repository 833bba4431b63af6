//! Segregated free-list heap allocator.
//!
//! A [`SegregatedAllocator`] owns a growable [`HeapRegion`] (a plain `Vec<u8>` natively, stable
//! memory inside a canister) and hands out 16-byte aligned payload offsets from it. Free blocks
//! are kept in size-class buckets sorted largest-first, merged eagerly with their free
//! neighbours and split with an adjacency heuristic that keeps similar sizes together.
//!
//! ```
//! use seg_heap::{AllocatorConfig, SegregatedAllocator, VecHeapRegion};
//!
//! let mut heap = SegregatedAllocator::init(VecHeapRegion::new(), AllocatorConfig::default())
//!     .expect("no memory for the heap");
//!
//! let ptr = heap.allocate(100).unwrap();
//! heap.write(ptr, 0, b"hello").unwrap();
//!
//! let ptr = heap.resize(ptr, 1000).unwrap();
//! let mut buf = [0u8; 5];
//! heap.read(ptr, 0, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//!
//! heap.release(ptr);
//! assert!(heap.check_consistency());
//! ```

pub mod config;
pub mod mem;
pub mod utils;

pub use crate::config::AllocatorConfig;
pub use crate::mem::allocator::{OutOfBounds, SegregatedAllocator};
pub use crate::mem::check::{HeapStats, HeapViolation};
pub use crate::mem::HeapPtr;
pub use crate::utils::heap_region::{HeapRegion, OutOfMemory, VecHeapRegion};

#[cfg(target_family = "wasm")]
pub use crate::utils::heap_region::StableHeapRegion;
