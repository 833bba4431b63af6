use seg_heap::{AllocatorConfig, HeapPtr, SegregatedAllocator, VecHeapRegion};
use std::collections::HashMap;

// a <id> <size> | r <id> <size> | f <id>
const BINARY_TRACE: &str = "
a 0 64
a 1 448
a 2 64
a 3 448
a 4 64
a 5 448
f 1
f 3
f 5
a 6 512
a 7 512
a 8 512
f 0
f 2
f 4
f 6
f 7
f 8
";

const REALLOC_TRACE: &str = "
a 0 512
a 1 128
r 0 640
a 2 128
f 1
r 0 768
a 3 128
f 2
r 0 896
a 4 128
f 3
r 0 1024
f 4
r 0 100
r 0 5000
f 0
";

const COALESCING_TRACE: &str = "
a 0 4095
a 1 4095
a 2 4095
f 1
f 0
a 3 8190
f 2
a 4 4095
f 3
f 4
";

fn replay(trace: &str, config: AllocatorConfig) -> SegregatedAllocator<VecHeapRegion> {
    let mut heap = SegregatedAllocator::init(VecHeapRegion::new(), config).unwrap();
    let mut live: HashMap<u32, (HeapPtr, usize)> = HashMap::new();

    for (line_no, line) in trace.lines().map(str::trim).enumerate() {
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let id: u32 = parts[1].parse().unwrap();
        let size = parts.get(2).map(|it| it.parse::<usize>().unwrap());

        match (parts[0], size) {
            ("a", Some(size)) => {
                let ptr = heap
                    .allocate(size)
                    .unwrap_or_else(|| panic!("Unable to allocate on line {}", line_no));

                heap.write(ptr, 0, &vec![id as u8; size]).unwrap();
                live.insert(id, (ptr, size));
            }
            ("r", Some(size)) => {
                let (ptr, old_size) = live[&id];
                let new_ptr = heap
                    .resize(ptr, size)
                    .unwrap_or_else(|| panic!("Unable to resize on line {}", line_no));

                let mut buf = vec![0u8; old_size.min(size)];
                heap.read(new_ptr, 0, &mut buf).unwrap();
                assert!(
                    buf.iter().all(|it| *it == id as u8),
                    "payload lost on line {}",
                    line_no
                );

                heap.write(new_ptr, 0, &vec![id as u8; size]).unwrap();
                live.insert(id, (new_ptr, size));
            }
            ("f", None) => {
                let (ptr, _) = live.remove(&id).unwrap();
                heap.release(ptr);
            }
            _ => panic!("Malformed trace line {}: {}", line_no, line),
        }

        assert!(heap.check_consistency(), "inconsistent heap after line {}", line_no);
    }

    assert!(live.is_empty(), "trace leaves live blocks");

    heap
}

#[test]
fn binary_trace_works_fine() {
    let heap = replay(BINARY_TRACE, AllocatorConfig::debug());

    let stats = heap.stats();
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
}

#[test]
fn realloc_trace_works_fine() {
    let heap = replay(REALLOC_TRACE, AllocatorConfig::debug());

    assert_eq!(heap.stats().allocated_blocks, 0);
}

#[test]
fn coalescing_trace_reuses_merged_space() {
    let heap = replay(COALESCING_TRACE, AllocatorConfig::default());

    // both later requests fit into merged space, so only the first three grew the heap
    let stats = heap.stats();
    assert_eq!(stats.granted_bytes, 32 + 3 * 4112);
    assert_eq!(stats.free_blocks, 1);
}

#[test]
fn traces_work_with_few_size_classes() {
    let config = AllocatorConfig {
        size_classes: 1,
        chunk_size: 4096,
        ..AllocatorConfig::debug()
    };

    for trace in [BINARY_TRACE, REALLOC_TRACE, COALESCING_TRACE] {
        let heap = replay(trace, config);
        assert_eq!(heap.stats().allocated_blocks, 0);
    }
}
