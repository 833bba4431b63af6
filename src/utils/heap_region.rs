use crate::mem::{HeapPtr, WORD_SIZE};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OutOfMemory;

/// A byte region that can only grow.
///
/// This is the only thing the allocator needs from its host: it asks for more bytes at the end
/// of the region and reads/writes words and payload bytes at absolute offsets. Offsets passed to
/// `read`/`write` are always below `size_bytes()`.
pub trait HeapRegion {
    fn size_bytes(&self) -> u64;

    /// Appends `bytes` bytes to the region and returns the offset where they start (the old
    /// break). On failure the region is left as it was.
    fn grow(&mut self, bytes: u64) -> Result<HeapPtr, OutOfMemory>;

    fn read(&self, offset: u64, buf: &mut [u8]);
    fn write(&mut self, offset: u64, buf: &[u8]);

    fn read_word(&self, offset: u64) -> u64 {
        let mut buf = [0u8; WORD_SIZE as usize];
        self.read(offset, &mut buf);

        u64::from_le_bytes(buf)
    }

    fn write_word(&mut self, offset: u64, word: u64) {
        self.write(offset, &word.to_le_bytes());
    }

    /// Moves `len` bytes from `from` to `to`. The ranges may overlap.
    fn copy_within(&mut self, from: u64, to: u64, len: usize) {
        if from == to || len == 0 {
            return;
        }

        let mut buf = vec![0u8; len];
        self.read(from, &mut buf);
        self.write(to, &buf);
    }
}

/// Heap region backed by a plain `Vec<u8>`, optionally capped at `limit` bytes.
#[derive(Debug, Clone, Default)]
pub struct VecHeapRegion {
    bytes: Vec<u8>,
    limit: Option<u64>,
}

impl VecHeapRegion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: u64) -> Self {
        Self {
            bytes: Vec::new(),
            limit: Some(limit),
        }
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl HeapRegion for VecHeapRegion {
    fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn grow(&mut self, bytes: u64) -> Result<HeapPtr, OutOfMemory> {
        let prev_size = self.size_bytes();
        let new_size = prev_size.checked_add(bytes).ok_or(OutOfMemory)?;

        if let Some(limit) = self.limit {
            if new_size > limit {
                return Err(OutOfMemory);
            }
        }

        let new_size = usize::try_from(new_size).map_err(|_| OutOfMemory)?;
        self.bytes
            .try_reserve_exact(new_size - self.bytes.len())
            .map_err(|_| OutOfMemory)?;
        self.bytes.resize(new_size, 0);

        Ok(prev_size)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) {
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..(start + buf.len())]);
    }

    fn write(&mut self, offset: u64, buf: &[u8]) {
        let start = offset as usize;
        self.bytes[start..(start + buf.len())].copy_from_slice(buf);
    }

    fn copy_within(&mut self, from: u64, to: u64, len: usize) {
        let from = from as usize;
        self.bytes.copy_within(from..(from + len), to as usize);
    }
}

#[cfg(target_family = "wasm")]
pub use stable::StableHeapRegion;

#[cfg(target_family = "wasm")]
mod stable {
    use super::{HeapRegion, OutOfMemory};
    use crate::mem::HeapPtr;
    use ic_cdk::api::stable::{stable64_grow, stable64_read, stable64_size, stable64_write};

    pub const PAGE_SIZE_BYTES: u64 = 64 * 1024;

    /// Heap region living in the canister's stable memory, starting at offset 0.
    ///
    /// Stable memory only grows in 64 KiB pages, so the region keeps its own byte-granular break
    /// and asks for pages only when that break crosses the currently grown size.
    #[derive(Debug, Default)]
    pub struct StableHeapRegion {
        size: u64,
    }

    impl StableHeapRegion {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl HeapRegion for StableHeapRegion {
        fn size_bytes(&self) -> u64 {
            self.size
        }

        fn grow(&mut self, bytes: u64) -> Result<HeapPtr, OutOfMemory> {
            let prev_size = self.size;
            let new_size = prev_size.checked_add(bytes).ok_or(OutOfMemory)?;

            let grown_bytes = stable64_size() * PAGE_SIZE_BYTES;
            if new_size > grown_bytes {
                let missing = new_size - grown_bytes;
                let pages = (missing + PAGE_SIZE_BYTES - 1) / PAGE_SIZE_BYTES;

                stable64_grow(pages).map_err(|_| OutOfMemory)?;
            }

            self.size = new_size;

            Ok(prev_size)
        }

        fn read(&self, offset: u64, buf: &mut [u8]) {
            stable64_read(offset, buf)
        }

        fn write(&mut self, offset: u64, buf: &[u8]) {
            stable64_write(offset, buf)
        }
    }
}
