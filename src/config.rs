use candid::CandidType;
use serde::Deserialize;

pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 7;
pub const DEFAULT_SIZE_CLASSES: u32 = 14;

/// Runtime knobs of a [`SegregatedAllocator`](crate::SegregatedAllocator), read once at
/// construction.
#[derive(CandidType, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Minimum number of bytes requested from the heap region when nothing fits.
    pub chunk_size: u64,
    /// Number of segregated free-list buckets, clamped to `1..=64`.
    pub size_classes: u32,
    /// Validate the whole heap after every public operation and log what is broken.
    pub strict_checks: bool,
    /// Print a heap dump after every public operation.
    pub verbose: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            size_classes: DEFAULT_SIZE_CLASSES,
            strict_checks: false,
            verbose: false,
        }
    }
}

impl AllocatorConfig {
    pub fn debug() -> Self {
        Self {
            strict_checks: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{AllocatorConfig, DEFAULT_CHUNK_SIZE, DEFAULT_SIZE_CLASSES};
    use candid::{decode_one, encode_one};
    use serde_test::{assert_de_tokens, Token};

    #[test]
    fn partial_config_is_filled_with_defaults() {
        let expected = AllocatorConfig {
            chunk_size: 4096,
            ..AllocatorConfig::default()
        };

        assert_de_tokens(
            &expected,
            &[
                Token::Struct {
                    name: "AllocatorConfig",
                    len: 1,
                },
                Token::Str("chunk_size"),
                Token::U64(4096),
                Token::StructEnd,
            ],
        );

        assert_eq!(expected.size_classes, DEFAULT_SIZE_CLASSES);
        assert!(!expected.strict_checks);
    }

    #[test]
    fn candid_encoding_works_fine() {
        let config = AllocatorConfig {
            chunk_size: DEFAULT_CHUNK_SIZE * 2,
            size_classes: 8,
            strict_checks: true,
            verbose: false,
        };

        let bytes = encode_one(config).unwrap();
        let decoded: AllocatorConfig = decode_one(&bytes).unwrap();

        assert_eq!(decoded, config);
    }
}
