//! Configuration types for the slab cache.

use cache_core::HugepageSize;

/// Bytes reserved at the start of every block for the header word.
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Slab class sizes, including the block header.
///
/// Classes step geometrically from a 32 byte quantum. Payload capacity of a
/// class is its size minus [`BLOCK_HEADER_SIZE`].
pub const SLAB_CLASSES: [usize; 12] = [
    32,   // 0
    64,   // 1
    96,   // 2
    128,  // 3
    192,  // 4
    256,  // 5
    384,  // 6
    512,  // 7
    768,  // 8
    1024, // 9
    1536, // 10
    2048, // 11
];

/// Largest payload a single slab block can hold.
pub const LAST_SLAB_PAYLOAD: usize = 2048 - BLOCK_HEADER_SIZE;

/// Size of a big block, including the header.
pub const BIG_BLOCK_SIZE: usize = 3072;

/// Payload carried by each big block of a chain.
pub const BIG_BLOCK_PAYLOAD: usize = BIG_BLOCK_SIZE - BLOCK_HEADER_SIZE;

/// Fan-out of a split bucket sub-table.
pub const SUBTABLE_FANOUT: usize = 16;

/// Size of a dedicated bucket sub-table block, including the header.
pub const BUCKET_BLOCK_SIZE: usize = BLOCK_HEADER_SIZE + SUBTABLE_FANOUT * 8;

/// Upper bound on the memory limit, in megabytes.
pub const MAX_MEMORY_LIMIT_MB: usize = 1_048_576;

/// Default memory limit (64MB).
pub const DEFAULT_MEMORY_LIMIT_MB: usize = 64;

/// Default hashtable size (64K buckets).
pub const DEFAULT_BUCKET_COUNT: usize = 64 * 1024;

/// Default region size (4MB).
pub const DEFAULT_REGION_SIZE: usize = 4 * 1024 * 1024;

/// Default number of blocks pre-warmed per class.
pub const DEFAULT_PREWARM_BLOCKS: usize = 16;

/// Default largest value accepted (1MB).
pub const DEFAULT_MAX_ITEM_SIZE: usize = 1024 * 1024;

/// Default cap on the bytes buffered for one batch of requests (1MB).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;

const MB: usize = 1024 * 1024;
const MIN_REGION_SIZE: usize = 64 * 1024;
const MAX_REGION_SIZE: usize = 1024 * MB;
const MAX_REGIONS: usize = u16::MAX as usize - 1;
const MAX_SPLIT_DEPTH: u8 = 8;

/// Find the smallest slab class whose payload fits `len` bytes.
///
/// Returns `None` if `len` is larger than [`LAST_SLAB_PAYLOAD`].
#[inline]
pub fn select_class(len: usize) -> Option<u8> {
    SLAB_CLASSES
        .iter()
        .position(|&size| size - BLOCK_HEADER_SIZE >= len)
        .map(|idx| idx as u8)
}

/// Get the block size for a given class ID.
#[inline]
pub fn class_size(class_id: u8) -> Option<usize> {
    SLAB_CLASSES.get(class_id as usize).copied()
}

/// Number of big blocks needed to hold `len` bytes.
#[inline]
pub fn big_block_count(len: usize) -> usize {
    len.div_ceil(BIG_BLOCK_PAYLOAD)
}

/// Cache configuration.
///
/// Use [`SlabCacheBuilder`](crate::SlabCacheBuilder) to construct a cache;
/// the builder fills this in.
#[derive(Debug, Clone)]
pub struct SlabCacheConfig {
    /// Total memory limit in megabytes.
    pub memory_limit_mb: usize,
    /// Number of top-level hashtable buckets. Rounded up to a power of two.
    pub bucket_count: usize,
    /// Hugepage size preference for regions.
    pub hugepage_size: HugepageSize,
    /// Allocate every region up front instead of on demand.
    pub reserve_memory: bool,
    /// Size of each region carved into blocks.
    pub region_size: usize,
    /// Blocks carved into each free list when the cache starts.
    pub prewarm_blocks: usize,
    /// Chain length that splits a top-level bucket.
    pub split_threshold: u16,
    /// Extra chain length allowed per trie level.
    pub split_growth: u16,
    /// Maximum number of nested sub-tables below a top-level bucket.
    pub max_split_depth: u8,
    /// Largest value accepted.
    pub max_item_size: usize,
    /// Bytes of keys and request records buffered for one batch.
    pub max_batch_bytes: usize,
}

impl Default for SlabCacheConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            bucket_count: DEFAULT_BUCKET_COUNT,
            hugepage_size: HugepageSize::None,
            reserve_memory: false,
            region_size: DEFAULT_REGION_SIZE,
            prewarm_blocks: DEFAULT_PREWARM_BLOCKS,
            split_threshold: 8,
            split_growth: 2,
            max_split_depth: 3,
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

impl SlabCacheConfig {
    /// Memory limit in bytes, after capping.
    pub fn memory_limit(&self) -> usize {
        self.memory_limit_mb.clamp(1, MAX_MEMORY_LIMIT_MB) * MB
    }

    /// Number of top-level buckets, as a power of two.
    pub fn buckets(&self) -> usize {
        self.bucket_count.clamp(16, 1 << 30).next_power_of_two()
    }

    /// Region size actually used.
    ///
    /// Regions are addressed with a 16-bit index and a 32-bit offset, so the
    /// size is clamped to fit both and grown when the limit would need more
    /// regions than can be addressed.
    pub fn effective_region_size(&self) -> usize {
        let limit = self.memory_limit();
        let min_for_limit = limit.div_ceil(MAX_REGIONS).next_multiple_of(4096);
        self.region_size
            .clamp(MIN_REGION_SIZE, MAX_REGION_SIZE)
            .max(min_for_limit)
            .min(limit.max(MIN_REGION_SIZE))
    }

    /// Number of regions that fit within the memory limit.
    pub fn region_count(&self) -> usize {
        (self.memory_limit() / self.effective_region_size()).clamp(1, MAX_REGIONS)
    }

    /// Split depth limit, after capping.
    pub fn split_depth(&self) -> u8 {
        self.max_split_depth.min(MAX_SPLIT_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_class_exact() {
        assert_eq!(select_class(0), Some(0));
        assert_eq!(select_class(24), Some(0));
        assert_eq!(select_class(56), Some(1));
        assert_eq!(select_class(LAST_SLAB_PAYLOAD), Some(11));
    }

    #[test]
    fn test_select_class_between() {
        assert_eq!(select_class(25), Some(1));
        assert_eq!(select_class(57), Some(2));
        assert_eq!(select_class(1100), Some(10));
    }

    #[test]
    fn test_select_class_too_large() {
        assert_eq!(select_class(LAST_SLAB_PAYLOAD + 1), None);
        assert_eq!(select_class(BIG_BLOCK_PAYLOAD), None);
    }

    #[test]
    fn test_class_size() {
        assert_eq!(class_size(0), Some(32));
        assert_eq!(class_size(11), Some(2048));
        assert_eq!(class_size(12), None);
    }

    #[test]
    fn test_classes_are_aligned() {
        for size in SLAB_CLASSES {
            assert_eq!(size % 32, 0);
        }
        assert_eq!(BUCKET_BLOCK_SIZE % 8, 0);
        assert_eq!(BIG_BLOCK_SIZE % 8, 0);
    }

    #[test]
    fn test_big_block_count() {
        assert_eq!(big_block_count(BIG_BLOCK_PAYLOAD), 1);
        assert_eq!(big_block_count(BIG_BLOCK_PAYLOAD + 1), 2);
        assert_eq!(big_block_count(225 * 1024), 76);
    }

    #[test]
    fn test_config_defaults() {
        let config = SlabCacheConfig::default();
        assert_eq!(config.memory_limit(), 64 * MB);
        assert_eq!(config.buckets(), DEFAULT_BUCKET_COUNT);
        assert_eq!(config.region_count(), 16);
        assert_eq!(config.split_threshold, 8);
        assert_eq!(config.max_split_depth, 3);
    }

    #[test]
    fn test_memory_limit_capped() {
        let config = SlabCacheConfig {
            memory_limit_mb: usize::MAX / MB,
            ..Default::default()
        };
        assert_eq!(config.memory_limit(), MAX_MEMORY_LIMIT_MB * MB);
        assert!(config.region_count() <= MAX_REGIONS);
        assert!(config.effective_region_size() <= MAX_REGION_SIZE);
    }

    #[test]
    fn test_bucket_count_power_of_two() {
        let config = SlabCacheConfig {
            bucket_count: 1000,
            ..Default::default()
        };
        assert_eq!(config.buckets(), 1024);
    }

    #[test]
    fn test_region_size_bounded_by_limit() {
        let config = SlabCacheConfig {
            memory_limit_mb: 1,
            region_size: 16 * MB,
            ..Default::default()
        };
        assert_eq!(config.effective_region_size(), MB);
        assert_eq!(config.region_count(), 1);
    }
}
