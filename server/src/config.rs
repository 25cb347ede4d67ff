//! Server configuration.
//!
//! Loaded from a TOML file with `[cache]`, `[[listener]]`, `[workers]` and
//! `[logging]` sections. Every section and field is optional; sizes accept
//! either a plain byte count or a string such as "64MB".

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use slab_cache::{
    DEFAULT_BUCKET_COUNT, DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_ITEM_SIZE,
    DEFAULT_MEMORY_LIMIT_MB, DEFAULT_PREWARM_BLOCKS, DEFAULT_REGION_SIZE, HugepageSize,
    MAX_MEMORY_LIMIT_MB, SlabCacheConfig,
};

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Errors from loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server configuration loaded from TOML file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    /// Addresses to accept connections on. Defaults to one listener on
    /// port 11211.
    #[serde(default = "default_listeners")]
    pub listener: Vec<ListenerConfig>,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            listener: default_listeners(),
            workers: WorkersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Cache sizing and tuning.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Total memory for items and index (e.g., "64MB", "4GB")
    #[serde(default = "default_memory_limit", deserialize_with = "deserialize_size")]
    pub memory_limit: usize,

    /// Number of top-level hashtable buckets
    #[serde(default = "default_bucket_count")]
    pub bucket_count: usize,

    /// Hugepage size preference: "none", "2mb", or "1gb"
    #[serde(default)]
    pub hugepage: HugepageConfig,

    /// Map the whole memory limit at startup
    #[serde(default)]
    pub reserve_memory: bool,

    /// Size of each memory region (e.g., "4MB")
    #[serde(default = "default_region_size", deserialize_with = "deserialize_size")]
    pub region_size: usize,

    /// Free blocks carved per size class at startup
    #[serde(default = "default_prewarm_blocks")]
    pub prewarm_blocks: usize,

    /// Chain length that splits a bucket
    #[serde(default = "default_split_threshold")]
    pub split_threshold: u16,

    #[serde(default = "default_split_growth")]
    pub split_growth: u16,

    #[serde(default = "default_max_split_depth")]
    pub max_split_depth: u8,

    /// Largest value accepted (e.g., "1MB")
    #[serde(default = "default_max_item_size", deserialize_with = "deserialize_size")]
    pub max_item_size: usize,

    /// Keys and request records buffered per batch (e.g., "1MB")
    #[serde(default = "default_max_batch_bytes", deserialize_with = "deserialize_size")]
    pub max_batch_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_limit: default_memory_limit(),
            bucket_count: default_bucket_count(),
            hugepage: HugepageConfig::default(),
            reserve_memory: false,
            region_size: default_region_size(),
            prewarm_blocks: default_prewarm_blocks(),
            split_threshold: default_split_threshold(),
            split_growth: default_split_growth(),
            max_split_depth: default_max_split_depth(),
            max_item_size: default_max_item_size(),
            max_batch_bytes: default_max_batch_bytes(),
        }
    }
}

/// Hugepage size configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HugepageConfig {
    #[default]
    None,
    TwoMegabyte,
    OneGigabyte,
}

impl<'de> Deserialize<'de> for HugepageConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "none" => Ok(HugepageConfig::None),
            "2mb" => Ok(HugepageConfig::TwoMegabyte),
            "1gb" => Ok(HugepageConfig::OneGigabyte),
            _ => Err(serde::de::Error::custom(format!(
                "invalid hugepage size: '{}' (expected 'none', '2mb', or '1gb')",
                s
            ))),
        }
    }
}

impl From<HugepageConfig> for HugepageSize {
    fn from(config: HugepageConfig) -> Self {
        match config {
            HugepageConfig::None => HugepageSize::None,
            HugepageConfig::TwoMegabyte => HugepageSize::TwoMegabyte,
            HugepageConfig::OneGigabyte => HugepageSize::OneGigabyte,
        }
    }
}

/// A listening socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    pub address: SocketAddr,
}

/// Worker thread configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    /// Number of runtime worker threads (default: number of CPUs)
    pub threads: Option<usize>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "slab_cache=debug,info".
    /// Overridden by RUST_LOG.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default = "default_true")]
    pub timestamps: bool,

    #[serde(default = "default_true")]
    pub target: bool,

    #[serde(default)]
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
            target: true,
            thread_names: false,
        }
    }
}

fn default_listeners() -> Vec<ListenerConfig> {
    vec![ListenerConfig {
        address: SocketAddr::from(([0, 0, 0, 0], 11211)),
    }]
}

fn default_memory_limit() -> usize {
    DEFAULT_MEMORY_LIMIT_MB * MB
}

fn default_bucket_count() -> usize {
    DEFAULT_BUCKET_COUNT
}

fn default_region_size() -> usize {
    DEFAULT_REGION_SIZE
}

fn default_prewarm_blocks() -> usize {
    DEFAULT_PREWARM_BLOCKS
}

fn default_split_threshold() -> u16 {
    8
}

fn default_split_growth() -> u16 {
    2
}

fn default_max_split_depth() -> u8 {
    3
}

fn default_max_item_size() -> usize {
    DEFAULT_MAX_ITEM_SIZE
}

fn default_max_batch_bytes() -> usize {
    DEFAULT_MAX_BATCH_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Deserialize a size string like "64MB" or "4GB" into bytes.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(usize),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

/// Parse a size string like "64MB", "4GB", "1TB" into bytes.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => KB,
        "M" | "MB" | "MIB" => MB,
        "G" | "GB" | "GIB" => GB,
        "T" | "TB" | "TIB" => 1024 * GB,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

/// Format a size in bytes as a human-readable string.
pub fn format_size(bytes: usize) -> String {
    if bytes >= GB && bytes.is_multiple_of(GB) {
        format!("{} GB", bytes / GB)
    } else if bytes >= MB && bytes.is_multiple_of(MB) {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB && bytes.is_multiple_of(KB) {
        format!("{} KB", bytes / KB)
    } else {
        format!("{} bytes", bytes)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cache = &self.cache;
        if cache.memory_limit < MB {
            return Err(ConfigError::Invalid(format!(
                "memory_limit ({}) must be at least 1 MB",
                format_size(cache.memory_limit)
            )));
        }
        if cache.memory_limit / MB > MAX_MEMORY_LIMIT_MB {
            return Err(ConfigError::Invalid(format!(
                "memory_limit ({}) exceeds {} MB",
                format_size(cache.memory_limit),
                MAX_MEMORY_LIMIT_MB
            )));
        }
        if cache.max_item_size >= cache.memory_limit {
            return Err(ConfigError::Invalid(format!(
                "max_item_size ({}) must be less than memory_limit ({})",
                format_size(cache.max_item_size),
                format_size(cache.memory_limit)
            )));
        }
        if cache.split_threshold == 0 {
            return Err(ConfigError::Invalid(
                "split_threshold must be nonzero".to_string(),
            ));
        }
        if self.listener.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one listener must be configured".to_string(),
            ));
        }
        if self.workers.threads == Some(0) {
            return Err(ConfigError::Invalid(
                "workers.threads must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of runtime worker threads.
    pub fn threads(&self) -> usize {
        self.workers.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Cache configuration for the builder.
    pub fn slab_config(&self) -> SlabCacheConfig {
        let cache = &self.cache;
        SlabCacheConfig {
            memory_limit_mb: cache.memory_limit.div_ceil(MB),
            bucket_count: cache.bucket_count,
            hugepage_size: cache.hugepage.into(),
            reserve_memory: cache.reserve_memory,
            region_size: cache.region_size,
            prewarm_blocks: cache.prewarm_blocks,
            split_threshold: cache.split_threshold,
            split_growth: cache.split_growth,
            max_split_depth: cache.max_split_depth,
            max_item_size: cache.max_item_size,
            max_batch_bytes: cache.max_batch_bytes,
        }
    }
}

/// Annotated default configuration, printed by `--print-config`.
pub const DEFAULT_CONFIG: &str = r#"# slabcached configuration

[cache]
# Total memory for items and index
memory_limit = "64MB"
# Top-level hashtable buckets (rounded up to a power of two)
bucket_count = 65536
# Hugepage preference: "none", "2mb", or "1gb"
hugepage = "none"
# Map the whole memory limit at startup
reserve_memory = false
# Memory is mapped and carved in regions of this size
region_size = "4MB"
# Free blocks carved per size class at startup
prewarm_blocks = 16
# Bucket chain length that triggers a split, plus growth per level
split_threshold = 8
split_growth = 2
max_split_depth = 3
# Largest value accepted
max_item_size = "1MB"
# Keys and request records buffered per batch
max_batch_bytes = "1MB"

[[listener]]
address = "0.0.0.0:11211"

[workers]
# threads = 4

[logging]
# Overridden by RUST_LOG
level = "info"
# "pretty", "compact", or "json"
format = "pretty"
timestamps = true
target = true
thread_names = false
"#;
