//! Error types for cache operations.

use std::fmt;

/// Errors that can occur during cache operations.
///
/// Per-request outcomes (key not found, CAS mismatch, ...) are not errors:
/// they are status codes carried back to the client. This type covers the
/// structural failures that callers outside the request path can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// No memory available to store the item.
    /// Eviction was attempted but could not free enough space, which means
    /// the configured capacity is too small for the request.
    OutOfMemory,

    /// The key is longer than the record layout allows.
    KeyTooLong,

    /// The value is larger than the configured maximum item size.
    ValueTooLong,

    /// The memory provider refused to hand out a region.
    Provider(std::io::ErrorKind),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::KeyTooLong => write!(f, "key too long"),
            Self::ValueTooLong => write!(f, "value too long"),
            Self::Provider(kind) => write!(f, "memory provider failure: {}", kind),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::Provider(e.kind())
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
