//! Memcached binary protocol.
//!
//! Every message starts with a fixed 24-byte header, followed by extras,
//! key and value, in that order. Multi-byte fields are big-endian.
//!
//! This crate provides the header codec, opcode and status tables, extras
//! layouts, a client-side request encoder and a response decoder. The
//! server-side framer lives with the server because it allocates value
//! storage directly from the cache.
//!
//! # Example
//!
//! ```
//! use protocol_memcache::{BinaryRequest, Opcode, RequestHeader, HEADER_SIZE};
//!
//! let bytes = BinaryRequest::set(b"abc", b"hello").flags(7).opaque(42).to_vec();
//!
//! let header = RequestHeader::parse(bytes[..HEADER_SIZE].try_into().unwrap()).unwrap();
//! assert_eq!(header.opcode, Opcode::Set as u8);
//! assert_eq!(header.key_len, 3);
//! assert_eq!(header.value_len(), 5);
//! ```

mod extras;
mod header;
mod opcode;
mod request;
mod response;
mod status;

pub use extras::Extras;
pub use header::{
    HEADER_SIZE, REQUEST_MAGIC, RESPONSE_MAGIC, RequestHeader, ResponseHeader,
};
pub use opcode::Opcode;
pub use request::BinaryRequest;
pub use response::Response;
pub use status::Status;

/// Longest key a client may send.
pub const MAX_KEY_LEN: usize = 250;

/// Parse error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Need more data to complete parsing.
    #[error("incomplete")]
    Incomplete,
    /// The magic byte does not mark a request or response.
    #[error("bad magic byte: {0:#04x}")]
    BadMagic(u8),
    /// The body is shorter than the extras and key it claims to carry.
    #[error("body length {body} shorter than key and extras ({required})")]
    BodyTooShort { body: u32, required: u32 },
    /// Extras do not match the layout the opcode requires.
    #[error("invalid extras length {len} for opcode {opcode:#04x}")]
    InvalidExtras { opcode: u8, len: u8 },
}
