//! Request batches and their responses.
//!
//! The framer turns wire bytes into [`Request`]s collected in a [`Batch`].
//! The executor consumes the requests under one lock acquisition and leaves
//! one [`Response`] per request, in order, for the serializer. Keys are kept
//! in a per-batch arena so responses can echo them without copying.

use std::mem::size_of;

use cache_core::fnv1a_64;
use protocol_memcache::{Extras, Opcode, Status};

use crate::config::DEFAULT_MAX_BATCH_BYTES;
use crate::stats::StatsSnapshot;
use crate::value::{ValueBuf, ValueRef};

/// Fixed fields of a request, decoded from the packet header and extras.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHead {
    /// Raw opcode byte; unknown opcodes are answered, not rejected.
    pub opcode: u8,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Extras,
}

impl RequestHead {
    /// A head for `opcode` with no extras.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode: opcode as u8,
            opaque: 0,
            cas: 0,
            extras: Extras::None,
        }
    }

    pub fn opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn extras(mut self, extras: Extras) -> Self {
        self.extras = extras;
        self
    }
}

/// A request waiting to be executed.
#[derive(Debug)]
pub struct Request {
    pub(crate) head: RequestHead,
    pub(crate) hash: u64,
    pub(crate) key: KeySpan,
    pub(crate) value: Option<ValueBuf>,
    /// Set when framing already decided the outcome.
    pub(crate) rejected: Option<Status>,
}

/// Location of a key in the batch arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct KeySpan {
    start: u32,
    len: u16,
}

impl KeySpan {
    #[inline]
    pub fn get(self, keys: &[u8]) -> &[u8] {
        &keys[self.start as usize..self.start as usize + self.len as usize]
    }
}

/// Body of a response.
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    /// A stored value, held until the response is dropped.
    Value(ValueRef),
    /// New value of an increment or decrement.
    Counter(u64),
    /// Version string.
    Version,
    /// Statistics; the response key selects one statistic or all of them.
    Stats(Box<StatsSnapshot>),
}

/// Outcome of one request.
#[derive(Debug)]
pub struct Response {
    pub opcode: u8,
    pub opaque: u32,
    pub status: Status,
    pub cas: u64,
    pub flags: u32,
    pub body: Body,
    pub(crate) key: KeySpan,
}

impl Response {
    pub(crate) fn new(head: &RequestHead, key: KeySpan, status: Status) -> Self {
        Self {
            opcode: head.opcode,
            opaque: head.opaque,
            status,
            cas: 0,
            flags: 0,
            body: Body::Empty,
            key,
        }
    }

    /// Returns `true` if nothing should be written for this response.
    ///
    /// Quiet retrievals only suppress misses; every other quiet opcode only
    /// suppresses success.
    pub fn is_silent(&self) -> bool {
        match Opcode::from_u8(self.opcode) {
            Some(op) if op.is_quiet() => {
                if op.is_retrieval() {
                    self.status == Status::KeyNotFound
                } else {
                    self.status.is_ok()
                }
            }
            _ => false,
        }
    }

    /// Returns `true` if the response carries the key back.
    pub fn echoes_key(&self) -> bool {
        matches!(self.status, Status::NoError | Status::KeyNotFound)
            && Opcode::from_u8(self.opcode).is_some_and(Opcode::returns_key)
    }

    /// Stored value, if this is a retrieval hit.
    pub fn value(&self) -> Option<&ValueRef> {
        match &self.body {
            Body::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// A batch of requests executed under one lock acquisition.
#[derive(Debug)]
pub struct Batch {
    pub(crate) keys: Vec<u8>,
    pub(crate) requests: Vec<Request>,
    pub(crate) responses: Vec<Response>,
    pub(crate) bytes_in: u64,
    pub(crate) bytes_out: u64,
    max_bytes: usize,
    close: bool,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH_BYTES)
    }
}

impl Batch {
    /// Bytes charged to the arena for each request record.
    pub const REQUEST_OVERHEAD: usize = size_of::<Request>();

    /// Create a batch whose arena holds at most `max_bytes`.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            keys: Vec::new(),
            requests: Vec::new(),
            responses: Vec::new(),
            bytes_in: 0,
            bytes_out: 0,
            max_bytes,
            close: false,
        }
    }

    /// Bytes currently charged to the arena.
    pub fn arena_bytes(&self) -> usize {
        self.keys.len() + self.requests.len() * Self::REQUEST_OVERHEAD
    }

    /// Returns `true` if a request with a key of `key_len` bytes fits.
    pub fn has_room(&self, key_len: usize) -> bool {
        self.arena_bytes() + key_len + Self::REQUEST_OVERHEAD <= self.max_bytes
    }

    /// Returns `true` if a request with a key of `key_len` bytes could fit
    /// in an empty batch.
    pub fn fits_empty(&self, key_len: usize) -> bool {
        key_len + Self::REQUEST_OVERHEAD <= self.max_bytes
    }

    fn store_key(&mut self, key: &[u8]) -> KeySpan {
        let span = KeySpan {
            start: self.keys.len() as u32,
            len: key.len().min(u16::MAX as usize) as u16,
        };
        self.keys.extend_from_slice(&key[..span.len as usize]);
        span
    }

    /// Queue a request.
    pub fn push(&mut self, head: RequestHead, key: &[u8], value: Option<ValueBuf>) {
        let key = self.store_key(key);
        self.requests.push(Request {
            head,
            hash: fnv1a_64(key.get(&self.keys)),
            key,
            value,
            rejected: None,
        });
    }

    /// Queue a request whose outcome framing already decided, such as an
    /// oversized key or value.
    pub fn push_rejected(&mut self, head: RequestHead, key: &[u8], status: Status) {
        let key = self.store_key(key);
        self.requests.push(Request {
            head,
            hash: 0,
            key,
            value: None,
            rejected: Some(status),
        });
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns `true` if no requests are queued.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Responses produced by the last execution, in request order.
    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    /// Key of the request a response answers.
    pub fn key(&self, response: &Response) -> &[u8] {
        response.key.get(&self.keys)
    }

    /// Count bytes read from the client, folded into stats on execution.
    pub fn record_bytes_in(&mut self, bytes: usize) {
        self.bytes_in += bytes as u64;
    }

    /// Count bytes written to the client, folded into stats on execution.
    pub fn record_bytes_out(&mut self, bytes: usize) {
        self.bytes_out += bytes as u64;
    }

    /// Returns `true` once a quit request has executed.
    pub fn close_requested(&self) -> bool {
        self.close
    }

    pub(crate) fn request_close(&mut self) {
        self.close = true;
    }

    /// Drop responses and reset the arena, releasing held values.
    ///
    /// Unexecuted requests and the close flag survive.
    pub fn clear(&mut self) {
        self.responses.clear();
        if self.requests.is_empty() {
            self.keys.clear();
        }
    }
}
