//! Request framing for the binary protocol.
//!
//! The framer pulls complete requests out of a [`RecvBuf`] and pushes them
//! into a [`Batch`]. Packets may arrive split at any byte boundary. The
//! header, extras and key of a request are bounded in size and are parsed
//! only once they are fully buffered; values are copied straight into cache
//! blocks as bytes arrive, so a large value never has to be contiguous in
//! the receive buffer.
//!
//! Requests the framer can answer on its own (unknown opcode, oversized
//! key, malformed extras, value too large) are pushed with their status
//! already decided and their remaining body is skipped.

use protocol_memcache::{
    Extras, HEADER_SIZE, MAX_KEY_LEN, Opcode, ParseError, RequestHeader, Status,
};
use slab_cache::{Batch, RequestHead, SlabCache, ValueBuf};

use crate::buffer::RecvBuf;

/// Errors that end a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("bad magic byte: {0:#04x}")]
    BadMagic(u8),
    #[error("request needs {0} bytes of batch space")]
    RequestTooBig(usize),
    #[error("body length {body} shorter than key and extras ({required})")]
    BodyTooShort { body: u32, required: u32 },
    #[error("malformed request: {0}")]
    Malformed(ParseError),
}

/// Why [`Framer::parse`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The buffer holds no further complete request.
    NeedData,
    /// The batch cannot take the next request; execute it and call again.
    BatchFull,
}

#[derive(Debug)]
enum State {
    Header,
    /// Copying a value; the key is held in `Framer::key`.
    Value { head: RequestHead, value: ValueBuf },
    /// Skipping the body of a rejected request.
    Discard { remaining: usize },
}

/// Per-connection request framer.
#[derive(Debug)]
pub struct Framer {
    state: State,
    key: Vec<u8>,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            state: State::Header,
            key: Vec::with_capacity(MAX_KEY_LEN),
        }
    }

    /// Returns `true` when the framer sits on a request boundary.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Header)
    }

    /// Frame as many requests as `buf` and `batch` allow.
    pub fn parse<B: RecvBuf + ?Sized>(
        &mut self,
        buf: &mut B,
        cache: &SlabCache,
        batch: &mut Batch,
    ) -> Result<Progress, FrameError> {
        loop {
            match &mut self.state {
                State::Discard { remaining } => {
                    let n = (*remaining).min(buf.len());
                    buf.consume(n);
                    *remaining -= n;
                    if *remaining > 0 {
                        return Ok(Progress::NeedData);
                    }
                    self.state = State::Header;
                }
                State::Value { value, .. } => {
                    let n = value.fill(buf.as_slice());
                    buf.consume(n);
                    if !value.is_complete() {
                        return Ok(Progress::NeedData);
                    }
                    if let State::Value { head, value } =
                        std::mem::replace(&mut self.state, State::Header)
                    {
                        batch.push(head, &self.key, Some(value));
                    }
                }
                State::Header => {
                    if let Some(progress) = self.parse_header(buf, cache, batch)? {
                        return Ok(progress);
                    }
                }
            }
        }
    }

    /// Parse one header, extras and key. Returns `None` once the request
    /// has been consumed and the framer moved on.
    fn parse_header<B: RecvBuf + ?Sized>(
        &mut self,
        buf: &mut B,
        cache: &SlabCache,
        batch: &mut Batch,
    ) -> Result<Option<Progress>, FrameError> {
        let data = buf.as_slice();
        let Some(header) = data
            .get(..HEADER_SIZE)
            .and_then(|h| <&[u8; HEADER_SIZE]>::try_from(h).ok())
        else {
            return Ok(Some(Progress::NeedData));
        };
        let header = RequestHeader::parse(header).map_err(FrameError::from)?;

        let extras_len = header.extras_len as usize;
        let key_len = header.key_len as usize;
        let value_len = header.value_len();
        let head = RequestHead {
            opcode: header.opcode,
            opaque: header.opaque,
            cas: header.cas,
            extras: Extras::None,
        };

        let early = match Opcode::from_u8(header.opcode) {
            None => Err(Status::UnknownCommand),
            Some(_) if key_len > MAX_KEY_LEN => Err(Status::InvalidArguments),
            Some(op) => Ok(op),
        };
        let op = match early {
            Ok(op) => op,
            Err(status) => {
                if !self.ensure_room(batch, 0)? {
                    return Ok(Some(Progress::BatchFull));
                }
                buf.consume(HEADER_SIZE);
                batch.push_rejected(head, &[], status);
                self.discard(header.body_len as usize);
                return Ok(None);
            }
        };

        if !self.ensure_room(batch, key_len)? {
            return Ok(Some(Progress::BatchFull));
        }
        let fixed = HEADER_SIZE + extras_len + key_len;
        if data.len() < fixed {
            return Ok(Some(Progress::NeedData));
        }
        let key = &data[HEADER_SIZE + extras_len..fixed];

        let head = match Extras::decode(op, &data[HEADER_SIZE..HEADER_SIZE + extras_len]) {
            Ok(extras) => head.extras(extras),
            Err(_) => {
                batch.push_rejected(head, key, Status::InvalidArguments);
                buf.consume(fixed);
                self.discard(value_len);
                return Ok(None);
            }
        };

        if !op.has_value() {
            if value_len > 0 {
                batch.push_rejected(head, key, Status::InvalidArguments);
                buf.consume(fixed);
                self.discard(value_len);
            } else {
                batch.push(head, key, None);
                buf.consume(fixed);
            }
            return Ok(None);
        }

        match cache.allocate_value(value_len) {
            Ok(value) => {
                self.key.clear();
                self.key.extend_from_slice(key);
                buf.consume(fixed);
                self.state = State::Value { head, value };
            }
            Err(status) => {
                batch.push_rejected(head, key, status);
                buf.consume(fixed);
                self.discard(value_len);
            }
        }
        Ok(None)
    }

    /// Returns `false` if the batch must be drained first.
    fn ensure_room(&self, batch: &Batch, key_len: usize) -> Result<bool, FrameError> {
        if batch.has_room(key_len) {
            return Ok(true);
        }
        if batch.is_empty() {
            return Err(FrameError::RequestTooBig(
                key_len + Batch::REQUEST_OVERHEAD,
            ));
        }
        Ok(false)
    }

    fn discard(&mut self, remaining: usize) {
        if remaining > 0 {
            self.state = State::Discard { remaining };
        }
    }
}

impl From<ParseError> for FrameError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::BadMagic(magic) => Self::BadMagic(magic),
            ParseError::BodyTooShort { body, required } => Self::BodyTooShort { body, required },
            other => Self::Malformed(other),
        }
    }
}
