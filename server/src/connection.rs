//! Per-connection protocol state.
//!
//! A [`Connection`] owns the receive buffer, framer, batch and send buffer
//! of one client. The transport appends bytes with [`Connection::recv_buf`],
//! calls [`Connection::process`], then drains [`Connection::send_chunks`].

use bytes::BytesMut;
use slab_cache::{Batch, SlabCache};

use crate::buffer::{SegmentedBuf, SendBuf};
use crate::framer::{FrameError, Framer, Progress};
use crate::metrics::{BYTES_IN, BYTES_OUT, PROTOCOL_ERRORS, REQUESTS};
use crate::serializer;

/// Initial receive buffer capacity.
pub const RECV_CAPACITY: usize = 16 * 1024;

pub struct Connection {
    cache: SlabCache,
    framer: Framer,
    recv: BytesMut,
    send: SegmentedBuf,
    batch: Batch,
}

impl Connection {
    pub fn new(cache: SlabCache) -> Self {
        let batch = Batch::new(cache.max_batch_bytes());
        Self {
            cache,
            framer: Framer::new(),
            recv: BytesMut::with_capacity(RECV_CAPACITY),
            send: SegmentedBuf::default(),
            batch,
        }
    }

    /// Buffer for the transport to read into.
    pub fn recv_buf(&mut self) -> &mut BytesMut {
        &mut self.recv
    }

    /// Account for `n` bytes appended to the receive buffer.
    pub fn received(&mut self, n: usize) {
        BYTES_IN.add(n as u64);
        self.batch.record_bytes_in(n);
    }

    /// Frame, execute and serialize everything buffered.
    ///
    /// Responses produced before an error are still queued for sending.
    pub fn process(&mut self) -> Result<(), FrameError> {
        loop {
            let progress = self
                .framer
                .parse(&mut self.recv, &self.cache, &mut self.batch);
            if !self.batch.is_empty() {
                self.execute();
            }
            match progress {
                Err(e) => {
                    PROTOCOL_ERRORS.increment();
                    return Err(e);
                }
                Ok(Progress::NeedData) => return Ok(()),
                Ok(Progress::BatchFull) if self.batch.close_requested() => return Ok(()),
                Ok(Progress::BatchFull) => {}
            }
        }
    }

    fn execute(&mut self) {
        REQUESTS.add(self.batch.len() as u64);
        self.cache.execute(&mut self.batch);
        let written = serializer::write_batch(&self.batch, &mut self.send);
        BYTES_OUT.add(written as u64);
        self.batch.record_bytes_out(written);
        // releases values held by responses
        self.batch.clear();
    }

    /// Serialized responses waiting to be written.
    pub fn send_chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.send.chunks().filter(|chunk| !chunk.is_empty())
    }

    pub fn pending_send(&self) -> usize {
        self.send.len()
    }

    /// Forget sent data.
    pub fn clear_send(&mut self) {
        self.send.clear();
    }

    /// Returns `true` once a quit request has executed.
    pub fn should_close(&self) -> bool {
        self.batch.close_requested()
    }
}
