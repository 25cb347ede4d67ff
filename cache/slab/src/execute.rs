//! Request execution.
//!
//! A batch is executed under a single lock acquisition. Value buffers are
//! detached from their handles before anything else happens, so nothing
//! dropped inside the critical section tries to take the lock again.

use std::sync::Arc;

use cache_core::numeric::{MAX_DIGITS, format_decimal, parse_decimal};
use cache_core::time::expire_at;
use protocol_memcache::{Extras, MAX_KEY_LEN, Opcode, Status};

use crate::Inner;
use crate::request::{Batch, Body, Request, RequestHead, Response};
use crate::state::{CacheState, RawValue};
use crate::value::{ChainWriter, Chunks, Shape, ValueRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreMode {
    Set,
    Add,
    Replace,
}

impl CacheState {
    /// Execute every request in `batch`, leaving one response per request.
    ///
    /// Requests after a quit are dropped unanswered.
    pub(crate) fn execute(&mut self, batch: &mut Batch, inner: &Arc<Inner>) {
        self.stats.bytes_in += std::mem::take(&mut batch.bytes_in);
        self.stats.bytes_out += std::mem::take(&mut batch.bytes_out);

        let mut close = false;
        let mut requests = std::mem::take(&mut batch.requests);
        batch.responses.reserve(requests.len());

        for request in requests.drain(..) {
            if close {
                self.discard(request);
                continue;
            }
            let key = request.key.get(&batch.keys);
            let quit = Opcode::from_u8(request.head.opcode).map(Opcode::base) == Some(Opcode::Quit);
            let response = self.execute_one(request, key, inner);
            close = quit && response.status.is_ok();
            batch.responses.push(response);
        }

        // hand the allocation back for reuse
        batch.requests = requests;
        if close {
            batch.request_close();
        }
    }

    fn discard(&mut self, request: Request) {
        if let Some(buf) = request.value {
            let (head, len) = buf.into_raw();
            self.release_raw(RawValue { head, len });
        }
    }

    fn execute_one(&mut self, request: Request, key: &[u8], inner: &Arc<Inner>) -> Response {
        let Request {
            head,
            hash,
            key: span,
            value,
            rejected,
        } = request;

        let mut value = value.map(|buf| {
            let complete = buf.is_complete();
            let (head, len) = buf.into_raw();
            (RawValue { head, len }, complete)
        });

        let mut response = Response::new(&head, span, Status::NoError);
        self.stats.requests += 1;

        response.status = match (rejected, Opcode::from_u8(head.opcode)) {
            (Some(status), _) => status,
            (None, None) => Status::UnknownCommand,
            (None, Some(op)) if !op.is_special() && (key.is_empty() || key.len() > MAX_KEY_LEN) => {
                Status::InvalidArguments
            }
            (None, Some(_)) if value.as_ref().is_some_and(|(_, complete)| !complete) => {
                Status::InvalidArguments
            }
            (None, Some(op)) => {
                let mut raw = value.take().map(|(raw, _)| raw);
                let status = self.dispatch(op, hash, key, &head, &mut raw, &mut response, inner);
                if let Some(raw) = raw {
                    self.release_raw(raw);
                }
                if op.is_mutation() && status.is_ok() {
                    self.stats.updates += 1;
                }
                status
            }
        };

        if let Some((raw, _)) = value {
            self.release_raw(raw);
        }
        if !response.status.is_ok() {
            tracing::trace!(opcode = head.opcode, status = ?response.status, "request failed");
        }
        response
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &mut self,
        op: Opcode,
        hash: u64,
        key: &[u8],
        head: &RequestHead,
        value: &mut Option<RawValue>,
        response: &mut Response,
        inner: &Arc<Inner>,
    ) -> Status {
        let create = op.creates_on_miss();
        match op.base() {
            Opcode::Get | Opcode::GetK => self.get(hash, key, None, response, inner),
            Opcode::Gat | Opcode::GatK => {
                let Extras::Expiration(expiration) = head.extras else {
                    return Status::InvalidArguments;
                };
                self.get(hash, key, Some(expiration), response, inner)
            }
            Opcode::Touch => {
                let Extras::Expiration(expiration) = head.extras else {
                    return Status::InvalidArguments;
                };
                self.touch(hash, key, expiration, response)
            }
            Opcode::Set => self.store(hash, key, head, value, StoreMode::Set, create, response),
            Opcode::Add => self.store(hash, key, head, value, StoreMode::Add, create, response),
            Opcode::Replace => {
                self.store(hash, key, head, value, StoreMode::Replace, create, response)
            }
            Opcode::Append => self.concat(hash, key, head, value, false, create, response),
            Opcode::Prepend => self.concat(hash, key, head, value, true, create, response),
            Opcode::Increment => self.counter(hash, key, head, true, create, response),
            Opcode::Decrement => self.counter(hash, key, head, false, create, response),
            Opcode::Delete => self.delete(hash, key, head.cas),
            Opcode::Flush => {
                self.flush(head.extras.expiration());
                Status::NoError
            }
            Opcode::Stat => self.stat(key, response),
            Opcode::Version => {
                response.body = Body::Version;
                Status::NoError
            }
            Opcode::Noop | Opcode::Quit => Status::NoError,
            _ => Status::UnknownCommand,
        }
    }

    fn get(
        &mut self,
        hash: u64,
        key: &[u8],
        touch: Option<u32>,
        response: &mut Response,
        inner: &Arc<Inner>,
    ) -> Status {
        let Some(id) = self.find(hash, key) else {
            self.stats.misses += 1;
            return Status::KeyNotFound;
        };
        self.stats.hits += 1;

        if let Some(expiration) = touch {
            self.entries[id].expires = expire_at(expiration, self.now);
        }

        let entry = &self.entries[id];
        if let Some(head) = entry.value {
            self.arena.acquire_chain(head);
        }
        response.cas = entry.cas;
        response.flags = entry.flags;
        response.body = Body::Value(ValueRef::new(inner.clone(), entry.value, entry.value_len()));
        Status::NoError
    }

    fn touch(&mut self, hash: u64, key: &[u8], expiration: u32, response: &mut Response) -> Status {
        let Some(id) = self.find(hash, key) else {
            return Status::KeyNotFound;
        };
        let now = self.now;
        let entry = &mut self.entries[id];
        entry.expires = expire_at(expiration, now);
        response.cas = entry.cas;
        Status::NoError
    }

    /// Look up the entry a conditional write applies to, creating it when
    /// the opcode allows. A freshly created entry that fails the CAS check
    /// is removed again.
    fn cas_target(
        &mut self,
        hash: u64,
        key: &[u8],
        cas: u64,
        create: bool,
    ) -> Result<(u32, bool), Status> {
        let (id, created) = if create {
            self.find_or_create(hash, key)?
        } else {
            (self.find(hash, key).ok_or(Status::KeyNotFound)?, false)
        };
        if cas != 0 && cas != self.entries[id].cas {
            if created {
                self.remove(id);
            }
            return Err(Status::NotStored);
        }
        Ok((id, created))
    }

    fn finish_write(&mut self, id: u32, response: &mut Response) {
        let cas = self.next_cas();
        self.entries[id].cas = cas;
        response.cas = cas;
    }

    #[allow(clippy::too_many_arguments)]
    fn store(
        &mut self,
        hash: u64,
        key: &[u8],
        head: &RequestHead,
        value: &mut Option<RawValue>,
        mode: StoreMode,
        create: bool,
        response: &mut Response,
    ) -> Status {
        let (flags, expiration) = match head.extras {
            Extras::Storage { flags, expiration } => (flags, expiration),
            Extras::None => (0, 0),
            _ => return Status::InvalidArguments,
        };

        let (id, created) = match self.cas_target(hash, key, head.cas, create) {
            Ok(target) => target,
            Err(status) => return status,
        };
        if mode == StoreMode::Add && !created {
            return Status::KeyExists;
        }

        self.set_value(id, value.take().unwrap_or_default());
        let now = self.now;
        let entry = &mut self.entries[id];
        entry.flags = flags;
        entry.expires = expire_at(expiration, now);
        self.finish_write(id, response);
        Status::NoError
    }

    #[allow(clippy::too_many_arguments)]
    fn concat(
        &mut self,
        hash: u64,
        key: &[u8],
        head: &RequestHead,
        value: &mut Option<RawValue>,
        prepend: bool,
        create: bool,
        response: &mut Response,
    ) -> Status {
        let (id, _) = match self.cas_target(hash, key, head.cas, create) {
            Ok(target) => target,
            Err(status) => return status,
        };

        let add = value.take().unwrap_or_default();
        let entry = self.entries[id];
        let old_len = entry.value_len();

        match entry.value {
            None => self.set_value(id, add),
            Some(_) if add.len == 0 => {}
            Some(old) => {
                let total = old_len + add.len;
                if total > self.max_item_size {
                    self.release_raw(add);
                    return Status::ValueTooLarge;
                }

                if !prepend && Shape::of(total) == Shape::of(old_len) && self.arena.refs(old) == 1 {
                    let mut writer = ChainWriter::at(&self.arena, Some(old), total, old_len);
                    for chunk in Chunks::new(&self.arena, add.head, add.len) {
                        // SAFETY: the entry is the only owner of its chain and
                        // the chain already has room for `total` bytes
                        unsafe { writer.write(&self.arena, chunk) };
                    }
                    self.release_raw(add);
                    self.resize_value(id, total);
                } else {
                    let joined = match self.alloc_value(total, id) {
                        Ok(joined) => joined,
                        Err(status) => {
                            self.release_raw(add);
                            return status;
                        }
                    };
                    let existing = RawValue {
                        head: Some(old),
                        len: old_len,
                    };
                    let (first, second) = if prepend { (add, existing) } else { (existing, add) };
                    let mut writer = ChainWriter::at(&self.arena, joined.head, total, 0);
                    for part in [first, second] {
                        for chunk in Chunks::new(&self.arena, part.head, part.len) {
                            // SAFETY: `joined` is fresh and sized for both parts
                            unsafe { writer.write(&self.arena, chunk) };
                        }
                    }
                    self.release_raw(add);
                    self.set_value(id, joined);
                }
            }
        }

        self.finish_write(id, response);
        Status::NoError
    }

    #[allow(clippy::too_many_arguments)]
    fn counter(
        &mut self,
        hash: u64,
        key: &[u8],
        head: &RequestHead,
        increment: bool,
        create: bool,
        response: &mut Response,
    ) -> Status {
        let Extras::Counter {
            delta,
            initial,
            expiration,
        } = head.extras
        else {
            return Status::InvalidArguments;
        };

        // an all-ones expiration means "do not create"
        let create = create && expiration != u32::MAX;
        let (id, created) = match self.cas_target(hash, key, head.cas, create) {
            Ok(target) => target,
            Err(status) => return status,
        };

        let entry = self.entries[id];
        let number = if created || entry.value.is_none() {
            initial
        } else {
            if entry.value_len() > MAX_DIGITS {
                return Status::NonNumeric;
            }
            let mut digits = [0u8; MAX_DIGITS];
            let mut len = 0;
            for chunk in Chunks::new(&self.arena, entry.value, entry.value_len()) {
                digits[len..len + chunk.len()].copy_from_slice(chunk);
                len += chunk.len();
            }
            let Some(current) = parse_decimal(&digits[..len]) else {
                return Status::NonNumeric;
            };
            if increment {
                current.wrapping_add(delta)
            } else {
                current.saturating_sub(delta)
            }
        };

        let mut digits = [0u8; MAX_DIGITS];
        let len = format_decimal(number, &mut digits);

        match entry.value {
            Some(old) if Shape::of(len) == Shape::of(entry.value_len()) && self.arena.refs(old) == 1 => {
                // SAFETY: the entry is the only owner and the class fits `len`
                unsafe { self.arena.write(old, 0, &digits[..len]) };
                self.resize_value(id, len);
            }
            _ => {
                let raw = match self.alloc_value(len, id) {
                    Ok(raw) => raw,
                    Err(status) => {
                        if created {
                            self.remove(id);
                        }
                        return status;
                    }
                };
                if let Some(block) = raw.head {
                    // SAFETY: freshly allocated and sized for `len`
                    unsafe { self.arena.write(block, 0, &digits[..len]) };
                }
                self.set_value(id, raw);
            }
        }

        if created {
            self.entries[id].expires = expire_at(expiration, self.now);
        }
        self.finish_write(id, response);
        response.body = Body::Counter(number);
        Status::NoError
    }

    fn delete(&mut self, hash: u64, key: &[u8], cas: u64) -> Status {
        match self.cas_target(hash, key, cas, false) {
            Ok((id, _)) => {
                self.remove(id);
                Status::NoError
            }
            Err(status) => status,
        }
    }

    fn stat(&mut self, key: &[u8], response: &mut Response) -> Status {
        let snapshot = self.snapshot();
        if !key.is_empty() && snapshot.get(key).is_none() {
            return Status::KeyNotFound;
        }
        response.body = Body::Stats(Box::new(snapshot));
        Status::NoError
    }
}
