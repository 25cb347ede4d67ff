//! Response serialization.
//!
//! Walks the responses of an executed batch in order and writes one packet
//! per non-silent response. Values are copied chunk by chunk from cache
//! blocks into the send buffer, so neither side needs the value to be
//! contiguous.

use protocol_memcache::{HEADER_SIZE, ResponseHeader, Status};
use slab_cache::{Batch, Body, Chunks, Response, StatValue, StatsSnapshot};

use crate::buffer::SendBuf;

const VERSION: &str = env!("CARGO_PKG_VERSION");

enum Payload<'a> {
    Bytes(&'a [u8]),
    Chunks(Chunks<'a>, usize),
}

impl Payload<'_> {
    fn len(&self) -> usize {
        match self {
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Chunks(_, len) => *len,
        }
    }
}

/// Write every response of `batch`. Returns the number of bytes written.
pub fn write_batch<S: SendBuf + ?Sized>(batch: &Batch, out: &mut S) -> usize {
    let start = out.len();
    for response in batch.responses() {
        if response.is_silent() {
            continue;
        }
        write_response(response, batch.key(response), out);
    }
    out.len() - start
}

fn write_response<S: SendBuf + ?Sized>(response: &Response, key: &[u8], out: &mut S) {
    let echoed: &[u8] = if response.echoes_key() { key } else { &[] };
    let flags = response.flags.to_be_bytes();
    let counter;

    let (extras, payload): (&[u8], Payload<'_>) = match &response.body {
        Body::Stats(snapshot) => return write_stats(response, key, snapshot, out),
        Body::Value(value) => (&flags, Payload::Chunks(value.chunks(), value.len())),
        Body::Counter(n) => {
            counter = n.to_be_bytes();
            (&[], Payload::Bytes(&counter))
        }
        Body::Version => (&[], Payload::Bytes(VERSION.as_bytes())),
        // a keyed miss answers with the key alone
        Body::Empty if response.status == Status::KeyNotFound && !echoed.is_empty() => {
            (&[], Payload::Bytes(&[]))
        }
        Body::Empty => (&[], Payload::Bytes(response.status.message().as_bytes())),
    };

    write_header(response, extras.len(), echoed.len(), payload.len(), out);
    out.put(extras);
    out.put(echoed);
    match payload {
        Payload::Bytes(bytes) => out.put(bytes),
        Payload::Chunks(chunks, _) => {
            for chunk in chunks {
                out.put(chunk);
            }
        }
    }
}

/// One packet per statistic, or only the requested one, then an empty
/// packet to end the listing.
fn write_stats<S: SendBuf + ?Sized>(
    response: &Response,
    key: &[u8],
    snapshot: &StatsSnapshot,
    out: &mut S,
) {
    let mut number = itoa::Buffer::new();
    for (name, value) in snapshot.entries() {
        if !key.is_empty() && name.as_bytes() != key {
            continue;
        }
        let text = match value {
            StatValue::Number(n) => number.format(n),
            StatValue::Text(text) => text,
        };
        write_packet(response, name.as_bytes(), text.as_bytes(), out);
    }
    write_packet(response, &[], &[], out);
}

fn write_packet<S: SendBuf + ?Sized>(response: &Response, key: &[u8], value: &[u8], out: &mut S) {
    write_header(response, 0, key.len(), value.len(), out);
    out.put(key);
    out.put(value);
}

fn write_header<S: SendBuf + ?Sized>(
    response: &Response,
    extras_len: usize,
    key_len: usize,
    value_len: usize,
    out: &mut S,
) {
    let mut header = ResponseHeader::new(response.opcode, response.status, response.opaque);
    header.cas = response.cas;
    header.extras_len = extras_len as u8;
    header.key_len = key_len as u16;
    header.body_len = (extras_len + key_len + value_len) as u32;
    let mut bytes = [0u8; HEADER_SIZE];
    header.encode(&mut bytes);
    out.put(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SegmentedBuf;
    use cache_core::HeapProvider;
    use protocol_memcache::{Extras, Opcode, Response as Packet};
    use slab_cache::{RequestHead, SlabCache};

    fn cache() -> SlabCache {
        SlabCache::builder()
            .memory_limit_mb(4)
            .provider(HeapProvider::new())
            .build()
            .unwrap()
    }

    fn run(cache: &SlabCache, requests: &[(RequestHead, &[u8], Option<&[u8]>)]) -> Vec<u8> {
        let mut batch = Batch::default();
        for (head, key, value) in requests {
            let value = value.map(|v| cache.value_from(v).unwrap());
            batch.push(*head, key, value);
        }
        cache.execute(&mut batch);
        let mut out = SegmentedBuf::new(7);
        let written = write_batch(&batch, &mut out);
        assert_eq!(written, out.len());
        out.to_vec()
    }

    fn packets(bytes: &[u8]) -> Vec<Packet<'_>> {
        let mut packets = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let (packet, n) = Packet::parse(&bytes[pos..]).unwrap();
            packets.push(packet);
            pos += n;
        }
        packets
    }

    #[test]
    fn test_value_with_flags() {
        let cache = cache();
        cache.set(b"abc", b"hello world", 9, 0);
        let bytes = run(
            &cache,
            &[(RequestHead::new(Opcode::GetK).opaque(5), b"abc", None)],
        );
        let packets = packets(&bytes);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].status(), Some(Status::NoError));
        assert_eq!(packets[0].flags(), Some(9));
        assert_eq!(packets[0].key, b"abc");
        assert_eq!(packets[0].value, b"hello world");
        assert_eq!(packets[0].opaque(), 5);
        assert_ne!(packets[0].cas(), 0);
    }

    #[test]
    fn test_miss_messages() {
        let cache = cache();
        let bytes = run(
            &cache,
            &[
                (RequestHead::new(Opcode::Get), b"nope", None),
                (RequestHead::new(Opcode::GetK), b"nope", None),
            ],
        );
        let packets = packets(&bytes);
        assert_eq!(packets[0].status(), Some(Status::KeyNotFound));
        assert_eq!(packets[0].key, b"");
        assert_eq!(packets[0].value, b"Not found");
        assert_eq!(packets[1].key, b"nope");
        assert_eq!(packets[1].value, b"");
    }

    #[test]
    fn test_quiet_hits_and_misses() {
        let cache = cache();
        cache.set(b"a", b"1", 0, 0);
        let bytes = run(
            &cache,
            &[
                (RequestHead::new(Opcode::GetQ), b"a", None),
                (RequestHead::new(Opcode::GetQ), b"b", None),
                (RequestHead::new(Opcode::SetQ), b"c", Some(b"3")),
                (RequestHead::new(Opcode::Noop), b"", None),
            ],
        );
        let packets = packets(&bytes);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].value, b"1");
        assert_eq!(packets[1].header.opcode, Opcode::Noop as u8);
    }

    #[test]
    fn test_counter_body() {
        let cache = cache();
        let head = RequestHead::new(Opcode::Increment).extras(Extras::Counter {
            delta: 1,
            initial: 41,
            expiration: 0,
        });
        let bytes = run(&cache, &[(head, b"n", None), (head, b"n", None)]);
        let packets = packets(&bytes);
        assert_eq!(packets[0].counter(), Some(41));
        assert_eq!(packets[1].counter(), Some(42));
    }

    #[test]
    fn test_stats_listing() {
        let cache = cache();
        let bytes = run(&cache, &[(RequestHead::new(Opcode::Stat), b"", None)]);
        let packets = packets(&bytes);
        let last = packets.last().unwrap();
        assert!(last.key.is_empty() && last.value.is_empty());
        assert!(packets.iter().any(|p| p.key == b"curr_items"));
        assert!(packets.iter().any(|p| p.key == b"pid"));

        let bytes = run(&cache, &[(RequestHead::new(Opcode::Stat), b"version", None)]);
        let packets = self::packets(&bytes);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].value, VERSION.as_bytes());
    }

    #[test]
    fn test_version() {
        let cache = cache();
        let bytes = run(&cache, &[(RequestHead::new(Opcode::Version), b"", None)]);
        let packets = packets(&bytes);
        assert_eq!(packets[0].value, VERSION.as_bytes());
    }
}
