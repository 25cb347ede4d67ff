//! Framing tests: fragmentation, pipelining and rejected requests.
//!
//! Requests are fed through a [`Connection`] in slices of various sizes and
//! the serialized output is decoded with the client-side response parser.

use cache_core::HeapProvider;
use protocol_memcache::{BinaryRequest, Opcode, Response, Status};
use server::{Connection, FrameError};
use slab_cache::SlabCache;

fn cache() -> SlabCache {
    SlabCache::builder()
        .memory_limit_mb(8)
        .max_item_size(256 * 1024)
        .provider(HeapProvider::new())
        .build()
        .unwrap()
}

/// Feed `bytes` in pieces of `step` bytes, collecting all output.
fn feed_in_steps(conn: &mut Connection, bytes: &[u8], step: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for piece in bytes.chunks(step) {
        conn.recv_buf().extend_from_slice(piece);
        conn.received(piece.len());
        conn.process().unwrap();
        for chunk in conn.send_chunks() {
            out.extend_from_slice(chunk);
        }
        conn.clear_send();
    }
    out
}

fn parse_all(mut bytes: &[u8]) -> Vec<Response<'_>> {
    let mut responses = Vec::new();
    while !bytes.is_empty() {
        let (response, n) = Response::parse(bytes).unwrap();
        responses.push(response);
        bytes = &bytes[n..];
    }
    responses
}

fn pipeline() -> Vec<u8> {
    let value: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let mut bytes = Vec::new();
    bytes.extend(BinaryRequest::set(b"small", b"hello").flags(3).opaque(1).to_vec());
    bytes.extend(BinaryRequest::set(b"big", &value).opaque(2).to_vec());
    bytes.extend(BinaryRequest::getk(b"small").opaque(3).to_vec());
    bytes.extend(BinaryRequest::get(b"big").opaque(4).to_vec());
    bytes.extend(BinaryRequest::get(b"missing").quiet().opaque(5).to_vec());
    bytes.extend(BinaryRequest::increment(b"n", 5, 10, 0).opaque(6).to_vec());
    bytes.extend(BinaryRequest::noop().opaque(7).to_vec());
    bytes
}

fn check_pipeline(out: &[u8]) {
    let value: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let responses = parse_all(out);
    let opaques: Vec<u32> = responses.iter().map(|r| r.opaque()).collect();
    assert_eq!(opaques, vec![1, 2, 3, 4, 6, 7]);

    assert!(responses.iter().all(|r| r.status() == Some(Status::NoError)));
    assert_eq!(responses[2].key, b"small");
    assert_eq!(responses[2].value, b"hello");
    assert_eq!(responses[2].flags(), Some(3));
    assert_eq!(responses[3].value, &value[..]);
    assert_eq!(responses[4].counter(), Some(10));
    assert_eq!(responses[5].header.opcode, Opcode::Noop as u8);
}

#[test]
fn test_pipeline_in_one_read() {
    let mut conn = Connection::new(cache());
    let bytes = pipeline();
    let out = feed_in_steps(&mut conn, &bytes, bytes.len());
    check_pipeline(&out);
}

#[test]
fn test_pipeline_byte_by_byte() {
    let mut conn = Connection::new(cache());
    let out = feed_in_steps(&mut conn, &pipeline(), 1);
    check_pipeline(&out);
}

#[test]
fn test_pipeline_odd_fragments() {
    for step in [2, 7, 23, 24, 25, 1000, 4097] {
        let mut conn = Connection::new(cache());
        let out = feed_in_steps(&mut conn, &pipeline(), step);
        check_pipeline(&out);
    }
}

#[test]
fn test_large_value_streams_through() {
    let mut conn = Connection::new(cache());
    let value = vec![b'x'; 200 * 1024];
    let mut bytes = BinaryRequest::set(b"large", &value).to_vec();
    bytes.extend(BinaryRequest::get(b"large").to_vec());
    let out = feed_in_steps(&mut conn, &bytes, 1500);
    let responses = parse_all(&out);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[1].value.len(), value.len());
    assert!(responses[1].value.iter().all(|&b| b == b'x'));
}

#[test]
fn test_oversized_key_skips_body() {
    let mut conn = Connection::new(cache());
    let key = vec![b'k'; 300];
    let mut bytes = BinaryRequest::set(&key, b"value").opaque(1).to_vec();
    bytes.extend(BinaryRequest::noop().opaque(2).to_vec());
    let out = feed_in_steps(&mut conn, &bytes, 13);
    let responses = parse_all(&out);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].status(), Some(Status::InvalidArguments));
    assert_eq!(responses[1].opaque(), 2);
}

#[test]
fn test_oversized_value_skips_body() {
    let mut conn = Connection::new(cache());
    let value = vec![0u8; 300 * 1024];
    let mut bytes = BinaryRequest::set(b"k", &value).opaque(1).to_vec();
    bytes.extend(BinaryRequest::get(b"k").opaque(2).to_vec());
    let out = feed_in_steps(&mut conn, &bytes, 64 * 1024);
    let responses = parse_all(&out);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].status(), Some(Status::ValueTooLarge));
    assert_eq!(responses[1].status(), Some(Status::KeyNotFound));
}

#[test]
fn test_unknown_opcode_answered() {
    let mut conn = Connection::new(cache());
    let mut bytes = BinaryRequest::noop().opaque(9).to_vec();
    bytes[1] = 0x55;
    let out = feed_in_steps(&mut conn, &bytes, bytes.len());
    let responses = parse_all(&out);
    assert_eq!(responses[0].status(), Some(Status::UnknownCommand));
    assert_eq!(responses[0].header.opcode, 0x55);
    assert_eq!(responses[0].opaque(), 9);
}

#[test]
fn test_bad_extras_rejected() {
    let mut conn = Connection::new(cache());
    // a set without its 8 bytes of extras
    let bytes = BinaryRequest::new(Opcode::Set).to_vec();
    let out = feed_in_steps(&mut conn, &bytes, bytes.len());
    let responses = parse_all(&out);
    assert_eq!(responses[0].status(), Some(Status::InvalidArguments));
}

#[test]
fn test_value_on_get_rejected() {
    let mut conn = Connection::new(cache());
    let mut bytes = BinaryRequest::set(b"k", b"v").to_vec();
    // turn it into a get with extras and a value attached
    bytes[1] = Opcode::Get as u8;
    bytes[4] = 0;
    bytes[11] = 2;
    bytes.drain(24..32);
    let out = feed_in_steps(&mut conn, &bytes, bytes.len());
    let responses = parse_all(&out);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status(), Some(Status::InvalidArguments));
}

#[test]
fn test_bad_magic_ends_connection() {
    let mut conn = Connection::new(cache());
    let mut bytes = BinaryRequest::get(b"k").to_vec();
    bytes[0] = 0x81;
    conn.recv_buf().extend_from_slice(&bytes);
    assert_eq!(conn.process(), Err(FrameError::BadMagic(0x81)));
}

#[test]
fn test_body_shorter_than_key_ends_connection() {
    let mut conn = Connection::new(cache());
    let mut bytes = BinaryRequest::get(b"key").to_vec();
    // total body length 1 with a key length of 3
    bytes[8..12].copy_from_slice(&1u32.to_be_bytes());
    conn.recv_buf().extend_from_slice(&bytes);
    assert!(matches!(
        conn.process(),
        Err(FrameError::BodyTooShort { .. })
    ));
}

#[test]
fn test_many_requests_span_batches() {
    let cache = SlabCache::builder()
        .memory_limit_mb(8)
        .max_batch_bytes(4096)
        .provider(HeapProvider::new())
        .build()
        .unwrap();
    let mut conn = Connection::new(cache);
    let mut bytes = Vec::new();
    for i in 0..500u32 {
        let key = format!("key{}", i);
        bytes.extend(BinaryRequest::set(key.as_bytes(), b"v").quiet().to_vec());
    }
    for i in 0..500u32 {
        let key = format!("key{}", i);
        bytes.extend(BinaryRequest::getk(key.as_bytes()).opaque(i).to_vec());
    }
    let out = feed_in_steps(&mut conn, &bytes, bytes.len());
    let responses = parse_all(&out);
    assert_eq!(responses.len(), 500);
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(response.opaque(), i as u32);
        assert_eq!(response.key, format!("key{}", i).as_bytes());
    }
}
