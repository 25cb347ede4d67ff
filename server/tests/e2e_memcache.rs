//! End-to-end tests over TCP.
//!
//! Each test starts the tokio server on its own port in a background
//! thread and talks to it with a blocking client.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use protocol_memcache::{BinaryRequest, Opcode, ParseError, Response, Status};
use server::Config;
use slab_cache::SlabCache;

struct TestServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start() -> Self {
        let port = get_available_port();
        let config = Config::parse(&format!(
            r#"
            [cache]
            memory_limit = "16MB"
            max_item_size = "512KB"

            [[listener]]
            address = "127.0.0.1:{}"

            [workers]
            threads = 2
            "#,
            port
        ))
        .unwrap();

        let addr = config.listener[0].address;
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::spawn(move || {
            let cache = SlabCache::builder()
                .config(config.slab_config())
                .build()
                .unwrap();
            server::listener::run(&config, cache, flag).unwrap();
        });

        assert!(wait_for_server(addr, Duration::from_secs(5)));
        Self {
            addr,
            shutdown,
            handle: Some(handle),
        }
    }

    fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Client {
            stream,
            buf: Vec::new(),
        }
    }

    fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Get an available port for testing.
fn get_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Wait for server to be ready by attempting connections.
fn wait_for_server(addr: SocketAddr, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect_timeout(&addr, Duration::from_millis(100)).is_ok() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// An owned copy of a response packet.
#[derive(Debug)]
struct Reply {
    opcode: u8,
    status: Option<Status>,
    opaque: u32,
    cas: u64,
    flags: Option<u32>,
    counter: Option<u64>,
    key: Vec<u8>,
    value: Vec<u8>,
}

struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    fn send(&mut self, request: BinaryRequest<'_>) {
        self.stream.write_all(&request.to_vec()).unwrap();
    }

    fn recv(&mut self) -> Reply {
        loop {
            match Response::parse(&self.buf) {
                Ok((response, n)) => {
                    let reply = Reply {
                        opcode: response.header.opcode,
                        status: response.status(),
                        opaque: response.opaque(),
                        cas: response.cas(),
                        flags: response.flags(),
                        counter: response.counter(),
                        key: response.key.to_vec(),
                        value: response.value.to_vec(),
                    };
                    self.buf.drain(..n);
                    return reply;
                }
                Err(ParseError::Incomplete) => {
                    let mut chunk = [0u8; 16 * 1024];
                    let n = self.stream.read(&mut chunk).unwrap();
                    assert!(n > 0, "server closed the connection");
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => panic!("bad response: {}", e),
            }
        }
    }

    fn call(&mut self, request: BinaryRequest<'_>) -> Reply {
        self.send(request);
        self.recv()
    }

    /// Returns `true` if the server closed the connection.
    fn is_closed(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(self.stream.read(&mut byte), Ok(0))
    }
}

#[test]
fn test_set_get_delete() {
    let server = TestServer::start();
    let mut client = server.connect();

    let reply = client.call(BinaryRequest::set(b"hello", b"world").flags(42));
    assert_eq!(reply.status, Some(Status::NoError));
    assert_ne!(reply.cas, 0);

    let reply = client.call(BinaryRequest::getk(b"hello").opaque(7));
    assert_eq!(reply.status, Some(Status::NoError));
    assert_eq!(reply.flags, Some(42));
    assert_eq!(reply.key, b"hello");
    assert_eq!(reply.value, b"world");
    assert_eq!(reply.opaque, 7);

    let reply = client.call(BinaryRequest::delete(b"hello"));
    assert_eq!(reply.status, Some(Status::NoError));

    let reply = client.call(BinaryRequest::get(b"hello"));
    assert_eq!(reply.status, Some(Status::KeyNotFound));
    assert_eq!(reply.value, b"Not found");

    server.stop();
}

#[test]
fn test_quiet_pipeline_ends_with_noop() {
    let server = TestServer::start();
    let mut client = server.connect();

    let mut bytes = Vec::new();
    for i in 0..100u32 {
        let key = format!("k{}", i);
        bytes.extend(BinaryRequest::set(key.as_bytes(), b"v").quiet().to_vec());
    }
    for i in 0..110u32 {
        let key = format!("k{}", i);
        bytes.extend(BinaryRequest::getk(key.as_bytes()).quiet().opaque(i).to_vec());
    }
    bytes.extend(BinaryRequest::noop().opaque(999).to_vec());
    client.stream.write_all(&bytes).unwrap();

    for i in 0..100u32 {
        let reply = client.recv();
        assert_eq!(reply.opaque, i);
        assert_eq!(reply.key, format!("k{}", i).as_bytes());
    }
    let reply = client.recv();
    assert_eq!(reply.opcode, Opcode::Noop as u8);
    assert_eq!(reply.opaque, 999);

    server.stop();
}

#[test]
fn test_large_value_round_trip() {
    let server = TestServer::start();
    let mut client = server.connect();

    let value: Vec<u8> = (0..400 * 1024u32).map(|i| (i % 253) as u8).collect();
    let reply = client.call(BinaryRequest::set(b"large", &value));
    assert_eq!(reply.status, Some(Status::NoError));

    let reply = client.call(BinaryRequest::get(b"large"));
    assert_eq!(reply.value.len(), value.len());
    assert!(reply.value == value);

    let too_big = vec![0u8; 600 * 1024];
    let reply = client.call(BinaryRequest::set(b"huge", &too_big));
    assert_eq!(reply.status, Some(Status::ValueTooLarge));

    // the connection survives the rejected value
    let reply = client.call(BinaryRequest::noop());
    assert_eq!(reply.status, Some(Status::NoError));

    server.stop();
}

#[test]
fn test_counters_and_cas() {
    let server = TestServer::start();
    let mut client = server.connect();

    let reply = client.call(BinaryRequest::increment(b"n", 1, 100, 0));
    assert_eq!(reply.counter, Some(100));
    let reply = client.call(BinaryRequest::increment(b"n", 5, 0, 0));
    assert_eq!(reply.counter, Some(105));
    let reply = client.call(BinaryRequest::decrement(b"n", 500, 0, 0));
    assert_eq!(reply.counter, Some(0));
    let reply = client.call(BinaryRequest::increment(b"none", 1, 0, u32::MAX));
    assert_eq!(reply.status, Some(Status::KeyNotFound));

    let set = client.call(BinaryRequest::set(b"c", b"1"));
    let reply = client.call(BinaryRequest::set(b"c", b"2").cas(set.cas + 1));
    assert_eq!(reply.status, Some(Status::KeyExists));
    let reply = client.call(BinaryRequest::set(b"c", b"3").cas(set.cas));
    assert_eq!(reply.status, Some(Status::NoError));
    let reply = client.call(BinaryRequest::get(b"c"));
    assert_eq!(reply.value, b"3");

    server.stop();
}

#[test]
fn test_stats_and_version() {
    let server = TestServer::start();
    let mut client = server.connect();

    client.call(BinaryRequest::set(b"a", b"1"));

    client.send(BinaryRequest::stat(b""));
    let mut names = Vec::new();
    loop {
        let reply = client.recv();
        assert_eq!(reply.status, Some(Status::NoError));
        if reply.key.is_empty() {
            break;
        }
        names.push(String::from_utf8(reply.key).unwrap());
    }
    assert!(names.iter().any(|n| n == "curr_items"));
    assert!(names.iter().any(|n| n == "uptime"));

    client.send(BinaryRequest::stat(b"curr_items"));
    let reply = client.recv();
    assert_eq!(reply.value, b"1");
    assert!(client.recv().key.is_empty());

    let reply = client.call(BinaryRequest::stat(b"no_such_stat"));
    assert_eq!(reply.status, Some(Status::KeyNotFound));

    let reply = client.call(BinaryRequest::version());
    assert_eq!(reply.value, env!("CARGO_PKG_VERSION").as_bytes());

    server.stop();
}

#[test]
fn test_quit_closes_after_reply() {
    let server = TestServer::start();
    let mut client = server.connect();

    let reply = client.call(BinaryRequest::quit().opaque(3));
    assert_eq!(reply.opaque, 3);
    assert!(client.is_closed());

    let mut client = server.connect();
    client.send(BinaryRequest::quit().quiet());
    assert!(client.is_closed());

    server.stop();
}

#[test]
fn test_bad_magic_closes_connection() {
    let server = TestServer::start();
    let mut client = server.connect();
    client.stream.write_all(&[0x00; 24]).unwrap();
    assert!(client.is_closed());

    // other connections are unaffected
    let mut client = server.connect();
    let reply = client.call(BinaryRequest::noop());
    assert_eq!(reply.status, Some(Status::NoError));

    server.stop();
}

#[test]
fn test_shared_cache_across_connections() {
    let server = TestServer::start();

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let mut client = server.connect();
            thread::spawn(move || {
                for i in 0..200u32 {
                    let key = format!("t{}-{}", t, i);
                    let value = format!("value-{}", i);
                    let reply = client.call(BinaryRequest::set(key.as_bytes(), value.as_bytes()));
                    assert_eq!(reply.status, Some(Status::NoError));
                }
                for _ in 0..200 {
                    client.call(BinaryRequest::increment(b"shared", 1, 0, 0));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let mut client = server.connect();
    let reply = client.call(BinaryRequest::get(b"t3-199"));
    assert_eq!(reply.value, b"value-199");
    let reply = client.call(BinaryRequest::get(b"shared"));
    // the first increment of all creates the key with 0
    assert_eq!(reply.value, b"799");

    server.stop();
}
