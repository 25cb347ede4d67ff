//! Tokio transport.
//!
//! One accept loop per listener, one task per connection and a ticker that
//! drives the cache clock. Shutdown is signalled through a shared flag.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use slab_cache::SlabCache;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::{Connection, RECV_CAPACITY};
use crate::metrics::{CONNECTIONS_ACCEPTED, CONNECTIONS_ACTIVE};

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Run the server until `shutdown` is set.
pub fn run(
    config: &Config,
    cache: SlabCache,
    shutdown: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads())
        .thread_name("slabcached-worker")
        .enable_all()
        .build()?;

    let addresses: Vec<SocketAddr> = config.listener.iter().map(|l| l.address).collect();
    runtime.block_on(async move {
        let listeners = bind(&addresses).await?;
        serve(listeners, cache, shutdown).await;
        Ok::<_, io::Error>(())
    })?;

    info!("server stopped");
    Ok(())
}

/// Bind every address.
pub async fn bind(addresses: &[SocketAddr]) -> io::Result<Vec<TcpListener>> {
    let mut listeners = Vec::with_capacity(addresses.len());
    for address in addresses {
        let listener = TcpListener::bind(address).await?;
        info!(address = %listener.local_addr()?, "listening");
        listeners.push(listener);
    }
    Ok(listeners)
}

/// Accept and serve connections until `shutdown` is set.
pub async fn serve(listeners: Vec<TcpListener>, cache: SlabCache, shutdown: Arc<AtomicBool>) {
    let mut tasks = JoinSet::new();
    for listener in listeners {
        tasks.spawn(accept_loop(listener, cache.clone()));
    }
    tasks.spawn(tick_loop(cache));

    let mut poll = tokio::time::interval(SHUTDOWN_POLL);
    while !shutdown.load(Ordering::Relaxed) {
        poll.tick().await;
    }
    info!("shutting down");
    tasks.shutdown().await;
}

async fn tick_loop(cache: SlabCache) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        interval.tick().await;
        cache.tick();
    }
}

async fn accept_loop(listener: TcpListener, cache: SlabCache) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                CONNECTIONS_ACCEPTED.increment();
                let _ = stream.set_nodelay(true);
                let cache = cache.clone();
                tokio::spawn(async move {
                    CONNECTIONS_ACTIVE.increment();
                    if let Err(e) = handle_connection(stream, cache).await
                        && !is_connection_reset(&e)
                    {
                        debug!(%peer, error = %e, "connection error");
                    }
                    CONNECTIONS_ACTIVE.decrement();
                });
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, cache: SlabCache) -> io::Result<()> {
    let mut conn = Connection::new(cache);

    loop {
        let buf = conn.recv_buf();
        buf.reserve(RECV_CAPACITY);
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Ok(());
        }
        conn.received(n);

        let result = conn.process();
        for chunk in conn.send_chunks() {
            stream.write_all(chunk).await?;
        }
        conn.clear_send();

        if let Err(e) = result {
            warn!(error = %e, "closing connection on malformed input");
            return Ok(());
        }
        if conn.should_close() {
            return Ok(());
        }
    }
}

fn is_connection_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
    )
}
