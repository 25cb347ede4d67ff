//! Process-wide server metrics.
//!
//! Cache statistics are per-instance and served by the `stat` command;
//! these cover the network side.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "connections_accepted",
    description = "Total number of connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Number of currently active connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(name = "requests", description = "Requests executed")]
pub static REQUESTS: Counter = Counter::new();

#[metric(
    name = "protocol_errors",
    description = "Connections closed because of malformed input"
)]
pub static PROTOCOL_ERRORS: Counter = Counter::new();

#[metric(name = "bytes_in", description = "Bytes read from clients")]
pub static BYTES_IN: Counter = Counter::new();

#[metric(name = "bytes_out", description = "Bytes written to clients")]
pub static BYTES_OUT: Counter = Counter::new();
