//! Cache statistics.
//!
//! Counters are plain integers updated under the cache lock. A clock tick
//! rolls request and byte counters into per-second rates.

/// Live counters kept in the cache state.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub reclaimed: u64,
    pub updates: u64,
    pub requests: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub curr_items: u64,
    pub curr_bytes: u64,
    requests_per_sec: u64,
    bytes_per_sec: u64,
    last_tick: u32,
    last_requests: u64,
    last_bytes: u64,
}

impl Stats {
    pub fn new(now: u32) -> Self {
        Self {
            last_tick: now,
            ..Default::default()
        }
    }

    /// Reset traffic counters after a flush.
    ///
    /// Current item and byte counts track physical entries, which a flush
    /// only invalidates lazily, so they are kept.
    pub fn reset(&mut self, now: u32) {
        *self = Self {
            curr_items: self.curr_items,
            curr_bytes: self.curr_bytes,
            ..Self::new(now)
        };
    }

    /// Roll counters into per-second rates.
    pub fn roll(&mut self, now: u32) {
        let elapsed = now.saturating_sub(self.last_tick) as u64;
        if elapsed == 0 {
            return;
        }
        let bytes = self.bytes_in + self.bytes_out;
        self.requests_per_sec = (self.requests - self.last_requests) / elapsed;
        self.bytes_per_sec = (bytes - self.last_bytes) / elapsed;
        self.last_requests = self.requests;
        self.last_bytes = bytes;
        self.last_tick = now;
    }

    pub fn requests_per_sec(&self) -> u64 {
        self.requests_per_sec
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }
}

/// A value in a stats listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatValue {
    Number(u64),
    Text(&'static str),
}

/// A point-in-time copy of the cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub pid: u32,
    pub uptime: u32,
    pub time: u32,
    pub version: &'static str,
    pub curr_items: u64,
    pub bytes: u64,
    pub limit_maxbytes: u64,
    pub get_hits: u64,
    pub get_misses: u64,
    pub evictions: u64,
    pub reclaimed: u64,
    pub updates: u64,
    pub requests: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub requests_per_sec: u64,
    pub bytes_per_sec: u64,
    pub regions: u64,
    pub mapped_bytes: u64,
}

impl StatsSnapshot {
    /// Every statistic as a name/value pair, in wire order.
    pub fn entries(&self) -> [(&'static str, StatValue); 19] {
        use StatValue::{Number, Text};
        [
            ("pid", Number(self.pid as u64)),
            ("uptime", Number(self.uptime as u64)),
            ("time", Number(self.time as u64)),
            ("version", Text(self.version)),
            ("curr_items", Number(self.curr_items)),
            ("bytes", Number(self.bytes)),
            ("limit_maxbytes", Number(self.limit_maxbytes)),
            ("get_hits", Number(self.get_hits)),
            ("get_misses", Number(self.get_misses)),
            ("evictions", Number(self.evictions)),
            ("reclaimed", Number(self.reclaimed)),
            ("updates", Number(self.updates)),
            ("requests", Number(self.requests)),
            ("bytes_read", Number(self.bytes_read)),
            ("bytes_written", Number(self.bytes_written)),
            ("requests_per_sec", Number(self.requests_per_sec)),
            ("bytes_per_sec", Number(self.bytes_per_sec)),
            ("regions", Number(self.regions)),
            ("mapped_bytes", Number(self.mapped_bytes)),
        ]
    }

    /// Look up one statistic by name.
    pub fn get(&self, name: &[u8]) -> Option<StatValue> {
        self.entries()
            .into_iter()
            .find(|(key, _)| key.as_bytes() == name)
            .map(|(_, value)| value)
    }
}
