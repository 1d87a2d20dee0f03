//! Flush policy configuration for `MappedRegion`.
//!
//! Controls whether writes trigger a flush on their own. Explicit
//! `flush()` calls work under every policy.

use std::time::{Duration, Instant};

/// Policy controlling when dirty pages are flushed without an explicit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Never flush implicitly; `flush()` must be called by the user.
    #[default]
    Manual,
    /// Flush after every successful write.
    Always,
    /// Flush when at least N bytes have been written since the last flush.
    EveryBytes(usize),
    /// Flush after every W writes since the last flush.
    EveryWrites(usize),
    /// Flush on the first write once this many milliseconds have passed since the last flush.
    EveryMillis(u64),
}

/// Write accounting since the last successful flush.
#[derive(Debug)]
pub(crate) struct FlushTracker {
    bytes: usize,
    writes: usize,
    last_flush: Instant,
}

impl FlushTracker {
    pub(crate) fn new() -> Self {
        Self {
            bytes: 0,
            writes: 0,
            last_flush: Instant::now(),
        }
    }

    /// Record a successful write; returns whether `policy` now asks for a flush.
    pub(crate) fn record(&mut self, policy: FlushPolicy, bytes: usize) -> bool {
        self.bytes = self.bytes.saturating_add(bytes);
        self.writes = self.writes.saturating_add(1);
        match policy {
            FlushPolicy::Manual => false,
            FlushPolicy::Always => true,
            FlushPolicy::EveryBytes(n) => self.bytes >= n,
            FlushPolicy::EveryWrites(n) => self.writes >= n,
            FlushPolicy::EveryMillis(ms) => self.last_flush.elapsed() >= Duration::from_millis(ms),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.bytes = 0;
        self.writes = 0;
        self.last_flush = Instant::now();
    }
}
