//! Counters kept by the boom store.
//!
//! [`Counter`] is a relaxed atomic tally; [`BoomMetrics`] groups the ones the
//! expiry, persistence and ingestion loops bump. Serializes as plain numbers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic counter. Relaxed ordering: values are diagnostics only.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl Serialize for Counter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.get())
    }
}

impl<'de> Deserialize<'de> for Counter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(|v| Self(AtomicU64::new(v)))
    }
}

/// Everything the store counts while running.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BoomMetrics {
    /// Messages deleted remotely after their TTL ran out.
    pub expired: Counter,
    /// Remote delete calls that failed.
    pub delete_failures: Counter,
    /// Messages dropped after exhausting delete retries.
    pub abandoned: Counter,
    pub snapshot_writes: Counter,
    /// Ticks where the repository had not changed.
    pub snapshot_skips: Counter,
    pub snapshot_failures: Counter,
    /// Notifications for channels other than the tracked one.
    pub events_ignored: Counter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increments() {
        let c = Counter::new();
        assert_eq!(c.get(), 0);
        c.inc();
        c.inc();
        assert_eq!(c.get(), 2);
        c.add(3);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn metrics_serialize_as_numbers() {
        let m = BoomMetrics::default();
        m.expired.inc();
        m.snapshot_writes.inc();
        m.snapshot_writes.inc();

        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["expired"], 1);
        assert_eq!(json["snapshot_writes"], 2);
        assert_eq!(json["abandoned"], 0);

        let back: BoomMetrics = serde_json::from_value(json).unwrap();
        assert_eq!(back.snapshot_writes.get(), 2);
    }
}
