//! Request counters and an in-memory log ring buffer backing the `/stats`
//! and `/logs` admin endpoints (spec.md §2 "Background tasks", §6).

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const LOG_RING_CAPACITY: usize = 1000;

#[derive(Debug, Default, Serialize)]
pub struct StatsSnapshot {
    pub requests_total: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rate_limit_denials: u64,
    pub errors_total: u64,
}

#[derive(Default)]
pub struct Stats {
    requests_total: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rate_limit_denials: AtomicU64,
    errors_total: AtomicU64,
    log_ring: Mutex<VecDeque<String>>,
}

impl Stats {
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_denial(&self) {
        self.rate_limit_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, line: impl Into<String>) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        let mut ring = self.log_ring.lock().unwrap();
        if ring.len() == LOG_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(line.into());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            rate_limit_denials: self.rate_limit_denials.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }

    /// Most recent `limit` log lines, newest last (spec.md `/logs`).
    pub fn recent_logs(&self, limit: usize) -> Vec<String> {
        let ring = self.log_ring.lock().unwrap();
        ring.iter().rev().take(limit).rev().cloned().collect()
    }

    pub fn reset(&self) {
        self.requests_total.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.rate_limit_denials.store(0, Ordering::Relaxed);
        self.errors_total.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_ring_drops_oldest_past_capacity() {
        let stats = Stats::default();
        for i in 0..(LOG_RING_CAPACITY + 10) {
            stats.record_error(format!("line {i}"));
        }
        let logs = stats.recent_logs(LOG_RING_CAPACITY);
        assert_eq!(logs.len(), LOG_RING_CAPACITY);
        assert_eq!(logs.last().unwrap(), &format!("line {}", LOG_RING_CAPACITY + 9));
    }

    #[test]
    fn snapshot_reflects_counters() {
        let stats = Stats::default();
        stats.record_request();
        stats.record_cache_hit();
        stats.record_rate_limit_denial();
        let snap = stats.snapshot();
        assert_eq!(snap.requests_total, 1);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.rate_limit_denials, 1);
    }
}
