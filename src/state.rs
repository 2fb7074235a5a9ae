//! Per-worker shared state threaded through every request handler (spec.md
//! §5 "Global mutable state is scoped to a per-worker context struct").

use crate::cache::LfuCache;
use crate::config::Config;
use crate::pipeline::types::LookupResponse;
use crate::pipeline::Pipeline;
use crate::ratelimit::RateLimiter;
use crate::stats::Stats;
use crate::usage_sync::UsageCounters;
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<Config>>,
    pub pipeline: Arc<ArcSwap<Pipeline>>,
    pub cache: Arc<Mutex<LfuCache<LookupResponse>>>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub stats: Arc<Stats>,
    pub usage_counters: Arc<UsageCounters>,
    pub started_at: Instant,
    pub pid: u32,
    pub source_hash: Arc<str>,
}

impl AppState {
    /// Cache-key fingerprint (spec.md §4.4): the queried address plus a
    /// bitmask of flags that change the response shape. Deliberately
    /// excludes time-derived fields — those are recomputed after a cache
    /// hit from the cached location's lat/lon.
    pub fn cache_key(addr: &str, flags_bitmask: u32) -> String {
        format!("{addr}#{flags_bitmask:x}")
    }
}
