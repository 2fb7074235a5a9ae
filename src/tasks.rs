//! Background task orchestration (spec.md §4.8, §5): usage-sync scheduling
//! and periodic stats/cache bookkeeping, run as detached `tokio::spawn`
//! loops off the request path.

use crate::config::Config;
use crate::ratelimit::RateLimiter;
use crate::stats::Stats;
use crate::usage_sync::{self, UsageCounters};
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Drives the usage-sync loop (spec.md §4.8): on a jittered 6-8 minute
/// interval, drains local counters, POSTs them, and swaps the returned
/// `apiKey -> status` map into the rate limiter. Failure is fail-open — the
/// rate limiter keeps whatever map it already had.
pub fn spawn_usage_sync(
    config: Arc<ArcSwap<Config>>,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    counters: Arc<UsageCounters>,
) {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        loop {
            let cfg = config.load();
            tokio::time::sleep(usage_sync::next_interval(&cfg.usage_sync)).await;
            let cfg = config.load();
            if let Some(statuses) = usage_sync::sync_once(&client, &cfg.usage_sync, &counters).await {
                let mut limiter = rate_limiter.lock().unwrap();
                limiter.update_key_statuses(statuses);
            }
        }
    });
}

/// Resets rolling counters once per hour so `/stats` reports per-window
/// figures rather than a lifetime total (spec.md §4.9 "Statistics").
pub fn spawn_stats_reset(stats: Arc<Stats>, interval: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.tick().await; // first tick fires immediately; skip it
        loop {
            tick.tick().await;
            stats.reset();
        }
    });
}

/// Polls the asn_meta file's mtime and triggers the same in-place reload
/// the `/reload` admin endpoint performs when it changes — the async
/// analogue of the teacher's `monitor_file_changes` poller, watching one
/// representative dataset file rather than every hashmap entry.
pub fn spawn_auto_reload(
    config: Arc<ArcSwap<Config>>,
    pipeline: Arc<ArcSwap<crate::pipeline::Pipeline>>,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut last_mod_time = std::fs::metadata(&config.load().datasets.asn_meta_file)
            .and_then(|meta| meta.modified())
            .ok();
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            let cfg = config.load();
            let modified_time = match std::fs::metadata(&cfg.datasets.asn_meta_file).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(err) => {
                    tracing::warn!(%err, "auto-reload: failed to stat dataset marker file");
                    continue;
                }
            };
            if last_mod_time.is_some_and(|last| modified_time <= last) {
                continue;
            }
            last_mod_time = Some(modified_time);

            let mut fresh = match crate::pipeline::Pipeline::empty() {
                Ok(p) => p,
                Err(err) => {
                    tracing::error!(%err, "auto-reload: failed to construct pipeline");
                    continue;
                }
            };
            match fresh.load(&cfg.datasets) {
                Ok(()) => {
                    pipeline.store(Arc::new(fresh));
                    tracing::info!("auto-reload: dataset snapshot refreshed");
                }
                Err(err) => tracing::warn!(%err, "auto-reload: dataset load failed, keeping prior snapshot"),
            }
        }
    });
}
