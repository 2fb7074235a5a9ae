//! Usage synchronization (spec.md §4.8): every 6-8 minutes, jittered, POST
//! accumulated per-key usage counters to a central endpoint and swap in the
//! returned `apiKey -> status` map.

use crate::config::UsageSyncConfig;
use crate::ratelimit::KeyStatus;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct UsageCounters {
    inner: Mutex<HashMap<String, u64>>,
}

impl UsageCounters {
    pub fn record(&self, api_key: &str) {
        let mut guard = self.inner.lock().unwrap();
        *guard.entry(api_key.to_string()).or_insert(0) += 1;
    }

    /// Drains the counters for one sync round, leaving the map empty for
    /// the next accumulation window.
    fn drain(&self) -> HashMap<String, u64> {
        std::mem::take(&mut *self.inner.lock().unwrap())
    }

    /// Merges `counts` back into the live map, summed with whatever
    /// accumulated concurrently. Used when a sync round fails after already
    /// draining — counters zero only on confirmed receipt (spec.md §4.8).
    fn restore(&self, counts: HashMap<String, u64>) {
        let mut guard = self.inner.lock().unwrap();
        for (key, count) in counts {
            *guard.entry(key).or_insert(0) += count;
        }
    }
}

#[derive(Serialize)]
struct SyncRequest<'a> {
    usage: &'a HashMap<String, u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum RemoteKeyStatus {
    Allowed,
    OverQuota,
    NotAllowed,
}

impl From<RemoteKeyStatus> for KeyStatus {
    fn from(s: RemoteKeyStatus) -> Self {
        match s {
            RemoteKeyStatus::Allowed => KeyStatus::Allowed,
            RemoteKeyStatus::OverQuota => KeyStatus::OverQuota,
            RemoteKeyStatus::NotAllowed => KeyStatus::NotAllowed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SyncResponse {
    statuses: HashMap<String, RemoteKeyStatus>,
}

/// One sync round: POST usage, parse the response into the internal
/// `KeyStatus` map. On any failure the caller keeps its prior map
/// (fail-open for known keys) and logs via `tracing`.
pub async fn sync_once(
    client: &reqwest::Client,
    config: &UsageSyncConfig,
    counters: &UsageCounters,
) -> Option<HashMap<String, KeyStatus>> {
    let endpoint = config.endpoint.as_ref()?;
    let usage = counters.drain();
    let body = SyncRequest { usage: &usage };

    let result = client
        .post(endpoint)
        .timeout(RPC_TIMEOUT)
        .json(&body)
        .send()
        .await;

    match result {
        Ok(resp) if resp.status().is_success() => match resp.json::<SyncResponse>().await {
            Ok(parsed) => Some(
                parsed
                    .statuses
                    .into_iter()
                    .map(|(k, v)| (k, v.into()))
                    .collect(),
            ),
            Err(err) => {
                tracing::warn!(error = %err, "usage sync: malformed response body");
                counters.restore(usage);
                None
            }
        },
        Ok(resp) => {
            tracing::warn!(status = %resp.status(), "usage sync: non-success response");
            counters.restore(usage);
            None
        }
        Err(err) => {
            tracing::warn!(error = %err, "usage sync: request failed");
            counters.restore(usage);
            None
        }
    }
}

/// Picks the next jittered delay within `[min_interval_secs,
/// max_interval_secs]` (spec.md §4.8: "6-8 minutes, randomized jitter").
pub fn next_interval(config: &UsageSyncConfig) -> Duration {
    let lo = config.min_interval_secs.min(config.max_interval_secs);
    let hi = config.min_interval_secs.max(config.max_interval_secs);
    if lo == hi {
        return Duration::from_secs(lo);
    }
    Duration::from_secs(rand::rng().random_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_interval_stays_within_configured_bounds() {
        let config = UsageSyncConfig {
            endpoint: None,
            min_interval_secs: 360,
            max_interval_secs: 480,
        };
        for _ in 0..50 {
            let d = next_interval(&config);
            assert!(d.as_secs() >= 360 && d.as_secs() <= 480);
        }
    }

    #[test]
    fn counters_drain_resets_to_empty() {
        let counters = UsageCounters::default();
        counters.record("k1");
        counters.record("k1");
        counters.record("k2");
        let drained = counters.drain();
        assert_eq!(drained.get("k1"), Some(&2));
        assert_eq!(drained.get("k2"), Some(&1));
        assert!(counters.drain().is_empty());
    }

    #[test]
    fn restore_merges_back_with_concurrent_accumulation() {
        let counters = UsageCounters::default();
        counters.record("k1");
        let drained = counters.drain();
        counters.record("k1"); // accumulated while the (failed) sync was in flight
        counters.restore(drained);
        let after = counters.drain();
        assert_eq!(after.get("k1"), Some(&2));
    }
}
