//! Rate limiter (spec.md §4.7): admin key, whitelist, blacklist, per-key
//! status, per-IP hourly caps per request class, and firewall-block
//! enqueue, applied in that fixed order. Grounded in `other_examples`'
//! `fair-ratelimit` crate for the horizon-bucket shape of the per-IP
//! counters, adapted here from one global bucket to per-class hourly caps.

use crate::config::RateLimitConfig;
use crate::error::ErrorCode;
use crate::fnle::{Fnle, Policy};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    Normal,
    Whois,
    Bulk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Allowed,
    OverQuota,
    NotAllowed,
}

/// Per-IP counters for one request class, reset on a 1-hour epoch.
struct Counter {
    count: u32,
    epoch_start: Instant,
}

impl Counter {
    fn new() -> Self {
        Self {
            count: 0,
            epoch_start: Instant::now(),
        }
    }

    fn bump(&mut self, horizon: Duration) -> u32 {
        if self.epoch_start.elapsed() >= horizon {
            self.count = 0;
            self.epoch_start = Instant::now();
        }
        self.count += 1;
        self.count
    }
}

/// Firewall state for one client IP, reset on a 12-hour epoch.
struct DenyState {
    deny_count: u32,
    epoch_start: Instant,
    firewalled: bool,
}

const HOUR: Duration = Duration::from_secs(3600);
const FIREWALL_EPOCH: Duration = Duration::from_secs(12 * 3600);

/// Invokes the OS firewall hook for one client IP. The real deployment
/// shells out to an external blocker; here it is a seam the admin tooling
/// and tests can observe without requiring root / iptables access.
pub trait FirewallHook: Send + Sync {
    fn block(&self, ip: IpAddr);
}

pub struct NoopFirewallHook;
impl FirewallHook for NoopFirewallHook {
    fn block(&self, _ip: IpAddr) {}
}

pub struct RateLimiter {
    config: RateLimitConfig,
    blacklist: Fnle<()>,
    api_key_status: HashMap<String, KeyStatus>,
    api_key_status_epoch: Instant,
    counters: HashMap<(IpAddr, RequestClass), Counter>,
    deny_state: HashMap<IpAddr, DenyState>,
    firewall: Box<dyn FirewallHook>,
}

pub enum Verdict {
    Allow,
    Deny(ErrorCode),
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let mut blacklist = Fnle::new("blacklist", Policy::First);
        for net in &config.blacklisted_networks {
            let _ = blacklist.add(net, ());
        }
        blacklist.build();
        Self {
            config,
            blacklist,
            api_key_status: HashMap::new(),
            api_key_status_epoch: Instant::now(),
            counters: HashMap::new(),
            deny_state: HashMap::new(),
            firewall: Box::new(NoopFirewallHook),
        }
    }

    pub fn with_firewall_hook(mut self, hook: Box<dyn FirewallHook>) -> Self {
        self.firewall = hook;
        self
    }

    /// How long ago the `apiKey -> status` map was last refreshed by usage
    /// sync (spec.md §4.8) — surfaced on `/stats` for operators.
    pub fn key_status_age(&self) -> Duration {
        self.api_key_status_epoch.elapsed()
    }

    /// Swaps in a fresh `apiKey -> status` map from the usage-sync service,
    /// zeroing the staleness epoch (spec.md §4.8).
    pub fn update_key_statuses(&mut self, statuses: HashMap<String, KeyStatus>) {
        self.api_key_status = statuses;
        self.api_key_status_epoch = Instant::now();
    }

    /// spec.md §4.7, steps 1-6 in order.
    pub fn check(
        &mut self,
        client_ip: IpAddr,
        api_key: Option<&str>,
        admin_key: &str,
        class: RequestClass,
    ) -> Verdict {
        if let Some(key) = api_key {
            if key == admin_key {
                return Verdict::Allow;
            }
            if self.config.whitelist_api_keys.contains(key) {
                return Verdict::Allow;
            }
        }

        if !self.blacklist.lookup(client_ip).is_empty() {
            return Verdict::Deny(ErrorCode::ForbiddenBlacklisted);
        }

        if let Some(key) = api_key {
            match self.api_key_status.get(key) {
                None => return Verdict::Deny(ErrorCode::ForbiddenInvalidApiKey),
                Some(KeyStatus::OverQuota) => return Verdict::Deny(ErrorCode::QuotaExceeded),
                Some(KeyStatus::NotAllowed) => return Verdict::Deny(ErrorCode::ForbiddenNotAllowed),
                Some(KeyStatus::Allowed) => return Verdict::Allow,
            }
        }

        if self.config.enable_rate_limit {
            let cap = match class {
                RequestClass::Normal => self.config.normal_lookups_per_hour,
                RequestClass::Whois => self.config.whois_lookups_per_hour,
                RequestClass::Bulk => self.config.bulk_lookups_per_hour,
            };
            let counter = self
                .counters
                .entry((client_ip, class))
                .or_insert_with(Counter::new);
            let count = counter.bump(HOUR);
            if count > cap {
                self.record_deny(client_ip, api_key.is_some());
                return Verdict::Deny(ErrorCode::RateLimitExceeded);
            }
        }

        Verdict::Allow
    }

    /// Firewall-block enqueue past a deny-count threshold (spec.md §4.7
    /// step 6), with registered callers — anyone who presented an api key,
    /// even one this call denied on quota/rate grounds — exempt from ever
    /// being enqueued.
    fn record_deny(&mut self, ip: IpAddr, is_registered: bool) {
        if is_registered {
            return;
        }
        let state = self.deny_state.entry(ip).or_insert_with(|| DenyState {
            deny_count: 0,
            epoch_start: Instant::now(),
            firewalled: false,
        });
        if state.epoch_start.elapsed() >= FIREWALL_EPOCH {
            state.deny_count = 0;
            state.epoch_start = Instant::now();
            state.firewalled = false;
        }
        state.deny_count += 1;
        if state.deny_count >= self.config.deny_count_threshold && !state.firewalled {
            state.firewalled = true;
            self.firewall.block(ip);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cap: u32) -> RateLimitConfig {
        RateLimitConfig {
            enable_rate_limit: true,
            normal_lookups_per_hour: cap,
            whois_lookups_per_hour: cap,
            bulk_lookups_per_hour: cap,
            deny_count_threshold: 2,
            whitelist_api_keys: Default::default(),
            blacklisted_networks: Vec::new(),
        }
    }

    #[test]
    fn second_request_over_cap_is_denied() {
        let mut limiter = RateLimiter::new(config(1));
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert!(matches!(
            limiter.check(ip, None, "admin", RequestClass::Normal),
            Verdict::Allow
        ));
        assert!(matches!(
            limiter.check(ip, None, "admin", RequestClass::Normal),
            Verdict::Deny(ErrorCode::RateLimitExceeded)
        ));
    }

    #[test]
    fn admin_key_always_allowed() {
        let mut limiter = RateLimiter::new(config(0));
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert!(matches!(
            limiter.check(ip, Some("admin"), "admin", RequestClass::Normal),
            Verdict::Allow
        ));
    }

    #[test]
    fn blacklisted_network_is_denied() {
        let mut cfg = config(1000);
        cfg.blacklisted_networks.push("1.2.3.0/24".to_string());
        let mut limiter = RateLimiter::new(cfg);
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        assert!(matches!(
            limiter.check(ip, None, "admin", RequestClass::Normal),
            Verdict::Deny(ErrorCode::ForbiddenBlacklisted)
        ));
    }

    #[test]
    fn unknown_api_key_is_denied() {
        let mut limiter = RateLimiter::new(config(1000));
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert!(matches!(
            limiter.check(ip, Some("nope"), "admin", RequestClass::Normal),
            Verdict::Deny(ErrorCode::ForbiddenInvalidApiKey)
        ));
    }
}
