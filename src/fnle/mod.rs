//! Fast Network Lookup Engine (spec.md §3–§4.3): an interval index over IPv4
//! and IPv6 ranges supporting four tie-break policies and constant-time
//! reload from a compact binary snapshot.

mod address;
mod family;
mod parse;
mod persist;

pub use family::{Policy, OVERLAP_CUTOFF};
use family::{Family, Match};
use parse::ParsedNet;

use crate::error::FnleError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::IpAddr;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadResult {
    Success,
    ReloadNotNeeded,
    StoreDirDoesNotExist,
}

/// One FNLE instance: a pair of per-family sweep-line indexes sharing a tie
/// break policy and a version stamp (spec.md §4.3 "Lifecycle").
pub struct Fnle<P: Clone> {
    name: String,
    policy: Policy,
    v4: Family<u32, P>,
    v6: Family<u128, P>,
    version: Option<u64>,
}

/// A resolved lookup hit, with the reconstructed `[start, end]` network when
/// `return_network` is requested (spec.md §4.2 step 5).
pub struct Hit<P> {
    pub payload: P,
    pub network: Option<(u128, u128)>,
}

impl<P: Clone> Fnle<P> {
    pub fn new(name: impl Into<String>, policy: Policy) -> Self {
        Self {
            name: name.into(),
            policy,
            v4: Family::default(),
            v6: Family::default(),
            version: None,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `add(net, payload)` — spec.md §4.1. Parses CIDR, inetnum (`start-end`)
    /// or a bare host, classifies the family, and routes to the range table
    /// or the `direct` host map.
    pub fn add(&mut self, net: &str, payload: P) -> Result<(), FnleError>
    where
        P: PartialEq,
    {
        match parse::parse_net(net) {
            Some(ParsedNet::V4Host(addr)) => {
                self.v4.add_direct(addr, payload, self.policy);
                Ok(())
            }
            Some(ParsedNet::V4Range(s, e)) => self.v4.add_range(s, e, payload),
            Some(ParsedNet::V6Host(addr)) => {
                self.v6.add_direct(addr, payload, self.policy);
                Ok(())
            }
            Some(ParsedNet::V6Range(s, e)) => self.v6.add_range(s, e, payload),
            None => Err(FnleError::Corrupt(format!("unparseable network: {net}"))),
        }
    }

    /// `build()` — spec.md §4.1 steps 1–7, run once per family.
    pub fn build(&mut self)
    where
        P: PartialEq,
    {
        self.v4.build();
        self.v6.build();
    }

    /// `lookup(addr)` — spec.md §4.2. Returns zero, one, or (under `ALL`)
    /// many payloads.
    pub fn lookup(&self, addr: IpAddr) -> Vec<Hit<P>> {
        let matches: Vec<Match<P>> = match addr {
            IpAddr::V4(a) => self.v4.lookup(u32::from(a), self.policy),
            IpAddr::V6(a) => self.v6.lookup(u128::from(a), self.policy),
        };
        matches
            .into_iter()
            .map(|m| Hit {
                payload: m.payload,
                network: m.network,
            })
            .collect()
    }

    pub fn lookup_str(&self, addr: &str) -> Vec<Hit<P>> {
        match addr.parse::<IpAddr>() {
            Ok(ip) => self.lookup(ip),
            Err(_) => Vec::new(),
        }
    }

    /// `persist()` — spec.md §4.3. Writes every component file to `root`,
    /// creating it if necessary, and bumps the version stamp.
    pub fn persist(&mut self, root: &Path) -> Result<u64, FnleError>
    where
        P: Serialize,
    {
        std::fs::create_dir_all(root)?;
        persist::persist_family(root, &self.v4)?;
        persist::persist_family(root, &self.v6)?;
        persist::persist_direct(root, &self.v4.direct, &self.v6.direct)?;
        let stamp = persist::write_version(root)?;
        self.version = Some(stamp);
        Ok(stamp)
    }

    /// `load()` — spec.md §4.3. Reads a snapshot written by `persist()` into
    /// this instance, skipping the work if the on-disk version stamp matches
    /// what is already loaded.
    pub fn load(&mut self, root: &Path) -> Result<LoadResult, FnleError>
    where
        P: DeserializeOwned,
    {
        if !root.exists() {
            return Ok(LoadResult::StoreDirDoesNotExist);
        }
        let on_disk_version = persist::read_version(root)?;
        if self.version == Some(on_disk_version) {
            return Ok(LoadResult::ReloadNotNeeded);
        }
        let v4: Family<u32, P> = persist::load_family(root)?;
        let v6: Family<u128, P> = persist::load_family(root)?;
        self.v4 = v4;
        self.v6 = v6;
        self.version = Some(on_disk_version);
        Ok(LoadResult::Success)
    }

    /// True if `root`'s `tsCreated.json` version stamp differs from this
    /// instance's, i.e. a `load()` against it would pick up new data. A
    /// missing or unreadable snapshot is never "stale" — there is nothing to
    /// reload.
    pub fn is_stale(&self, root: &Path) -> bool {
        if !root.exists() {
            return false;
        }
        match persist::read_version(root) {
            Ok(on_disk) => self.version != Some(on_disk),
            Err(_) => false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn rejected_counts(&self) -> (u64, u64) {
        (
            self.v4.oversize_rejected + self.v6.oversize_rejected,
            self.v4.duplicate_rejected + self.v6.duplicate_rejected,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads<P: Clone>(hits: &[Hit<P>]) -> Vec<P> {
        hits.iter().map(|h| h.payload.clone()).collect()
    }

    /// Scenario 1 (spec.md §8): smallest policy over nested IPv4 networks.
    #[test]
    fn smallest_policy_over_nested_networks() {
        let mut idx: Fnle<&'static str> = Fnle::new("nested", Policy::Smallest);
        idx.add("87.122.0.0/26", "/26").unwrap();
        idx.add("87.122.0.0/22", "/22").unwrap();
        idx.add("87.122.0.0/20", "/20").unwrap();
        idx.add("87.122.0.0/15", "/15").unwrap();
        idx.build();

        assert_eq!(payloads(&idx.lookup_str("87.122.0.1")), vec!["/26"]);
        assert_eq!(payloads(&idx.lookup_str("87.122.0.64")), vec!["/22"]);
        assert_eq!(payloads(&idx.lookup_str("87.122.4.0")), vec!["/20"]);
        assert_eq!(payloads(&idx.lookup_str("87.123.255.255")), vec!["/15"]);
        assert!(payloads(&idx.lookup_str("87.124.0.0")).is_empty());
    }

    /// Scenario 2: `ALL` policy returns the complete containing set.
    #[test]
    fn all_policy_returns_complete_set() {
        let mut idx: Fnle<&'static str> = Fnle::new("nested-all", Policy::All);
        idx.add("87.122.0.0/26", "/26").unwrap();
        idx.add("87.122.0.0/22", "/22").unwrap();
        idx.add("87.122.0.0/20", "/20").unwrap();
        idx.add("87.122.0.0/15", "/15").unwrap();
        idx.build();

        let mut got = payloads(&idx.lookup_str("87.122.0.1"));
        got.sort_unstable();
        let mut want = vec!["/26", "/22", "/20", "/15"];
        want.sort_unstable();
        assert_eq!(got, want);
    }

    /// Scenario 3: IPv6 compression-independent matching under `FIRST`.
    #[test]
    fn ipv6_compression_independent_matching() {
        let mut idx: Fnle<&'static str> = Fnle::new("v6", Policy::First);
        idx.add("2604:a880:0:1011::/64", "NY").unwrap();
        idx.build();

        assert_eq!(payloads(&idx.lookup_str("2604:a880:0000:1011::1")), vec!["NY"]);
        assert_eq!(
            payloads(&idx.lookup_str("2604:a880:0:1011:ffff:ffff:ffff:ffff")),
            vec!["NY"]
        );
    }

    /// Scenario 4: direct-host entries coexist with overlapping ranges.
    #[test]
    fn direct_host_coexists_with_ranges() {
        let mut idx: Fnle<&'static str> = Fnle::new("direct", Policy::All);
        idx.add("10.0.0.0/8", "net").unwrap();
        idx.add("10.0.0.5", "host").unwrap();
        idx.build();

        let mut got = payloads(&idx.lookup_str("10.0.0.5"));
        got.sort_unstable();
        assert_eq!(got, vec!["host", "net"]);
    }

    /// Scenario 5: persistence round trip plus `reloadNotNeeded`.
    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut idx: Fnle<String> = Fnle::new("persisted", Policy::Smallest);
        idx.add("87.122.0.0/26", "/26".to_string()).unwrap();
        idx.add("87.122.0.0/22", "/22".to_string()).unwrap();
        idx.add("87.122.0.0/20", "/20".to_string()).unwrap();
        idx.add("87.122.0.0/15", "/15".to_string()).unwrap();
        idx.build();
        idx.persist(dir.path()).unwrap();

        let mut reloaded: Fnle<String> = Fnle::new("persisted", Policy::Smallest);
        let first = reloaded.load(dir.path()).unwrap();
        assert_eq!(first, LoadResult::Success);
        assert_eq!(payloads(&reloaded.lookup_str("87.122.0.1")), vec!["/26"]);
        assert_eq!(payloads(&reloaded.lookup_str("87.122.0.64")), vec!["/22"]);
        assert_eq!(payloads(&reloaded.lookup_str("87.122.4.0")), vec!["/20"]);
        assert_eq!(
            payloads(&reloaded.lookup_str("87.123.255.255")),
            vec!["/15"]
        );
        assert!(payloads(&reloaded.lookup_str("87.124.0.0")).is_empty());

        let second = reloaded.load(dir.path()).unwrap();
        assert_eq!(second, LoadResult::ReloadNotNeeded);
    }

    #[test]
    fn lookup_outside_any_range_is_empty() {
        let mut idx: Fnle<&'static str> = Fnle::new("empty-check", Policy::First);
        idx.add("1.2.3.0/24", "a").unwrap();
        idx.build();
        assert!(payloads(&idx.lookup_str("2.2.2.2")).is_empty());
    }

    #[test]
    fn duplicate_and_oversize_ranges_are_rejected() {
        let mut idx: Fnle<&'static str> = Fnle::new("reject", Policy::First);
        idx.add("1.2.3.0/24", "a").unwrap();
        assert!(idx.add("1.2.3.0/24", "b").is_err());
        assert!(idx.add("0.0.0.0/0", "huge").is_err());
        idx.build();
        let (oversize, dup) = idx.rejected_counts();
        assert_eq!(oversize, 1);
        assert_eq!(dup, 1);
    }
}
