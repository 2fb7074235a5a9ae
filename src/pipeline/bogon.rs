//! Fixed reserved-range membership check (spec.md §4.5 "Bogon check"),
//! grounded in `other_examples`' `bogon` crate for which ranges count as
//! bogon, reimplemented on top of our own [`Fnle`] rather than imported so
//! it persists and reloads through the same machinery as every other
//! dataset.

use crate::error::FnleError;
use crate::fnle::{Fnle, Policy};
use std::net::{IpAddr, Ipv6Addr};

/// Mirrors `fnle::address::Address::MAX_RANGE_SIZE` for `u128`. Kept as a
/// local constant rather than imported since the address module is private
/// to `fnle` — this is the same cap `Family::add_range` enforces.
const MAX_V6_RANGE_SIZE: u128 = 1 << 114;

/// IANA-reserved / special-purpose ranges relevant to an IP-intelligence
/// service: RFC 1918 private space, loopback, link-local, documentation,
/// carrier-grade NAT (RFC 6598), multicast, and the IPv6 equivalents.
const BOGON_NETS: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "255.255.255.255/32",
    "::1/128",
    "::/128",
    "::ffff:0:0/96",
    "fc00::/7",
    "fe80::/10",
    "ff00::/8",
    "2001:db8::/32",
];

pub struct BogonSet {
    fnle: Fnle<()>,
}

impl BogonSet {
    pub fn build() -> Result<Self, FnleError> {
        let mut fnle = Fnle::new("bogon", Policy::First);
        for net in BOGON_NETS {
            add_net(&mut fnle, net)?;
        }
        fnle.build();
        Ok(Self { fnle })
    }

    pub fn is_bogon(&self, addr: IpAddr) -> bool {
        !self.fnle.lookup(addr).is_empty()
    }
}

/// Adds `net` to `fnle`, splitting it into `MAX_V6_RANGE_SIZE`-sized inetnum
/// chunks first when it's a reserved IPv6 block wider than the FNLE's own
/// per-range cap (`fc00::/7`, `fe80::/10`, `ff00::/8` all exceed it — no real
/// allocation is ever that wide, but these reserved blocks are).
fn add_net(fnle: &mut Fnle<()>, net: &str) -> Result<(), FnleError> {
    if let Some((addr, prefix)) = net.split_once('/') {
        if let (Ok(base), Ok(prefix)) = (addr.parse::<Ipv6Addr>(), prefix.parse::<u32>()) {
            let size: u128 = 1u128 << (128 - prefix);
            if size > MAX_V6_RANGE_SIZE {
                let start = u128::from(base);
                let end = start + (size - 1);
                let mut chunk_start = start;
                loop {
                    let chunk_end = chunk_start
                        .saturating_add(MAX_V6_RANGE_SIZE - 1)
                        .min(end);
                    fnle.add(
                        &format!(
                            "{}-{}",
                            Ipv6Addr::from(chunk_start),
                            Ipv6Addr::from(chunk_end)
                        ),
                        (),
                    )?;
                    if chunk_end == end {
                        break;
                    }
                    chunk_start = chunk_end + 1;
                }
                return Ok(());
            }
        }
    }
    fnle.add(net, ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_private_and_loopback_ranges() {
        let set = BogonSet::build().unwrap();
        assert!(set.is_bogon("10.1.2.3".parse().unwrap()));
        assert!(set.is_bogon("127.0.0.1".parse().unwrap()));
        assert!(set.is_bogon("::1".parse().unwrap()));
        assert!(!set.is_bogon("8.8.8.8".parse().unwrap()));
    }

    /// `fc00::/7`, `fe80::/10`, `ff00::/8` all exceed the FNLE's per-range
    /// size cap; `build()` must still succeed and the split chunks must
    /// cover the whole original block, start to end.
    #[test]
    fn oversize_ipv6_blocks_still_build_and_match() {
        let set = BogonSet::build().unwrap();
        assert!(set.is_bogon("fc00::1".parse().unwrap()));
        assert!(set.is_bogon("fdff:ffff:ffff:ffff:ffff:ffff:ffff:ffff".parse().unwrap()));
        assert!(set.is_bogon("fe80::1".parse().unwrap()));
        assert!(set.is_bogon("febf:ffff:ffff:ffff:ffff:ffff:ffff:ffff".parse().unwrap()));
        assert!(set.is_bogon("ff00::1".parse().unwrap()));
        assert!(set.is_bogon("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff".parse().unwrap()));
    }
}
