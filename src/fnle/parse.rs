//! CIDR / inetnum parsing, generalized from the teacher's `utils::parse_cidr`
//! (IPv4-only, CIDR-only) to both address families and to the `start-end`
//! inetnum form named in the glossary.

use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedNet {
    V4Host(u32),
    V4Range(u32, u32),
    V6Host(u128),
    V6Range(u128, u128),
}

pub fn parse_net(net: &str) -> Option<ParsedNet> {
    let net = net.trim();
    if let Some((addr, prefix)) = net.split_once('/') {
        return parse_cidr(addr, prefix);
    }
    if let Some((start, end)) = split_range(net) {
        return parse_range(start, end);
    }
    parse_host(net)
}

fn parse_host(s: &str) -> Option<ParsedNet> {
    if let Ok(a) = s.parse::<Ipv4Addr>() {
        return Some(ParsedNet::V4Host(u32::from(a)));
    }
    if let Ok(a) = s.parse::<Ipv6Addr>() {
        return Some(ParsedNet::V6Host(u128::from(a)));
    }
    None
}

fn parse_cidr(addr: &str, prefix: &str) -> Option<ParsedNet> {
    let prefix: u32 = prefix.trim().parse().ok()?;
    if let Ok(a) = addr.parse::<Ipv4Addr>() {
        if prefix > 32 {
            return None;
        }
        let base = u32::from(a);
        let mask: u32 = if prefix == 0 {
            0
        } else {
            !0u32 << (32 - prefix)
        };
        let start = base & mask;
        let end = start | !mask;
        return Some(ParsedNet::V4Range(start, end));
    }
    if let Ok(a) = addr.parse::<Ipv6Addr>() {
        if prefix > 128 {
            return None;
        }
        let base = u128::from(a);
        let mask: u128 = if prefix == 0 {
            0
        } else {
            !0u128 << (128 - prefix)
        };
        let start = base & mask;
        let end = start | !mask;
        return Some(ParsedNet::V6Range(start, end));
    }
    None
}

/// Splits `"start-end"` on the separating `-`. IPv6 addresses never contain a
/// bare `-`, so the rightmost `-` not adjacent to a `:` boundary is safe to
/// split on; in practice inetnum ranges only ever appear for either family as
/// two addresses joined by a single ` - ` or `-`.
fn split_range(s: &str) -> Option<(&str, &str)> {
    let idx = s.rfind('-')?;
    let (a, b) = (s[..idx].trim(), s[idx + 1..].trim());
    if a.is_empty() || b.is_empty() {
        return None;
    }
    Some((a, b))
}

fn parse_range(start: &str, end: &str) -> Option<ParsedNet> {
    if let (Ok(s), Ok(e)) = (start.parse::<Ipv4Addr>(), end.parse::<Ipv4Addr>()) {
        let (s, e) = (u32::from(s), u32::from(e));
        if s > e {
            return None;
        }
        return Some(ParsedNet::V4Range(s, e));
    }
    if let (Ok(s), Ok(e)) = (start.parse::<Ipv6Addr>(), end.parse::<Ipv6Addr>()) {
        let (s, e) = (u128::from(s), u128::from(e));
        if s > e {
            return None;
        }
        return Some(ParsedNet::V6Range(s, e));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_v4() {
        assert_eq!(
            parse_net("87.122.0.0/26"),
            Some(ParsedNet::V4Range(
                u32::from(Ipv4Addr::new(87, 122, 0, 0)),
                u32::from(Ipv4Addr::new(87, 122, 0, 63)),
            ))
        );
    }

    #[test]
    fn host_v4() {
        assert_eq!(
            parse_net("10.0.0.5"),
            Some(ParsedNet::V4Host(u32::from(Ipv4Addr::new(10, 0, 0, 5))))
        );
    }

    #[test]
    fn cidr_v6() {
        match parse_net("2604:a880:0:1011::/64").unwrap() {
            ParsedNet::V6Range(s, e) => {
                assert_eq!(s, u128::from("2604:a880:0:1011::".parse::<Ipv6Addr>().unwrap()));
                assert_eq!(
                    e,
                    u128::from(
                        "2604:a880:0:1011:ffff:ffff:ffff:ffff"
                            .parse::<Ipv6Addr>()
                            .unwrap()
                    )
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inetnum_range() {
        assert_eq!(
            parse_net("1.2.3.4-1.2.3.10"),
            Some(ParsedNet::V4Range(
                u32::from(Ipv4Addr::new(1, 2, 3, 4)),
                u32::from(Ipv4Addr::new(1, 2, 3, 10)),
            ))
        );
    }
}
