//! Company/WHOIS precedence resolution (spec.md §4.5 step 5): given every
//! company range containing the address, picks one by a fixed priority
//! chain, stopping at the first non-empty category.

use super::types::CompanyRecord;

/// Curated organization names that should win over an ordinary business
/// match (spec.md §4.5 step 5d). Kept short and explicit rather than
/// pulled from a config file — it is a fixed editorial list, not a tunable.
const PRIORITY_ORG_NAMES: &[&str] = &["Google LLC", "Amazon.com, Inc.", "Microsoft Corporation", "Cloudflare, Inc."];

/// A high abuser score crosses this threshold under step 5b.
const HIGH_ABUSER_SCORE: u8 = 80;

fn is_priority_type(record: &CompanyRecord) -> bool {
    use super::types::CompanyKind::*;
    matches!(record.kind, Education | Government | Banking)
}

fn matches_priority_name(record: &CompanyRecord) -> bool {
    PRIORITY_ORG_NAMES
        .iter()
        .any(|n| n.eq_ignore_ascii_case(record.name.trim()))
}

fn org_name_matches_asn(record: &CompanyRecord, asn_org: Option<&str>) -> bool {
    let Some(asn_org) = asn_org else { return false };
    record.kind != super::types::CompanyKind::Business
        && record.name.trim().eq_ignore_ascii_case(asn_org.trim())
}

/// `network_size` is the inclusive size of the matched range (`end - start
/// + 1`), used by step 5g to pick the narrowest range overall.
pub fn resolve<'a>(
    candidates: &'a [(CompanyRecord, u128)],
    asn_org: Option<&str>,
) -> Option<&'a CompanyRecord> {
    if candidates.is_empty() {
        return None;
    }
    let (non_last_resort, last_resort): (Vec<_>, Vec<_>) =
        candidates.iter().partition(|(r, _)| !r.is_last_resort);
    let pool: Vec<&(CompanyRecord, u128)> = if non_last_resort.is_empty() {
        last_resort
    } else {
        non_last_resort
    };

    // a. ARIN_CUST / RWHOIS registry tag.
    if let Some((r, _)) = pool
        .iter()
        .find(|(r, _)| r.registry_tag == "ARIN_CUST" || r.registry_tag == "RWHOIS")
    {
        return Some(r);
    }
    // b. high abuser score.
    if let Some((r, _)) = pool.iter().find(|(r, _)| r.abuser_score >= HIGH_ABUSER_SCORE) {
        return Some(r);
    }
    // c. priority type (education, government, banking).
    if let Some((r, _)) = pool.iter().find(|(r, _)| is_priority_type(r)) {
        return Some(r);
    }
    // d. curated priority-name list.
    if let Some((r, _)) = pool.iter().find(|(r, _)| matches_priority_name(r)) {
        return Some(r);
    }
    // e. exactly one isp-typed range.
    let isps: Vec<_> = pool
        .iter()
        .filter(|(r, _)| r.kind == super::types::CompanyKind::Isp)
        .collect();
    if isps.len() == 1 {
        return Some(&isps[0].0);
    }
    // f. org name equals ASN organization (case-insensitive, trimmed), type != business.
    if let Some((r, _)) = pool.iter().find(|(r, _)| org_name_matches_asn(r, asn_org)) {
        return Some(r);
    }
    // g. narrowest range overall.
    pool.iter().min_by_key(|(_, size)| *size).map(|(r, _)| r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::CompanyKind;

    fn rec(name: &str, kind: CompanyKind, tag: &str, score: u8, last_resort: bool) -> CompanyRecord {
        CompanyRecord {
            name: name.to_string(),
            kind,
            registry_tag: tag.to_string(),
            abuser_score: score,
            is_last_resort: last_resort,
            network: None,
        }
    }

    #[test]
    fn registry_tag_wins_first() {
        let candidates = vec![
            (rec("Acme ISP", CompanyKind::Isp, "ARIN_CUST", 0, false), 100u128),
            (rec("Random Biz", CompanyKind::Business, "ARIN", 90, false), 10u128),
        ];
        let picked = resolve(&candidates, None).unwrap();
        assert_eq!(picked.name, "Acme ISP");
    }

    #[test]
    fn single_isp_wins_when_no_higher_priority() {
        let candidates = vec![
            (rec("Solo ISP", CompanyKind::Isp, "ARIN", 0, false), 100u128),
            (rec("Other Biz", CompanyKind::Business, "ARIN", 0, false), 10u128),
        ];
        let picked = resolve(&candidates, None).unwrap();
        assert_eq!(picked.name, "Solo ISP");
    }

    #[test]
    fn falls_back_to_narrowest_range() {
        let candidates = vec![
            (rec("Wide Biz", CompanyKind::Business, "ARIN", 0, false), 1000u128),
            (rec("Narrow Biz", CompanyKind::Business, "ARIN", 0, false), 10u128),
        ];
        let picked = resolve(&candidates, None).unwrap();
        assert_eq!(picked.name, "Narrow Biz");
    }

    #[test]
    fn last_resort_only_used_when_no_alternative() {
        let candidates = vec![(rec("RIR Catchall", CompanyKind::Other, "ARIN", 0, true), 1u128)];
        let picked = resolve(&candidates, None).unwrap();
        assert_eq!(picked.name, "RIR Catchall");
    }
}
