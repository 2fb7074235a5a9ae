//! Timezone / local-time / DST computation (spec.md §4.5 step 7).
//!
//! The original computes this from an embedded tzdata polygon lookup over
//! raw (lat, lon). We don't carry a geo-polygon crate in this stack, so we
//! resolve the representative timezone from the resolved country's
//! `primary_timezone` (see `CountryMetadata` in [`super::types`]) and derive
//! local time/unix time/DST from `chrono-tz` — documented as an accepted
//! approximation in DESIGN.md.

use chrono::{TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};

pub struct ResolvedTime {
    pub local_time: String,
    pub unix_time: i64,
    pub is_dst: bool,
}

pub fn resolve(tz_name: &str) -> Option<ResolvedTime> {
    let tz: Tz = tz_name.parse().ok()?;
    let now_utc = Utc::now();
    let local = now_utc.with_timezone(&tz);
    let is_dst = tz.offset_from_utc_datetime(&now_utc.naive_utc()).dst_offset()
        != chrono::Duration::zero();
    Some(ResolvedTime {
        local_time: local.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
        unix_time: now_utc.timestamp(),
        is_dst,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_timezone() {
        let resolved = resolve("America/New_York").unwrap();
        assert!(resolved.unix_time > 0);
        assert!(resolved.local_time.contains('T'));
    }

    #[test]
    fn unknown_timezone_returns_none() {
        assert!(resolve("Not/A_Zone").is_none());
    }
}
