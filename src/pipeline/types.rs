//! Response record shapes (spec.md §4.5, SPEC_FULL.md §3 supplemental
//! types). Field order on [`LookupResponse`] mirrors the fixed key order
//! spec.md §4.5 step 9 names; `serde_json` serializes struct fields in
//! declaration order, so that order is load-bearing here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsnMetadata {
    pub organization: String,
    pub registry: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsnInfo {
    pub asn: u32,
    pub organization: String,
    pub registry: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyKind {
    Isp,
    Business,
    Education,
    Government,
    Banking,
    Other,
}

/// A candidate company/WHOIS range, as stored in the company FNLE payload
/// and resolved by the precedence chain in [`super::company`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub name: String,
    pub kind: CompanyKind,
    /// `ARIN_CUST`, `RWHOIS`, or the registry's catch-all tag.
    pub registry_tag: String,
    pub abuser_score: u8,
    /// RIR catch-all ranges (e.g. "NET-0-0-0-0-0") — skipped unless the
    /// only option (spec.md §4.5 step 5).
    pub is_last_resort: bool,
    /// `[start, end]` of the matched range, present only when the request
    /// set `returnNetwork=true` (spec.md §4.2 step 5).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacenterRecord {
    pub name: String,
    pub asn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseRecord {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryMetadata {
    pub name: String,
    pub continent_code: String,
    pub continent_name: String,
    pub calling_code: String,
    pub currency_code: String,
    pub is_eu_member: bool,
    /// Primary IANA timezone used as the representative zone for this
    /// country when resolving local time from a geoname (spec.md §4.5
    /// step 7 — see DESIGN.md for why this substitutes for a lat/lon
    /// polygon lookup).
    pub primary_timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRecord {
    pub country_code: String,
    pub state: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryInfo {
    pub code: String,
    pub name: String,
    pub continent_code: String,
    pub continent_name: String,
    pub calling_code: String,
    pub currency_code: String,
    pub is_eu_member: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationInfo {
    pub country: CountryInfo,
    pub state: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub timezone: Option<String>,
    pub local_time: Option<String>,
    pub unix_time: Option<i64>,
    pub is_dst: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResponse {
    pub ip: String,
    pub rir: Option<String>,
    pub is_bogon: bool,
    pub is_mobile: bool,
    pub is_satellite: bool,
    /// `None` when unmatched, `Some(label)` when the crawler FNLE hits
    /// (spec.md §4.5 step 6 — a string label rather than a bare flag).
    pub is_crawler: Option<String>,
    pub is_datacenter: bool,
    pub is_tor: bool,
    pub is_proxy: bool,
    pub is_vpn: bool,
    pub is_abuser: bool,
    pub datacenter: Option<DatacenterRecord>,
    pub company: Option<CompanyRecord>,
    pub abuse: Option<AbuseRecord>,
    pub asn: Option<AsnInfo>,
    pub location: Option<LocationInfo>,
    pub elapsed_ms: f64,
}

/// Per-request flags and options that change the response shape; excluded
/// from the LFU cache key fingerprint where they are time-derived (spec.md
/// §4.4), included otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupFlags {
    pub return_network: bool,
}
