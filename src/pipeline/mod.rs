//! Request pipeline (spec.md §4.5): composes every named FNLE plus the
//! auxiliary metadata maps into one `fastLookup` call, and a bulk variant
//! over as many as 100 addresses.

mod bogon;
mod company;
mod geo;
pub mod types;

use crate::config::DatasetConfig;
use crate::error::FnleError;
use crate::fnle::{Fnle, LoadResult, Policy};
use bogon::BogonSet;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Instant;
use types::*;

const BULK_LIMIT: usize = 100;

pub struct Pipeline {
    asn: Fnle<u32>,
    asn_meta: HashMap<u32, AsnMetadata>,
    datacenter: Fnle<DatacenterRecord>,
    company: Fnle<CompanyRecord>,
    crawler: Fnle<String>,
    mobile: Fnle<()>,
    satellite: Fnle<()>,
    tor: Fnle<()>,
    proxy: Fnle<()>,
    vpn: Fnle<String>,
    abuser: Fnle<()>,
    geo: Fnle<u64>,
    geo_names: HashMap<u64, GeoRecord>,
    country_table: HashMap<String, CountryMetadata>,
    bogon: BogonSet,
}

impl Pipeline {
    /// Builds empty FNLE instances with the policies spec.md §4.5 names;
    /// callers then `load()` each from its configured dataset directory.
    pub fn empty() -> Result<Self, FnleError> {
        Ok(Self {
            asn: Fnle::new("asn", Policy::Smallest),
            asn_meta: HashMap::new(),
            datacenter: Fnle::new("datacenter", Policy::All),
            company: Fnle::new("company", Policy::All),
            crawler: Fnle::new("crawler", Policy::Smallest),
            mobile: Fnle::new("mobile", Policy::First),
            satellite: Fnle::new("satellite", Policy::First),
            tor: Fnle::new("tor", Policy::First),
            proxy: Fnle::new("proxy", Policy::First),
            vpn: Fnle::new("vpn", Policy::First),
            abuser: Fnle::new("abuser", Policy::First),
            geo: Fnle::new("geo", Policy::All),
            geo_names: HashMap::new(),
            country_table: HashMap::new(),
            bogon: BogonSet::build()?,
        })
    }

    /// Loads every dataset from `config`'s directories. Missing directories
    /// leave the corresponding FNLE empty rather than failing the whole
    /// pipeline — a fresh deployment may not have every dataset yet.
    pub fn load(&mut self, config: &DatasetConfig) -> Result<(), FnleError> {
        load_into(&mut self.asn, &config.asn_dir)?;
        load_into(&mut self.datacenter, &config.datacenter_dir)?;
        load_into(&mut self.company, &config.company_dir)?;
        load_into(&mut self.crawler, &config.crawler_dir)?;
        load_into(&mut self.mobile, &config.mobile_dir)?;
        load_into(&mut self.satellite, &config.satellite_dir)?;
        load_into(&mut self.tor, &config.tor_dir)?;
        load_into(&mut self.proxy, &config.proxy_dir)?;
        load_into(&mut self.vpn, &config.vpn_dir)?;
        load_into(&mut self.abuser, &config.abuser_dir)?;
        load_into(&mut self.geo, &config.geo_dir)?;

        self.asn_meta = read_numeric_keyed_json_map(&config.asn_meta_file)?;
        self.geo_names = read_numeric_keyed_json_map(&config.geo_names_file)?;
        self.country_table = read_json_map(&config.country_table_file)?;
        Ok(())
    }

    /// `fastLookup(query, flags)` — spec.md §4.5. `asn_org` comes from the
    /// ASN lookup done in this same call, threaded into company resolution
    /// step 5f.
    pub fn fast_lookup(&self, addr: IpAddr, flags: LookupFlags) -> LookupResponse {
        let start = Instant::now();

        let is_bogon = self.bogon.is_bogon(addr);

        let asn_hit = self.asn.lookup(addr).into_iter().next();
        let asn_info = asn_hit.as_ref().and_then(|hit| {
            self.asn_meta.get(&hit.payload).map(|meta| AsnInfo {
                asn: hit.payload,
                organization: meta.organization.clone(),
                registry: meta.registry.clone(),
            })
        });

        let datacenter_hits = self.datacenter.lookup(addr);
        let datacenter = datacenter_hits
            .into_iter()
            .min_by_key(|h| network_size(h.network))
            .map(|h| with_network(h.payload, h.network, flags.return_network));

        let company_candidates: Vec<(CompanyRecord, u128)> = self
            .company
            .lookup(addr)
            .into_iter()
            .map(|h| {
                let size = network_size(h.network);
                (with_network(h.payload, h.network, flags.return_network), size)
            })
            .collect();
        let company = company::resolve(
            &company_candidates,
            asn_info.as_ref().map(|a| a.organization.as_str()),
        )
        .cloned();

        let crawler_label = self
            .crawler
            .lookup(addr)
            .into_iter()
            .next()
            .map(|h| h.payload);

        let is_mobile = !self.mobile.lookup(addr).is_empty();
        let is_satellite = !self.satellite.lookup(addr).is_empty();
        let is_tor = !self.tor.lookup(addr).is_empty();
        let is_proxy = !self.proxy.lookup(addr).is_empty();
        let is_vpn = !self.vpn.lookup(addr).is_empty();
        let is_abuser = !self.abuser.lookup(addr).is_empty();

        let location = self.resolve_location(addr);

        let abuse = company.as_ref().map(|_| AbuseRecord {
            email: None,
            phone: None,
        });

        LookupResponse {
            ip: addr.to_string(),
            rir: asn_info.as_ref().map(|a| a.registry.clone()),
            is_bogon,
            is_mobile,
            is_satellite,
            is_crawler: crawler_label,
            is_datacenter: datacenter.is_some(),
            is_tor,
            is_proxy,
            is_vpn,
            is_abuser,
            datacenter,
            company,
            abuse,
            asn: asn_info,
            location,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Recomputes the time-derived fields of a cached response's location
    /// (local time, unix time, DST) from its stored timezone name, so a
    /// cache hit never serves a stale clock (spec.md §4.4).
    pub fn refresh_time(&self, response: &mut LookupResponse) {
        let Some(location) = response.location.as_mut() else {
            return;
        };
        let resolved = location.timezone.as_deref().and_then(geo::resolve);
        location.local_time = resolved.as_ref().map(|t| t.local_time.clone());
        location.unix_time = resolved.as_ref().map(|t| t.unix_time);
        location.is_dst = resolved.as_ref().map(|t| t.is_dst);
    }

    fn resolve_location(&self, addr: IpAddr) -> Option<LocationInfo> {
        let hit = self.geo.lookup(addr).into_iter().next()?;
        let record = self.geo_names.get(&hit.payload)?;
        let country_meta = self.country_table.get(&record.country_code);
        let country = CountryInfo {
            code: record.country_code.clone(),
            name: country_meta.map(|c| c.name.clone()).unwrap_or_default(),
            continent_code: country_meta.map(|c| c.continent_code.clone()).unwrap_or_default(),
            continent_name: country_meta.map(|c| c.continent_name.clone()).unwrap_or_default(),
            calling_code: country_meta.map(|c| c.calling_code.clone()).unwrap_or_default(),
            currency_code: country_meta.map(|c| c.currency_code.clone()).unwrap_or_default(),
            is_eu_member: country_meta.map(|c| c.is_eu_member).unwrap_or(false),
        };
        let resolved_time = country_meta.and_then(|c| geo::resolve(&c.primary_timezone));
        Some(LocationInfo {
            country,
            state: record.state.clone(),
            city: record.city.clone(),
            zip: record.zip.clone(),
            lat: record.lat,
            lon: record.lon,
            timezone: country_meta.map(|c| c.primary_timezone.clone()),
            local_time: resolved_time.as_ref().map(|t| t.local_time.clone()),
            unix_time: resolved_time.as_ref().map(|t| t.unix_time),
            is_dst: resolved_time.as_ref().map(|t| t.is_dst),
        })
    }

    /// Bulk lookup (spec.md §4.5, last paragraph): up to [`BULK_LIMIT`]
    /// distinct addresses, invalid entries silently filtered, an error only
    /// when the whole input is invalid or the cap is exceeded.
    pub fn bulk_lookup(
        &self,
        addrs: &[String],
        flags: LookupFlags,
    ) -> Result<HashMap<String, LookupResponse>, BulkLookupError> {
        if addrs.is_empty() {
            return Err(BulkLookupError::Empty);
        }
        if addrs.len() > BULK_LIMIT {
            return Err(BulkLookupError::LimitExceeded);
        }
        let mut out = HashMap::with_capacity(addrs.len());
        for raw in addrs {
            if let Ok(addr) = raw.parse::<IpAddr>() {
                out.insert(raw.clone(), self.fast_lookup(addr, flags));
            }
        }
        if out.is_empty() {
            return Err(BulkLookupError::NoValidEntries);
        }
        Ok(out)
    }

    /// True if any dataset's on-disk snapshot has a newer version stamp than
    /// what's currently loaded (SPEC_FULL.md §9 `/isUpdateNeeded`).
    pub fn is_update_needed(&self, config: &DatasetConfig) -> bool {
        self.asn.is_stale(Path::new(&config.asn_dir))
            || self.datacenter.is_stale(Path::new(&config.datacenter_dir))
            || self.company.is_stale(Path::new(&config.company_dir))
            || self.crawler.is_stale(Path::new(&config.crawler_dir))
            || self.mobile.is_stale(Path::new(&config.mobile_dir))
            || self.satellite.is_stale(Path::new(&config.satellite_dir))
            || self.tor.is_stale(Path::new(&config.tor_dir))
            || self.proxy.is_stale(Path::new(&config.proxy_dir))
            || self.vpn.is_stale(Path::new(&config.vpn_dir))
            || self.abuser.is_stale(Path::new(&config.abuser_dir))
            || self.geo.is_stale(Path::new(&config.geo_dir))
    }

    pub fn reload(&mut self, config: &DatasetConfig) -> Result<bool, FnleError> {
        let mut any_reloaded = false;
        any_reloaded |= reload_one(&mut self.asn, &config.asn_dir)?;
        any_reloaded |= reload_one(&mut self.datacenter, &config.datacenter_dir)?;
        any_reloaded |= reload_one(&mut self.company, &config.company_dir)?;
        any_reloaded |= reload_one(&mut self.crawler, &config.crawler_dir)?;
        any_reloaded |= reload_one(&mut self.mobile, &config.mobile_dir)?;
        any_reloaded |= reload_one(&mut self.satellite, &config.satellite_dir)?;
        any_reloaded |= reload_one(&mut self.tor, &config.tor_dir)?;
        any_reloaded |= reload_one(&mut self.proxy, &config.proxy_dir)?;
        any_reloaded |= reload_one(&mut self.vpn, &config.vpn_dir)?;
        any_reloaded |= reload_one(&mut self.abuser, &config.abuser_dir)?;
        any_reloaded |= reload_one(&mut self.geo, &config.geo_dir)?;
        self.asn_meta = read_numeric_keyed_json_map(&config.asn_meta_file)?;
        self.geo_names = read_numeric_keyed_json_map(&config.geo_names_file)?;
        self.country_table = read_json_map(&config.country_table_file)?;
        Ok(any_reloaded)
    }
}

fn load_into<P>(fnle: &mut Fnle<P>, dir: &str) -> Result<(), FnleError>
where
    P: Clone + serde::de::DeserializeOwned,
{
    // A missing store directory is fine at startup — the FNLE just stays
    // empty until the dataset is provisioned.
    fnle.load(Path::new(dir))?;
    Ok(())
}

fn reload_one<P>(fnle: &mut Fnle<P>, dir: &str) -> Result<bool, FnleError>
where
    P: Clone + serde::de::DeserializeOwned,
{
    Ok(matches!(fnle.load(Path::new(dir))?, LoadResult::Success))
}

fn read_json_map<V: serde::de::DeserializeOwned>(path: &str) -> Result<HashMap<String, V>, FnleError> {
    if !Path::new(path).exists() {
        return Ok(HashMap::new());
    }
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// `asn_meta_file`/`geo_names_file` are JSON objects keyed by the decimal
/// ASN or geoname id; read as string keys first (JSON object keys are
/// always strings) then parse into the numeric key the hot path wants.
fn read_numeric_keyed_json_map<K, V>(path: &str) -> Result<HashMap<K, V>, FnleError>
where
    K: std::str::FromStr + std::hash::Hash + Eq,
    V: serde::de::DeserializeOwned,
{
    let raw: HashMap<String, V> = read_json_map(path)?;
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| k.parse::<K>().ok().map(|k| (k, v)))
        .collect())
}

fn network_size(network: Option<(u128, u128)>) -> u128 {
    match network {
        Some((s, e)) => e.saturating_sub(s) + 1,
        None => u128::MAX,
    }
}

fn with_network<T>(payload: T, network: Option<(u128, u128)>, include: bool) -> T
where
    T: AttachNetwork,
{
    if include {
        payload.attach(network)
    } else {
        payload
    }
}

trait AttachNetwork {
    fn attach(self, network: Option<(u128, u128)>) -> Self;
}

impl AttachNetwork for CompanyRecord {
    fn attach(mut self, network: Option<(u128, u128)>) -> Self {
        self.network = network.map(format_network);
        self
    }
}

impl AttachNetwork for DatacenterRecord {
    fn attach(mut self, network: Option<(u128, u128)>) -> Self {
        self.network = network.map(format_network);
        self
    }
}

fn format_network(network: (u128, u128)) -> (String, String) {
    (network.0.to_string(), network.1.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum BulkLookupError {
    #[error("bulk input is empty")]
    Empty,
    #[error("bulk input exceeds the 100-address limit")]
    LimitExceeded,
    #[error("bulk input contained no valid entries")]
    NoValidEntries,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pipeline_builds_without_error() {
        // Regression: the bogon set used to reject fc00::/7, fe80::/10, and
        // ff00::/8 for exceeding the FNLE's max range size, which made this
        // panic at every construction site.
        Pipeline::empty().unwrap();
    }

    #[test]
    fn refresh_time_recomputes_from_stored_timezone() {
        let pipeline = Pipeline::empty().unwrap();
        let mut response = pipeline.fast_lookup("8.8.8.8".parse().unwrap(), LookupFlags::default());
        response.location = Some(LocationInfo {
            country: CountryInfo {
                code: "US".into(),
                name: String::new(),
                continent_code: String::new(),
                continent_name: String::new(),
                calling_code: String::new(),
                currency_code: String::new(),
                is_eu_member: false,
            },
            state: None,
            city: None,
            zip: None,
            lat: 0.0,
            lon: 0.0,
            timezone: Some("America/New_York".into()),
            local_time: None,
            unix_time: None,
            is_dst: None,
        });
        pipeline.refresh_time(&mut response);
        let location = response.location.unwrap();
        assert!(location.local_time.is_some());
        assert!(location.unix_time.is_some());
    }

    #[test]
    fn is_update_needed_false_when_no_dataset_dirs_exist() {
        let pipeline = Pipeline::empty().unwrap();
        let config = DatasetConfig {
            asn_dir: "nonexistent/asn".into(),
            datacenter_dir: "nonexistent/datacenter".into(),
            company_dir: "nonexistent/company".into(),
            crawler_dir: "nonexistent/crawler".into(),
            mobile_dir: "nonexistent/mobile".into(),
            satellite_dir: "nonexistent/satellite".into(),
            tor_dir: "nonexistent/tor".into(),
            proxy_dir: "nonexistent/proxy".into(),
            vpn_dir: "nonexistent/vpn".into(),
            abuser_dir: "nonexistent/abuser".into(),
            geo_dir: "nonexistent/geo".into(),
            geo_names_file: "nonexistent/geonames.json".into(),
            country_table_file: "nonexistent/countries.json".into(),
            asn_meta_file: "nonexistent/asn_meta.json".into(),
        };
        assert!(!pipeline.is_update_needed(&config));
    }
}
