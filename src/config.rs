use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Top-level configuration, loaded via the `config` crate from `config.toml`
/// with environment overrides (`APP__SECTION__FIELD`), the way the teacher
/// repo loads `ServerConfig` — generalized to every subsystem this service
/// now carries.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub datasets: DatasetConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub usage_sync: UsageSyncConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub binding_address: String,
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
}

fn default_pid_file() -> String {
    "/tmp/fnle-ip-api.pid".to_string()
}

/// Paths to the per-family FNLE snapshot directories the pipeline loads at
/// startup and on reload. Each is a directory in the layout of spec.md §4.3.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetConfig {
    pub asn_dir: String,
    pub datacenter_dir: String,
    pub company_dir: String,
    pub crawler_dir: String,
    pub mobile_dir: String,
    pub satellite_dir: String,
    pub tor_dir: String,
    pub proxy_dir: String,
    pub vpn_dir: String,
    pub abuser_dir: String,
    pub geo_dir: String,
    pub geo_names_file: String,
    pub country_table_file: String,
    pub asn_meta_file: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            asn_dir: "data/asn".into(),
            datacenter_dir: "data/datacenter".into(),
            company_dir: "data/company".into(),
            crawler_dir: "data/crawler".into(),
            mobile_dir: "data/mobile".into(),
            satellite_dir: "data/satellite".into(),
            tor_dir: "data/tor".into(),
            proxy_dir: "data/proxy".into(),
            vpn_dir: "data/vpn".into(),
            abuser_dir: "data/abuser".into(),
            geo_dir: "data/geo".into(),
            geo_names_file: "data/geonames.json".into(),
            country_table_file: "data/countries.json".into(),
            asn_meta_file: "data/asn_meta.json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100_000 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub enable_rate_limit: bool,
    pub normal_lookups_per_hour: u32,
    pub whois_lookups_per_hour: u32,
    pub bulk_lookups_per_hour: u32,
    pub deny_count_threshold: u32,
    #[serde(default)]
    pub whitelist_api_keys: HashSet<String>,
    #[serde(default)]
    pub blacklisted_networks: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enable_rate_limit: true,
            normal_lookups_per_hour: 1_000,
            whois_lookups_per_hour: 100,
            bulk_lookups_per_hour: 50,
            deny_count_threshold: 50,
            whitelist_api_keys: HashSet::new(),
            blacklisted_networks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    pub count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { count: 1 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UsageSyncConfig {
    pub endpoint: Option<String>,
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
}

impl Default for UsageSyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            min_interval_secs: 360,
            max_interval_secs: 480,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    pub admin_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            admin_key: "change-me".into(),
        }
    }
}

impl Config {
    pub fn load() -> core::result::Result<Config, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;
        let cfg: Config = settings.try_deserialize()?;
        Ok(cfg)
    }

    /// Resolve `workers.count`, capped to the CPU count and forced to 1 under
    /// `IS_REDUCED_RAM_IP_API` (spec.md §6 environment list).
    pub fn resolved_worker_count(&self) -> usize {
        if std::env::var("IS_REDUCED_RAM_IP_API").is_ok() {
            return 1;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.workers.count.clamp(1, cpus)
    }

    /// A copy of the config with secrets masked, for the `/config` admin
    /// endpoint.
    pub fn redacted(&self) -> Config {
        let mut c = self.clone();
        c.admin.admin_key = "***".into();
        c
    }
}
