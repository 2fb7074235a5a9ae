mod cache;
mod config;
mod error;
mod fnle;
mod formats;
mod params;
mod pipeline;
mod ratelimit;
mod routes;
mod state;
mod stats;
mod tasks;
mod usage_sync;
mod worker;

use arc_swap::ArcSwap;
use axum::routing::{get, post};
use cache::LfuCache;
use config::Config;
use ratelimit::RateLimiter;
use state::AppState;
use stats::Stats;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use usage_sync::UsageCounters;

fn init_tracing() {
    // spec.md §6: LOG_LEVEL 0 = off, 1 = errors, 2 = warnings+errors, 3 = all.
    let filter = match std::env::var("LOG_LEVEL").as_deref() {
        Ok("0") => "off",
        Ok("1") => "error",
        Ok("2") => "warn",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// A build fingerprint for `/source_hash` (spec.md §6): hashes this
/// process's own executable bytes rather than faking a VCS commit id we
/// have no way to obtain at runtime.
fn source_hash() -> Arc<str> {
    let hash = std::env::current_exe()
        .and_then(std::fs::read)
        .map(|bytes| {
            let mut hasher = DefaultHasher::new();
            bytes.hash(&mut hasher);
            hasher.finish()
        })
        .unwrap_or(0);
    format!("{hash:016x}").into()
}

/// Builds the axum router over an already-assembled [`AppState`] — split out
/// from [`run_worker`] so tests can drive it with
/// `tower::ServiceExt::oneshot` without binding a real socket.
fn build_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/json", get(routes::json_get).post(routes::json_post))
        .route("/toon", get(routes::toon_get).post(routes::toon_post))
        .route("/text", get(routes::text_get).post(routes::text_post))
        .route("/txt", get(routes::text_get).post(routes::text_post))
        .route("/csv", get(routes::csv_get).post(routes::csv_post))
        .route("/html", get(routes::html_get).post(routes::html_post))
        .route("/", get(routes::json_get).post(routes::json_post))
        .route("/ip", get(routes::client_ip))
        .route("/bulk", post(routes::bulk))
        .route("/stats", get(routes::stats))
        .route("/logs", get(routes::logs))
        .route("/status", get(routes::status))
        .route("/pid", get(routes::pid))
        .route("/reloadApi", post(routes::reload_api))
        .route("/reloadUsers", post(routes::reload_users))
        .route("/isUpdateNeeded", get(routes::is_update_needed))
        .route("/apiVersion", get(routes::api_version))
        .route("/getSourceCodeHash", get(routes::get_source_code_hash))
        .route("/config", get(routes::config))
        .fallback(routes::method_not_allowed)
        .layer(axum::middleware::from_fn_with_state(state.clone(), routes::record_errors))
        .with_state(state)
}

fn build_state(config: Config, pipeline: pipeline::Pipeline) -> (AppState, Arc<ArcSwap<Config>>, Arc<ArcSwap<pipeline::Pipeline>>, Arc<Mutex<RateLimiter>>, Arc<Stats>, Arc<UsageCounters>) {
    let config = Arc::new(ArcSwap::new(Arc::new(config)));
    let pipeline = Arc::new(ArcSwap::new(Arc::new(pipeline)));
    let cache = Arc::new(Mutex::new(LfuCache::new(config.load().cache.capacity)));
    let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(config.load().rate_limits.clone())));
    let stats = Arc::new(Stats::default());
    let usage_counters = Arc::new(UsageCounters::default());

    let state = AppState {
        config: config.clone(),
        pipeline: pipeline.clone(),
        cache,
        rate_limiter: rate_limiter.clone(),
        stats: stats.clone(),
        usage_counters: usage_counters.clone(),
        started_at: Instant::now(),
        pid: std::process::id(),
        source_hash: source_hash(),
    };
    (state, config, pipeline, rate_limiter, stats, usage_counters)
}

async fn run_worker(config: Config) -> std::io::Result<()> {
    let mut pipeline = pipeline::Pipeline::empty().expect("failed to construct pipeline");
    pipeline
        .load(&config.datasets)
        .unwrap_or_else(|err| tracing::warn!(%err, "initial dataset load incomplete"));

    let (state, config, pipeline, rate_limiter, stats, usage_counters) = build_state(config, pipeline);

    worker::install_reload_handler(pipeline.clone(), config.clone()).await?;
    tasks::spawn_usage_sync(config.clone(), rate_limiter, usage_counters);
    tasks::spawn_stats_reset(stats, Duration::from_secs(3600));
    tasks::spawn_auto_reload(config.clone(), pipeline, Duration::from_secs(10));

    let app = build_router(state);

    let addr: SocketAddr = config
        .load()
        .server
        .binding_address
        .parse()
        .expect("invalid server.binding_address");
    let listener = tokio::net::TcpListener::from_std(worker::bind_reuseport(&addr)?)?;
    tracing::info!(%addr, pid = std::process::id(), "worker listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

#[tokio::main]
async fn main() {
    init_tracing();
    let config = Config::load().expect("failed to load configuration");

    let is_worker = std::env::var("WORKER_PROCESS").is_ok();
    let is_reduced_ram = std::env::var("IS_REDUCED_RAM_IP_API").is_ok();

    if is_worker || is_reduced_ram {
        run_worker(config).await.expect("worker process exited with an error");
    } else {
        worker::run_master(config).await.expect("master process exited with an error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::Request;
    use config::{AdminConfig, CacheConfig, DatasetConfig, RateLimitConfig, ServerConfig, UsageSyncConfig, WorkerConfig};
    use std::collections::HashSet;
    use tower::ServiceExt;

    fn test_config(normal_lookups_per_hour: u32) -> Config {
        Config {
            server: ServerConfig {
                binding_address: "127.0.0.1:0".into(),
                pid_file: "/tmp/fnle-ip-api-test.pid".into(),
            },
            datasets: DatasetConfig {
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
            },
            cache: CacheConfig { capacity: 1000 },
            rate_limits: RateLimitConfig {
                enable_rate_limit: true,
                normal_lookups_per_hour,
                whois_lookups_per_hour: normal_lookups_per_hour,
                bulk_lookups_per_hour: normal_lookups_per_hour,
                deny_count_threshold: 50,
                whitelist_api_keys: HashSet::new(),
                blacklisted_networks: Vec::new(),
            },
            workers: WorkerConfig { count: 1 },
            usage_sync: UsageSyncConfig {
                endpoint: None,
                min_interval_secs: 360,
                max_interval_secs: 480,
            },
            admin: AdminConfig {
                admin_key: "test-admin-key".into(),
            },
        }
    }

    fn test_router(normal_lookups_per_hour: u32) -> axum::Router {
        let pipeline = pipeline::Pipeline::empty().unwrap();
        let (state, ..) = build_state(test_config(normal_lookups_per_hour), pipeline);
        build_router(state)
    }

    fn request(method: &str, uri: &str, peer: [u8; 4]) -> Request<Body> {
        let mut req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 12345))));
        req
    }

    #[tokio::test]
    async fn invalid_ip_returns_400_with_closed_error_code() {
        let router = test_router(1000);
        let resp = router
            .oneshot(request("GET", "/json?ip=not-an-ip", [203, 0, 113, 1]))
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error_code"], "INVALID_IP_OR_ASN");
    }

    /// spec.md §8 Scenario 6: `enableRateLimit=true`, `normalLookupsPerHour=1`,
    /// two successive GETs from the same client IP → 200 then 429.
    #[tokio::test]
    async fn second_lookup_in_the_same_hour_is_rate_limited() {
        let router = test_router(1);
        let peer = [198, 51, 100, 7];

        let first = router
            .clone()
            .oneshot(request("GET", "/json?ip=8.8.8.8", peer))
            .await
            .unwrap();
        assert_eq!(first.status(), axum::http::StatusCode::OK);

        let second = router
            .oneshot(request("GET", "/json?ip=8.8.8.8", peer))
            .await
            .unwrap();
        assert_eq!(second.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
        let body = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error_code"], "RATE_LIMIT_EXCEEDED");
    }

    /// spec.md §6: the POST body takes precedence over the URL query for the
    /// same logical parameter.
    #[tokio::test]
    async fn post_body_query_param_beats_url_query() {
        let router = test_router(1000);
        let mut req = Request::builder()
            .method("POST")
            .uri("/json?ip=1.2.3.4")
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"ip":"8.8.8.8"}"#))
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 9], 12345))));

        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["ip"], "8.8.8.8");
    }

    #[tokio::test]
    async fn wrong_method_on_known_path_returns_405() {
        let router = test_router(1000);
        let resp = router
            .oneshot(request("DELETE", "/json", [8, 8, 8, 8]))
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::METHOD_NOT_ALLOWED);
    }
}
