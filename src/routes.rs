//! HTTP surface (spec.md §6): routing, parameter precedence, the closed
//! error taxonomy, and the admin endpoints. Generalized from the teacher's
//! `handler`/`bulk_handler` pair (`Query` extractor for the single lookup,
//! `futures::stream` for bulk) to the full response shape and format set.

use crate::error::{ApiError, ErrorCode};
use crate::formats;
use crate::params::{ParamSources, API_KEY_ALIASES, QUERY_ALIASES};
use crate::pipeline::types::LookupFlags;
use crate::ratelimit::{RequestClass, Verdict};
use crate::state::AppState;
use crate::usage_sync;
use axum::extract::{ConnectInfo, Json, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Records every 4xx/5xx response to [`crate::stats::Stats`] so `/logs` and
/// `errors_total` reflect real traffic rather than sitting empty forever.
pub async fn record_errors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let response = next.run(req).await;
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        state.stats.record_error(format!("{method} {uri} -> {status}"));
    }
    response
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toon,
    Text,
    Csv,
    Html,
}

fn render(format: Format, value: &serde_json::Value) -> Response {
    match format {
        Format::Json => axum::Json(value.clone()).into_response(),
        Format::Toon => formats::to_toon(value).into_response(),
        Format::Text => formats::to_text(value).into_response(),
        Format::Csv => (
            [(axum::http::header::CONTENT_TYPE, "text/csv")],
            formats::to_csv(value),
        )
            .into_response(),
        Format::Html => (
            [(axum::http::header::CONTENT_TYPE, "text/html")],
            formats::to_html(value),
        )
            .into_response(),
    }
}

fn admin_key(state: &AppState) -> String {
    state.config.load().admin.admin_key.clone()
}

async fn respond(
    state: AppState,
    peer: SocketAddr,
    format: Format,
    query: HashMap<String, String>,
    body: Option<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    state.stats.record_request();
    let sources = ParamSources {
        body: body.as_ref(),
        query: &query,
    };

    let api_key = sources.resolve(API_KEY_ALIASES).map(|r| r.value.to_string());
    let raw_addr = sources
        .resolve(QUERY_ALIASES)
        .map(|r| r.value.to_string())
        .unwrap_or_else(|| peer.ip().to_string());

    let client_ip = peer.ip();
    let verdict = {
        let mut limiter = state.rate_limiter.lock().unwrap();
        limiter.check(client_ip, api_key.as_deref(), &admin_key(&state), RequestClass::Normal)
    };
    if let Verdict::Deny(code) = verdict {
        state.stats.record_rate_limit_denial();
        return Err(ApiError::new(code));
    }
    if let Some(key) = &api_key {
        state.usage_counters.record(key);
    }

    let addr: IpAddr = raw_addr
        .parse()
        .map_err(|_| ApiError::new(ErrorCode::InvalidIpOrAsn))?;

    let flags = LookupFlags {
        return_network: query
            .iter()
            .chain(body.iter().flatten())
            .any(|(k, v)| k.eq_ignore_ascii_case("returnNetwork") && v == "true"),
    };
    let flags_bitmask = flags.return_network as u32;
    let key = AppState::cache_key(&raw_addr, flags_bitmask);

    let response = {
        let cached = {
            let mut cache = state.cache.lock().unwrap();
            cache.get(&key).cloned()
        };
        if let Some(mut hit) = cached {
            state.stats.record_cache_hit();
            state.pipeline.load().refresh_time(&mut hit);
            hit
        } else {
            state.stats.record_cache_miss();
            let pipeline = state.pipeline.load();
            let computed = pipeline.fast_lookup(addr, flags);
            state.cache.lock().unwrap().set(key, computed.clone());
            computed
        }
    };

    let value = serde_json::to_value(&response).map_err(|_| ApiError::new(ErrorCode::UnexpectedServerError))?;
    Ok(render(format, &value))
}

macro_rules! format_handlers {
    ($get_name:ident, $post_name:ident, $format:expr) => {
        pub async fn $get_name(
            State(state): State<AppState>,
            ConnectInfo(peer): ConnectInfo<SocketAddr>,
            Query(query): Query<HashMap<String, String>>,
        ) -> Result<Response, ApiError> {
            respond(state, peer, $format, query, None).await
        }

        pub async fn $post_name(
            State(state): State<AppState>,
            ConnectInfo(peer): ConnectInfo<SocketAddr>,
            Query(query): Query<HashMap<String, String>>,
            body: Option<Json<HashMap<String, String>>>,
        ) -> Result<Response, ApiError> {
            respond(state, peer, $format, query, body.map(|Json(b)| b)).await
        }
    };
}

format_handlers!(json_get, json_post, Format::Json);
format_handlers!(toon_get, toon_post, Format::Toon);
format_handlers!(text_get, text_post, Format::Text);
format_handlers!(csv_get, csv_post, Format::Csv);
format_handlers!(html_get, html_post, Format::Html);

/// `/ip` — plaintext client IP, never rate-limited (spec.md §6).
pub async fn client_ip(ConnectInfo(peer): ConnectInfo<SocketAddr>) -> String {
    peer.ip().to_string()
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum BulkBody {
    Array(Vec<String>),
    Other(serde_json::Value),
}

/// `/bulk` — spec.md §4.5 last paragraph.
pub async fn bulk(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<BulkBody>,
) -> Result<Response, ApiError> {
    state.stats.record_request();
    let addrs = match body {
        BulkBody::Array(v) => v,
        BulkBody::Other(_) => return Err(ApiError::new(ErrorCode::InvalidBulkInputNotArray)),
    };
    if addrs.is_empty() {
        return Err(ApiError::new(ErrorCode::InvalidBulkInputEmpty));
    }
    if addrs.len() > 100 {
        return Err(ApiError::new(ErrorCode::BulkLimitExceeded));
    }

    let api_key = ParamSources { body: None, query: &query }
        .resolve(API_KEY_ALIASES)
        .map(|r| r.value.to_string());
    let verdict = {
        let mut limiter = state.rate_limiter.lock().unwrap();
        limiter.check(peer.ip(), api_key.as_deref(), &admin_key(&state), RequestClass::Bulk)
    };
    if let Verdict::Deny(code) = verdict {
        state.stats.record_rate_limit_denial();
        return Err(ApiError::new(code));
    }
    if let Some(key) = &api_key {
        state.usage_counters.record(key);
    }

    let flags = LookupFlags::default();
    let pipeline = state.pipeline.load_full();
    let results: HashMap<String, serde_json::Value> = stream::iter(addrs)
        .then(|raw| {
            let pipeline = pipeline.clone();
            async move {
                let parsed: Option<IpAddr> = raw.parse().ok();
                let value = parsed.map(|addr| {
                    serde_json::to_value(pipeline.fast_lookup(addr, flags)).unwrap_or(serde_json::Value::Null)
                });
                (raw, value)
            }
        })
        .filter_map(|(raw, value)| async move { value.map(|v| (raw, v)) })
        .collect()
        .await;

    if results.is_empty() {
        return Err(ApiError::new(ErrorCode::InvalidBulkInputNoValidEntries));
    }
    Ok(axum::Json(results).into_response())
}

fn require_admin(state: &AppState, key: Option<&str>) -> Result<(), ApiError> {
    match key {
        Some(k) if k == admin_key(state) => Ok(()),
        Some(_) => Err(ApiError::new(ErrorCode::InvalidApiKey)),
        None => Err(ApiError::new(ErrorCode::ForbiddenApiKeyRequired)),
    }
}

fn admin_key_from_query(query: &HashMap<String, String>) -> Option<String> {
    ParamSources { body: None, query }
        .resolve(API_KEY_ALIASES)
        .map(|r| r.value.to_string())
}

pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    require_admin(&state, admin_key_from_query(&query).as_deref())?;
    Ok(axum::Json(state.stats.snapshot()).into_response())
}

pub async fn logs(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    require_admin(&state, admin_key_from_query(&query).as_deref())?;
    Ok(axum::Json(state.stats.recent_logs(200)).into_response())
}

pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    require_admin(&state, admin_key_from_query(&query).as_deref())?;
    Ok(axum::Json(serde_json::json!({
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "pid": state.pid,
    }))
    .into_response())
}

pub async fn pid(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    require_admin(&state, admin_key_from_query(&query).as_deref())?;
    Ok(state.pid.to_string().into_response())
}

/// Reloads every dataset into a brand-new [`Pipeline`] and swaps the shared
/// pointer — readers in flight keep seeing the old snapshot, never a mix
/// (spec.md §5 "Shared resource policy").
pub async fn reload_api(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    require_admin(&state, admin_key_from_query(&query).as_deref())?;
    let config = state.config.load();
    let mut fresh =
        crate::pipeline::Pipeline::empty().map_err(|_| ApiError::new(ErrorCode::ConfigUpdateFailed))?;
    fresh
        .load(&config.datasets)
        .map_err(|_| ApiError::new(ErrorCode::ConfigUpdateFailed))?;
    state.pipeline.store(Arc::new(fresh));
    Ok(StatusCode::OK.into_response())
}

/// Forces an out-of-band usage sync (spec.md §4.8) and applies whatever
/// `apiKey -> status` map comes back, the same effect the periodic
/// background sync has — analogous to `reload_api` above rebuilding the
/// dataset pipeline, but for the key-status side of state.
pub async fn reload_users(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    require_admin(&state, admin_key_from_query(&query).as_deref())?;
    let config = state.config.load();
    let client = reqwest::Client::new();
    match usage_sync::sync_once(&client, &config.usage_sync, &state.usage_counters).await {
        Some(statuses) => {
            state.rate_limiter.lock().unwrap().update_key_statuses(statuses);
            Ok(StatusCode::OK.into_response())
        }
        None => Err(ApiError::new(ErrorCode::ConfigUpdateFailed)),
    }
}

pub async fn is_update_needed(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    require_admin(&state, admin_key_from_query(&query).as_deref())?;
    let config = state.config.load();
    let update_needed = state.pipeline.load().is_update_needed(&config.datasets);
    Ok(axum::Json(serde_json::json!({ "update_needed": update_needed })).into_response())
}

pub async fn api_version() -> Response {
    axum::Json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") })).into_response()
}

pub async fn get_source_code_hash(State(state): State<AppState>) -> Response {
    axum::Json(serde_json::json!({ "hash": &*state.source_hash })).into_response()
}

pub async fn config(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    require_admin(&state, admin_key_from_query(&query).as_deref())?;
    Ok(axum::Json(state.config.load().redacted()).into_response())
}

/// Fallback for unmatched methods on a known path (spec.md §6, 405 class).
pub async fn method_not_allowed() -> ApiError {
    ApiError::new(ErrorCode::InvalidHttpMethod)
}
