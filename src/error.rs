use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use strum_macros::AsRefStr;

/// Closed error-code enumeration surfaced to clients. Every branch maps to
/// exactly one HTTP status via [`ApiError::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidIpOrAsn,
    InvalidHttpMethod,
    InvalidBulkInputNotArray,
    InvalidBulkInputEmpty,
    InvalidBulkInputNoValidEntries,
    BulkLimitExceeded,
    Forbidden,
    ForbiddenBlacklisted,
    ForbiddenInvalidApiKey,
    ForbiddenNotAllowed,
    ForbiddenApiKeyRequired,
    QuotaExceeded,
    RateLimitExceeded,
    InvalidApiKey,
    ApiKeyMissing,
    ConfigUpdateFailed,
    InvalidConfig,
    UnexpectedServerError,
    Pm2LogsFailed,
    Pm2StatusFailed,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        use ErrorCode::*;
        match self {
            InvalidIpOrAsn
            | InvalidBulkInputNotArray
            | InvalidBulkInputEmpty
            | InvalidBulkInputNoValidEntries
            | BulkLimitExceeded
            | InvalidConfig => StatusCode::BAD_REQUEST,
            Forbidden
            | ForbiddenBlacklisted
            | ForbiddenInvalidApiKey
            | ForbiddenNotAllowed
            | ForbiddenApiKeyRequired
            | InvalidApiKey
            | ApiKeyMissing => StatusCode::FORBIDDEN,
            InvalidHttpMethod => StatusCode::METHOD_NOT_ALLOWED,
            QuotaExceeded | RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ConfigUpdateFailed | UnexpectedServerError | Pm2LogsFailed | Pm2StatusFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(self) -> &'static str {
        use ErrorCode::*;
        match self {
            InvalidIpOrAsn => "the supplied value is not a valid IP address or ASN",
            InvalidHttpMethod => "method not supported on this path",
            InvalidBulkInputNotArray => "bulk input must be a JSON array",
            InvalidBulkInputEmpty => "bulk input array was empty",
            InvalidBulkInputNoValidEntries => "no valid entries in bulk input",
            BulkLimitExceeded => "bulk input exceeds the 100 address cap",
            Forbidden => "forbidden",
            ForbiddenBlacklisted => "client address is blacklisted",
            ForbiddenInvalidApiKey => "api key is not recognized",
            ForbiddenNotAllowed => "api key is not allowed to query this service",
            ForbiddenApiKeyRequired => "an api key is required for this endpoint",
            QuotaExceeded => "api key has exceeded its quota",
            RateLimitExceeded => "rate limit exceeded for this client",
            InvalidApiKey => "api key is malformed",
            ApiKeyMissing => "api key is missing",
            ConfigUpdateFailed => "configuration update failed",
            InvalidConfig => "supplied configuration is invalid",
            UnexpectedServerError => "unexpected server error",
            Pm2LogsFailed => "failed to retrieve process logs",
            Pm2StatusFailed => "failed to retrieve process status",
        }
    }
}

/// Top-level error type returned by request handlers. Converts to the
/// `{ "error": ..., "error_code": ... }` payload shape from the HTTP surface.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: ErrorCode,
}

impl ApiError {
    pub fn new(code: ErrorCode) -> Self {
        Self { code }
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        ApiError::new(code)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.code.message(),
            "error_code": self.code.as_ref(),
        });
        (self.code.status(), axum::Json(body)).into_response()
    }
}

pub type Result<T> = core::result::Result<T, ApiError>;

/// Internal errors for the FNLE engine. Not surfaced directly to clients —
/// callers translate these into [`ApiError::UnexpectedServerError`] or, during
/// startup, fail fast.
#[derive(Debug, thiserror::Error)]
pub enum FnleError {
    #[error("range {0}-{1} exceeds the maximum size for its address family")]
    RangeTooLarge(u128, u128),
    #[error("duplicate range {0}-{1}")]
    DuplicateRange(u128, u128),
    #[error("family already sealed; add() called after build()")]
    AlreadySealed,
    #[error("store directory does not exist: {0}")]
    StoreDirDoesNotExist(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("corrupt persisted data: {0}")]
    Corrupt(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fnle(#[from] FnleError),
    #[error("malformed query: {0}")]
    Malformed(String),
}
