use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type Result<T> = std::result::Result<T, Error>;

/// Gateway-wide error type.
///
/// Every variant maps to a fixed HTTP status in the `IntoResponse` impl, so
/// handlers can bubble errors with `?` and get the right wire behavior.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Session concurrency cap exceeded. Carries the counts the client
    /// needs to decide how long to back off.
    #[error("session limit reached: {active_count} of {max_concurrent} slots in use")]
    SessionLimit {
        active_count: usize,
        max_concurrent: usize,
    },

    #[error("request timed out")]
    RequestTimeout,

    /// The client went away before the response completed. Logged with
    /// status 499; no response body is written.
    #[error("client closed request")]
    ClientClosed,

    #[error("no accounts available: {0}")]
    NoAccountsAvailable(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::SessionLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            Error::ClientClosed => {
                // 499 Client Closed Request; nothing useful to say in a body
                // the client will never read.
                let status = StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST);
                return status.into_response();
            }
            Error::NoAccountsAvailable(_) | Error::RefreshFailed(_) | Error::Upstream(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::Config(_) | Error::Storage(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = match &self {
            Error::SessionLimit {
                active_count,
                max_concurrent,
            } => serde_json::json!({
                "error": self.to_string(),
                "active_count": active_count,
                "max_concurrent": max_concurrent,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
