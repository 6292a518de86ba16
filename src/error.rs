//! Error taxonomy shared by the HTTP facade, the stores and the upstream clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failure of a blocking outbound HTTP call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("failed to decode upstream payload: {0}")]
    Decode(String),
    #[error("blocking task failed: {0}")]
    Join(String),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ureq::Error> for FetchError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let body = response.into_string().unwrap_or_default();
                FetchError::Status {
                    status,
                    body: shorten(&body),
                }
            }
            ureq::Error::Transport(transport) => FetchError::Transport(transport.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for FetchError {
    fn from(err: tokio::task::JoinError) -> Self {
        FetchError::Join(err.to_string())
    }
}

/// Failure of a document store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store rejected {operation} (HTTP {status}): {message}")]
    Rejected {
        operation: &'static str,
        status: u16,
        message: String,
    },
    #[error("store function {operation} failed: {message}")]
    Function {
        operation: &'static str,
        message: String,
    },
    #[error("store request failed: {0}")]
    Fetch(FetchError),
    #[error("database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

impl StoreError {
    /// Rejections carrying an upstream status surface as 502, everything else as 500.
    pub fn is_upstream_rejection(&self) -> bool {
        matches!(
            self,
            StoreError::Rejected { .. } | StoreError::Function { .. }
        )
    }
}

/// Errors rendered by the HTTP facade as `{"error": ...}` bodies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    NotConfigured(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Configuration(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NotConfigured(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Maps a store failure onto the client-facing message used by an endpoint.
    pub fn from_store(err: &StoreError, message: &str) -> Self {
        if err.is_upstream_rejection() {
            ApiError::Upstream(message.to_string())
        } else {
            ApiError::Internal(message.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Failures surfaced by the session client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Failed to load config")]
    Config(#[source] FetchError),
    #[error("failed to load report: {0}")]
    Report(#[source] FetchError),
    #[error("failed to persist transcript: {0}")]
    Transcript(#[source] FetchError),
    #[error("avatar error: {0}")]
    Avatar(String),
    #[error("voice agent error: {0}")]
    Agent(String),
    #[error("session already {0}")]
    Busy(&'static str),
    #[error("report refresh already in flight")]
    RefreshInFlight,
}

const MAX_LOGGED_BODY: usize = 512;

/// Trims upstream bodies before they land in logs.
pub(crate) fn shorten(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_LOGGED_BODY {
        return trimmed.to_string();
    }
    let mut short: String = trimmed.chars().take(MAX_LOGGED_BODY).collect();
    short.push_str("...");
    short
}
