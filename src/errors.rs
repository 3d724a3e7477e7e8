//! Errors shared by the authenticator, transport and protocol layers.
//!
//! Everything that talks to the remote service returns [`ApiError`]; the
//! classification helpers on it decide retry behaviour and the
//! [`FailureKind`] reported to callers.

use reqwest::StatusCode;
use serde::Deserialize;
use std::error::Error as _;
use thiserror::Error;

use crate::models::{object::ItemEntry, outcome::FailureKind};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures while obtaining or storing a bearer credential.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credential: {0}")]
    Validation(String),
    #[error("token request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("token endpoint rejected the grant ({status}): {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
    #[error("signing assertion failed: {0}")]
    Signing(String),
    #[error("persisting refreshed credential failed: {0}")]
    Persist(#[source] BoxError),
}

/// JSON error payload returned by the remote API.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub context_info: Option<ContextInfo>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ContextInfo {
    #[serde(default)]
    pub conflicts: Option<Conflicts>,
}

/// Folder conflicts arrive as a list, file conflicts as a single object.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum Conflicts {
    Many(Vec<ItemEntry>),
    One(ItemEntry),
}

impl Conflicts {
    pub fn into_vec(self) -> Vec<ItemEntry> {
        match self {
            Conflicts::Many(items) => items,
            Conflicts::One(item) => vec![item],
        }
    }
}

/// How a failure should be treated by retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection reset, timeout, DNS or TLS failure.
    Transient,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    Server,
    /// Other 4xx; never retried.
    Client,
    /// 401 that survived a refresh, or a failed refresh.
    Authentication,
    Cancelled,
    /// Malformed responses and local faults.
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::Transient | ErrorClass::RateLimited | ErrorClass::Server
        )
    }

    pub fn failure_kind(self) -> FailureKind {
        match self {
            ErrorClass::Transient => FailureKind::Network,
            ErrorClass::RateLimited => FailureKind::RateLimited,
            ErrorClass::Server => FailureKind::Server,
            ErrorClass::Client => FailureKind::Client,
            ErrorClass::Authentication => FailureKind::Authentication,
            ErrorClass::Cancelled => FailureKind::Cancelled,
            ErrorClass::Fatal => FailureKind::Other,
        }
    }
}

/// A failed call against the remote API, with the operation that made it.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{operation}: request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation}: {status}: {message}")]
    Status {
        operation: String,
        status: StatusCode,
        message: String,
        body: Box<ErrorBody>,
    },
    #[error("{0}: still unauthorized after refreshing the credential")]
    Unauthorized(String),
    #[error("{operation}: {source}")]
    Auth {
        operation: String,
        #[source]
        source: AuthError,
    },
    #[error("{0}: cancelled")]
    Cancelled(String),
    #[error("{operation}: invalid response: {message}")]
    InvalidResponse { operation: String, message: String },
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Substrings of opaque transport errors that indicate a transient fault.
const TRANSIENT_MARKERS: [&str; 8] = [
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "timed out",
    "timeout",
    "unexpected eof",
    "dns error",
];

impl ApiError {
    /// Build a status error from a non-success response body.
    pub fn from_status(operation: impl Into<String>, status: StatusCode, raw_body: &str) -> Self {
        let body: ErrorBody = serde_json::from_str(raw_body).unwrap_or_default();
        let message = body
            .message
            .clone()
            .or_else(|| body.code.clone())
            .unwrap_or_else(|| {
                if raw_body.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("no body")
                        .to_string()
                } else {
                    raw_body.chars().take(256).collect()
                }
            });
        ApiError::Status {
            operation: operation.into(),
            status,
            message,
            body: Box::new(body),
        }
    }

    pub fn invalid_response(operation: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::InvalidResponse {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            ApiError::Transport { source, .. } => source.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(StatusCode::CONFLICT)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled(_))
    }

    /// Items the service reported as conflicting with a create request.
    pub fn conflicts(&self) -> Vec<ItemEntry> {
        match self {
            ApiError::Status { body, .. } => body
                .context_info
                .clone()
                .and_then(|info| info.conflicts)
                .map(Conflicts::into_vec)
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Transport { source, .. } => classify_transport(source),
            ApiError::Status { status, .. } => classify_status(*status),
            ApiError::Auth {
                source: AuthError::Request(err),
                ..
            } => classify_transport(err),
            ApiError::Unauthorized(_) | ApiError::Auth { .. } => ErrorClass::Authentication,
            ApiError::Cancelled(_) => ErrorClass::Cancelled,
            ApiError::InvalidResponse { .. } => ErrorClass::Fatal,
        }
    }
}

pub fn classify_status(status: StatusCode) -> ErrorClass {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ErrorClass::RateLimited
    } else if status == StatusCode::UNAUTHORIZED {
        ErrorClass::Authentication
    } else if status.is_server_error() {
        ErrorClass::Server
    } else {
        ErrorClass::Client
    }
}

/// Classify a transport error, preferring reqwest's typed flags and falling
/// back to matching the error chain text for opaque causes.
pub fn classify_transport(err: &reqwest::Error) -> ErrorClass {
    if err.is_timeout() || err.is_connect() {
        return ErrorClass::Transient;
    }
    if let Some(status) = err.status() {
        return classify_status(status);
    }
    if err.is_builder() || err.is_decode() || err.is_redirect() {
        return ErrorClass::Fatal;
    }

    let mut text = err.to_string().to_ascii_lowercase();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string().to_ascii_lowercase());
        source = inner.source();
    }
    if is_transient_text(&text) || err.is_request() || err.is_body() {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

/// Text-based fallback used only when no typed classification applies.
pub fn is_transient_text(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}
