//! Unified error types for xrouter.
//!
//! Defines [`RouterError`] (process-level failures surfaced by `main`),
//! [`StoreError`] for the key/value store client, [`RecordError`] and
//! [`PatternError`] / [`TemplateError`] for route records, and the two
//! HTTP-boundary errors [`ProxyError`] and [`ApiError`], which map every
//! failure class onto a status code. All use `thiserror` for `Display`
//! and `Error` derives.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub route: String,
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "route {}: {}: {}", self.route, self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RouterError {
    #[error("No route store configured.\n\n  {hint}")]
    NoStore { hint: String },

    #[error("Invalid store URL '{url}': {source}")]
    StoreUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid URI: {source}")]
    UriParse {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP request failed: {source}")]
    HttpRequest {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Health check failed with status {0}")]
    HealthCheckFailed(StatusCode),

    #[error("Route store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("store unavailable: {source}")]
    Unavailable {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The requested watch index has been compacted out of the store's
    /// event history. The caller has to take a fresh snapshot.
    #[error("event index {requested} cleared from history (store index is {current})")]
    IndexCleared { requested: u64, current: u64 },

    #[error("store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed store response: {0}")]
    Protocol(String),
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RecordError {
    #[error("invalid route JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("route '{name}' has no target")]
    MissingTarget { name: String },

    #[error("key '{key}' is not a route key")]
    ForeignKey { key: String },

    #[error("invalid {field} pattern: {source}")]
    Pattern {
        field: &'static str,
        #[source]
        source: PatternError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("unterminated '{{' at byte {0}")]
    Unterminated(usize),

    #[error("unmatched '}}' at byte {0}")]
    Unmatched(usize),

    #[error("empty capture name at byte {0}")]
    EmptyName(usize),

    #[error("duplicate capture name '{0}'")]
    DuplicateName(String),

    #[error("unsupported constraint '{constraint}' on capture '{name}'")]
    UnsupportedConstraint { name: String, constraint: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("placeholder '{0}' has no captured value")]
    MissingCapture(String),

    #[error("malformed template at byte {0}")]
    Malformed(usize),
}

/// Failures on the proxy data path. Every variant is recovered at the
/// handler boundary and translated into a status code.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("no route matches the request")]
    NoRoute,

    #[error("target template: {0}")]
    Template(#[from] TemplateError),

    #[error("invalid target URL '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("could not build upstream request: {0}")]
    Request(#[from] http::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
}

impl ProxyError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NoRoute => StatusCode::NOT_FOUND,
            Self::Template(_)
            | Self::InvalidTarget { .. }
            | Self::Request(_)
            | Self::Upstream(_)
            | Self::Timeout(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.status().into_response()
    }
}

/// Failures on the management API.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("bad request")]
    BadRequest { errors: Vec<ValidationError> },

    #[error("route not found")]
    NotFound,

    #[error("route store error: {0}")]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn bad_request(route: &str, field: &str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            errors: vec![ValidationError {
                route: route.into(),
                field: field.into(),
                message: message.into(),
                suggestion: None,
            }],
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "no_details")]
    details: &'a [ValidationError],
}

fn no_details(details: &&[ValidationError]) -> bool {
    details.is_empty()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest { errors } => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: "bad request",
                    details: &errors,
                }),
            )
                .into_response(),
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            Self::Store(e) => {
                tracing::error!(error = %e, "route store operation failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ErrorBody {
                        error: "route store unavailable",
                        details: &[],
                    }),
                )
                    .into_response()
            }
        }
    }
}
