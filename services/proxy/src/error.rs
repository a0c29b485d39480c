//! services/proxy/src/error.rs
//!
//! Defines the error types for the proxy service: `ApiError` for process
//! startup and `ProxyError` for request handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::adapters::booklore::UpstreamError;
use crate::config::ConfigError;

/// The primary error type for starting and running the service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure to build the upstream HTTP client.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end a proxied request with a locally generated response.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Missing authentication headers")]
    MissingAuth,

    #[error("Missing required parameters: {}", .0.join(", "))]
    MissingParams(Vec<&'static str>),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingAuth => StatusCode::UNAUTHORIZED,
            ProxyError::MissingParams(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(UpstreamError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// The message the client sees. Upstream details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            ProxyError::Upstream(UpstreamError::Timeout(_)) => "Booklore connection timeout".to_string(),
            ProxyError::Upstream(UpstreamError::Unreachable(_)) => "Cannot connect to Booklore".to_string(),
            ProxyError::Upstream(UpstreamError::Request(_)) => "Request error to Booklore".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ProxyError::Upstream(e) => error!(error = %e, "Upstream request failed"),
            other => warn!("{other}"),
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
