//! services/proxy/src/adapters/booklore.rs
//!
//! The client for the Booklore KoSync backend. Requests are forwarded as-is
//! and the backend's answer is relayed without interpretation.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::time::Duration;

//=========================================================================================
// Errors and Responses
//=========================================================================================

/// Transport failures talking to the backend. Each variant carries the URL.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Timeout connecting to Booklore at {0}")]
    Timeout(String),
    #[error("Connection error to Booklore at {0}")]
    Unreachable(String),
    #[error("Request error to Booklore at {0}")]
    Request(String),
}

impl UpstreamError {
    fn classify(url: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            UpstreamError::Timeout(url.to_string())
        } else if error.is_connect() {
            UpstreamError::Unreachable(url.to_string())
        } else {
            UpstreamError::Request(format!("{url}: {error}"))
        }
    }
}

/// What the backend answered.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl UpstreamResponse {
    /// The body as JSON, if it is JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

//=========================================================================================
// The Client
//=========================================================================================

#[derive(Clone)]
pub struct BookloreClient {
    client: reqwest::Client,
    base_url: String,
}

impl BookloreClient {
    /// Creates a client for `base_url` (no trailing slash). Redirects are
    /// handed back to the caller rather than followed.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Sends `method path_and_query` to the backend with the given headers and body.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = format!("{}{}", self.base_url, path_and_query);

        let response = self
            .client
            .request(method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| UpstreamError::classify(&url, &e))?;

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::classify(&url, &e))?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
