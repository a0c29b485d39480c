//! services/proxy/src/web/rest.rs
//!
//! Contains the Axum handlers for the proxied endpoints and the master
//! definition for the OpenAPI document.
//!
//! Only the two progress endpoints are looked into. Everything else goes
//! through `proxy_all_handler` untouched.

use crate::adapters::booklore::UpstreamResponse;
use crate::error::ProxyError;
use crate::web::{
    auth::KoSyncAuth,
    protocol::{self, ErrorBody, ProgressUpdate},
    state::AppState,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use reading_session_core::{SyncEvent, SyncKind};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(update_progress_handler, get_progress_handler),
    components(schemas(ProgressUpdate, ErrorBody)),
    tags(
        (name = "KoSync Proxy", description = "Progress sync endpoints that feed reading session tracking.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Tracked Handlers
//=========================================================================================

/// Push reading progress for a document.
///
/// Forwarded to Booklore; a 200 or 202 answer also feeds session tracking.
#[utoipa::path(
    put,
    path = "/syncs/progress",
    request_body = ProgressUpdate,
    responses(
        (status = 200, description = "Relayed Booklore response"),
        (status = 400, description = "Missing required parameters", body = ErrorBody),
        (status = 401, description = "Missing authentication headers", body = ErrorBody),
        (status = 502, description = "Booklore unreachable", body = ErrorBody),
        (status = 504, description = "Booklore timed out", body = ErrorBody)
    ),
    params(
        ("x-auth-user" = String, Header, description = "KoSync user name"),
        ("x-auth-key" = String, Header, description = "KoSync key")
    )
)]
pub async fn update_progress_handler(
    State(app_state): State<Arc<AppState>>,
    auth: KoSyncAuth,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    debug!(%payload, "Update progress payload");

    let missing = protocol::missing_fields(&payload);
    if !missing.is_empty() {
        return Err(ProxyError::MissingParams(missing));
    }

    let mut headers = auth.upstream_headers();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let upstream = app_state
        .booklore
        .forward(Method::PUT, "/syncs/progress", headers, body)
        .await?;

    let document = protocol::text_of(&payload, "document");
    match upstream.status {
        StatusCode::OK | StatusCode::ACCEPTED => {
            let location = protocol::text_of(&payload, "progress");
            app_state
                .tracker
                .handle_sync(SyncEvent {
                    kind: SyncKind::Write,
                    username: &auth.username,
                    content_hash: &document,
                    progress: protocol::percentage_of(&payload),
                    location: &location,
                    at: Utc::now(),
                })
                .await;
            info!(%document, "Successfully proxied PUT progress update");
        }
        StatusCode::UNAUTHORIZED => {}
        status => warn!(%status, "Booklore returned an unexpected status"),
    }

    Ok(upstream.into_response())
}

/// Fetch stored reading progress for a document.
///
/// Forwarded to Booklore; a 200 answer keeps the matching session alive.
#[utoipa::path(
    get,
    path = "/syncs/progress/{document}",
    responses(
        (status = 200, description = "Relayed Booklore response"),
        (status = 401, description = "Missing authentication headers", body = ErrorBody),
        (status = 502, description = "Booklore unreachable", body = ErrorBody),
        (status = 504, description = "Booklore timed out", body = ErrorBody)
    ),
    params(
        ("document" = String, Path, description = "Content hash of the book file"),
        ("x-auth-user" = String, Header, description = "KoSync user name"),
        ("x-auth-key" = String, Header, description = "KoSync key")
    )
)]
pub async fn get_progress_handler(
    State(app_state): State<Arc<AppState>>,
    auth: KoSyncAuth,
    Path(document): Path<String>,
) -> Result<Response, ProxyError> {
    debug!(%document, "Get progress");

    let path = format!("/syncs/progress/{document}");
    let upstream = app_state
        .booklore
        .forward(Method::GET, &path, auth.upstream_headers(), Bytes::new())
        .await?;

    match upstream.status {
        StatusCode::OK => {
            let data = upstream.json().unwrap_or(Value::Null);
            let location = protocol::text_of(&data, "progress");
            app_state
                .tracker
                .handle_sync(SyncEvent {
                    kind: SyncKind::Read,
                    username: &auth.username,
                    content_hash: &document,
                    progress: protocol::percentage_of(&data),
                    location: &location,
                    at: Utc::now(),
                })
                .await;
            info!(%document, "Successfully proxied GET progress");
        }
        StatusCode::UNAUTHORIZED => {}
        status => warn!(%status, "Booklore returned an unexpected status"),
    }

    Ok(upstream.into_response())
}

//=========================================================================================
// Pass-through Handler
//=========================================================================================

/// Forwards any other request to Booklore verbatim, minus `host` and `connection`.
pub async fn proxy_all_handler(
    State(app_state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> Result<UpstreamResponse, ProxyError> {
    headers.remove(header::HOST);
    headers.remove(header::CONNECTION);

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    debug!(%method, path_and_query, "Proxying to Booklore");

    let upstream = app_state
        .booklore
        .forward(method.clone(), path_and_query, headers, body)
        .await?;

    info!(%method, path_and_query, status = %upstream.status, "Successfully proxied request");
    Ok(upstream)
}
