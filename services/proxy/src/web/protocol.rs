//! services/proxy/src/web/protocol.rs
//!
//! The KoSync progress payloads this proxy looks into. Bodies are forwarded
//! untouched; these helpers only read the fields session tracking needs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use utoipa::ToSchema;

/// Body of `PUT /syncs/progress`, as sent by the reading client.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ProgressUpdate {
    /// Content hash of the book file.
    pub document: String,
    /// Opaque position inside the book.
    pub progress: String,
    /// Completion fraction in [0,1].
    pub percentage: f64,
    pub device: String,
    pub device_id: String,
}

/// Error body produced by the proxy itself.
#[derive(Serialize, Debug, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

pub const REQUIRED_PROGRESS_FIELDS: [&str; 5] =
    ["document", "progress", "percentage", "device", "device_id"];

/// Names of required fields absent from `payload`. A non-object payload lacks all of them.
pub fn missing_fields(payload: &Value) -> Vec<&'static str> {
    REQUIRED_PROGRESS_FIELDS
        .into_iter()
        .filter(|field| payload.get(field).is_none())
        .collect()
}

/// Reads `percentage` as a number, accepting numeric strings. Anything else is 0.
pub fn percentage_of(payload: &Value) -> f64 {
    match payload.get("percentage") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
            warn!(value = %s, "Invalid progress value, using 0");
            0.0
        }),
        None | Some(Value::Null) => 0.0,
        Some(other) => {
            warn!(value = %other, "Invalid progress value, using 0");
            0.0
        }
    }
}

/// Reads a field as text: strings as-is, other scalars rendered, missing as empty.
pub fn text_of(payload: &Value, field: &str) -> String {
    match payload.get(field) {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}
