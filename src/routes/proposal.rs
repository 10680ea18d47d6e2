//! Proposal invocation route handlers
//!
//! Adapts HTTP requests to the invocation surface: a function name, its
//! positional string arguments and the caller's identity metadata.

use crate::error::{validation_error, ApiResult};
use crate::identity::CallerIdentity;
use crate::notify::NotificationReport;
use crate::state::SharedState;
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::debug;
use validator::Validate;

/// Request header carrying the caller's identity metadata (raw bytes)
pub const CALLER_METADATA_HEADER: &str = "x-caller-metadata";

/// Response header summarizing the update notification
pub const NOTIFICATION_STATUS_HEADER: &str = "x-notification-status";

/// A function call against the ledger
#[derive(Debug, Deserialize, Validate)]
pub struct InvokeRequest {
    #[validate(length(min = 1, message = "Function name is required"))]
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn caller_from_headers(headers: &HeaderMap) -> CallerIdentity {
    headers
        .get(CALLER_METADATA_HEADER)
        .map(|value| CallerIdentity::new(value.as_bytes()))
        .unwrap_or_else(CallerIdentity::unavailable)
}

fn payload_response(payload: Vec<u8>, notification: Option<&NotificationReport>) -> Response {
    let mut response = if payload.is_empty() {
        StatusCode::OK.into_response()
    } else {
        ([(header::CONTENT_TYPE, "application/json")], payload).into_response()
    };

    if let Some(report) = notification {
        if let Ok(value) = HeaderValue::from_str(&report.summary()) {
            response.headers_mut().insert(NOTIFICATION_STATUS_HEADER, value);
        }
    }
    response
}

/// POST /api/invoke
///
/// Runs init/reset, registrarProposta or consultarProposta.
pub async fn invoke(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<InvokeRequest>,
) -> ApiResult<Response> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let caller = caller_from_headers(&headers);
    debug!("Invoke {} with {} argument(s)", payload.function, payload.args.len());

    let result = state
        .proposals
        .invoke(&payload.function, &payload.args, &caller)
        .await?;

    Ok(payload_response(result.payload, result.notification.as_ref()))
}

/// POST /api/query
///
/// Read-only entry point; only consultarProposta is accepted.
pub async fn query(
    State(state): State<SharedState>,
    Json(payload): Json<InvokeRequest>,
) -> ApiResult<Response> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let body = state
        .proposals
        .query_entry(&payload.function, &payload.args)
        .await?;

    Ok(payload_response(body, None))
}
