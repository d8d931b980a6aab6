// Handlers module - Centralizes all request handlers
pub mod ping;
pub mod vms;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use virtkit_common::Error;

/// Map a domain error onto the wire: unknown resources are 404, everything
/// else surfaces as a 400 with the error message.
pub fn error_response(err: Error) -> (StatusCode, Json<Value>) {
    let status = match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({ "error": err.to_string() })))
}
