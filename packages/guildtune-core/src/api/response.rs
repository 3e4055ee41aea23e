//! JSON response helpers shared by the HTTP handlers.
//!
//! Successful responses carry `"success": true` next to their payload; errors
//! use the same `{error, message, status}` body as [`GuildtuneError`].
//!
//! [`GuildtuneError`]: crate::error::GuildtuneError

use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

/// Wraps a serializable payload in a success envelope.
///
/// Object payloads are merged into the envelope; anything else lands under `data`.
pub fn api_success<T: Serialize>(data: T) -> Json<Value> {
    let body = match serde_json::to_value(data) {
        Ok(Value::Object(mut map)) => {
            map.insert("success".into(), Value::Bool(true));
            Value::Object(map)
        }
        Ok(other) => json!({ "success": true, "data": other }),
        Err(e) => {
            log::warn!("[Api] Failed to serialize response: {}", e);
            json!({ "success": true })
        }
    };
    Json(body)
}

/// Success envelope without a payload.
pub fn api_ok() -> Json<Value> {
    Json(json!({ "success": true }))
}

/// Error response for failures detected in the handler itself.
pub fn api_error(status: StatusCode, code: &str, message: impl Display) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.to_string(),
            "status": status.as_u16(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_payloads_are_merged() {
        let Json(body) = api_success(json!({ "added": 2 }));
        assert_eq!(body, json!({ "added": 2, "success": true }));
    }

    #[test]
    fn other_payloads_are_nested() {
        let Json(body) = api_success(vec!["a", "b"]);
        assert_eq!(body, json!({ "success": true, "data": ["a", "b"] }));
    }
}
