//! Client-facing error bodies

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use llm_mux_core::Error;

/// Wraps a core error into the gateway's uniform error body:
/// `{"error":{"type":..., "message":...}, "status":"error"}`
pub struct ApiError(pub Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": { "type": self.0.kind(), "message": self.0.to_string() },
            "status": "error",
        });
        (status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}
