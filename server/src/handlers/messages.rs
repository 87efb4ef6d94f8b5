//! Anthropic Messages endpoint

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use llm_mux_core::translator::{self, Dialect, StreamEncoder};
use llm_mux_core::RequestContext;

use crate::error::ApiError;
use crate::sse::sse_response;
use crate::state::AppState;

/// POST /v1/messages
pub async fn messages(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let request = match translator::parse_request(Dialect::Anthropic, &body) {
        Ok(request) => request,
        Err(err) => return ApiError(err).into_response(),
    };

    let ctx = RequestContext::new();
    let model = request.model.clone();

    if request.stream {
        match state.gateway.execute_stream(&ctx, request).await {
            Ok(stream) => {
                let encoder = StreamEncoder::new(
                    Dialect::Anthropic,
                    format!("msg_{}", uuid::Uuid::new_v4().simple()),
                    model,
                );
                sse_response(stream, encoder, ctx.cancel.clone()).into_response()
            }
            Err(err) => ApiError(err).into_response(),
        }
    } else {
        match state.gateway.execute(&ctx, request).await {
            Ok(mut response) => {
                response.model = model;
                Json(translator::serialize_response(Dialect::Anthropic, &response)).into_response()
            }
            Err(err) => ApiError(err).into_response(),
        }
    }
}
