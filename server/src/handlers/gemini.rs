//! Gemini GenerateContent endpoints
//!
//! Routed as `/v1beta/models/{model_and_action}` because the Gemini surface
//! joins the model id and the method with a colon inside one path segment.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use llm_mux_core::translator::{self, Dialect, StreamEncoder};
use llm_mux_core::{Error, RequestContext};

use crate::error::ApiError;
use crate::sse::sse_response;
use crate::state::AppState;

/// POST /v1beta/models/{model}:{action}
pub async fn generate(
    State(state): State<AppState>,
    Path(model_and_action): Path<String>,
    Json(mut body): Json<Value>,
) -> Response {
    let Some((model, action)) = model_and_action.rsplit_once(':') else {
        return ApiError(Error::BadRequest(format!(
            "expected model:action, got {model_and_action}"
        )))
        .into_response();
    };

    if let Some(obj) = body.as_object_mut() {
        obj.insert("model".to_string(), json!(model));
    }
    let request = match translator::parse_request(Dialect::Gemini, &body) {
        Ok(request) => request,
        Err(err) => return ApiError(err).into_response(),
    };

    let ctx = RequestContext::new();
    let model = model.to_string();

    match action {
        "generateContent" => match state.gateway.execute(&ctx, request).await {
            Ok(mut response) => {
                response.model = model;
                Json(translator::serialize_response(Dialect::Gemini, &response)).into_response()
            }
            Err(err) => ApiError(err).into_response(),
        },
        "streamGenerateContent" => match state.gateway.execute_stream(&ctx, request).await {
            Ok(stream) => {
                let encoder =
                    StreamEncoder::new(Dialect::Gemini, uuid::Uuid::new_v4().to_string(), model);
                sse_response(stream, encoder, ctx.cancel.clone()).into_response()
            }
            Err(err) => ApiError(err).into_response(),
        },
        "countTokens" => match state.gateway.count_tokens(&ctx, request).await {
            Ok(total) => Json(json!({ "totalTokens": total })).into_response(),
            Err(err) => ApiError(err).into_response(),
        },
        other => ApiError(Error::NotFound(format!("action: {other}"))).into_response(),
    }
}
