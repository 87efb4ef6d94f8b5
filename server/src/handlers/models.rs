//! Model listing endpoint

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /v1/models: union of canonical models routable with the currently
/// loaded credentials.
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let created = chrono::Utc::now().timestamp();
    let data: Vec<Value> = state
        .gateway
        .available_models()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "llm-mux",
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data }))
}
