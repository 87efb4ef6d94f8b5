// llm-mux HTTP server
//
// Client-facing dialect endpoints plus the management surface.

pub mod callback;
pub mod error;
pub mod handlers;
pub mod sse;
pub mod state;

use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::{json, Value};
use tracing::info;

pub use state::AppState;

/// Create the HTTP router with all routes configured
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/v1/chat/completions", post(handlers::chat::chat_completions))
        .route("/v1/messages", post(handlers::messages::messages))
        .route("/v1/models", get(handlers::models::list_models))
        .route(
            "/v1beta/models/{model_and_action}",
            post(handlers::gemini::generate),
        )
        .route(
            "/v0/management/oauth/start",
            post(handlers::management::oauth_start),
        )
        .route(
            "/v0/management/oauth/status/{state}",
            get(handlers::management::oauth_status),
        )
        .route(
            "/v0/management/oauth/cancel/{state}",
            post(handlers::management::oauth_cancel),
        )
        .route(
            "/v0/management/oauth/callback/{provider}",
            get(handlers::management::oauth_callback),
        )
        .route(
            "/v0/management/iflow-auth-url",
            post(handlers::management::iflow_auth_url),
        )
        .route(
            "/v0/management/auths",
            get(handlers::management::list_auths).post(handlers::management::create_auth),
        )
        .route(
            "/v0/management/auths/{id}",
            delete(handlers::management::delete_auth),
        )
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "llm-mux gateway",
        "endpoints": [
            "POST /v1/chat/completions",
            "POST /v1/messages",
            "GET /v1/models",
            "POST /v1beta/models/{model}:generateContent",
            "POST /v1beta/models/{model}:streamGenerateContent",
        ]
    }))
}

/// Bind and serve until the process exits.
pub async fn run(state: AppState) -> std::io::Result<()> {
    let port = state.config.port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "gateway listening");
    axum::serve(listener, create_router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = llm_mux_config::Config {
            auth_dir: dir.path().to_string_lossy().into_owned(),
            ..Default::default()
        };
        (AppState::from_config(config).unwrap(), dir)
    }

    #[tokio::test]
    async fn test_root_lists_endpoints() {
        let (state, _dir) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();
        let response = server.get("/").await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_models_empty_without_auths() {
        let (state, _dir) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.get("/v1/models").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["object"], "list");
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_completions_rejects_bad_body() {
        let (state, _dir) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server
            .post("/v1/chat/completions")
            .json(&json!({ "messages": [] }))
            .await;
        response.assert_status_bad_request();
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"]["type"], "bad_request");
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_chat_completions_without_credentials_is_401() {
        let (state, _dir) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server
            .post("/v1/chat/completions")
            .json(&json!({
                "model": "gemini-2.5-flash",
                "messages": [{ "role": "user", "content": "ping" }]
            }))
            .await;
        response.assert_status_unauthorized();
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"]["type"], "unauthorized_client");
    }

    #[tokio::test]
    async fn test_oauth_start_rejects_iflow() {
        let (state, _dir) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server
            .post("/v0/management/oauth/start")
            .json(&json!({ "provider": "iflow" }))
            .await;
        response.assert_status_bad_request();
    }

    #[tokio::test]
    async fn test_oauth_status_unknown_state_is_404() {
        let (state, _dir) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.get("/v0/management/oauth/status/nope").await;
        response.assert_status_not_found();
    }

    #[tokio::test]
    async fn test_auth_crud_round_trip() {
        let (state, _dir) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let auth = llm_mux_core::Auth::new("aistudio", "key-1");
        let response = server.post("/v0/management/auths").json(&auth).await;
        response.assert_status_ok();

        let listing: serde_json::Value = server.get("/v0/management/auths").await.json();
        assert_eq!(listing["auths"].as_array().unwrap().len(), 1);
        // Token storage is not exposed on the management listing
        assert!(listing["auths"][0].get("storage").is_none());

        let response = server
            .delete(&format!("/v0/management/auths/{}", auth.id))
            .await;
        response.assert_status_ok();

        let listing: serde_json::Value = server.get("/v0/management/auths").await.json();
        assert!(listing["auths"].as_array().unwrap().is_empty());
    }
}
