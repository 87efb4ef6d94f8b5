//! Management surface
//!
//! OAuth flow control, the iFlow cookie exchange and credential CRUD.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use llm_mux_core::oauth::web::callback_port;
use llm_mux_core::{Auth, Error};

use crate::callback::spawn_callback_forwarder;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OAuthStartRequest {
    pub provider: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// POST /v0/management/oauth/start
pub async fn oauth_start(
    State(state): State<AppState>,
    Json(body): Json<OAuthStartRequest>,
) -> Response {
    match state.oauth.start(&body.provider, body.project_id).await {
        Ok(response) => {
            // WebUI flows get a loopback forwarder so the provider's fixed
            // redirect port lands on the management callback.
            let port = callback_port(&body.provider);
            if response.auth_url.is_some() && port > 0 {
                spawn_callback_forwarder(
                    &body.provider,
                    port,
                    state.config.port,
                );
            }
            Json(response).into_response()
        }
        Err(err) => ApiError(err).into_response(),
    }
}

/// GET /v0/management/oauth/status/{state}
pub async fn oauth_status(State(state): State<AppState>, Path(flow): Path<String>) -> Response {
    match state.oauth.status(&flow) {
        Ok(status) => Json(status).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

/// POST /v0/management/oauth/cancel/{state}
pub async fn oauth_cancel(State(state): State<AppState>, Path(flow): Path<String>) -> Response {
    match state.oauth.cancel(&flow) {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// GET /v0/management/oauth/callback/{provider}
///
/// Target of the loopback forwarder: exchanges the authorization code and
/// completes the flow.
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = query.error {
        return ApiError(Error::AuthFailure(format!(
            "provider returned error: {error}"
        )))
        .into_response();
    }
    let (Some(code), Some(flow)) = (query.code, query.state) else {
        return ApiError(Error::BadRequest(
            "callback requires code and state".to_string(),
        ))
        .into_response();
    };

    match state.oauth.complete_with_code(&flow, &code).await {
        Ok(auth) => {
            tracing::info!(provider = %provider, auth = %auth.id, "oauth flow completed");
            "Authentication successful. You can close this window.".into_response()
        }
        Err(err) => {
            warn!(provider = %provider, error = %err, "oauth callback failed");
            ApiError(err).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IFlowAuthRequest {
    pub cookie: String,
}

const IFLOW_PROFILE_URL: &str = "https://iflow.cn/api/user/profile";

/// POST /v0/management/iflow-auth-url
///
/// Cookie-based credential import: fetches the account's API key with the
/// supplied session cookie and registers an iflow record.
pub async fn iflow_auth_url(
    State(state): State<AppState>,
    Json(body): Json<IFlowAuthRequest>,
) -> Response {
    let client = reqwest::Client::new();
    let response = match client
        .get(IFLOW_PROFILE_URL)
        .header("Cookie", body.cookie)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            return ApiError(Error::UpstreamTransient(format!(
                "iflow profile fetch failed: {err}"
            )))
            .into_response()
        }
    };

    if !response.status().is_success() {
        return ApiError(Error::AuthFailure(format!(
            "iflow rejected the cookie (HTTP {})",
            response.status()
        )))
        .into_response();
    }

    let profile: Value = match response.json().await {
        Ok(profile) => profile,
        Err(err) => {
            return ApiError(Error::UpstreamTransient(format!(
                "invalid iflow profile response: {err}"
            )))
            .into_response()
        }
    };

    let api_key = profile
        .get("data")
        .and_then(|d| d.get("apiKey"))
        .or_else(|| profile.get("apiKey"))
        .and_then(Value::as_str);
    let Some(api_key) = api_key else {
        return ApiError(Error::AuthFailure(
            "iflow profile carries no API key".to_string(),
        ))
        .into_response();
    };

    let account = profile
        .get("data")
        .and_then(|d| d.get("email"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("iflow-{}", chrono::Utc::now().timestamp_millis()));

    let mut auth = Auth::new("iflow", &account);
    auth.attributes
        .insert("api_key".to_string(), api_key.to_string());

    match state.auth_manager.register(auth) {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

/// GET /v0/management/auths. Storage blobs are redacted.
pub async fn list_auths(State(state): State<AppState>) -> Json<Value> {
    let auths: Vec<Value> = state
        .auth_manager
        .list()
        .into_iter()
        .map(|auth| {
            json!({
                "id": auth.id,
                "provider": auth.provider,
                "label": auth.label,
                "status": auth.status,
                "last_error": auth.last_error,
                "last_error_at": auth.last_error_at,
                "next_retry_at": auth.next_retry_at,
            })
        })
        .collect();
    Json(json!({ "auths": auths }))
}

/// POST /v0/management/auths. Manual record import.
pub async fn create_auth(State(state): State<AppState>, Json(auth): Json<Auth>) -> Response {
    match state.auth_manager.register(auth) {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

/// DELETE /v0/management/auths/{id}
pub async fn delete_auth(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.auth_manager.delete(&id) {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}
