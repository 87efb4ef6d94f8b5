//! Device authorization flows
//!
//! Qwen and GitHub Copilot use the OAuth device grant: the start call
//! registers a pending flow and returns the user code, then a background
//! task polls the token endpoint until success, denial, cancellation or the
//! ten-minute deadline. Every exit path leaves the flow in a terminal state.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::pkce;
use super::{FlowMode, FlowType, OAuthService, StartResponse};
use crate::auth::Auth;
use crate::error::{Error, Result};
use crate::executor::copilot::{CopilotExecutor, GITHUB_TOKEN_ATTR};
use crate::executor::qwen;

/// Total budget for one device flow
const DEVICE_FLOW_TIMEOUT: Duration = Duration::from_secs(600);

const GITHUB_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";

const QWEN_SCOPE: &str = "openid profile email model.completion";
const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Device authorization response
#[derive(Debug, Clone, Deserialize)]
struct DeviceCodeResponse {
  device_code: String,
  user_code: String,
  verification_uri: String,
  #[serde(default)]
  verification_uri_complete: Option<String>,
  expires_in: u64,
  #[serde(default = "default_interval")]
  interval: u64,
}

fn default_interval() -> u64 {
  5
}

#[derive(Debug, Clone, Deserialize)]
struct TokenErrorResponse {
  #[serde(default)]
  error: String,
  #[serde(default)]
  error_description: Option<String>,
}

/// Start the Qwen device flow and spawn its polling task.
pub(crate) async fn start_qwen(service: OAuthService) -> Result<StartResponse> {
  let codes = pkce::generate();

  let response = service
    .client()
    .post(qwen::DEVICE_CODE_URL)
    .header("Accept", "application/json")
    .form(&[
      ("client_id", qwen::CLIENT_ID),
      ("scope", QWEN_SCOPE),
      ("code_challenge", codes.challenge.as_str()),
      ("code_challenge_method", "S256"),
    ])
    .send()
    .await?;

  let status = response.status();
  if !status.is_success() {
    let body = response.text().await.unwrap_or_default();
    return Err(Error::UpstreamTransient(format!(
      "qwen device flow start failed (HTTP {status}): {}",
      body.chars().take(256).collect::<String>()
    )));
  }
  let device: DeviceCodeResponse = response
    .json()
    .await
    .map_err(|e| Error::UpstreamTransient(format!("invalid device code response: {e}")))?;

  let state = format!("qwen-{}", pkce::random_state());
  let cancel = service.register_flow(
    &state,
    "qwen",
    FlowMode::WebUi,
    FlowType::Device,
    Some(codes.verifier.clone()),
    None,
  );

  {
    let service = service.clone();
    let state = state.clone();
    let device = device.clone();
    tokio::spawn(async move {
      poll_qwen(service, state, device, codes.verifier, cancel).await;
    });
  }

  Ok(StartResponse {
    status: "ok",
    flow_type: FlowType::Device,
    state: state.clone(),
    id: state,
    auth_url: device.verification_uri_complete.clone(),
    code_verifier: None,
    user_code: Some(device.user_code),
    verification_url: Some(device.verification_uri),
    expires_in: Some(device.expires_in),
    interval: Some(device.interval),
  })
}

async fn poll_qwen(
  service: OAuthService,
  state: String,
  device: DeviceCodeResponse,
  verifier: String,
  cancel: CancellationToken,
) {
  let deadline = tokio::time::Instant::now()
    + Duration::from_secs(device.expires_in).min(DEVICE_FLOW_TIMEOUT);
  let mut interval = device.interval.max(1);

  info!(state, "waiting for qwen authentication");

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        service.mark_cancelled(&state);
        return;
      }
      _ = tokio::time::sleep_until(deadline) => {
        service.mark_cancelled(&state);
        info!(state, "qwen authentication timed out");
        return;
      }
      _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
    }

    let response = service
      .client()
      .post(qwen::TOKEN_URL)
      .header("Accept", "application/json")
      .form(&[
        ("grant_type", DEVICE_GRANT_TYPE),
        ("client_id", qwen::CLIENT_ID),
        ("device_code", device.device_code.as_str()),
        ("code_verifier", verifier.as_str()),
      ])
      .send()
      .await;

    let response = match response {
      Ok(response) => response,
      Err(err) => {
        error!(state, error = %err, "qwen token poll failed");
        continue;
      }
    };

    if response.status().is_success() {
      let token: Value = match response.json().await {
        Ok(token) => token,
        Err(err) => {
          service.fail(&state, &format!("invalid token response: {err}"));
          return;
        }
      };

      let account = format!("qwen-{}", Utc::now().timestamp_millis());
      let mut auth = Auth::new("qwen", &account);
      auth.set_token(
        token.get("access_token").and_then(Value::as_str).unwrap_or_default(),
        token.get("refresh_token").and_then(Value::as_str),
        token.get("expires_in").and_then(Value::as_i64).unwrap_or(3600),
      );
      if let Some(resource) = token.get("resource_url").and_then(Value::as_str) {
        auth
          .attributes
          .insert("resource_url".to_string(), format!("https://{resource}"));
      }

      if let Err(err) = service.auths().register(auth) {
        service.fail(&state, &format!("failed to save tokens: {err}"));
        return;
      }
      service.complete(&state);
      info!(state, "qwen authentication successful");
      return;
    }

    let payload = response
      .json::<TokenErrorResponse>()
      .await
      .unwrap_or(TokenErrorResponse {
        error: "unknown_error".to_string(),
        error_description: None,
      });

    match payload.error.as_str() {
      "authorization_pending" => {}
      "slow_down" => interval += 5,
      other => {
        let description = payload.error_description.unwrap_or_default();
        service.fail(&state, &format!("{other}: {description}"));
        error!(state, error = other, "qwen authentication failed");
        return;
      }
    }
  }
}

/// Start the GitHub Copilot device flow and spawn its polling task.
pub(crate) async fn start_copilot(service: OAuthService) -> Result<StartResponse> {
  let response = service
    .client()
    .post(GITHUB_DEVICE_CODE_URL)
    .header("Accept", "application/json")
    .form(&[("client_id", GITHUB_CLIENT_ID), ("scope", "read:user")])
    .send()
    .await?;

  let status = response.status();
  if !status.is_success() {
    let body = response.text().await.unwrap_or_default();
    return Err(Error::UpstreamTransient(format!(
      "copilot device flow start failed (HTTP {status}): {}",
      body.chars().take(256).collect::<String>()
    )));
  }
  let device: DeviceCodeResponse = response
    .json()
    .await
    .map_err(|e| Error::UpstreamTransient(format!("invalid device code response: {e}")))?;

  let suffix: String = device.device_code.chars().take(8).collect();
  let state = format!("copilot-{suffix}");
  let cancel = service.register_flow(
    &state,
    "github-copilot",
    FlowMode::WebUi,
    FlowType::Device,
    None,
    None,
  );

  {
    let service = service.clone();
    let state = state.clone();
    let device = device.clone();
    tokio::spawn(async move {
      poll_copilot(service, state, device, cancel).await;
    });
  }

  Ok(StartResponse {
    status: "ok",
    flow_type: FlowType::Device,
    state: state.clone(),
    id: state,
    auth_url: Some(device.verification_uri.clone()),
    code_verifier: None,
    user_code: Some(device.user_code),
    verification_url: Some(device.verification_uri),
    expires_in: Some(device.expires_in),
    interval: Some(device.interval),
  })
}

async fn poll_copilot(
  service: OAuthService,
  state: String,
  device: DeviceCodeResponse,
  cancel: CancellationToken,
) {
  let deadline = tokio::time::Instant::now()
    + Duration::from_secs(device.expires_in).min(DEVICE_FLOW_TIMEOUT);
  let mut interval = device.interval.max(1);

  info!(state, "waiting for github copilot authentication");

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        service.mark_cancelled(&state);
        return;
      }
      _ = tokio::time::sleep_until(deadline) => {
        service.mark_cancelled(&state);
        info!(state, "copilot authentication timed out");
        return;
      }
      _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
    }

    let response = service
      .client()
      .post(GITHUB_TOKEN_URL)
      .header("Accept", "application/json")
      .form(&[
        ("client_id", GITHUB_CLIENT_ID),
        ("device_code", device.device_code.as_str()),
        ("grant_type", DEVICE_GRANT_TYPE),
      ])
      .send()
      .await;

    let token: Value = match response {
      Ok(response) => match response.json().await {
        Ok(token) => token,
        Err(err) => {
          error!(state, error = %err, "copilot token poll returned invalid JSON");
          continue;
        }
      },
      Err(err) => {
        error!(state, error = %err, "copilot token poll failed");
        continue;
      }
    };

    // GitHub reports polling errors in a 200 body
    if let Some(code) = token.get("error").and_then(Value::as_str) {
      match code {
        "authorization_pending" => {}
        "slow_down" => interval += 5,
        other => {
          service.fail(&state, &format!("authentication failed: {other}"));
          error!(state, error = other, "copilot authentication failed");
          return;
        }
      }
      continue;
    }

    let Some(github_token) = token.get("access_token").and_then(Value::as_str) else {
      continue;
    };

    let username = fetch_github_login(service.client(), github_token)
      .await
      .unwrap_or_else(|| format!("copilot-{}", Utc::now().timestamp_millis()));

    let mut auth = Auth::new("github-copilot", &username);
    auth
      .attributes
      .insert(GITHUB_TOKEN_ATTR.to_string(), github_token.to_string());

    // Verify Copilot access by minting an API token before persisting
    let executor = CopilotExecutor::new(Default::default());
    let auth = match executor.exchange_token(&auth).await {
      Ok(auth) => auth,
      Err(err) => {
        service.fail(&state, &format!("failed to verify copilot access: {err}"));
        error!(state, error = %err, "copilot access verification failed");
        return;
      }
    };

    if let Err(err) = service.auths().register(auth) {
      service.fail(&state, &format!("failed to save tokens: {err}"));
      return;
    }
    service.complete(&state);
    info!(state, user = %username, "github copilot authentication successful");
    return;
  }
}

async fn fetch_github_login(client: &reqwest::Client, token: &str) -> Option<String> {
  let response = client
    .get(GITHUB_USER_URL)
    .header("Authorization", format!("token {token}"))
    .header("Accept", "application/json")
    .header("User-Agent", "llm-mux")
    .send()
    .await
    .ok()?;
  let user: Value = response.json().await.ok()?;
  user
    .get("login")
    .and_then(Value::as_str)
    .map(ToString::to_string)
}
