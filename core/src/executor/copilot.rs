//! GitHub Copilot executor
//!
//! The persisted GitHub OAuth token is long-lived; the Copilot API wants a
//! short-lived token minted from it. `refresh` performs that exchange, so
//! the standard expiry-driven refresh path keeps the API token fresh.

use async_trait::async_trait;
use llm_mux_config::ProviderConfig;
use serde_json::Value;

use super::base::{self, STREAM_TIMEOUT, UNARY_TIMEOUT};
use super::{EventStream, ProviderExecutor, RequestContext};
use crate::auth::Auth;
use crate::error::{Error, Result};
use crate::ir::{Request, Response};
use crate::translator::openai;

const DEFAULT_BASE_URL: &str = "https://api.githubcopilot.com";
const TOKEN_EXCHANGE_URL: &str = "https://api.github.com/copilot_internal/v2/token";
const EDITOR_VERSION: &str = "vscode/1.96.0";
const INTEGRATION_ID: &str = "vscode-chat";

/// Attribute holding the long-lived GitHub OAuth token
pub const GITHUB_TOKEN_ATTR: &str = "github_token";

pub struct CopilotExecutor {
  base_url: String,
}

impl CopilotExecutor {
  pub fn new(config: ProviderConfig) -> Self {
    Self {
      base_url: config
        .base_url
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
    }
  }

  fn endpoint(&self) -> String {
    format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
  }

  /// Exchange the GitHub OAuth token for a Copilot API token.
  pub async fn exchange_token(&self, auth: &Auth) -> Result<Auth> {
    let github_token = auth
      .attributes
      .get(GITHUB_TOKEN_ATTR)
      .ok_or_else(|| Error::AuthFailure("record has no GitHub token".to_string()))?;

    let client = base::http_client(auth, UNARY_TIMEOUT);
    let response = client
      .get(TOKEN_EXCHANGE_URL)
      .header("Authorization", format!("token {github_token}"))
      .header("Accept", "application/json")
      .header("Editor-Version", EDITOR_VERSION)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(Error::AuthFailure(format!(
        "copilot token exchange rejected (HTTP {status}): {}",
        body.chars().take(256).collect::<String>()
      )));
    }

    let payload: Value = response.json().await?;
    let token = payload
      .get("token")
      .and_then(Value::as_str)
      .ok_or_else(|| Error::AuthFailure("copilot token response missing token".to_string()))?;
    let expires_at = payload
      .get("expires_at")
      .and_then(Value::as_i64)
      .unwrap_or_else(|| chrono::Utc::now().timestamp() + 1500);

    let mut updated = auth.clone();
    updated.set_token(token, None, expires_at - chrono::Utc::now().timestamp());
    Ok(updated)
  }
}

#[async_trait]
impl ProviderExecutor for CopilotExecutor {
  fn identifier(&self) -> &'static str {
    "github-copilot"
  }

  fn prepare_request(
    &self,
    builder: reqwest::RequestBuilder,
    auth: &Auth,
  ) -> reqwest::RequestBuilder {
    builder
      .header(
        "Authorization",
        format!("Bearer {}", auth.access_token().unwrap_or_default()),
      )
      .header("Editor-Version", EDITOR_VERSION)
      .header("Copilot-Integration-Id", INTEGRATION_ID)
      .header("Content-Type", "application/json")
  }

  async fn execute(
    &self,
    ctx: &RequestContext,
    auth: &Auth,
    request: &Request,
  ) -> Result<Response> {
    let client = base::http_client(auth, UNARY_TIMEOUT);
    let builder = self
      .prepare_request(client.post(self.endpoint()), auth)
      .json(&openai::serialize_request(request));

    let body = base::send_json(builder, ctx).await?;
    openai::parse_response(&body, &request.model)
  }

  async fn execute_stream(
    &self,
    ctx: &RequestContext,
    auth: &Auth,
    request: &Request,
  ) -> Result<EventStream> {
    let mut body = openai::serialize_request(request);
    if let Some(obj) = body.as_object_mut() {
      obj.insert("stream".to_string(), Value::Bool(true));
    }

    let client = base::http_client(auth, STREAM_TIMEOUT);
    let builder = self
      .prepare_request(client.post(self.endpoint()), auth)
      .json(&body);

    let response = base::send_streaming(builder, ctx).await?;
    Ok(base::event_stream(
      response,
      ctx.cancel.clone(),
      openai::parse_stream_event,
    ))
  }

  async fn refresh(&self, auth: &Auth) -> Result<Auth> {
    self.exchange_token(auth).await
  }
}
