//! OpenAI Codex executor
//!
//! ChatGPT-subscription OAuth credentials against the OpenAI-compatible
//! chat completions surface.

use async_trait::async_trait;
use llm_mux_config::ProviderConfig;
use serde_json::Value;

use super::base::{self, STREAM_TIMEOUT, UNARY_TIMEOUT};
use super::{EventStream, ProviderExecutor, RequestContext};
use crate::auth::Auth;
use crate::error::Result;
use crate::ir::{Request, Response};
use crate::translator::openai;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
pub(crate) const CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";

pub struct CodexExecutor {
  base_url: String,
}

impl CodexExecutor {
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
}

#[async_trait]
impl ProviderExecutor for CodexExecutor {
  fn identifier(&self) -> &'static str {
    "codex"
  }

  fn prepare_request(
    &self,
    builder: reqwest::RequestBuilder,
    auth: &Auth,
  ) -> reqwest::RequestBuilder {
    let token = auth
      .api_key()
      .map(ToString::to_string)
      .or_else(|| auth.access_token().map(ToString::to_string))
      .unwrap_or_default();
    builder
      .header("Authorization", format!("Bearer {token}"))
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
    if auth.api_key().is_some() {
      return Ok(auth.clone());
    }
    base::refresh_oauth_token(auth, TOKEN_URL, CLIENT_ID).await
  }
}
