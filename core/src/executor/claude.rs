//! Anthropic Claude executor
//!
//! OAuth credentials from the claude.ai flow use a bearer token plus the
//! OAuth beta header; imported API keys use `x-api-key`. Thinking-variant
//! model ids are rewritten to the base model with the upstream extended
//! thinking flag enabled.

use async_trait::async_trait;
use llm_mux_config::ProviderConfig;
use serde_json::Value;

use super::base::{self, STREAM_TIMEOUT, UNARY_TIMEOUT};
use super::{EventStream, ProviderExecutor, RequestContext};
use crate::auth::Auth;
use crate::error::{Error, Result};
use crate::ir::{Request, Response};
use crate::registry::has_thinking_suffix;
use crate::translator::anthropic;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";
const TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
pub(crate) const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

const DEFAULT_THINKING_BUDGET: u32 = 16_384;

pub struct ClaudeExecutor {
  base_url: String,
}

impl ClaudeExecutor {
  pub fn new(config: ProviderConfig) -> Self {
    Self {
      base_url: config
        .base_url
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
    }
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/v1/{}", self.base_url.trim_end_matches('/'), path)
  }

  fn build_body(&self, request: &Request) -> Value {
    let mut upstream = request.clone();
    let thinking = has_thinking_suffix(&request.model);
    if let Some(base_model) = request.model.strip_suffix("-thinking") {
      upstream.model = base_model.to_string();
    }
    let mut body = anthropic::serialize_request(&upstream);
    if thinking {
      anthropic::enable_thinking(&mut body, DEFAULT_THINKING_BUDGET);
    }
    body
  }
}

#[async_trait]
impl ProviderExecutor for ClaudeExecutor {
  fn identifier(&self) -> &'static str {
    "claude"
  }

  fn prepare_request(
    &self,
    builder: reqwest::RequestBuilder,
    auth: &Auth,
  ) -> reqwest::RequestBuilder {
    let builder = builder
      .header("anthropic-version", API_VERSION)
      .header("Content-Type", "application/json");

    if let Some(api_key) = auth.api_key() {
      builder.header("x-api-key", api_key)
    } else {
      builder
        .header(
          "Authorization",
          format!("Bearer {}", auth.access_token().unwrap_or_default()),
        )
        .header("anthropic-beta", OAUTH_BETA)
    }
  }

  async fn execute(
    &self,
    ctx: &RequestContext,
    auth: &Auth,
    request: &Request,
  ) -> Result<Response> {
    let client = base::http_client(auth, UNARY_TIMEOUT);
    let builder = self
      .prepare_request(client.post(self.endpoint("messages")), auth)
      .json(&self.build_body(request));

    let body = base::send_json(builder, ctx).await?;
    anthropic::parse_response(&body, &request.model)
  }

  async fn execute_stream(
    &self,
    ctx: &RequestContext,
    auth: &Auth,
    request: &Request,
  ) -> Result<EventStream> {
    let mut body = self.build_body(request);
    if let Some(obj) = body.as_object_mut() {
      obj.insert("stream".to_string(), Value::Bool(true));
    }

    let client = base::http_client(auth, STREAM_TIMEOUT);
    let builder = self
      .prepare_request(client.post(self.endpoint("messages")), auth)
      .json(&body);

    let response = base::send_streaming(builder, ctx).await?;
    Ok(base::event_stream(
      response,
      ctx.cancel.clone(),
      anthropic::parse_stream_event,
    ))
  }

  async fn count_tokens(
    &self,
    ctx: &RequestContext,
    auth: &Auth,
    request: &Request,
  ) -> Result<u64> {
    let mut body = self.build_body(request);
    if let Some(obj) = body.as_object_mut() {
      obj.remove("max_tokens");
      obj.remove("stream");
    }

    let client = base::http_client(auth, UNARY_TIMEOUT);
    let builder = self
      .prepare_request(client.post(self.endpoint("messages/count_tokens")), auth)
      .json(&body);

    let value = base::send_json(builder, ctx).await?;
    value
      .get("input_tokens")
      .and_then(Value::as_u64)
      .ok_or_else(|| Error::Internal("count_tokens response missing input_tokens".to_string()))
  }

  async fn refresh(&self, auth: &Auth) -> Result<Auth> {
    if auth.api_key().is_some() {
      return Ok(auth.clone());
    }
    base::refresh_oauth_token(auth, TOKEN_URL, CLIENT_ID).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ir::{Message, Role};

  #[test]
  fn test_thinking_suffix_rewrites_model() {
    let executor = ClaudeExecutor::new(ProviderConfig::default());
    let request = Request {
      model: "claude-sonnet-4-5-thinking".to_string(),
      messages: vec![Message::text(Role::User, "hi")],
      ..Default::default()
    };
    let body = executor.build_body(&request);
    assert_eq!(body["model"], "claude-sonnet-4-5");
    assert_eq!(body["thinking"]["type"], "enabled");
  }

  #[test]
  fn test_plain_model_has_no_thinking_flag() {
    let executor = ClaudeExecutor::new(ProviderConfig::default());
    let request = Request {
      model: "claude-sonnet-4-5-20250929".to_string(),
      messages: vec![Message::text(Role::User, "hi")],
      ..Default::default()
    };
    let body = executor.build_body(&request);
    assert!(body.get("thinking").is_none());
  }
}
