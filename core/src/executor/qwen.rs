//! Qwen executor
//!
//! Device-flow OAuth credentials against the Qwen portal's
//! OpenAI-compatible surface. A `resource_url` attribute from the token
//! response overrides the default endpoint.

use async_trait::async_trait;
use llm_mux_config::ProviderConfig;
use serde_json::Value;

use super::base::{self, STREAM_TIMEOUT, UNARY_TIMEOUT};
use super::{EventStream, ProviderExecutor, RequestContext};
use crate::auth::Auth;
use crate::error::Result;
use crate::ir::{Request, Response};
use crate::translator::openai;

const DEFAULT_BASE_URL: &str = "https://portal.qwen.ai/v1";
pub(crate) const TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
pub(crate) const DEVICE_CODE_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/device/code";
pub(crate) const CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";

pub struct QwenExecutor {
  base_url: String,
}

impl QwenExecutor {
  pub fn new(config: ProviderConfig) -> Self {
    Self {
      base_url: config
        .base_url
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
    }
  }

  fn endpoint(&self, auth: &Auth) -> String {
    let base = auth
      .attributes
      .get("resource_url")
      .map(String::as_str)
      .unwrap_or(&self.base_url);
    format!("{}/chat/completions", base.trim_end_matches('/'))
  }
}

#[async_trait]
impl ProviderExecutor for QwenExecutor {
  fn identifier(&self) -> &'static str {
    "qwen"
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
      .prepare_request(client.post(self.endpoint(auth)), auth)
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
      .prepare_request(client.post(self.endpoint(auth)), auth)
      .json(&body);

    let response = base::send_streaming(builder, ctx).await?;
    Ok(base::event_stream(
      response,
      ctx.cancel.clone(),
      openai::parse_stream_event,
    ))
  }

  async fn refresh(&self, auth: &Auth) -> Result<Auth> {
    base::refresh_oauth_token(auth, TOKEN_URL, CLIENT_ID).await
  }
}
