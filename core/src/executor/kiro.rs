//! Kiro executor
//!
//! Anthropic-shaped upstream behind the Kiro desktop subscription. The
//! endpoint can be overridden per record via the `endpoint` attribute.

use async_trait::async_trait;
use llm_mux_config::ProviderConfig;
use serde_json::Value;

use super::base::{self, STREAM_TIMEOUT, UNARY_TIMEOUT};
use super::{EventStream, ProviderExecutor, RequestContext};
use crate::auth::Auth;
use crate::error::Result;
use crate::ir::{Request, Response};
use crate::translator::anthropic;

const DEFAULT_BASE_URL: &str = "https://codewhisperer.us-east-1.amazonaws.com";
const REFRESH_URL: &str = "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken";
const CLIENT_ID: &str = "kiro-desktop";

pub struct KiroExecutor {
  base_url: String,
}

impl KiroExecutor {
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
      .get("endpoint")
      .map(String::as_str)
      .unwrap_or(&self.base_url);
    format!("{}/v1/messages", base.trim_end_matches('/'))
  }
}

#[async_trait]
impl ProviderExecutor for KiroExecutor {
  fn identifier(&self) -> &'static str {
    "kiro"
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
      .json(&anthropic::serialize_request(request));

    let body = base::send_json(builder, ctx).await?;
    anthropic::parse_response(&body, &request.model)
  }

  async fn execute_stream(
    &self,
    ctx: &RequestContext,
    auth: &Auth,
    request: &Request,
  ) -> Result<EventStream> {
    let mut body = anthropic::serialize_request(request);
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
      anthropic::parse_stream_event,
    ))
  }

  async fn refresh(&self, auth: &Auth) -> Result<Auth> {
    base::refresh_oauth_token(auth, REFRESH_URL, CLIENT_ID).await
  }
}
