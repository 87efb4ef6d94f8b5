//! iFlow executor
//!
//! Cookie-derived API keys against the iFlow OpenAI-compatible surface.
//! Token lifetime is opaque; there is no refresh hook, auth failures
//! quarantine the record like any other provider.

use async_trait::async_trait;
use llm_mux_config::ProviderConfig;
use serde_json::Value;

use super::base::{self, STREAM_TIMEOUT, UNARY_TIMEOUT};
use super::{EventStream, ProviderExecutor, RequestContext};
use crate::auth::Auth;
use crate::error::Result;
use crate::ir::{Request, Response};
use crate::translator::openai;

const DEFAULT_BASE_URL: &str = "https://apis.iflow.cn/v1";

pub struct IFlowExecutor {
  base_url: String,
}

impl IFlowExecutor {
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
impl ProviderExecutor for IFlowExecutor {
  fn identifier(&self) -> &'static str {
    "iflow"
  }

  fn prepare_request(
    &self,
    builder: reqwest::RequestBuilder,
    auth: &Auth,
  ) -> reqwest::RequestBuilder {
    builder
      .header(
        "Authorization",
        format!("Bearer {}", auth.api_key().unwrap_or_default()),
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
}
