//! Google Gemini executors
//!
//! Two bindings share the Gemini wire format: `aistudio` talks to the
//! Generative Language API with a static key, `gemini-cli` talks to the
//! Cloud Code endpoint with OAuth credentials and a project id, wrapping
//! the request the way the CLI does.

use async_trait::async_trait;
use llm_mux_config::ProviderConfig;
use serde_json::{json, Value};

use super::base::{self, STREAM_TIMEOUT, UNARY_TIMEOUT};
use super::{EventStream, ProviderExecutor, RequestContext};
use crate::auth::Auth;
use crate::error::{Error, Result};
use crate::ir::{Request, Response};
use crate::translator::gemini;

const AISTUDIO_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const CLOUD_CODE_BASE_URL: &str = "https://cloudcode-pa.googleapis.com/v1internal";
pub(crate) const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub(crate) const GEMINI_CLI_CLIENT_ID: &str =
  "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";

/// Google AI Studio: API-key auth against the public endpoint.
pub struct AiStudioExecutor {
  base_url: String,
}

impl AiStudioExecutor {
  pub fn new(config: ProviderConfig) -> Self {
    Self {
      base_url: config
        .base_url
        .unwrap_or_else(|| AISTUDIO_BASE_URL.to_string()),
    }
  }

  fn endpoint(&self, model: &str, stream: bool) -> String {
    let method = if stream {
      "streamGenerateContent?alt=sse"
    } else {
      "generateContent"
    };
    format!(
      "{}/models/{}:{}",
      self.base_url.trim_end_matches('/'),
      model,
      method
    )
  }
}

#[async_trait]
impl ProviderExecutor for AiStudioExecutor {
  fn identifier(&self) -> &'static str {
    "aistudio"
  }

  fn prepare_request(
    &self,
    builder: reqwest::RequestBuilder,
    auth: &Auth,
  ) -> reqwest::RequestBuilder {
    builder
      .header("x-goog-api-key", auth.api_key().unwrap_or_default())
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
      .prepare_request(client.post(self.endpoint(&request.model, false)), auth)
      .json(&gemini::serialize_request(request));

    let body = base::send_json(builder, ctx).await?;
    gemini::parse_response(&body, &request.model)
  }

  async fn execute_stream(
    &self,
    ctx: &RequestContext,
    auth: &Auth,
    request: &Request,
  ) -> Result<EventStream> {
    let client = base::http_client(auth, STREAM_TIMEOUT);
    let builder = self
      .prepare_request(client.post(self.endpoint(&request.model, true)), auth)
      .json(&gemini::serialize_request(request));

    let response = base::send_streaming(builder, ctx).await?;
    let mut parse = gemini::stream_parser();
    Ok(base::event_stream(response, ctx.cancel.clone(), move |v| {
      parse(v)
    }))
  }

  async fn count_tokens(
    &self,
    ctx: &RequestContext,
    auth: &Auth,
    request: &Request,
  ) -> Result<u64> {
    let url = format!(
      "{}/models/{}:countTokens",
      self.base_url.trim_end_matches('/'),
      request.model
    );
    let body = gemini::serialize_request(request);
    let client = base::http_client(auth, UNARY_TIMEOUT);
    let builder = self
      .prepare_request(client.post(url), auth)
      .json(&json!({ "contents": body["contents"] }));

    let value = base::send_json(builder, ctx).await?;
    value
      .get("totalTokens")
      .and_then(Value::as_u64)
      .ok_or_else(|| Error::Internal("countTokens response missing totalTokens".to_string()))
  }
}

/// Gemini CLI: OAuth against the Cloud Code private endpoint.
pub struct GeminiCliExecutor {
  base_url: String,
  project_id: Option<String>,
}

impl GeminiCliExecutor {
  pub fn new(config: ProviderConfig) -> Self {
    Self {
      base_url: config
        .base_url
        .unwrap_or_else(|| CLOUD_CODE_BASE_URL.to_string()),
      project_id: config.project_id,
    }
  }

  fn endpoint(&self, stream: bool) -> String {
    let method = if stream {
      ":streamGenerateContent?alt=sse"
    } else {
      ":generateContent"
    };
    format!("{}{}", self.base_url.trim_end_matches('/'), method)
  }

  fn project(&self, auth: &Auth) -> String {
    auth
      .attributes
      .get("project_id")
      .cloned()
      .or_else(|| self.project_id.clone())
      .unwrap_or_default()
  }

  /// Cloud Code wraps the generate request in an envelope
  fn wrap(&self, auth: &Auth, request: &Request) -> Value {
    json!({
      "model": request.model,
      "project": self.project(auth),
      "request": gemini::serialize_request(request),
    })
  }
}

#[async_trait]
impl ProviderExecutor for GeminiCliExecutor {
  fn identifier(&self) -> &'static str {
    "gemini-cli"
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
      .prepare_request(client.post(self.endpoint(false)), auth)
      .json(&self.wrap(auth, request));

    let body = base::send_json(builder, ctx).await?;
    // The envelope response nests the generate payload
    let inner = body.get("response").unwrap_or(&body);
    gemini::parse_response(inner, &request.model)
  }

  async fn execute_stream(
    &self,
    ctx: &RequestContext,
    auth: &Auth,
    request: &Request,
  ) -> Result<EventStream> {
    let client = base::http_client(auth, STREAM_TIMEOUT);
    let builder = self
      .prepare_request(client.post(self.endpoint(true)), auth)
      .json(&self.wrap(auth, request));

    let response = base::send_streaming(builder, ctx).await?;
    let mut parse = gemini::stream_parser();
    Ok(base::event_stream(response, ctx.cancel.clone(), move |v| {
      let inner = v.get("response").unwrap_or(v);
      parse(inner)
    }))
  }

  async fn refresh(&self, auth: &Auth) -> Result<Auth> {
    base::refresh_oauth_token(auth, GOOGLE_TOKEN_URL, GEMINI_CLI_CLIENT_ID).await
  }
}
