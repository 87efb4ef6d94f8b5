//! Antigravity executor
//!
//! Google Cloud Code endpoint used by the Antigravity editor. Gemini wire
//! format; Claude-family members arrive with the `gemini-claude-*` model
//! prefix straight from the family table, thinking variants keep their
//! `-thinking` suffix and stream reasoning as thought parts.

use async_trait::async_trait;
use llm_mux_config::ProviderConfig;
use serde_json::{json, Value};

use super::base::{self, STREAM_TIMEOUT, UNARY_TIMEOUT};
use super::gemini::GOOGLE_TOKEN_URL;
use super::{EventStream, ProviderExecutor, RequestContext};
use crate::auth::Auth;
use crate::error::Result;
use crate::ir::{Request, Response};
use crate::translator::gemini;

const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com/v1internal";
pub(crate) const ANTIGRAVITY_CLIENT_ID: &str =
  "1071006060591-tmhssin1lpl9emagmar8u9nodcfsvyvb.apps.googleusercontent.com";

pub struct AntigravityExecutor {
  base_url: String,
  project_id: Option<String>,
}

impl AntigravityExecutor {
  pub fn new(config: ProviderConfig) -> Self {
    Self {
      base_url: config
        .base_url
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
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

  fn wrap(&self, auth: &Auth, request: &Request) -> Value {
    let project = auth
      .attributes
      .get("project_id")
      .cloned()
      .or_else(|| self.project_id.clone())
      .unwrap_or_default();
    json!({
      "model": request.model,
      "project": project,
      "request": gemini::serialize_request(request),
    })
  }
}

#[async_trait]
impl ProviderExecutor for AntigravityExecutor {
  fn identifier(&self) -> &'static str {
    "antigravity"
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
      .header("User-Agent", "antigravity")
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
    base::refresh_oauth_token(auth, GOOGLE_TOKEN_URL, ANTIGRAVITY_CLIENT_ID).await
  }
}
