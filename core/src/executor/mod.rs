//! Provider executors
//!
//! Each upstream provider is an adapter satisfying the capability contract:
//! translate the canonical request into the provider's wire format, perform
//! the HTTP call (unary or streaming), apply provider quirks and surface
//! errors in the uniform taxonomy. A shared base module covers HTTP client
//! construction, proxies, status mapping and SSE framing.

pub mod antigravity;
pub mod base;
pub mod claude;
pub mod codex;
pub mod copilot;
pub mod gemini;
pub mod iflow;
pub mod kiro;
pub mod qwen;

pub use antigravity::AntigravityExecutor;
pub use claude::ClaudeExecutor;
pub use codex::CodexExecutor;
pub use copilot::CopilotExecutor;
pub use gemini::{AiStudioExecutor, GeminiCliExecutor};
pub use iflow::IFlowExecutor;
pub use kiro::KiroExecutor;
pub use qwen::QwenExecutor;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::auth::Auth;
use crate::error::{Error, Result};
use crate::ir::{Request, Response, StreamEvent};

/// Cancellation scope of one inbound request
#[derive(Clone, Default)]
pub struct RequestContext {
  pub cancel: CancellationToken,
}

impl RequestContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }
}

/// Lazy, finite, non-restartable sequence of canonical stream events.
///
/// The producer owns the upstream HTTP connection; dropping the stream
/// closes it.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Capability contract implemented by every provider adapter
#[async_trait]
pub trait ProviderExecutor: Send + Sync {
  /// Stable provider type string used in auth records and the registry
  fn identifier(&self) -> &'static str;

  /// Attach credentials and provider headers. Never blocks, never does I/O.
  fn prepare_request(
    &self,
    builder: reqwest::RequestBuilder,
    auth: &Auth,
  ) -> reqwest::RequestBuilder;

  /// One unary upstream call
  async fn execute(&self, ctx: &RequestContext, auth: &Auth, request: &Request)
    -> Result<Response>;

  /// One streaming upstream call
  async fn execute_stream(
    &self,
    ctx: &RequestContext,
    auth: &Auth,
    request: &Request,
  ) -> Result<EventStream>;

  /// Count prompt tokens; providers without support surface 501.
  async fn count_tokens(
    &self,
    _ctx: &RequestContext,
    _auth: &Auth,
    _request: &Request,
  ) -> Result<u64> {
    Err(Error::NotImplemented(format!(
      "{} does not support token counting",
      self.identifier()
    )))
  }

  /// Mint a fresh access token for the record, or fail with `auth_failure`.
  async fn refresh(&self, auth: &Auth) -> Result<Auth> {
    Ok(auth.clone())
  }
}

/// Registry of provider executors keyed by identifier
pub struct ExecutorSet {
  executors: HashMap<&'static str, Arc<dyn ProviderExecutor>>,
}

impl ExecutorSet {
  pub fn empty() -> Self {
    Self {
      executors: HashMap::new(),
    }
  }

  /// All built-in providers, configured from the gateway config.
  pub fn defaults(config: &llm_mux_config::Config) -> Self {
    let mut set = Self::empty();
    set.register(Arc::new(ClaudeExecutor::new(config.provider("claude"))));
    set.register(Arc::new(CodexExecutor::new(config.provider("codex"))));
    set.register(Arc::new(GeminiCliExecutor::new(config.provider("gemini-cli"))));
    set.register(Arc::new(AiStudioExecutor::new(config.provider("aistudio"))));
    set.register(Arc::new(AntigravityExecutor::new(
      config.provider("antigravity"),
    )));
    set.register(Arc::new(CopilotExecutor::new(
      config.provider("github-copilot"),
    )));
    set.register(Arc::new(QwenExecutor::new(config.provider("qwen"))));
    set.register(Arc::new(KiroExecutor::new(config.provider("kiro"))));
    set.register(Arc::new(IFlowExecutor::new(config.provider("iflow"))));
    set
  }

  pub fn register(&mut self, executor: Arc<dyn ProviderExecutor>) {
    self.executors.insert(executor.identifier(), executor);
  }

  pub fn get(&self, identifier: &str) -> Option<Arc<dyn ProviderExecutor>> {
    self.executors.get(identifier).cloned()
  }

  pub fn identifiers(&self) -> Vec<&'static str> {
    self.executors.keys().copied().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_register_all_providers() {
    let set = ExecutorSet::defaults(&llm_mux_config::Config::default());
    for provider in [
      "claude",
      "codex",
      "gemini-cli",
      "aistudio",
      "antigravity",
      "github-copilot",
      "qwen",
      "kiro",
      "iflow",
    ] {
      assert!(set.get(provider).is_some(), "missing executor: {provider}");
    }
  }

  #[tokio::test]
  async fn test_count_tokens_default_is_not_implemented() {
    let set = ExecutorSet::defaults(&llm_mux_config::Config::default());
    let executor = set.get("qwen").unwrap();
    let err = executor
      .count_tokens(
        &RequestContext::new(),
        &Auth::new("qwen", "a"),
        &Request::default(),
      )
      .await
      .unwrap_err();
    assert_eq!(err.http_status(), 501);
  }
}
