//! OAuth orchestrator
//!
//! Long-lived background flows that mint credential records for the auth
//! manager. WebUI flows hand the browser an authorization URL and wait for
//! the loopback callback; device flows poll the provider token endpoint in
//! a background task. Flow state lives in an injected service instance, not
//! a process-wide singleton, so tests can isolate flows.

pub mod device;
pub mod pkce;
pub mod web;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::{Auth, AuthManager};
use crate::error::{Error, Result};

/// Pending flows expire after this long.
pub const FLOW_TTL: Duration = Duration::from_secs(600);

/// Terminal flows are garbage-collected this long after finishing.
const TERMINAL_RETENTION: Duration = Duration::from_secs(600);

/// Who initiated the flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMode {
  WebUi,
  Cli,
}

/// Kind of flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
  OAuth,
  Device,
}

/// Flow lifecycle; terminal statuses are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
  Pending,
  Completed,
  Failed,
  Cancelled,
  Expired,
}

impl FlowStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, FlowStatus::Pending)
  }
}

struct Flow {
  provider: String,
  mode: FlowMode,
  flow_type: FlowType,
  status: FlowStatus,
  detail: Option<String>,
  created_at: DateTime<Utc>,
  expires_at: DateTime<Utc>,
  code_verifier: Option<String>,
  project_id: Option<String>,
  cancel: CancellationToken,
  terminal_at: Option<DateTime<Utc>>,
}

/// Response to `start`
#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
  pub status: &'static str,
  pub flow_type: FlowType,
  pub state: String,
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub auth_url: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub code_verifier: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user_code: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub verification_url: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expires_in: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub interval: Option<u64>,
}

/// Response to `status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
  pub status: FlowStatus,
  pub provider: String,
  pub mode: FlowMode,
  pub flow_type: FlowType,
  pub created_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub detail: Option<String>,
}

struct ServiceInner {
  auths: AuthManager,
  flows: Mutex<HashMap<String, Flow>>,
  client: reqwest::Client,
}

/// Registry of in-flight and recently finished OAuth flows
#[derive(Clone)]
pub struct OAuthService {
  inner: Arc<ServiceInner>,
}

impl OAuthService {
  pub fn new(auths: AuthManager) -> Self {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .unwrap_or_else(|_| reqwest::Client::new());
    Self {
      inner: Arc::new(ServiceInner {
        auths,
        flows: Mutex::new(HashMap::new()),
        client,
      }),
    }
  }

  /// Start a flow for `provider`.
  ///
  /// Provider aliases are normalized first; qwen and copilot run the device
  /// grant, iflow is rejected with a pointer at its cookie endpoint.
  pub async fn start(&self, provider: &str, project_id: Option<String>) -> Result<StartResponse> {
    let provider = normalize_provider(provider);

    match provider.as_str() {
      "qwen" => return device::start_qwen(self.clone()).await,
      "github-copilot" => return device::start_copilot(self.clone()).await,
      "iflow" => {
        return Err(Error::BadRequest(
          "iFlow uses cookie-based auth. Use POST /v0/management/iflow-auth-url with {cookie: \"...\"} instead"
            .to_string(),
        ))
      }
      _ => {}
    }

    let state = pkce::random_state();
    let codes = pkce::generate();
    let auth_url = web::build_auth_url(&provider, &state, &codes, project_id.as_deref())?;

    self.register_flow(
      &state,
      &provider,
      FlowMode::WebUi,
      FlowType::OAuth,
      Some(codes.verifier.clone()),
      project_id,
    );

    Ok(StartResponse {
      status: "ok",
      flow_type: FlowType::OAuth,
      state: state.clone(),
      id: state,
      auth_url: Some(auth_url),
      code_verifier: Some(codes.verifier),
      user_code: None,
      verification_url: None,
      expires_in: None,
      interval: None,
    })
  }

  /// Current status of a flow; expiry is applied lazily on read.
  pub fn status(&self, state: &str) -> Result<StatusResponse> {
    let mut flows = self.inner.flows.lock().expect("oauth flows lock poisoned");
    let flow = flows
      .get_mut(state)
      .ok_or_else(|| Error::NotFound(format!("oauth state: {state}")))?;

    if flow.status == FlowStatus::Pending && flow.expires_at <= Utc::now() {
      flow.status = FlowStatus::Expired;
      flow.terminal_at = Some(Utc::now());
      flow.cancel.cancel();
    }

    Ok(StatusResponse {
      status: flow.status,
      provider: flow.provider.clone(),
      mode: flow.mode,
      flow_type: flow.flow_type,
      created_at: flow.created_at,
      detail: flow.detail.clone(),
    })
  }

  /// Cancel a pending flow. Idempotent on terminal states.
  pub fn cancel(&self, state: &str) -> Result<()> {
    let mut flows = self.inner.flows.lock().expect("oauth flows lock poisoned");
    let flow = flows
      .get_mut(state)
      .ok_or_else(|| Error::NotFound(format!("oauth state: {state}")))?;

    if !flow.status.is_terminal() {
      flow.status = FlowStatus::Cancelled;
      flow.terminal_at = Some(Utc::now());
      flow.cancel.cancel();
      info!(state, provider = %flow.provider, "oauth flow cancelled");
    }
    Ok(())
  }

  /// Finish a WebUI flow with the authorization code from the callback.
  pub async fn complete_with_code(&self, state: &str, code: &str) -> Result<Auth> {
    let (provider, verifier, project_id) = {
      let flows = self.inner.flows.lock().expect("oauth flows lock poisoned");
      let flow = flows
        .get(state)
        .ok_or_else(|| Error::NotFound(format!("oauth state: {state}")))?;
      if flow.status.is_terminal() {
        return Err(Error::BadRequest(format!(
          "oauth flow already {:?}",
          flow.status
        )));
      }
      (
        flow.provider.clone(),
        flow.code_verifier.clone(),
        flow.project_id.clone(),
      )
    };

    match web::exchange_code(
      &self.inner.client,
      &provider,
      code,
      verifier.as_deref(),
      project_id.as_deref(),
    )
    .await
    {
      Ok(auth) => {
        self.inner.auths.register(auth.clone())?;
        self.complete(state);
        Ok(auth)
      }
      Err(err) => {
        self.fail(state, &err.to_string());
        Err(err)
      }
    }
  }

  /// Drop expired terminal flows and expire stale pending ones.
  pub fn gc(&self) {
    let now = Utc::now();
    let retention = chrono::Duration::seconds(TERMINAL_RETENTION.as_secs() as i64);
    let mut flows = self.inner.flows.lock().expect("oauth flows lock poisoned");

    for flow in flows.values_mut() {
      if flow.status == FlowStatus::Pending && flow.expires_at <= now {
        flow.status = FlowStatus::Expired;
        flow.terminal_at = Some(now);
        flow.cancel.cancel();
      }
    }
    flows.retain(|_, flow| match flow.terminal_at {
      Some(at) => at + retention > now,
      None => true,
    });
  }

  /// Background GC loop, one tick a minute. Holds only a weak handle so an
  /// abandoned service is dropped rather than kept alive by its own GC.
  pub fn spawn_gc(&self) {
    let weak = Arc::downgrade(&self.inner);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(Duration::from_secs(60));
      loop {
        ticker.tick().await;
        match weak.upgrade() {
          Some(inner) => OAuthService { inner }.gc(),
          None => break,
        }
      }
    });
  }

  pub(crate) fn register_flow(
    &self,
    state: &str,
    provider: &str,
    mode: FlowMode,
    flow_type: FlowType,
    code_verifier: Option<String>,
    project_id: Option<String>,
  ) -> CancellationToken {
    let cancel = CancellationToken::new();
    let now = Utc::now();
    let flow = Flow {
      provider: provider.to_string(),
      mode,
      flow_type,
      status: FlowStatus::Pending,
      detail: None,
      created_at: now,
      expires_at: now + chrono::Duration::seconds(FLOW_TTL.as_secs() as i64),
      code_verifier,
      project_id,
      cancel: cancel.clone(),
      terminal_at: None,
    };
    self
      .inner
      .flows
      .lock()
      .expect("oauth flows lock poisoned")
      .insert(state.to_string(), flow);
    cancel
  }

  pub(crate) fn complete(&self, state: &str) {
    self.transition(state, FlowStatus::Completed, None);
  }

  pub(crate) fn fail(&self, state: &str, detail: &str) {
    self.transition(state, FlowStatus::Failed, Some(detail.to_string()));
  }

  pub(crate) fn mark_cancelled(&self, state: &str) {
    self.transition(state, FlowStatus::Cancelled, None);
  }

  fn transition(&self, state: &str, status: FlowStatus, detail: Option<String>) {
    let mut flows = self.inner.flows.lock().expect("oauth flows lock poisoned");
    if let Some(flow) = flows.get_mut(state) {
      if flow.status.is_terminal() {
        return;
      }
      flow.status = status;
      flow.detail = detail;
      flow.terminal_at = Some(Utc::now());
    }
  }

  pub(crate) fn auths(&self) -> &AuthManager {
    &self.inner.auths
  }

  pub(crate) fn client(&self) -> &reqwest::Client {
    &self.inner.client
  }
}

fn normalize_provider(provider: &str) -> String {
  match provider {
    "anthropic" => "claude",
    "gemini" => "gemini-cli",
    "copilot" => "github-copilot",
    other => other,
  }
  .to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::AuthStore;
  use crate::executor::ExecutorSet;

  fn service() -> (OAuthService, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(AuthStore::open(dir.path()).unwrap());
    let auths = AuthManager::new(store, Arc::new(ExecutorSet::empty()));
    (OAuthService::new(auths), dir)
  }

  #[tokio::test]
  async fn test_webui_flow_start_and_status() {
    let (service, _dir) = service();
    let response = service.start("claude", None).await.unwrap();
    assert_eq!(response.flow_type, FlowType::OAuth);
    assert!(response.auth_url.as_deref().unwrap().contains("claude.ai"));
    assert!(response.code_verifier.is_some());

    let status = service.status(&response.state).unwrap();
    assert_eq!(status.status, FlowStatus::Pending);
    assert_eq!(status.provider, "claude");
  }

  #[tokio::test]
  async fn test_provider_alias_normalization() {
    let (service, _dir) = service();
    let response = service.start("anthropic", None).await.unwrap();
    let status = service.status(&response.state).unwrap();
    assert_eq!(status.provider, "claude");
  }

  #[tokio::test]
  async fn test_iflow_rejected() {
    let (service, _dir) = service();
    let err = service.start("iflow", None).await.unwrap_err();
    assert_eq!(err.kind(), "bad_request");
    assert!(err.to_string().contains("iflow-auth-url"));
  }

  #[tokio::test]
  async fn test_cancel_is_sticky_and_idempotent() {
    let (service, _dir) = service();
    let response = service.start("codex", None).await.unwrap();

    service.cancel(&response.state).unwrap();
    assert_eq!(
      service.status(&response.state).unwrap().status,
      FlowStatus::Cancelled
    );

    // Idempotent on terminal; completion does not overwrite it
    service.cancel(&response.state).unwrap();
    service.complete(&response.state);
    assert_eq!(
      service.status(&response.state).unwrap().status,
      FlowStatus::Cancelled
    );
  }

  #[tokio::test]
  async fn test_unknown_state_not_found() {
    let (service, _dir) = service();
    assert!(matches!(service.status("nope"), Err(Error::NotFound(_))));
    assert!(matches!(service.cancel("nope"), Err(Error::NotFound(_))));
  }

  #[tokio::test]
  async fn test_gc_removes_old_terminal_flows() {
    let (service, _dir) = service();
    let response = service.start("claude", None).await.unwrap();
    service.fail(&response.state, "denied");

    // Age the terminal timestamp past the retention window
    {
      let mut flows = service.inner.flows.lock().unwrap();
      flows.get_mut(&response.state).unwrap().terminal_at =
        Some(Utc::now() - chrono::Duration::seconds(700));
    }
    service.gc();
    assert!(service.status(&response.state).is_err());
  }
}
