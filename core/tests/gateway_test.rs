// End-to-end routing tests: family resolution, credential retry and
// quarantine behavior with a scripted provider executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use llm_mux_core::auth::{Auth, AuthManager, AuthStatus, AuthStore, LeaseOutcome};
use llm_mux_core::executor::{EventStream, ExecutorSet, ProviderExecutor, RequestContext};
use llm_mux_core::ir::{FinishReason, Message, Part, Request, Response, Role, StreamEvent, Usage};
use llm_mux_core::{Error, Gateway, Registry};

/// Scripted executor: rejects the auth ids listed in `reject`, succeeds for
/// every other credential.
struct ScriptedExecutor {
  provider: &'static str,
  reject: Vec<String>,
  calls: AtomicUsize,
}

impl ScriptedExecutor {
  fn new(provider: &'static str, reject: Vec<String>) -> Self {
    Self {
      provider,
      reject,
      calls: AtomicUsize::new(0),
    }
  }

  fn ok_response(&self, request: &Request) -> Response {
    Response {
      id: "resp-1".to_string(),
      model: request.model.clone(),
      message: Message::text(Role::Assistant, "pong"),
      finish: FinishReason::Stop,
      usage: Usage::default(),
    }
  }
}

#[async_trait]
impl ProviderExecutor for ScriptedExecutor {
  fn identifier(&self) -> &'static str {
    self.provider
  }

  fn prepare_request(
    &self,
    builder: reqwest::RequestBuilder,
    _auth: &Auth,
  ) -> reqwest::RequestBuilder {
    builder
  }

  async fn execute(
    &self,
    _ctx: &RequestContext,
    auth: &Auth,
    request: &Request,
  ) -> Result<Response, Error> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.reject.contains(&auth.id) {
      return Err(Error::AuthFailure("HTTP 401".to_string()));
    }
    Ok(self.ok_response(request))
  }

  async fn execute_stream(
    &self,
    _ctx: &RequestContext,
    auth: &Auth,
    _request: &Request,
  ) -> Result<EventStream, Error> {
    if self.reject.contains(&auth.id) {
      return Err(Error::AuthFailure("HTTP 401".to_string()));
    }
    let events = vec![
      Ok(StreamEvent::Start {
        id: "resp-1".to_string(),
        model: "m".to_string(),
      }),
      Ok(StreamEvent::TextDelta {
        text: "pong".to_string(),
      }),
      Ok(StreamEvent::Finish {
        reason: FinishReason::Stop,
        usage: None,
      }),
      Ok(StreamEvent::Done),
    ];
    Ok(Box::pin(futures::stream::iter(events)))
  }
}

fn active_auth(provider: &str, account: &str) -> Auth {
  let mut auth = Auth::new(provider, account);
  auth.set_token("tok", Some("refresh"), 24 * 3600);
  auth
}

fn gateway_with(
  auths: Vec<Auth>,
  executor: Arc<ScriptedExecutor>,
) -> (Gateway, tempfile::TempDir) {
  let dir = tempfile::tempdir().unwrap();
  let store = Arc::new(AuthStore::open(dir.path()).unwrap());
  for auth in &auths {
    store.save(auth).unwrap();
  }
  let mut set = ExecutorSet::empty();
  set.register(executor);
  let set = Arc::new(set);
  let manager = AuthManager::new(store, set.clone());
  let gateway = Gateway::new(Arc::new(Registry::new()), manager, set);
  (gateway, dir)
}

fn user_request(model: &str) -> Request {
  Request {
    model: model.to_string(),
    messages: vec![Message::text(Role::User, "ping")],
    ..Default::default()
  }
}

#[tokio::test]
async fn resolves_family_and_executes() {
  let executor = Arc::new(ScriptedExecutor::new("claude", vec![]));
  let (gateway, _dir) = gateway_with(vec![active_auth("claude", "a")], executor.clone());

  let response = gateway
    .execute(&RequestContext::new(), user_request("claude-sonnet-4-5"))
    .await
    .unwrap();

  assert_eq!(response.message.joined_text(), "pong");
  // The family binding for the claude provider carries the dated model id
  assert_eq!(response.model, "claude-sonnet-4-5-20250929");
  assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn auth_failure_quarantines_and_retries_alternate() {
  let bad = active_auth("claude", "bad");
  let good = active_auth("claude", "good");
  let executor = Arc::new(ScriptedExecutor::new("claude", vec![bad.id.clone()]));
  let (gateway, _dir) = gateway_with(vec![bad.clone(), good], executor.clone());

  // Touch the good credential so the rejected one is least recently used
  // and gets picked first
  let warm = gateway
    .auths()
    .lease_excluding("claude", &[bad.id.clone()])
    .unwrap();
  warm.release(LeaseOutcome::Ok);

  let response = gateway
    .execute(&RequestContext::new(), user_request("claude-sonnet-4-5"))
    .await
    .unwrap();
  assert_eq!(response.message.joined_text(), "pong");

  // The rejected credential is quarantined with a scheduled retry
  let quarantined = gateway.auths().get(&bad.id).unwrap();
  assert_eq!(quarantined.status, AuthStatus::Quarantined);
  assert!(quarantined.next_retry_at.is_some());
}

#[tokio::test]
async fn auth_failure_without_alternate_surfaces_502() {
  let bad = active_auth("claude", "only");
  let executor = Arc::new(ScriptedExecutor::new("claude", vec![bad.id.clone()]));
  let (gateway, _dir) = gateway_with(vec![bad], executor);

  let err = gateway
    .execute(&RequestContext::new(), user_request("claude-sonnet-4-5"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), "auth_failure");
  assert_eq!(err.http_status(), 502);
}

#[tokio::test]
async fn unknown_model_is_not_found() {
  let executor = Arc::new(ScriptedExecutor::new("claude", vec![]));
  let (gateway, _dir) = gateway_with(vec![active_auth("claude", "a")], executor);

  let err = gateway
    .execute(&RequestContext::new(), user_request("not-a-model"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn no_credentials_is_unauthorized_client() {
  let executor = Arc::new(ScriptedExecutor::new("claude", vec![]));
  let (gateway, _dir) = gateway_with(vec![], executor);

  let err = gateway
    .execute(&RequestContext::new(), user_request("claude-sonnet-4-5"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), "unauthorized_client");
}

#[tokio::test]
async fn stream_releases_lease_at_terminal_event() {
  let executor = Arc::new(ScriptedExecutor::new("claude", vec![]));
  let (gateway, _dir) = gateway_with(vec![active_auth("claude", "a")], executor);

  let mut stream = gateway
    .execute_stream(&RequestContext::new(), user_request("claude-sonnet-4-5"))
    .await
    .unwrap();

  let mut events = Vec::new();
  while let Some(event) = stream.next().await {
    events.push(event.unwrap());
  }
  assert!(matches!(events.last(), Some(StreamEvent::Done)));

  // Lease released with Ok: the record is immediately leasable again
  let again = gateway
    .execute_stream(&RequestContext::new(), user_request("claude-sonnet-4-5"))
    .await;
  assert!(again.is_ok());
}

#[tokio::test]
async fn gemini_family_falls_through_to_aistudio() {
  let executor = Arc::new(ScriptedExecutor::new("aistudio", vec![]));
  let (gateway, _dir) = gateway_with(vec![active_auth("aistudio", "key")], executor);

  // gemini-cli and antigravity members are skipped: only aistudio is loaded
  let response = gateway
    .execute(&RequestContext::new(), user_request("gemini-2.5-flash"))
    .await
    .unwrap();
  assert_eq!(response.model, "gemini-2.5-flash");
}

#[tokio::test]
async fn models_listing_follows_loaded_auths() {
  let executor = Arc::new(ScriptedExecutor::new("aistudio", vec![]));
  let (gateway, _dir) = gateway_with(vec![active_auth("aistudio", "key")], executor);

  let models = gateway.available_models();
  assert!(models.contains(&"gemini-2.5-flash"));
  assert!(!models.contains(&"claude-sonnet-4-5"));

  // Part invariants hold for the clamped request path too
  let mut request = user_request("gemini-2.5-flash");
  request.sampling.max_output_tokens = Some(10_000_000);
  request.clamp_output_tokens(65_536);
  assert_eq!(request.sampling.max_output_tokens, Some(65_536));
  assert!(matches!(
    request.messages[0].parts[0],
    Part::Text { .. }
  ));
}
