//! Request routing engine
//!
//! Resolves the model through the registry, leases a credential, executes,
//! and on credential-scoped failures retries with a fresh lease. A retry
//! never reuses a tried record; when a provider's credentials are exhausted
//! resolution re-runs with that provider excluded, up to three family hops.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::auth::{AuthManager, LeaseOutcome};
use crate::error::{Error, Result};
use crate::executor::{EventStream, ExecutorSet, ProviderExecutor, RequestContext};
use crate::ir::{Request, Response, StreamEvent};
use crate::registry::Registry;

/// Maximum family members tried per request
const MAX_FAMILY_HOPS: usize = 3;

/// Alternate credentials tried after the first failure
const MAX_ALTERNATE_CREDENTIALS: usize = 2;

pub struct Gateway {
  registry: Arc<Registry>,
  auths: AuthManager,
  executors: Arc<ExecutorSet>,
}

impl Gateway {
  pub fn new(registry: Arc<Registry>, auths: AuthManager, executors: Arc<ExecutorSet>) -> Self {
    Self {
      registry,
      auths,
      executors,
    }
  }

  pub fn registry(&self) -> &Registry {
    &self.registry
  }

  pub fn auths(&self) -> &AuthManager {
    &self.auths
  }

  /// Resolve a model id to a concrete (provider, upstream model id) pair
  /// against the currently leasable providers.
  fn resolve(&self, model: &str, excluded_providers: &[String]) -> Result<(String, String)> {
    let mut available = self.auths.available_providers();
    available.retain(|p| !excluded_providers.contains(p));

    let (provider, model_id, found) = self.registry.resolve(model, &available);
    if found {
      let provider = provider.expect("resolved family member has a provider");
      return Ok((provider.to_string(), model_id));
    }

    // Not a family key: treat the id as provider-specific and find an
    // available provider bound to it.
    if let Some(provider) = self.registry.providers_for_model(model, &available).first() {
      return Ok((provider.to_string(), model.to_string()));
    }

    if available.is_empty() && excluded_providers.is_empty() {
      return Err(Error::UnauthorizedClient(format!(
        "no credentials loaded for model {model}"
      )));
    }
    Err(Error::NotFound(format!("model: {model}")))
  }

  /// One unary chat request through resolve → lease → execute.
  pub async fn execute(&self, ctx: &RequestContext, mut request: Request) -> Result<Response> {
    request.validate()?;
    request.clamp_output_tokens(self.registry.output_token_limit(&request.model));

    let mut excluded_providers: Vec<String> = Vec::new();
    let mut last_err: Option<Error> = None;

    for _hop in 0..MAX_FAMILY_HOPS {
      let (provider, model_id) = match self.resolve(&request.model, &excluded_providers) {
        Ok(resolved) => resolved,
        Err(err) => return Err(last_err.unwrap_or(err)),
      };
      let executor = self.executor(&provider)?;

      let mut upstream = request.clone();
      upstream.model = model_id;

      let mut tried: Vec<String> = Vec::new();
      for _attempt in 0..=MAX_ALTERNATE_CREDENTIALS {
        let Ok(lease) = self.auths.lease_excluding(&provider, &tried) else {
          break;
        };
        let auth = lease.auth();
        tried.push(auth.id.clone());
        debug!(provider = %provider, model = %upstream.model, auth = %auth.id, "executing");

        match executor.execute(ctx, &auth, &upstream).await {
          Ok(response) => {
            lease.release(LeaseOutcome::Ok);
            return Ok(response);
          }
          Err(err) => {
            warn!(provider = %provider, auth = %auth.id, error = %err, "upstream call failed");
            release_failed(lease, &err);
            if !err.retryable() {
              return Err(err);
            }
            last_err = Some(err);
          }
        }
      }

      excluded_providers.push(provider);
    }

    Err(last_err.unwrap_or_else(|| Error::UnauthorizedClient(request.model.clone())))
  }

  /// One streaming chat request. The returned stream owns the credential
  /// lease: it releases `Ok` at the terminal event and `Cancelled` when the
  /// consumer drops mid-stream.
  pub async fn execute_stream(
    &self,
    ctx: &RequestContext,
    mut request: Request,
  ) -> Result<EventStream> {
    request.validate()?;
    request.clamp_output_tokens(self.registry.output_token_limit(&request.model));
    request.stream = true;

    let mut excluded_providers: Vec<String> = Vec::new();
    let mut last_err: Option<Error> = None;

    for _hop in 0..MAX_FAMILY_HOPS {
      let (provider, model_id) = match self.resolve(&request.model, &excluded_providers) {
        Ok(resolved) => resolved,
        Err(err) => return Err(last_err.unwrap_or(err)),
      };
      let executor = self.executor(&provider)?;

      let mut upstream = request.clone();
      upstream.model = model_id;

      let mut tried: Vec<String> = Vec::new();
      for _attempt in 0..=MAX_ALTERNATE_CREDENTIALS {
        let Ok(lease) = self.auths.lease_excluding(&provider, &tried) else {
          break;
        };
        let auth = lease.auth();
        tried.push(auth.id.clone());
        debug!(provider = %provider, model = %upstream.model, auth = %auth.id, "streaming");

        match executor.execute_stream(ctx, &auth, &upstream).await {
          Ok(inner) => {
            // From here the stream owns the lease; retries are no longer
            // possible once bytes may have reached the client.
            let wrapped = async_stream::stream! {
              let mut inner = inner;
              let mut outcome = LeaseOutcome::Ok;
              while let Some(item) = inner.next().await {
                if let Err(err) = &item {
                  outcome = failure_outcome(err).unwrap_or(LeaseOutcome::Cancelled);
                }
                let done = matches!(item, Ok(StreamEvent::Done));
                yield item;
                if done {
                  break;
                }
              }
              lease.release(outcome);
            };
            return Ok(Box::pin(wrapped));
          }
          Err(err) => {
            warn!(provider = %provider, auth = %auth.id, error = %err, "stream start failed");
            release_failed(lease, &err);
            if !err.retryable() {
              return Err(err);
            }
            last_err = Some(err);
          }
        }
      }

      excluded_providers.push(provider);
    }

    Err(last_err.unwrap_or_else(|| Error::UnauthorizedClient(request.model.clone())))
  }

  /// Token counting for providers that support it; 501 otherwise.
  pub async fn count_tokens(&self, ctx: &RequestContext, request: Request) -> Result<u64> {
    let (provider, model_id) = self.resolve(&request.model, &[])?;
    let executor = self.executor(&provider)?;

    let mut upstream = request;
    upstream.model = model_id;

    let lease = self.auths.lease(&provider)?;
    let auth = lease.auth();
    match executor.count_tokens(ctx, &auth, &upstream).await {
      Ok(count) => {
        lease.release(LeaseOutcome::Ok);
        Ok(count)
      }
      Err(err) => {
        release_failed(lease, &err);
        Err(err)
      }
    }
  }

  /// Canonical models currently routable, for `GET /v1/models`.
  pub fn available_models(&self) -> Vec<&'static str> {
    self
      .registry
      .routable_models(&self.auths.available_providers())
  }

  fn executor(&self, provider: &str) -> Result<Arc<dyn ProviderExecutor>> {
    self
      .executors
      .get(provider)
      .ok_or_else(|| Error::Internal(format!("no executor registered for provider {provider}")))
  }
}

fn failure_outcome(err: &Error) -> Option<LeaseOutcome> {
  match err {
    Error::AuthFailure(_) => Some(LeaseOutcome::AuthFailure),
    Error::RateLimited { retry_after, .. } => Some(LeaseOutcome::RateLimited {
      retry_after: *retry_after,
    }),
    Error::UpstreamTransient(_) => Some(LeaseOutcome::Transient),
    _ => None,
  }
}

fn release_failed(lease: crate::auth::Lease, err: &Error) {
  match failure_outcome(err) {
    Some(outcome) => lease.release(outcome),
    // Not the credential's fault: neutral release
    None => lease.release(LeaseOutcome::Cancelled),
  }
}
