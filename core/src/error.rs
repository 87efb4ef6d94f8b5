//! Gateway error taxonomy
//!
//! Every failure surfaced by the routing plane carries a kind that maps to
//! an HTTP status and a retry decision.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the routing and execution plane
#[derive(Error, Debug)]
pub enum Error {
  /// Client payload failed schema validation
  #[error("bad request: {0}")]
  BadRequest(String),

  /// The gateway holds no usable credential for the resolved provider
  #[error("no credential available for provider: {0}")]
  UnauthorizedClient(String),

  /// Upstream rejected the credential (401/403/invalid_grant)
  #[error("upstream rejected credential: {0}")]
  AuthFailure(String),

  /// Model or OAuth state unknown
  #[error("not found: {0}")]
  NotFound(String),

  /// Upstream 429
  #[error("rate limited: {message}")]
  RateLimited {
    message: String,
    retry_after: Option<Duration>,
  },

  /// Upstream 5xx, network failure, or timeout
  #[error("upstream transient failure: {0}")]
  UpstreamTransient(String),

  /// Executor lacks the requested capability
  #[error("not implemented: {0}")]
  NotImplemented(String),

  /// Client disconnected before completion
  #[error("request cancelled")]
  Cancelled,

  /// Gateway bug
  #[error("internal error: {0}")]
  Internal(String),
}

impl Error {
  /// Stable kind string used in client-facing error bodies
  pub fn kind(&self) -> &'static str {
    match self {
      Error::BadRequest(_) => "bad_request",
      Error::UnauthorizedClient(_) => "unauthorized_client",
      Error::AuthFailure(_) => "auth_failure",
      Error::NotFound(_) => "not_found",
      Error::RateLimited { .. } => "rate_limited",
      Error::UpstreamTransient(_) => "upstream_transient",
      Error::NotImplemented(_) => "not_implemented",
      Error::Cancelled => "cancelled",
      Error::Internal(_) => "internal",
    }
  }

  /// HTTP status surfaced to the client
  pub fn http_status(&self) -> u16 {
    match self {
      Error::BadRequest(_) => 400,
      Error::UnauthorizedClient(_) => 401,
      Error::AuthFailure(_) => 502,
      Error::NotFound(_) => 404,
      Error::RateLimited { .. } => 429,
      Error::UpstreamTransient(_) => 502,
      Error::NotImplemented(_) => 501,
      // Cancelled requests never produce a response body; 499 is the
      // conventional status when one is forced out anyway.
      Error::Cancelled => 499,
      Error::Internal(_) => 500,
    }
  }

  /// Whether the gateway may retry this failure on another credential
  pub fn retryable(&self) -> bool {
    matches!(
      self,
      Error::AuthFailure(_) | Error::RateLimited { .. } | Error::UpstreamTransient(_)
    )
  }

  /// Classify an upstream HTTP status with its body excerpt
  pub fn from_status(status: u16, body: &str) -> Self {
    let excerpt: String = body.chars().take(512).collect();
    match status {
      400 | 404 | 422 => Error::BadRequest(format!("upstream HTTP {status}: {excerpt}")),
      401 | 403 => Error::AuthFailure(format!("upstream HTTP {status}: {excerpt}")),
      429 => Error::RateLimited {
        message: format!("upstream HTTP 429: {excerpt}"),
        retry_after: None,
      },
      500..=599 => Error::UpstreamTransient(format!("upstream HTTP {status}: {excerpt}")),
      _ => Error::Internal(format!("unexpected upstream HTTP {status}: {excerpt}")),
    }
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      Error::UpstreamTransient(format!("upstream timeout: {err}"))
    } else if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
      Error::UpstreamTransient(format!("upstream network error: {err}"))
    } else {
      Error::Internal(format!("http client error: {err}"))
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(err: serde_json::Error) -> Self {
    Error::BadRequest(format!("invalid JSON: {err}"))
  }
}

/// Alias for Result<T, Error>
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_strings_match_status_table() {
    assert_eq!(Error::BadRequest(String::new()).http_status(), 400);
    assert_eq!(Error::AuthFailure(String::new()).http_status(), 502);
    assert_eq!(
      Error::RateLimited {
        message: String::new(),
        retry_after: None
      }
      .http_status(),
      429
    );
    assert_eq!(Error::NotImplemented(String::new()).http_status(), 501);
  }

  #[test]
  fn test_retry_classification() {
    assert!(Error::AuthFailure(String::new()).retryable());
    assert!(Error::UpstreamTransient(String::new()).retryable());
    assert!(!Error::BadRequest(String::new()).retryable());
    assert!(!Error::Cancelled.retryable());
  }

  #[test]
  fn test_from_status() {
    assert_eq!(Error::from_status(401, "denied").kind(), "auth_failure");
    assert_eq!(Error::from_status(503, "").kind(), "upstream_transient");
    assert_eq!(Error::from_status(429, "").kind(), "rate_limited");
  }
}
