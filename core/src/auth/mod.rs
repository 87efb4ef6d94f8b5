//! Credential records
//!
//! An [`Auth`] is one persisted upstream credential: the unit of lease,
//! quarantine and refresh. Records are created by the OAuth orchestrator or
//! manual import, mutated only by the [`manager::AuthManager`], and stored
//! one-per-file by the [`store::AuthStore`].

pub mod manager;
pub mod store;

pub use manager::{AuthManager, Lease, LeaseOutcome};
pub use store::AuthStore;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Credential lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
  /// Usable for leases
  Active,
  /// A token refresh is in flight
  Refreshing,
  /// Temporarily disqualified; `next_retry_at` says when it heals
  Quarantined,
  /// Token expired and could not be refreshed
  Expired,
  /// Administratively switched off
  Disabled,
}

impl Default for AuthStatus {
  fn default() -> Self {
    AuthStatus::Active
  }
}

/// One persisted credential record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth {
  /// Stable id derived from provider + account identifier
  pub id: String,
  /// Provider type string, matching an executor identifier
  pub provider: String,
  /// On-disk file name (`<provider>-<account>.json`)
  pub file_name: String,
  /// Human-readable label (account email, username)
  #[serde(default)]
  pub label: String,
  /// Opaque per-provider token blob: access/refresh tokens, expiry, metadata
  #[serde(default)]
  pub storage: Value,
  /// Extra string attributes (`api_key`, `endpoint`, `proxy_url`, ...)
  #[serde(default)]
  pub attributes: HashMap<String, String>,
  #[serde(default)]
  pub status: AuthStatus,
  #[serde(default)]
  pub last_error: Option<String>,
  #[serde(default)]
  pub last_error_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub next_retry_at: Option<DateTime<Utc>>,
}

impl Auth {
  /// Build a record with the canonical `<provider>-<account>.json` file name
  pub fn new(provider: impl Into<String>, account: &str) -> Self {
    let provider = provider.into();
    let file_name = format!("{provider}-{account}.json");
    Self {
      id: file_name.clone(),
      provider,
      file_name,
      label: account.to_string(),
      storage: Value::Null,
      attributes: HashMap::new(),
      status: AuthStatus::Active,
      last_error: None,
      last_error_at: None,
      next_retry_at: None,
    }
  }

  /// Access token from the storage blob, if present
  pub fn access_token(&self) -> Option<&str> {
    self.storage.get("access_token").and_then(Value::as_str)
  }

  /// Refresh token from the storage blob, if present
  pub fn refresh_token(&self) -> Option<&str> {
    self.storage.get("refresh_token").and_then(Value::as_str)
  }

  /// Token expiry from the storage blob (Unix seconds)
  pub fn expires_at(&self) -> Option<DateTime<Utc>> {
    self
      .storage
      .get("expires_at")
      .and_then(Value::as_i64)
      .and_then(|secs| DateTime::from_timestamp(secs, 0))
  }

  /// Static API key attribute
  pub fn api_key(&self) -> Option<&str> {
    self.attributes.get("api_key").map(String::as_str)
  }

  /// Per-record outbound proxy
  pub fn proxy_url(&self) -> Option<&str> {
    self.attributes.get("proxy_url").map(String::as_str)
  }

  /// True when the access token expires within `skew`
  pub fn expires_within(&self, skew: Duration) -> bool {
    match self.expires_at() {
      Some(at) => at <= Utc::now() + chrono::Duration::seconds(skew.as_secs() as i64),
      None => false,
    }
  }

  /// Record a token payload into the storage blob
  pub fn set_token(&mut self, access: &str, refresh: Option<&str>, expires_in_secs: i64) {
    let expires_at = Utc::now().timestamp() + expires_in_secs;
    let mut blob = serde_json::Map::new();
    blob.insert("access_token".to_string(), Value::String(access.to_string()));
    if let Some(refresh) = refresh {
      blob.insert(
        "refresh_token".to_string(),
        Value::String(refresh.to_string()),
      );
    }
    blob.insert("expires_at".to_string(), Value::from(expires_at));
    self.storage = Value::Object(blob);
  }
}
