//! Web-UI OAuth flows
//!
//! Authorization-URL builders and code exchange for the browser-redirect
//! providers. Each provider owns a loopback callback port that the
//! orchestrator's forwarder listens on.

use serde_json::Value;

use super::pkce::PkceCodes;
use crate::auth::Auth;
use crate::error::{Error, Result};
use crate::executor::{antigravity, claude, codex, gemini};

const CLAUDE_AUTHORIZE_URL: &str = "https://claude.ai/oauth/authorize";
const CLAUDE_TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
const CODEX_AUTHORIZE_URL: &str = "https://auth.openai.com/oauth/authorize";
const CODEX_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Loopback port each provider's OAuth app redirects to; 0 when the
/// provider has no registered callback port.
pub fn callback_port(provider: &str) -> u16 {
  match provider {
    "claude" => 54545,
    "codex" => 1455,
    "gemini-cli" => 8085,
    "antigravity" => 51121,
    _ => 0,
  }
}

fn redirect_uri(provider: &str) -> String {
  let port = callback_port(provider);
  match provider {
    "claude" => format!("http://localhost:{port}/callback"),
    "codex" => format!("http://localhost:{port}/auth/callback"),
    "gemini-cli" => format!("http://localhost:{port}/oauth2callback"),
    "antigravity" => format!("http://localhost:{port}/oauth-callback"),
    _ => String::new(),
  }
}

/// Minimal query-component encoding: spaces, separators and non-ASCII.
fn encode(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for byte in value.bytes() {
    match byte {
      b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
        out.push(byte as char)
      }
      _ => out.push_str(&format!("%{byte:02X}")),
    }
  }
  out
}

fn query(pairs: &[(&str, &str)]) -> String {
  pairs
    .iter()
    .map(|(key, value)| format!("{key}={}", encode(value)))
    .collect::<Vec<_>>()
    .join("&")
}

/// Build the provider authorization URL for a WebUI flow.
///
/// PKCE providers (claude, codex) use the supplied code pair; the Google
/// providers rely on state alone.
pub fn build_auth_url(
  provider: &str,
  state: &str,
  pkce: &PkceCodes,
  project_id: Option<&str>,
) -> Result<String> {
  let redirect = redirect_uri(provider);
  match provider {
    "claude" => Ok(format!(
      "{CLAUDE_AUTHORIZE_URL}?{}",
      query(&[
        ("code", "true"),
        ("client_id", claude::CLIENT_ID),
        ("response_type", "code"),
        ("redirect_uri", &redirect),
        ("scope", "org:create_api_key user:profile user:inference"),
        ("state", state),
        ("code_challenge", &pkce.challenge),
        ("code_challenge_method", "S256"),
      ])
    )),
    "codex" => Ok(format!(
      "{CODEX_AUTHORIZE_URL}?{}",
      query(&[
        ("client_id", codex::CLIENT_ID),
        ("response_type", "code"),
        ("redirect_uri", &redirect),
        ("scope", "openid profile email offline_access"),
        ("state", state),
        ("code_challenge", &pkce.challenge),
        ("code_challenge_method", "S256"),
      ])
    )),
    "gemini-cli" => {
      let mut pairs = vec![
        ("client_id", gemini::GEMINI_CLI_CLIENT_ID),
        ("response_type", "code"),
        ("redirect_uri", redirect.as_str()),
        (
          "scope",
          "openid https://www.googleapis.com/auth/userinfo.email https://www.googleapis.com/auth/cloud-platform",
        ),
        ("state", state),
        ("access_type", "offline"),
        ("prompt", "consent"),
      ];
      if let Some(project) = project_id {
        pairs.push(("project", project));
      }
      Ok(format!("{GOOGLE_AUTHORIZE_URL}?{}", query(&pairs)))
    }
    "antigravity" => Ok(format!(
      "{GOOGLE_AUTHORIZE_URL}?{}",
      query(&[
        ("client_id", antigravity::ANTIGRAVITY_CLIENT_ID),
        ("response_type", "code"),
        ("redirect_uri", &redirect),
        (
          "scope",
          "openid https://www.googleapis.com/auth/userinfo.email",
        ),
        ("state", state),
        ("access_type", "offline"),
        ("prompt", "consent"),
      ])
    )),
    other => Err(Error::BadRequest(format!(
      "unsupported OAuth provider: {other}. Use device flow for qwen/copilot, or cookie auth for iflow"
    ))),
  }
}

/// Exchange an authorization code for tokens and build the Auth record.
pub async fn exchange_code(
  client: &reqwest::Client,
  provider: &str,
  code: &str,
  verifier: Option<&str>,
  project_id: Option<&str>,
) -> Result<Auth> {
  let (token_url, client_id) = match provider {
    "claude" => (CLAUDE_TOKEN_URL, claude::CLIENT_ID),
    "codex" => (CODEX_TOKEN_URL, codex::CLIENT_ID),
    "gemini-cli" => (gemini::GOOGLE_TOKEN_URL, gemini::GEMINI_CLI_CLIENT_ID),
    "antigravity" => (gemini::GOOGLE_TOKEN_URL, antigravity::ANTIGRAVITY_CLIENT_ID),
    other => {
      return Err(Error::BadRequest(format!(
        "unsupported OAuth provider: {other}"
      )))
    }
  };

  let redirect = redirect_uri(provider);
  let mut form: Vec<(&str, &str)> = vec![
    ("grant_type", "authorization_code"),
    ("client_id", client_id),
    ("code", code),
    ("redirect_uri", &redirect),
  ];
  if let Some(verifier) = verifier {
    form.push(("code_verifier", verifier));
  }

  let response = client
    .post(token_url)
    .header("Accept", "application/json")
    .form(&form)
    .send()
    .await?;

  let status = response.status();
  if !status.is_success() {
    let body = response.text().await.unwrap_or_default();
    return Err(Error::AuthFailure(format!(
      "code exchange rejected (HTTP {status}): {}",
      body.chars().take(256).collect::<String>()
    )));
  }

  let token: Value = response.json().await?;
  let access = token
    .get("access_token")
    .and_then(Value::as_str)
    .ok_or_else(|| Error::AuthFailure("token response missing access_token".to_string()))?;
  let refresh = token.get("refresh_token").and_then(Value::as_str);
  let expires_in = token
    .get("expires_in")
    .and_then(Value::as_i64)
    .unwrap_or(3600);

  let account = token
    .get("email")
    .or_else(|| token.get("account_id"))
    .and_then(Value::as_str)
    .map(ToString::to_string)
    .unwrap_or_else(|| format!("{provider}-{}", chrono::Utc::now().timestamp_millis()));

  let mut auth = Auth::new(provider, &account);
  auth.set_token(access, refresh, expires_in);
  if let Some(project) = project_id {
    auth
      .attributes
      .insert("project_id".to_string(), project.to_string());
  }
  Ok(auth)
}
