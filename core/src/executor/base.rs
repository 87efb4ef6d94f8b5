//! Shared executor plumbing
//!
//! HTTP client construction honoring per-record proxies, upstream status
//! mapping, SSE line framing and the generic OAuth refresh-token exchange.

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{EventStream, RequestContext};
use crate::auth::Auth;
use crate::error::{Error, Result};
use crate::ir::StreamEvent;

/// Default upstream timeout for unary calls
pub const UNARY_TIMEOUT: Duration = Duration::from_secs(120);

/// Default upstream timeout for streaming calls
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Build an HTTP client for one upstream call.
///
/// A per-record `proxy_url` attribute wins; only http/https proxies are
/// honored, anything else falls back to the default client.
pub fn http_client(auth: &Auth, timeout: Duration) -> reqwest::Client {
  let mut builder = reqwest::Client::builder().timeout(timeout);

  if let Some(proxy_url) = auth.proxy_url() {
    if proxy_url.starts_with("http://") || proxy_url.starts_with("https://") {
      match reqwest::Proxy::all(proxy_url) {
        Ok(proxy) => builder = builder.proxy(proxy),
        Err(err) => debug!(proxy = proxy_url, error = %err, "ignoring invalid proxy url"),
      }
    }
  }

  builder.build().unwrap_or_else(|_| reqwest::Client::new())
}

/// Send a prepared request and parse the JSON body, honoring cancellation.
pub async fn send_json(builder: reqwest::RequestBuilder, ctx: &RequestContext) -> Result<Value> {
  let response = send(builder, ctx).await?;
  let response = check_status(response).await?;
  tokio::select! {
    _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
    body = response.json::<Value>() => body.map_err(Error::from),
  }
}

/// Send a prepared request and return the response once the status is
/// verified, leaving the body unconsumed for streaming.
pub async fn send_streaming(
  builder: reqwest::RequestBuilder,
  ctx: &RequestContext,
) -> Result<reqwest::Response> {
  let response = send(builder, ctx).await?;
  check_status(response).await
}

async fn send(builder: reqwest::RequestBuilder, ctx: &RequestContext) -> Result<reqwest::Response> {
  tokio::select! {
    _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
    response = builder.send() => response.map_err(Error::from),
  }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let retry_after = response
    .headers()
    .get("retry-after")
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.parse::<u64>().ok())
    .map(Duration::from_secs);

  let body = response.text().await.unwrap_or_default();
  let mut err = Error::from_status(status.as_u16(), &body);
  if let Error::RateLimited {
    retry_after: slot, ..
  } = &mut err
  {
    *slot = retry_after;
  }
  Err(err)
}

/// Incremental SSE frame splitter.
///
/// Buffers incoming text and yields the `data:` payload of each complete
/// frame (frames are separated by a blank line). `event:` lines are framing
/// only; the payload dialect is identified by its JSON shape.
pub struct SseFraming {
  buffer: String,
}

impl SseFraming {
  pub fn new() -> Self {
    Self {
      buffer: String::new(),
    }
  }

  pub fn push(&mut self, text: &str) -> Vec<String> {
    self.buffer.push_str(&text.replace("\r\n", "\n"));
    let mut payloads = Vec::new();
    while let Some(idx) = self.buffer.find("\n\n") {
      let frame = self.buffer[..idx].to_string();
      self.buffer.drain(..idx + 2);
      payloads.extend(data_lines(&frame));
    }
    payloads
  }

  /// Flush whatever remains after the upstream closed.
  pub fn finish(&mut self) -> Vec<String> {
    let remaining = std::mem::take(&mut self.buffer);
    data_lines(&remaining)
  }
}

impl Default for SseFraming {
  fn default() -> Self {
    Self::new()
  }
}

fn data_lines(frame: &str) -> Vec<String> {
  frame
    .lines()
    .filter_map(|line| line.strip_prefix("data:"))
    .map(|payload| payload.trim().to_string())
    .filter(|payload| !payload.is_empty())
    .collect()
}

/// Adapt an upstream SSE response into a canonical event stream.
///
/// `parse` translates one upstream JSON payload into canonical events. The
/// stream owns the response; it terminates on the upstream `[DONE]`
/// sentinel, a `Done` event, end of body, or cancellation, and always ends
/// with `Done`.
pub fn event_stream(
  response: reqwest::Response,
  cancel: CancellationToken,
  mut parse: impl FnMut(&Value) -> Vec<StreamEvent> + Send + 'static,
) -> EventStream {
  Box::pin(async_stream::stream! {
    let mut body = response.bytes_stream();
    let mut framing = SseFraming::new();
    let mut done = false;

    'read: loop {
      let chunk = tokio::select! {
        _ = cancel.cancelled() => {
          yield Err(Error::Cancelled);
          return;
        }
        chunk = body.next() => chunk,
      };

      let (payloads, at_end) = match chunk {
        Some(Ok(bytes)) => (framing.push(&String::from_utf8_lossy(&bytes)), false),
        Some(Err(err)) => {
          yield Err(Error::from(err));
          return;
        }
        None => (framing.finish(), true),
      };

      for payload in payloads {
        if payload == "[DONE]" {
          done = true;
          yield Ok(StreamEvent::Done);
          break 'read;
        }
        let Ok(value) = serde_json::from_str::<Value>(&payload) else {
          continue;
        };
        for event in parse(&value) {
          if matches!(event, StreamEvent::Done) {
            done = true;
            yield Ok(event);
            break 'read;
          }
          yield Ok(event);
        }
      }

      if at_end {
        break;
      }
    }

    if !done {
      yield Ok(StreamEvent::Done);
    }
  })
}

/// Exchange a refresh token at a standard OAuth token endpoint and return
/// the updated record.
pub async fn refresh_oauth_token(auth: &Auth, token_url: &str, client_id: &str) -> Result<Auth> {
  let refresh_token = auth
    .refresh_token()
    .ok_or_else(|| Error::AuthFailure("record has no refresh token".to_string()))?
    .to_string();

  let client = http_client(auth, Duration::from_secs(30));
  let form = [
    ("client_id", client_id),
    ("grant_type", "refresh_token"),
    ("refresh_token", refresh_token.as_str()),
  ];

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
      "token refresh rejected (HTTP {status}): {}",
      body.chars().take(256).collect::<String>()
    )));
  }

  let token: Value = response.json().await?;
  let access = token
    .get("access_token")
    .and_then(Value::as_str)
    .ok_or_else(|| Error::AuthFailure("token response missing access_token".to_string()))?;
  let expires_in = token
    .get("expires_in")
    .and_then(Value::as_i64)
    .unwrap_or(3600);
  let new_refresh = token
    .get("refresh_token")
    .and_then(Value::as_str)
    .unwrap_or(&refresh_token);

  let mut updated = auth.clone();
  updated.set_token(access, Some(new_refresh), expires_in);
  Ok(updated)
}
