//! Canonical intermediate representation
//!
//! All three client dialects parse into these types and serialize back out
//! of them, so cross-dialect translation is three parsers and three
//! serializers instead of six pairwise pipelines.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  System,
  User,
  Assistant,
  Tool,
}

impl Role {
  pub fn as_str(&self) -> &'static str {
    match self {
      Role::System => "system",
      Role::User => "user",
      Role::Assistant => "assistant",
      Role::Tool => "tool",
    }
  }
}

/// One ordered content part of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
  /// Plain text
  Text { text: String },

  /// Inline image reference (base64 payload + media type)
  Image { media_type: String, data: String },

  /// Model-issued tool invocation
  ToolCall(ToolCall),

  /// Result returned for an earlier tool call
  ToolResult {
    tool_call_id: String,
    content: String,
  },

  /// Reasoning content on the canonical reasoning channel
  Reasoning { text: String },
}

impl Part {
  /// True when the part carries no content worth serializing
  pub fn is_empty(&self) -> bool {
    match self {
      Part::Text { text } | Part::Reasoning { text } => text.is_empty(),
      Part::Image { data, .. } => data.is_empty(),
      Part::ToolCall(_) => false,
      Part::ToolResult { tool_call_id, .. } => tool_call_id.is_empty(),
    }
  }
}

/// A tool invocation with JSON-encoded arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
  pub id: String,
  pub name: String,
  /// Arguments as a JSON string; must parse once the call is finalized
  pub arguments: String,
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  pub role: Role,
  pub parts: Vec<Part>,
}

impl Message {
  pub fn text(role: Role, text: impl Into<String>) -> Self {
    Self {
      role,
      parts: vec![Part::Text { text: text.into() }],
    }
  }

  /// Concatenated text content, ignoring non-text parts
  pub fn joined_text(&self) -> String {
    self
      .parts
      .iter()
      .filter_map(|part| match part {
        Part::Text { text } => Some(text.as_str()),
        _ => None,
      })
      .collect()
  }

  /// Tool calls carried by this message
  pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
    self.parts.iter().filter_map(|part| match part {
      Part::ToolCall(call) => Some(call),
      _ => None,
    })
  }
}

/// Tool declaration offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDecl {
  pub name: String,
  #[serde(default)]
  pub description: String,
  /// JSON Schema (draft 2020-12) for the arguments
  pub parameters: Value,
}

/// Sampling controls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
  pub temperature: Option<f64>,
  pub top_p: Option<f64>,
  pub max_output_tokens: Option<u32>,
  #[serde(default)]
  pub stop: Vec<String>,
}

/// Canonical chat request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
  pub model: String,
  pub messages: Vec<Message>,
  #[serde(default)]
  pub tools: Vec<ToolDecl>,
  #[serde(default)]
  pub sampling: Sampling,
  #[serde(default)]
  pub stream: bool,
  /// Opaque pass-through; translation warnings are also recorded here
  #[serde(default)]
  pub metadata: Map<String, Value>,
}

impl Default for Message {
  fn default() -> Self {
    Self {
      role: Role::User,
      parts: Vec::new(),
    }
  }
}

impl Request {
  /// Validate the turn structure: the first non-system turn must be `user`.
  pub fn validate(&self) -> Result<()> {
    if self.model.is_empty() {
      return Err(Error::BadRequest("model is required".to_string()));
    }
    if self.messages.is_empty() {
      return Err(Error::BadRequest("messages must not be empty".to_string()));
    }
    match self.messages.iter().find(|m| m.role != Role::System) {
      Some(first) if first.role != Role::User => Err(Error::BadRequest(
        "first non-system message must have role \"user\"".to_string(),
      )),
      None => Err(Error::BadRequest(
        "at least one non-system message is required".to_string(),
      )),
      _ => Ok(()),
    }
  }

  /// Clamp `max_output_tokens` to the model's registered limit.
  ///
  /// Over-limit requests are clamped rather than rejected; the clamp is
  /// recorded as a metadata warning.
  pub fn clamp_output_tokens(&mut self, limit: u32) {
    if limit == 0 {
      return;
    }
    if let Some(requested) = self.sampling.max_output_tokens {
      if requested > limit {
        self.sampling.max_output_tokens = Some(limit);
        self.metadata.insert(
          "warning".to_string(),
          Value::String(format!(
            "max_output_tokens {requested} exceeds model limit {limit}; clamped"
          )),
        );
      }
    }
  }
}

/// Token accounting reported by the upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
  pub input_tokens: u32,
  pub output_tokens: u32,
  pub total_tokens: u32,
}

/// Why generation stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
  Stop,
  Length,
  ToolCalls,
  ContentFilter,
  Other(String),
}

impl FinishReason {
  /// OpenAI finish_reason vocabulary
  pub fn as_openai(&self) -> &str {
    match self {
      FinishReason::Stop => "stop",
      FinishReason::Length => "length",
      FinishReason::ToolCalls => "tool_calls",
      FinishReason::ContentFilter => "content_filter",
      FinishReason::Other(other) => other,
    }
  }

  /// Anthropic stop_reason vocabulary
  pub fn as_anthropic(&self) -> &str {
    match self {
      FinishReason::Stop => "end_turn",
      FinishReason::Length => "max_tokens",
      FinishReason::ToolCalls => "tool_use",
      FinishReason::ContentFilter => "refusal",
      FinishReason::Other(other) => other,
    }
  }

  /// Gemini finishReason vocabulary
  pub fn as_gemini(&self) -> &str {
    match self {
      FinishReason::Stop | FinishReason::ToolCalls => "STOP",
      FinishReason::Length => "MAX_TOKENS",
      FinishReason::ContentFilter => "SAFETY",
      FinishReason::Other(other) => other,
    }
  }
}

/// Canonical unary response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
  pub id: String,
  pub model: String,
  /// Assistant turn, possibly holding reasoning and tool-call parts
  pub message: Message,
  pub finish: FinishReason,
  pub usage: Usage,
}

/// Canonical streaming event
///
/// Streams are finite and non-restartable: `Finish` is followed by `Done`
/// and nothing after it.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
  /// First event of a stream
  Start { id: String, model: String },

  /// Assistant text delta
  TextDelta { text: String },

  /// Reasoning-channel delta
  ReasoningDelta { text: String },

  /// Incremental tool-call fragment; argument chunks concatenate in order
  ToolCallDelta {
    index: usize,
    id: Option<String>,
    name: Option<String>,
    arguments: String,
  },

  /// Generation finished
  Finish {
    reason: FinishReason,
    usage: Option<Usage>,
  },

  /// Terminal sentinel
  Done,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_validate_rejects_assistant_first() {
    let request = Request {
      model: "gemini-2.5-flash".to_string(),
      messages: vec![Message::text(Role::Assistant, "hello")],
      ..Default::default()
    };
    assert!(request.validate().is_err());
  }

  #[test]
  fn test_validate_accepts_system_then_user() {
    let request = Request {
      model: "gemini-2.5-flash".to_string(),
      messages: vec![
        Message::text(Role::System, "be brief"),
        Message::text(Role::User, "ping"),
      ],
      ..Default::default()
    };
    assert!(request.validate().is_ok());
  }

  #[test]
  fn test_clamp_records_warning() {
    let mut request = Request {
      model: "claude-sonnet-4-5".to_string(),
      messages: vec![Message::text(Role::User, "hi")],
      sampling: Sampling {
        max_output_tokens: Some(100_000),
        ..Default::default()
      },
      ..Default::default()
    };
    request.clamp_output_tokens(64_000);
    assert_eq!(request.sampling.max_output_tokens, Some(64_000));
    assert!(request.metadata.contains_key("warning"));
  }

  #[test]
  fn test_clamp_zero_limit_is_unbounded() {
    let mut request = Request {
      sampling: Sampling {
        max_output_tokens: Some(1_000_000),
        ..Default::default()
      },
      ..Default::default()
    };
    request.clamp_output_tokens(0);
    assert_eq!(request.sampling.max_output_tokens, Some(1_000_000));
  }
}
