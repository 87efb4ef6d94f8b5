//! Dialect translation
//!
//! Converts between the three supported request/response dialects (OpenAI
//! chat-completions, Anthropic Messages, Gemini GenerateContent) through the
//! canonical IR: three parsers, three serializers and three SSE encoders
//! instead of six pairwise pipelines.

pub mod anthropic;
pub mod coalesce;
pub mod gemini;
pub mod openai;
pub mod schema;
pub mod sse;

pub use sse::{SseFrame, StreamEncoder};

use serde_json::Value;

use crate::error::Result;
use crate::ir::{Request, Response};

/// A client-facing wire dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
  OpenAi,
  Anthropic,
  Gemini,
}

/// Parse a request body in the given dialect into the canonical IR.
pub fn parse_request(dialect: Dialect, body: &Value) -> Result<Request> {
  match dialect {
    Dialect::OpenAi => openai::parse_request(body),
    Dialect::Anthropic => anthropic::parse_request(body),
    Dialect::Gemini => gemini::parse_request(body),
  }
}

/// Serialize a canonical request into the given dialect's wire format.
pub fn serialize_request(dialect: Dialect, request: &Request) -> Value {
  match dialect {
    Dialect::OpenAi => openai::serialize_request(request),
    Dialect::Anthropic => anthropic::serialize_request(request),
    Dialect::Gemini => gemini::serialize_request(request),
  }
}

/// Serialize a canonical response into the given dialect's wire format.
pub fn serialize_response(dialect: Dialect, response: &Response) -> Value {
  match dialect {
    Dialect::OpenAi => openai::serialize_response(response),
    Dialect::Anthropic => anthropic::serialize_response(response),
    Dialect::Gemini => gemini::serialize_response(response),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ir::{Message, Part, Role, Sampling, ToolCall, ToolDecl};
  use serde_json::json;

  fn sample_request() -> Request {
    Request {
      model: "claude-sonnet-4-5".to_string(),
      messages: vec![
        Message::text(Role::System, "be terse"),
        Message::text(Role::User, "list files"),
        Message {
          role: Role::Assistant,
          parts: vec![
            Part::Text {
              text: "using the tool".to_string(),
            },
            Part::ToolCall(ToolCall {
              id: "call_1".to_string(),
              name: "list_dir".to_string(),
              arguments: "{\"path\":\".\"}".to_string(),
            }),
          ],
        },
        Message {
          role: Role::Tool,
          parts: vec![Part::ToolResult {
            tool_call_id: "call_1".to_string(),
            content: "README.md".to_string(),
          }],
        },
      ],
      tools: vec![ToolDecl {
        name: "list_dir".to_string(),
        description: "List a directory".to_string(),
        parameters: json!({
          "type": "object",
          "properties": { "path": { "type": "string" } }
        }),
      }],
      sampling: Sampling {
        temperature: Some(0.5),
        top_p: None,
        max_output_tokens: Some(1024),
        stop: vec![],
      },
      stream: false,
      metadata: Default::default(),
    }
  }

  fn normalize(mut request: Request) -> Request {
    request.metadata.clear();
    request
  }

  #[test]
  fn test_openai_round_trip() {
    let original = sample_request();
    let wire = serialize_request(Dialect::OpenAi, &original);
    let parsed = parse_request(Dialect::OpenAi, &wire).unwrap();

    let parsed = normalize(parsed);
    assert_eq!(parsed.model, original.model);
    assert_eq!(parsed.messages, original.messages);
    assert_eq!(parsed.tools, original.tools);
    assert_eq!(parsed.sampling, original.sampling);
  }

  #[test]
  fn test_anthropic_round_trip() {
    let original = sample_request();
    let wire = serialize_request(Dialect::Anthropic, &original);
    let parsed = normalize(parse_request(Dialect::Anthropic, &wire).unwrap());

    assert_eq!(parsed.model, original.model);
    assert_eq!(parsed.messages, original.messages);
    assert_eq!(parsed.sampling.max_output_tokens, Some(1024));
    // Anthropic schemas gain the draft-2020-12 marker; names survive
    assert_eq!(parsed.tools[0].name, "list_dir");
  }

  #[test]
  fn test_gemini_round_trip_modulo_tool_ids() {
    let original = sample_request();
    let wire = serialize_request(Dialect::Gemini, &original);
    let parsed = parse_request(Dialect::Gemini, &wire).unwrap();

    assert_eq!(parsed.messages[0], original.messages[0]);
    assert_eq!(parsed.messages[1], original.messages[1]);
    // Gemini carries no tool-call ids; names and arguments survive
    let call = parsed.messages[2].tool_calls().next().unwrap();
    assert_eq!(call.name, "list_dir");
    assert_eq!(
      serde_json::from_str::<serde_json::Value>(&call.arguments).unwrap(),
      json!({"path": "."})
    );
  }
}
