//! Anthropic Messages dialect

use serde_json::{json, Map, Value};

use super::schema;
use crate::error::{Error, Result};
use crate::ir::{
  FinishReason, Message, Part, Request, Response, Role, Sampling, StreamEvent, ToolCall, ToolDecl,
  Usage,
};

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Parse an Anthropic Messages request body.
pub fn parse_request(body: &Value) -> Result<Request> {
  let model = body
    .get("model")
    .and_then(Value::as_str)
    .ok_or_else(|| Error::BadRequest("model is required".to_string()))?
    .to_string();

  let mut messages = Vec::new();

  match body.get("system") {
    Some(Value::String(text)) if !text.is_empty() => {
      messages.push(Message::text(Role::System, text.clone()));
    }
    Some(Value::Array(blocks)) => {
      let text: String = blocks
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
      if !text.is_empty() {
        messages.push(Message::text(Role::System, text));
      }
    }
    _ => {}
  }

  let raw_messages = body
    .get("messages")
    .and_then(Value::as_array)
    .ok_or_else(|| Error::BadRequest("messages must be an array".to_string()))?;

  for raw in raw_messages {
    messages.push(parse_message(raw)?);
  }

  let tools = body
    .get("tools")
    .and_then(Value::as_array)
    .map(|tools| {
      tools
        .iter()
        .map(|tool| ToolDecl {
          name: tool
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
          description: tool
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
          parameters: tool.get("input_schema").cloned().unwrap_or(Value::Null),
        })
        .collect()
    })
    .unwrap_or_default();

  Ok(Request {
    model,
    messages,
    tools,
    sampling: Sampling {
      temperature: body.get("temperature").and_then(Value::as_f64),
      top_p: body.get("top_p").and_then(Value::as_f64),
      max_output_tokens: body
        .get("max_tokens")
        .and_then(Value::as_u64)
        .map(|n| n as u32),
      stop: body
        .get("stop_sequences")
        .and_then(Value::as_array)
        .map(|items| {
          items
            .iter()
            .filter_map(Value::as_str)
            .map(ToString::to_string)
            .collect()
        })
        .unwrap_or_default(),
    },
    stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    metadata: body
      .get("metadata")
      .and_then(Value::as_object)
      .cloned()
      .unwrap_or_default(),
  })
}

fn parse_message(raw: &Value) -> Result<Message> {
  let role = match raw.get("role").and_then(Value::as_str) {
    Some("user") => Role::User,
    Some("assistant") => Role::Assistant,
    other => {
      return Err(Error::BadRequest(format!(
        "unsupported message role: {:?}",
        other
      )))
    }
  };

  let mut parts = Vec::new();
  match raw.get("content") {
    Some(Value::String(text)) => {
      if !text.is_empty() {
        parts.push(Part::Text { text: text.clone() });
      }
    }
    Some(Value::Array(blocks)) => {
      for block in blocks {
        match block.get("type").and_then(Value::as_str) {
          Some("text") => parts.push(Part::Text {
            text: block
              .get("text")
              .and_then(Value::as_str)
              .unwrap_or_default()
              .to_string(),
          }),
          Some("thinking") => parts.push(Part::Reasoning {
            text: block
              .get("thinking")
              .and_then(Value::as_str)
              .unwrap_or_default()
              .to_string(),
          }),
          Some("image") => {
            let source = block.get("source").cloned().unwrap_or_default();
            parts.push(Part::Image {
              media_type: source
                .get("media_type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
              data: source
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            });
          }
          Some("tool_use") => {
            let input = block.get("input").cloned().unwrap_or(json!({}));
            parts.push(Part::ToolCall(ToolCall {
              id: block
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
              name: block
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
              arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
            }));
          }
          Some("tool_result") => parts.push(Part::ToolResult {
            tool_call_id: block
              .get("tool_use_id")
              .and_then(Value::as_str)
              .unwrap_or_default()
              .to_string(),
            content: tool_result_text(block.get("content")),
          }),
          _ => {}
        }
      }
    }
    _ => {}
  }

  // Tool results arrive on user turns in this dialect; restore the
  // canonical tool role when that is all the turn carries.
  if role == Role::User
    && !parts.is_empty()
    && parts.iter().all(|p| matches!(p, Part::ToolResult { .. }))
  {
    return Ok(Message {
      role: Role::Tool,
      parts,
    });
  }

  Ok(Message { role, parts })
}

fn tool_result_text(content: Option<&Value>) -> String {
  match content {
    Some(Value::String(text)) => text.clone(),
    Some(Value::Array(blocks)) => blocks
      .iter()
      .filter_map(|block| block.get("text").and_then(Value::as_str))
      .collect(),
    _ => String::new(),
  }
}

/// Serialize a canonical request into an Anthropic Messages body.
pub fn serialize_request(request: &Request) -> Value {
  let system: String = request
    .messages
    .iter()
    .filter(|m| m.role == Role::System)
    .map(Message::joined_text)
    .collect();

  let mut messages = Vec::new();
  for message in &request.messages {
    match message.role {
      Role::System => continue,
      Role::Tool => {
        let content: Vec<Value> = message
          .parts
          .iter()
          .filter_map(|part| match part {
            Part::ToolResult {
              tool_call_id,
              content,
            } => Some(json!({
              "type": "tool_result",
              "tool_use_id": tool_call_id,
              "content": content,
            })),
            _ => None,
          })
          .collect();
        if !content.is_empty() {
          messages.push(json!({ "role": "user", "content": content }));
        }
      }
      Role::User | Role::Assistant => {
        let content = serialize_parts(&message.parts);
        if !content.is_empty() {
          messages.push(json!({ "role": message.role.as_str(), "content": content }));
        }
      }
    }
  }

  let mut body = Map::new();
  body.insert("model".to_string(), Value::String(request.model.clone()));
  body.insert("messages".to_string(), Value::Array(messages));
  body.insert(
    "max_tokens".to_string(),
    json!(request.sampling.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
  );
  if !system.is_empty() {
    body.insert("system".to_string(), Value::String(system));
  }
  if let Some(temperature) = request.sampling.temperature {
    body.insert("temperature".to_string(), json!(temperature));
  }
  if let Some(top_p) = request.sampling.top_p {
    body.insert("top_p".to_string(), json!(top_p));
  }
  if !request.sampling.stop.is_empty() {
    body.insert("stop_sequences".to_string(), json!(request.sampling.stop));
  }
  if !request.tools.is_empty() {
    let tools: Vec<Value> = request
      .tools
      .iter()
      .map(|tool| {
        json!({
          "name": tool.name,
          "description": tool.description,
          "input_schema": schema::normalize(&tool.parameters),
        })
      })
      .collect();
    body.insert("tools".to_string(), Value::Array(tools));
  }
  if request.stream {
    body.insert("stream".to_string(), Value::Bool(true));
  }

  Value::Object(body)
}

fn serialize_parts(parts: &[Part]) -> Vec<Value> {
  let mut out = Vec::new();
  for part in parts {
    if part.is_empty() {
      continue;
    }
    match part {
      Part::Text { text } => out.push(json!({ "type": "text", "text": text })),
      Part::Reasoning { text } => out.push(json!({ "type": "thinking", "thinking": text })),
      Part::Image { media_type, data } => out.push(json!({
        "type": "image",
        "source": { "type": "base64", "media_type": media_type, "data": data }
      })),
      Part::ToolCall(call) => {
        let input = serde_json::from_str::<Value>(&call.arguments)
          .unwrap_or_else(|_| json!({ "raw": call.arguments }));
        out.push(json!({
          "type": "tool_use",
          "id": call.id,
          "name": call.name,
          "input": input,
        }));
      }
      Part::ToolResult {
        tool_call_id,
        content,
      } => out.push(json!({
        "type": "tool_result",
        "tool_use_id": tool_call_id,
        "content": content,
      })),
    }
  }
  out
}

/// Enable upstream extended thinking on a serialized request body.
pub fn enable_thinking(body: &mut Value, budget_tokens: u32) {
  if let Some(obj) = body.as_object_mut() {
    obj.insert(
      "thinking".to_string(),
      json!({ "type": "enabled", "budget_tokens": budget_tokens }),
    );
    // Anthropic requires max_tokens to exceed the thinking budget
    let max = obj.get("max_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
    if max <= budget_tokens {
      obj.insert("max_tokens".to_string(), json!(budget_tokens + DEFAULT_MAX_TOKENS));
    }
  }
}

/// Parse an Anthropic unary response into the canonical IR.
pub fn parse_response(body: &Value, fallback_model: &str) -> Result<Response> {
  let blocks = body
    .get("content")
    .and_then(Value::as_array)
    .ok_or_else(|| Error::UpstreamTransient("upstream returned no content".to_string()))?;

  let mut parts = Vec::new();
  for block in blocks {
    match block.get("type").and_then(Value::as_str) {
      Some("text") => parts.push(Part::Text {
        text: block
          .get("text")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string(),
      }),
      Some("thinking") => parts.push(Part::Reasoning {
        text: block
          .get("thinking")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string(),
      }),
      Some("tool_use") => {
        let input = block.get("input").cloned().unwrap_or(json!({}));
        parts.push(Part::ToolCall(ToolCall {
          id: block
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
          name: block
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
          arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
        }));
      }
      _ => {}
    }
  }

  Ok(Response {
    id: body
      .get("id")
      .and_then(Value::as_str)
      .unwrap_or("msg-unknown")
      .to_string(),
    model: body
      .get("model")
      .and_then(Value::as_str)
      .unwrap_or(fallback_model)
      .to_string(),
    message: Message {
      role: Role::Assistant,
      parts,
    },
    finish: finish_from_anthropic(body.get("stop_reason").and_then(Value::as_str)),
    usage: body.get("usage").map(parse_usage).unwrap_or_default(),
  })
}

/// Serialize a canonical response into Anthropic Messages shape.
pub fn serialize_response(response: &Response) -> Value {
  json!({
    "id": response.id,
    "type": "message",
    "role": "assistant",
    "model": response.model,
    "content": serialize_parts(&response.message.parts),
    "stop_reason": response.finish.as_anthropic(),
    "stop_sequence": Value::Null,
    "usage": {
      "input_tokens": response.usage.input_tokens,
      "output_tokens": response.usage.output_tokens,
    }
  })
}

/// Translate one upstream Anthropic SSE payload into canonical events.
pub fn parse_stream_event(value: &Value) -> Vec<StreamEvent> {
  let mut events = Vec::new();

  match value.get("type").and_then(Value::as_str) {
    Some("message_start") => {
      let message = value.get("message").cloned().unwrap_or_default();
      events.push(StreamEvent::Start {
        id: message
          .get("id")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string(),
        model: message
          .get("model")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string(),
      });
    }
    Some("content_block_start") => {
      let index = value.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
      let block = value.get("content_block").cloned().unwrap_or_default();
      if block.get("type").and_then(Value::as_str) == Some("tool_use") {
        events.push(StreamEvent::ToolCallDelta {
          index,
          id: block.get("id").and_then(Value::as_str).map(ToString::to_string),
          name: block
            .get("name")
            .and_then(Value::as_str)
            .map(ToString::to_string),
          arguments: String::new(),
        });
      }
    }
    Some("content_block_delta") => {
      let index = value.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
      let delta = value.get("delta").cloned().unwrap_or_default();
      match delta.get("type").and_then(Value::as_str) {
        Some("text_delta") => {
          if let Some(text) = delta.get("text").and_then(Value::as_str) {
            events.push(StreamEvent::TextDelta {
              text: text.to_string(),
            });
          }
        }
        Some("thinking_delta") => {
          if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
            events.push(StreamEvent::ReasoningDelta {
              text: text.to_string(),
            });
          }
        }
        Some("input_json_delta") => {
          if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
            events.push(StreamEvent::ToolCallDelta {
              index,
              id: None,
              name: None,
              arguments: partial.to_string(),
            });
          }
        }
        _ => {}
      }
    }
    Some("message_delta") => {
      let reason = value
        .get("delta")
        .and_then(|d| d.get("stop_reason"))
        .and_then(Value::as_str);
      events.push(StreamEvent::Finish {
        reason: finish_from_anthropic(reason),
        usage: value.get("usage").map(parse_usage),
      });
    }
    Some("message_stop") => events.push(StreamEvent::Done),
    _ => {}
  }

  events
}

fn finish_from_anthropic(reason: Option<&str>) -> FinishReason {
  match reason {
    Some("end_turn") | Some("stop_sequence") | None => FinishReason::Stop,
    Some("max_tokens") => FinishReason::Length,
    Some("tool_use") => FinishReason::ToolCalls,
    Some("refusal") => FinishReason::ContentFilter,
    Some(other) => FinishReason::Other(other.to_string()),
  }
}

fn parse_usage(value: &Value) -> Usage {
  let input = value
    .get("input_tokens")
    .and_then(Value::as_u64)
    .unwrap_or(0) as u32;
  let output = value
    .get("output_tokens")
    .and_then(Value::as_u64)
    .unwrap_or(0) as u32;
  Usage {
    input_tokens: input,
    output_tokens: output,
    total_tokens: input + output,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ir::Sampling;

  #[test]
  fn test_serialize_defaults_max_tokens() {
    let request = Request {
      model: "claude-sonnet-4-5-20250929".to_string(),
      messages: vec![Message::text(Role::User, "hi")],
      ..Default::default()
    };
    let body = serialize_request(&request);
    assert_eq!(body["max_tokens"], 4096);
  }

  #[test]
  fn test_enable_thinking_raises_max_tokens() {
    let request = Request {
      model: "claude-sonnet-4-5-thinking".to_string(),
      messages: vec![Message::text(Role::User, "hi")],
      sampling: Sampling {
        max_output_tokens: Some(2048),
        ..Default::default()
      },
      ..Default::default()
    };
    let mut body = serialize_request(&request);
    enable_thinking(&mut body, 8192);
    assert_eq!(body["thinking"]["type"], "enabled");
    assert_eq!(body["thinking"]["budget_tokens"], 8192);
    assert!(body["max_tokens"].as_u64().unwrap() > 8192);
  }

  #[test]
  fn test_parse_response_with_thinking() {
    let body = json!({
      "id": "msg_1",
      "model": "claude-sonnet-4-5-thinking",
      "content": [
        { "type": "thinking", "thinking": "let me see" },
        { "type": "text", "text": "answer" }
      ],
      "stop_reason": "end_turn",
      "usage": { "input_tokens": 10, "output_tokens": 20 }
    });
    let response = parse_response(&body, "fallback").unwrap();
    assert_eq!(response.message.parts.len(), 2);
    assert!(matches!(response.message.parts[0], Part::Reasoning { .. }));
    assert_eq!(response.finish, FinishReason::Stop);
    assert_eq!(response.usage.total_tokens, 30);
  }

  #[test]
  fn test_stream_events_tool_use_block() {
    let start = json!({
      "type": "content_block_start",
      "index": 1,
      "content_block": { "type": "tool_use", "id": "toolu_1", "name": "list_dir" }
    });
    let events = parse_stream_event(&start);
    assert!(matches!(
      &events[0],
      StreamEvent::ToolCallDelta { index: 1, id: Some(_), name: Some(name), .. }
        if name == "list_dir"
    ));

    let delta = json!({
      "type": "content_block_delta",
      "index": 1,
      "delta": { "type": "input_json_delta", "partial_json": "{\"path\"" }
    });
    let events = parse_stream_event(&delta);
    assert!(matches!(
      &events[0],
      StreamEvent::ToolCallDelta { index: 1, arguments, .. } if arguments == "{\"path\""
    ));
  }

  #[test]
  fn test_stream_message_stop_is_done() {
    let events = parse_stream_event(&json!({ "type": "message_stop" }));
    assert_eq!(events, vec![StreamEvent::Done]);
  }
}
