//! Gemini GenerateContent dialect

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use super::coalesce::ContentCoalescer;
use crate::error::{Error, Result};
use crate::ir::{
  FinishReason, Message, Part, Request, Response, Role, Sampling, StreamEvent, ToolCall, ToolDecl,
  Usage,
};

/// Parse a Gemini GenerateContent request body.
///
/// The dialect carries no tool-call ids; synthesized `name-ordinal` ids link
/// `functionResponse` parts back to the latest call of the same name.
pub fn parse_request(body: &Value) -> Result<Request> {
  let model = body
    .get("model")
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string();

  let mut messages = Vec::new();

  if let Some(instruction) = body.get("systemInstruction").or_else(|| body.get("system_instruction")) {
    let text = parts_text(instruction.get("parts"));
    if !text.is_empty() {
      messages.push(Message::text(Role::System, text));
    }
  }

  let contents = body
    .get("contents")
    .and_then(Value::as_array)
    .ok_or_else(|| Error::BadRequest("contents must be an array".to_string()))?;

  let mut ordinal = 0usize;
  let mut last_id_for: HashMap<String, String> = HashMap::new();

  for content in contents {
    let role = match content.get("role").and_then(Value::as_str) {
      Some("model") => Role::Assistant,
      _ => Role::User,
    };

    let mut parts = Vec::new();
    let mut tool_results = Vec::new();

    for part in content
      .get("parts")
      .and_then(Value::as_array)
      .unwrap_or(&Vec::new())
    {
      if let Some(text) = part.get("text").and_then(Value::as_str) {
        if part.get("thought").and_then(Value::as_bool) == Some(true) {
          parts.push(Part::Reasoning {
            text: text.to_string(),
          });
        } else if !text.is_empty() {
          parts.push(Part::Text {
            text: text.to_string(),
          });
        }
      } else if let Some(data) = part.get("inlineData").or_else(|| part.get("inline_data")) {
        parts.push(Part::Image {
          media_type: data
            .get("mimeType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
          data: data
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        });
      } else if let Some(call) = part.get("functionCall") {
        let name = call
          .get("name")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string();
        ordinal += 1;
        let id = format!("{name}-{ordinal}");
        last_id_for.insert(name.clone(), id.clone());
        let args = call.get("args").cloned().unwrap_or(json!({}));
        parts.push(Part::ToolCall(ToolCall {
          id,
          name,
          arguments: serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string()),
        }));
      } else if let Some(response) = part.get("functionResponse") {
        let name = response
          .get("name")
          .and_then(Value::as_str)
          .unwrap_or_default();
        let tool_call_id = last_id_for
          .get(name)
          .cloned()
          .unwrap_or_else(|| name.to_string());
        let content = match response.get("response") {
          Some(Value::Object(obj)) if obj.contains_key("result") => match &obj["result"] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
          },
          Some(other) => other.to_string(),
          None => String::new(),
        };
        tool_results.push(Part::ToolResult {
          tool_call_id,
          content,
        });
      }
    }

    if !parts.is_empty() {
      messages.push(Message { role, parts });
    }
    if !tool_results.is_empty() {
      messages.push(Message {
        role: Role::Tool,
        parts: tool_results,
      });
    }
  }

  let tools = body
    .get("tools")
    .and_then(Value::as_array)
    .map(|tools| {
      tools
        .iter()
        .filter_map(|tool| tool.get("functionDeclarations").and_then(Value::as_array))
        .flatten()
        .map(|decl| ToolDecl {
          name: decl
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
          description: decl
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
          parameters: decl.get("parameters").cloned().unwrap_or(Value::Null),
        })
        .collect()
    })
    .unwrap_or_default();

  let config = body
    .get("generationConfig")
    .or_else(|| body.get("generation_config"))
    .cloned()
    .unwrap_or_default();

  Ok(Request {
    model,
    messages,
    tools,
    sampling: Sampling {
      temperature: config.get("temperature").and_then(Value::as_f64),
      top_p: config.get("topP").and_then(Value::as_f64),
      max_output_tokens: config
        .get("maxOutputTokens")
        .and_then(Value::as_u64)
        .map(|n| n as u32),
      stop: config
        .get("stopSequences")
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
    stream: false,
    metadata: Map::new(),
  })
}

fn parts_text(parts: Option<&Value>) -> String {
  parts
    .and_then(Value::as_array)
    .map(|parts| {
      parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
    })
    .unwrap_or_default()
}

/// Serialize a canonical request into a Gemini GenerateContent body.
///
/// Consecutive same-role contents are coalesced; `functionResponse` parts
/// need the original tool name, recovered from the request's earlier calls.
pub fn serialize_request(request: &Request) -> Value {
  let mut name_for_id: HashMap<&str, &str> = HashMap::new();
  for message in &request.messages {
    for call in message.tool_calls() {
      name_for_id.insert(&call.id, &call.name);
    }
  }

  let system: String = request
    .messages
    .iter()
    .filter(|m| m.role == Role::System)
    .map(Message::joined_text)
    .collect();

  let mut coalescer = ContentCoalescer::new();
  for message in &request.messages {
    if message.role == Role::System {
      continue;
    }
    let role = match message.role {
      Role::Assistant => "model",
      _ => "user",
    };
    let parts = serialize_parts(&message.parts, &name_for_id);
    coalescer.emit(role, parts);
  }

  let mut body = Map::new();
  body.insert("contents".to_string(), Value::Array(coalescer.build()));

  if !system.is_empty() {
    body.insert(
      "systemInstruction".to_string(),
      json!({ "parts": [{ "text": system }] }),
    );
  }

  if !request.tools.is_empty() {
    let declarations: Vec<Value> = request
      .tools
      .iter()
      .map(|tool| {
        json!({
          "name": tool.name,
          "description": tool.description,
          "parameters": tool.parameters,
        })
      })
      .collect();
    body.insert(
      "tools".to_string(),
      json!([{ "functionDeclarations": declarations }]),
    );
  }

  let mut config = Map::new();
  if let Some(temperature) = request.sampling.temperature {
    config.insert("temperature".to_string(), json!(temperature));
  }
  if let Some(top_p) = request.sampling.top_p {
    config.insert("topP".to_string(), json!(top_p));
  }
  if let Some(max) = request.sampling.max_output_tokens {
    config.insert("maxOutputTokens".to_string(), json!(max));
  }
  if !request.sampling.stop.is_empty() {
    config.insert("stopSequences".to_string(), json!(request.sampling.stop));
  }
  if !config.is_empty() {
    body.insert("generationConfig".to_string(), Value::Object(config));
  }

  Value::Object(body)
}

fn serialize_parts(parts: &[Part], name_for_id: &HashMap<&str, &str>) -> Vec<Value> {
  let mut out = Vec::new();
  for part in parts {
    if part.is_empty() {
      continue;
    }
    match part {
      Part::Text { text } => out.push(json!({ "text": text })),
      Part::Reasoning { text } => out.push(json!({ "text": text, "thought": true })),
      Part::Image { media_type, data } => out.push(json!({
        "inlineData": { "mimeType": media_type, "data": data }
      })),
      Part::ToolCall(call) => {
        let args = serde_json::from_str::<Value>(&call.arguments)
          .unwrap_or_else(|_| json!({ "raw": call.arguments }));
        out.push(json!({
          "functionCall": { "name": call.name, "args": args }
        }));
      }
      Part::ToolResult {
        tool_call_id,
        content,
      } => {
        let name = name_for_id
          .get(tool_call_id.as_str())
          .copied()
          .unwrap_or(tool_call_id.as_str());
        out.push(json!({
          "functionResponse": {
            "name": name,
            "response": { "result": content }
          }
        }));
      }
    }
  }
  out
}

/// Parse a Gemini unary response into the canonical IR.
pub fn parse_response(body: &Value, fallback_model: &str) -> Result<Response> {
  let candidate = body
    .get("candidates")
    .and_then(Value::as_array)
    .and_then(|candidates| candidates.first())
    .ok_or_else(|| Error::UpstreamTransient("upstream returned no candidates".to_string()))?;

  let mut parts = Vec::new();
  let mut ordinal = 0usize;
  for part in candidate
    .get("content")
    .and_then(|c| c.get("parts"))
    .and_then(Value::as_array)
    .unwrap_or(&Vec::new())
  {
    if let Some(text) = part.get("text").and_then(Value::as_str) {
      if part.get("thought").and_then(Value::as_bool) == Some(true) {
        parts.push(Part::Reasoning {
          text: text.to_string(),
        });
      } else {
        parts.push(Part::Text {
          text: text.to_string(),
        });
      }
    } else if let Some(call) = part.get("functionCall") {
      let name = call
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
      ordinal += 1;
      let args = call.get("args").cloned().unwrap_or(json!({}));
      parts.push(Part::ToolCall(ToolCall {
        id: format!("{name}-{ordinal}"),
        name,
        arguments: serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string()),
      }));
    }
  }

  let has_tool_calls = parts.iter().any(|p| matches!(p, Part::ToolCall(_)));
  let finish = match candidate.get("finishReason").and_then(Value::as_str) {
    _ if has_tool_calls => FinishReason::ToolCalls,
    Some("STOP") | None => FinishReason::Stop,
    Some("MAX_TOKENS") => FinishReason::Length,
    Some("SAFETY") | Some("RECITATION") => FinishReason::ContentFilter,
    Some(other) => FinishReason::Other(other.to_string()),
  };

  Ok(Response {
    id: uuid::Uuid::new_v4().to_string(),
    model: body
      .get("modelVersion")
      .and_then(Value::as_str)
      .unwrap_or(fallback_model)
      .to_string(),
    message: Message {
      role: Role::Assistant,
      parts,
    },
    finish,
    usage: body.get("usageMetadata").map(parse_usage).unwrap_or_default(),
  })
}

/// Serialize a canonical response into Gemini GenerateContent shape.
pub fn serialize_response(response: &Response) -> Value {
  let name_for_id = HashMap::new();
  json!({
    "candidates": [{
      "content": {
        "role": "model",
        "parts": serialize_parts(&response.message.parts, &name_for_id),
      },
      "finishReason": response.finish.as_gemini(),
      "index": 0,
    }],
    "usageMetadata": {
      "promptTokenCount": response.usage.input_tokens,
      "candidatesTokenCount": response.usage.output_tokens,
      "totalTokenCount": response.usage.total_tokens,
    },
    "modelVersion": response.model,
  })
}

/// Per-stream translator for upstream Gemini SSE payloads.
///
/// Stateful so that complete `functionCall` parts across chunks get
/// distinct canonical indexes.
pub fn stream_parser() -> impl FnMut(&Value) -> Vec<StreamEvent> + Send + 'static {
  let mut started = false;
  let mut tool_ordinal = 0usize;

  move |value: &Value| {
    let mut events = Vec::new();

    if !started {
      started = true;
      events.push(StreamEvent::Start {
        id: uuid::Uuid::new_v4().to_string(),
        model: value
          .get("modelVersion")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string(),
      });
    }

    let Some(candidate) = value
      .get("candidates")
      .and_then(Value::as_array)
      .and_then(|candidates| candidates.first())
    else {
      return events;
    };

    for part in candidate
      .get("content")
      .and_then(|c| c.get("parts"))
      .and_then(Value::as_array)
      .unwrap_or(&Vec::new())
    {
      if let Some(text) = part.get("text").and_then(Value::as_str) {
        if part.get("thought").and_then(Value::as_bool) == Some(true) {
          events.push(StreamEvent::ReasoningDelta {
            text: text.to_string(),
          });
        } else if !text.is_empty() {
          events.push(StreamEvent::TextDelta {
            text: text.to_string(),
          });
        }
      } else if let Some(call) = part.get("functionCall") {
        let name = call
          .get("name")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string();
        let args = call.get("args").cloned().unwrap_or(json!({}));
        events.push(StreamEvent::ToolCallDelta {
          index: tool_ordinal,
          id: Some(format!("{name}-{}", tool_ordinal + 1)),
          name: Some(name),
          arguments: serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string()),
        });
        tool_ordinal += 1;
      }
    }

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
      let finish = match reason {
        "STOP" if tool_ordinal > 0 => FinishReason::ToolCalls,
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
      };
      events.push(StreamEvent::Finish {
        reason: finish,
        usage: value.get("usageMetadata").map(parse_usage),
      });
    }

    events
  }
}

fn parse_usage(value: &Value) -> Usage {
  let input = value
    .get("promptTokenCount")
    .and_then(Value::as_u64)
    .unwrap_or(0) as u32;
  let output = value
    .get("candidatesTokenCount")
    .and_then(Value::as_u64)
    .unwrap_or(0) as u32;
  let total = value
    .get("totalTokenCount")
    .and_then(Value::as_u64)
    .unwrap_or((input + output) as u64) as u32;
  Usage {
    input_tokens: input,
    output_tokens: output,
    total_tokens: total,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_coalesces_same_role_contents() {
    let request = Request {
      model: "gemini-2.5-flash".to_string(),
      messages: vec![
        Message::text(Role::User, "first"),
        Message::text(Role::User, "second"),
        Message::text(Role::Assistant, "reply"),
      ],
      ..Default::default()
    };
    let body = serialize_request(&request);
    let contents = body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 2);
    assert_eq!(contents[0]["parts"].as_array().unwrap().len(), 2);
  }

  #[test]
  fn test_tool_result_recovers_name() {
    let request = Request {
      model: "gemini-2.5-flash".to_string(),
      messages: vec![
        Message::text(Role::User, "go"),
        Message {
          role: Role::Assistant,
          parts: vec![Part::ToolCall(ToolCall {
            id: "call_7".to_string(),
            name: "fetch".to_string(),
            arguments: "{}".to_string(),
          })],
        },
        Message {
          role: Role::Tool,
          parts: vec![Part::ToolResult {
            tool_call_id: "call_7".to_string(),
            content: "ok".to_string(),
          }],
        },
      ],
      ..Default::default()
    };
    let body = serialize_request(&request);
    let contents = body["contents"].as_array().unwrap();
    let response_part = &contents[2]["parts"][0]["functionResponse"];
    assert_eq!(response_part["name"], "fetch");
    assert_eq!(response_part["response"]["result"], "ok");
  }

  #[test]
  fn test_parse_response_thought_parts() {
    let body = json!({
      "candidates": [{
        "content": {
          "role": "model",
          "parts": [
            { "text": "considering", "thought": true },
            { "text": "answer" }
          ]
        },
        "finishReason": "STOP"
      }],
      "usageMetadata": { "promptTokenCount": 5, "candidatesTokenCount": 7 }
    });
    let response = parse_response(&body, "gemini-2.5-pro").unwrap();
    assert!(matches!(response.message.parts[0], Part::Reasoning { .. }));
    assert_eq!(response.usage.total_tokens, 12);
  }

  #[test]
  fn test_stream_parser_assigns_distinct_tool_indexes() {
    let mut parse = stream_parser();
    let chunk = json!({
      "candidates": [{
        "content": { "parts": [
          { "functionCall": { "name": "a", "args": {} } },
          { "functionCall": { "name": "b", "args": {} } }
        ]}
      }]
    });
    let events = parse(&chunk);
    let indexes: Vec<usize> = events
      .iter()
      .filter_map(|e| match e {
        StreamEvent::ToolCallDelta { index, .. } => Some(*index),
        _ => None,
      })
      .collect();
    assert_eq!(indexes, vec![0, 1]);
  }
}
