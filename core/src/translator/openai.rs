//! OpenAI chat-completions dialect

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::ir::{
  FinishReason, Message, Part, Request, Response, Role, Sampling, StreamEvent, ToolCall, ToolDecl,
  Usage,
};

/// Parse an OpenAI chat-completions request body.
pub fn parse_request(body: &Value) -> Result<Request> {
  let model = body
    .get("model")
    .and_then(Value::as_str)
    .ok_or_else(|| Error::BadRequest("model is required".to_string()))?
    .to_string();

  let raw_messages = body
    .get("messages")
    .and_then(Value::as_array)
    .ok_or_else(|| Error::BadRequest("messages must be an array".to_string()))?;

  let mut messages = Vec::with_capacity(raw_messages.len());
  for raw in raw_messages {
    messages.push(parse_message(raw)?);
  }

  let tools = body
    .get("tools")
    .and_then(Value::as_array)
    .map(|tools| {
      tools
        .iter()
        .filter_map(|tool| tool.get("function"))
        .map(|function| ToolDecl {
          name: str_field(function, "name"),
          description: str_field(function, "description"),
          parameters: function.get("parameters").cloned().unwrap_or(Value::Null),
        })
        .collect()
    })
    .unwrap_or_default();

  let sampling = Sampling {
    temperature: body.get("temperature").and_then(Value::as_f64),
    top_p: body.get("top_p").and_then(Value::as_f64),
    max_output_tokens: body
      .get("max_tokens")
      .or_else(|| body.get("max_completion_tokens"))
      .and_then(Value::as_u64)
      .map(|n| n as u32),
    stop: body
      .get("stop")
      .map(parse_stop)
      .unwrap_or_default(),
  };

  Ok(Request {
    model,
    messages,
    tools,
    sampling,
    stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    metadata: body
      .get("metadata")
      .and_then(Value::as_object)
      .cloned()
      .unwrap_or_default(),
  })
}

fn parse_stop(value: &Value) -> Vec<String> {
  match value {
    Value::String(s) => vec![s.clone()],
    Value::Array(items) => items
      .iter()
      .filter_map(Value::as_str)
      .map(ToString::to_string)
      .collect(),
    _ => Vec::new(),
  }
}

fn parse_message(raw: &Value) -> Result<Message> {
  let role = match raw.get("role").and_then(Value::as_str) {
    Some("system") | Some("developer") => Role::System,
    Some("user") => Role::User,
    Some("assistant") => Role::Assistant,
    Some("tool") => Role::Tool,
    other => {
      return Err(Error::BadRequest(format!(
        "unsupported message role: {:?}",
        other
      )))
    }
  };

  let mut parts = Vec::new();

  if role == Role::Tool {
    let tool_call_id = raw
      .get("tool_call_id")
      .and_then(Value::as_str)
      .ok_or_else(|| Error::BadRequest("tool message requires tool_call_id".to_string()))?;
    parts.push(Part::ToolResult {
      tool_call_id: tool_call_id.to_string(),
      content: content_text(raw.get("content")),
    });
    return Ok(Message { role, parts });
  }

  match raw.get("content") {
    Some(Value::String(text)) => {
      if !text.is_empty() {
        parts.push(Part::Text { text: text.clone() });
      }
    }
    Some(Value::Array(items)) => {
      for item in items {
        match item.get("type").and_then(Value::as_str) {
          Some("text") => parts.push(Part::Text {
            text: str_field(item, "text"),
          }),
          Some("image_url") => {
            let url = item
              .get("image_url")
              .and_then(|i| i.get("url"))
              .and_then(Value::as_str)
              .unwrap_or_default();
            if let Some((media_type, data)) = split_data_url(url) {
              parts.push(Part::Image { media_type, data });
            }
          }
          _ => {}
        }
      }
    }
    _ => {}
  }

  if let Some(reasoning) = raw.get("reasoning_content").and_then(Value::as_str) {
    if !reasoning.is_empty() {
      parts.insert(
        0,
        Part::Reasoning {
          text: reasoning.to_string(),
        },
      );
    }
  }

  if let Some(calls) = raw.get("tool_calls").and_then(Value::as_array) {
    for call in calls {
      let function = call.get("function").cloned().unwrap_or_default();
      parts.push(Part::ToolCall(ToolCall {
        id: str_field(call, "id"),
        name: str_field(&function, "name"),
        arguments: function
          .get("arguments")
          .and_then(Value::as_str)
          .unwrap_or("{}")
          .to_string(),
      }));
    }
  }

  Ok(Message { role, parts })
}

fn content_text(content: Option<&Value>) -> String {
  match content {
    Some(Value::String(text)) => text.clone(),
    Some(Value::Array(items)) => items
      .iter()
      .filter_map(|item| item.get("text").and_then(Value::as_str))
      .collect(),
    _ => String::new(),
  }
}

fn split_data_url(url: &str) -> Option<(String, String)> {
  let rest = url.strip_prefix("data:")?;
  let (media_type, data) = rest.split_once(";base64,")?;
  Some((media_type.to_string(), data.to_string()))
}

/// Serialize a canonical request into an OpenAI-compatible body.
pub fn serialize_request(request: &Request) -> Value {
  let messages: Vec<Value> = request.messages.iter().map(serialize_message).collect();

  let mut body = Map::new();
  body.insert("model".to_string(), Value::String(request.model.clone()));
  body.insert("messages".to_string(), Value::Array(messages));
  if !request.tools.is_empty() {
    let tools: Vec<Value> = request
      .tools
      .iter()
      .map(|tool| {
        json!({
          "type": "function",
          "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
          }
        })
      })
      .collect();
    body.insert("tools".to_string(), Value::Array(tools));
  }
  if let Some(temperature) = request.sampling.temperature {
    body.insert("temperature".to_string(), json!(temperature));
  }
  if let Some(top_p) = request.sampling.top_p {
    body.insert("top_p".to_string(), json!(top_p));
  }
  if let Some(max) = request.sampling.max_output_tokens {
    body.insert("max_tokens".to_string(), json!(max));
  }
  if !request.sampling.stop.is_empty() {
    body.insert("stop".to_string(), json!(request.sampling.stop));
  }
  if request.stream {
    body.insert("stream".to_string(), Value::Bool(true));
  }
  Value::Object(body)
}

fn serialize_message(message: &Message) -> Value {
  if message.role == Role::Tool {
    let (tool_call_id, content) = message
      .parts
      .iter()
      .find_map(|part| match part {
        Part::ToolResult {
          tool_call_id,
          content,
        } => Some((tool_call_id.clone(), content.clone())),
        _ => None,
      })
      .unwrap_or_default();
    return json!({
      "role": "tool",
      "tool_call_id": tool_call_id,
      "content": content,
    });
  }

  let mut obj = Map::new();
  obj.insert(
    "role".to_string(),
    Value::String(message.role.as_str().to_string()),
  );

  let mut texts = Vec::new();
  let mut images = Vec::new();
  let mut tool_calls = Vec::new();
  let mut reasoning = String::new();

  for part in &message.parts {
    match part {
      Part::Text { text } => texts.push(text.clone()),
      Part::Image { media_type, data } => images.push(json!({
        "type": "image_url",
        "image_url": { "url": format!("data:{media_type};base64,{data}") }
      })),
      Part::ToolCall(call) => tool_calls.push(json!({
        "id": call.id,
        "type": "function",
        "function": { "name": call.name, "arguments": call.arguments }
      })),
      Part::Reasoning { text } => reasoning.push_str(text),
      Part::ToolResult { .. } => {}
    }
  }

  if images.is_empty() {
    obj.insert("content".to_string(), Value::String(texts.concat()));
  } else {
    let mut content: Vec<Value> = texts
      .into_iter()
      .map(|text| json!({ "type": "text", "text": text }))
      .collect();
    content.extend(images);
    obj.insert("content".to_string(), Value::Array(content));
  }

  if !reasoning.is_empty() {
    obj.insert("reasoning_content".to_string(), Value::String(reasoning));
  }
  if !tool_calls.is_empty() {
    obj.insert("tool_calls".to_string(), Value::Array(tool_calls));
  }

  Value::Object(obj)
}

/// Parse an OpenAI-compatible unary response into the canonical IR.
pub fn parse_response(body: &Value, fallback_model: &str) -> Result<Response> {
  let choice = body
    .get("choices")
    .and_then(Value::as_array)
    .and_then(|choices| choices.first())
    .ok_or_else(|| Error::UpstreamTransient("upstream returned no choices".to_string()))?;

  let message = choice.get("message").cloned().unwrap_or_default();
  let parsed = parse_message(&message)?;

  Ok(Response {
    id: body
      .get("id")
      .and_then(Value::as_str)
      .unwrap_or("chatcmpl-unknown")
      .to_string(),
    model: body
      .get("model")
      .and_then(Value::as_str)
      .unwrap_or(fallback_model)
      .to_string(),
    message: parsed,
    finish: finish_from_openai(choice.get("finish_reason").and_then(Value::as_str)),
    usage: body.get("usage").map(parse_usage).unwrap_or_default(),
  })
}

/// Serialize a canonical response into OpenAI chat-completion shape.
pub fn serialize_response(response: &Response) -> Value {
  let mut message = Map::new();
  message.insert(
    "role".to_string(),
    Value::String("assistant".to_string()),
  );
  message.insert(
    "content".to_string(),
    Value::String(response.message.joined_text()),
  );

  let reasoning: String = response
    .message
    .parts
    .iter()
    .filter_map(|part| match part {
      Part::Reasoning { text } => Some(text.as_str()),
      _ => None,
    })
    .collect();
  if !reasoning.is_empty() {
    message.insert("reasoning_content".to_string(), Value::String(reasoning));
  }

  let tool_calls: Vec<Value> = response
    .message
    .tool_calls()
    .map(|call| {
      json!({
        "id": call.id,
        "type": "function",
        "function": { "name": call.name, "arguments": call.arguments }
      })
    })
    .collect();
  if !tool_calls.is_empty() {
    message.insert("tool_calls".to_string(), Value::Array(tool_calls));
  }

  json!({
    "id": response.id,
    "object": "chat.completion",
    "created": chrono::Utc::now().timestamp(),
    "model": response.model,
    "choices": [{
      "index": 0,
      "message": Value::Object(message),
      "finish_reason": response.finish.as_openai(),
    }],
    "usage": {
      "prompt_tokens": response.usage.input_tokens,
      "completion_tokens": response.usage.output_tokens,
      "total_tokens": response.usage.total_tokens,
    }
  })
}

/// Translate one upstream OpenAI-wire SSE payload into canonical events.
pub fn parse_stream_event(value: &Value) -> Vec<StreamEvent> {
  let mut events = Vec::new();

  let Some(choice) = value
    .get("choices")
    .and_then(Value::as_array)
    .and_then(|choices| choices.first())
  else {
    return events;
  };

  let delta = choice.get("delta").cloned().unwrap_or_default();

  if delta.get("role").and_then(Value::as_str).is_some() {
    events.push(StreamEvent::Start {
      id: str_field(value, "id"),
      model: str_field(value, "model"),
    });
  }

  if let Some(text) = delta.get("reasoning_content").and_then(Value::as_str) {
    if !text.is_empty() {
      events.push(StreamEvent::ReasoningDelta {
        text: text.to_string(),
      });
    }
  }

  if let Some(text) = delta.get("content").and_then(Value::as_str) {
    if !text.is_empty() {
      events.push(StreamEvent::TextDelta {
        text: text.to_string(),
      });
    }
  }

  if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
    for (position, call) in calls.iter().enumerate() {
      let function = call.get("function").cloned().unwrap_or_default();
      events.push(StreamEvent::ToolCallDelta {
        index: call
          .get("index")
          .and_then(Value::as_u64)
          .map(|i| i as usize)
          .unwrap_or(position),
        id: call.get("id").and_then(Value::as_str).map(ToString::to_string),
        name: function
          .get("name")
          .and_then(Value::as_str)
          .map(ToString::to_string),
        arguments: function
          .get("arguments")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string(),
      });
    }
  }

  if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
    events.push(StreamEvent::Finish {
      reason: finish_from_openai(Some(reason)),
      usage: value.get("usage").map(parse_usage),
    });
  }

  events
}

fn finish_from_openai(reason: Option<&str>) -> FinishReason {
  match reason {
    Some("stop") | None => FinishReason::Stop,
    Some("length") => FinishReason::Length,
    Some("tool_calls") => FinishReason::ToolCalls,
    Some("content_filter") => FinishReason::ContentFilter,
    Some(other) => FinishReason::Other(other.to_string()),
  }
}

pub(crate) fn parse_usage(value: &Value) -> Usage {
  let input = value
    .get("prompt_tokens")
    .or_else(|| value.get("input_tokens"))
    .and_then(Value::as_u64)
    .unwrap_or(0) as u32;
  let output = value
    .get("completion_tokens")
    .or_else(|| value.get("output_tokens"))
    .and_then(Value::as_u64)
    .unwrap_or(0) as u32;
  let total = value
    .get("total_tokens")
    .and_then(Value::as_u64)
    .unwrap_or((input + output) as u64) as u32;
  Usage {
    input_tokens: input,
    output_tokens: output,
    total_tokens: total,
  }
}

fn str_field(value: &Value, field: &str) -> String {
  value
    .get(field)
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_request_minimal() {
    let body = json!({
      "model": "gemini-2.5-flash",
      "messages": [{ "role": "user", "content": "ping" }]
    });
    let request = parse_request(&body).unwrap();
    assert_eq!(request.model, "gemini-2.5-flash");
    assert_eq!(request.messages.len(), 1);
    assert!(!request.stream);
  }

  #[test]
  fn test_parse_request_rejects_missing_model() {
    let body = json!({ "messages": [] });
    assert!(matches!(parse_request(&body), Err(Error::BadRequest(_))));
  }

  #[test]
  fn test_parse_tool_message() {
    let body = json!({
      "model": "m",
      "messages": [
        { "role": "user", "content": "go" },
        { "role": "tool", "tool_call_id": "call_9", "content": "done" }
      ]
    });
    let request = parse_request(&body).unwrap();
    assert_eq!(
      request.messages[1].parts[0],
      Part::ToolResult {
        tool_call_id: "call_9".to_string(),
        content: "done".to_string()
      }
    );
  }

  #[test]
  fn test_stream_event_tool_call_delta() {
    let value = json!({
      "choices": [{
        "delta": {
          "tool_calls": [{
            "index": 0,
            "id": "call_1",
            "function": { "name": "list_dir", "arguments": "{\"pa" }
          }]
        },
        "finish_reason": null
      }]
    });
    let events = parse_stream_event(&value);
    assert_eq!(events.len(), 1);
    assert!(matches!(
      &events[0],
      StreamEvent::ToolCallDelta { index: 0, arguments, .. } if arguments == "{\"pa"
    ));
  }

  #[test]
  fn test_stream_event_finish() {
    let value = json!({
      "choices": [{ "delta": {}, "finish_reason": "stop" }],
      "usage": { "prompt_tokens": 3, "completion_tokens": 5 }
    });
    let events = parse_stream_event(&value);
    assert!(matches!(
      &events[0],
      StreamEvent::Finish { reason: FinishReason::Stop, usage: Some(u) } if u.total_tokens == 8
    ));
  }
}
