// Cross-dialect streaming: upstream SSE payloads through the canonical
// event model into each client dialect's frame vocabulary.

use serde_json::{json, Value};

use llm_mux_core::ir::StreamEvent;
use llm_mux_core::translator::{anthropic, openai, Dialect, StreamEncoder};

/// Upstream Anthropic event sequence for a thinking model: reasoning,
/// answer, tool call, finish.
fn anthropic_upstream() -> Vec<Value> {
  vec![
    json!({ "type": "message_start", "message": { "id": "msg_1", "model": "claude-sonnet-4-5-thinking" } }),
    json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "thinking", "thinking": "" } }),
    json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "thinking_delta", "thinking": "let me think" } }),
    json!({ "type": "content_block_start", "index": 1, "content_block": { "type": "text", "text": "" } }),
    json!({ "type": "content_block_delta", "index": 1, "delta": { "type": "text_delta", "text": "the answer" } }),
    json!({ "type": "content_block_start", "index": 2, "content_block": { "type": "tool_use", "id": "toolu_1", "name": "list_dir" } }),
    json!({ "type": "content_block_delta", "index": 2, "delta": { "type": "input_json_delta", "partial_json": "{\"path\":" } }),
    json!({ "type": "content_block_delta", "index": 2, "delta": { "type": "input_json_delta", "partial_json": "\".\"}" } }),
    json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" }, "usage": { "output_tokens": 12 } }),
    json!({ "type": "message_stop" }),
  ]
}

fn translate(upstream: Vec<Value>, dialect: Dialect) -> Vec<llm_mux_core::translator::SseFrame> {
  let mut encoder = StreamEncoder::new(dialect, "resp-1", "claude-sonnet-4-5-thinking");
  let mut frames = Vec::new();
  for payload in upstream {
    for event in anthropic::parse_stream_event(&payload) {
      frames.extend(encoder.encode(&event));
    }
  }
  frames.extend(encoder.finish());
  frames
}

#[test]
fn anthropic_to_openai_preserves_order_and_terminates() {
  let frames = translate(anthropic_upstream(), Dialect::OpenAi);

  // Sentinel last
  assert_eq!(frames.last().unwrap().data, "[DONE]");

  // Reasoning delta strictly precedes the first content delta
  let reasoning = frames
    .iter()
    .position(|f| f.data.contains("reasoning_content"))
    .expect("reasoning delta present");
  let content = frames
    .iter()
    .position(|f| f.data.contains("the answer"))
    .expect("content delta present");
  assert!(reasoning < content);

  // Finish frame precedes the sentinel and follows all deltas
  let finish = frames
    .iter()
    .position(|f| f.data.contains("\"finish_reason\":\"tool_calls\""))
    .expect("finish frame present");
  assert!(content < finish);
  assert_eq!(finish, frames.len() - 2);
}

#[test]
fn anthropic_to_openai_tool_arguments_concatenate_to_valid_json() {
  let frames = translate(anthropic_upstream(), Dialect::OpenAi);

  let mut arguments = String::new();
  for frame in &frames {
    if frame.data == "[DONE]" {
      continue;
    }
    let value: Value = serde_json::from_str(&frame.data).unwrap();
    if let Some(calls) = value["choices"][0]["delta"]["tool_calls"].as_array() {
      if let Some(args) = calls[0]["function"]["arguments"].as_str() {
        arguments.push_str(args);
      }
    }
  }

  let parsed: Value = serde_json::from_str(&arguments).expect("finalized arguments parse");
  assert_eq!(parsed, json!({ "path": "." }));
}

#[test]
fn anthropic_round_trips_through_its_own_dialect() {
  let frames = translate(anthropic_upstream(), Dialect::Anthropic);

  let names: Vec<&str> = frames.iter().filter_map(|f| f.event.as_deref()).collect();
  assert_eq!(names.first(), Some(&"message_start"));
  assert_eq!(names.last(), Some(&"message_stop"));

  // Thinking, text and tool_use blocks each open exactly once
  let starts = frames
    .iter()
    .filter(|f| f.event.as_deref() == Some("content_block_start"))
    .count();
  assert_eq!(starts, 3);
}

#[test]
fn openai_upstream_to_gemini_emits_function_call_at_finish() {
  let upstream = vec![
    json!({ "id": "c1", "model": "gpt-5.1-codex-max", "choices": [{ "delta": { "role": "assistant" }, "finish_reason": null }] }),
    json!({ "choices": [{ "delta": { "tool_calls": [{ "index": 0, "id": "call_1", "function": { "name": "fetch", "arguments": "{\"u" } }] }, "finish_reason": null }] }),
    json!({ "choices": [{ "delta": { "tool_calls": [{ "index": 0, "function": { "arguments": "rl\":\"x\"}" } }] }, "finish_reason": null }] }),
    json!({ "choices": [{ "delta": {}, "finish_reason": "tool_calls" }] }),
  ];

  let mut encoder = StreamEncoder::new(Dialect::Gemini, "resp-1", "gpt-5.1-codex-max");
  let mut frames = Vec::new();
  for payload in upstream {
    for event in openai::parse_stream_event(&payload) {
      frames.extend(encoder.encode(&event));
    }
  }
  frames.extend(encoder.finish());

  let last_data: Value = serde_json::from_str(
    &frames
      .iter()
      .rev()
      .find(|f| f.data.contains("functionCall"))
      .expect("function call frame")
      .data,
  )
  .unwrap();
  let call = &last_data["candidates"][0]["content"]["parts"][0]["functionCall"];
  assert_eq!(call["name"], "fetch");
  assert_eq!(call["args"]["url"], "x");
}

#[test]
fn upstream_without_finish_still_terminates() {
  let upstream = vec![json!({ "choices": [{ "delta": { "content": "partial" }, "finish_reason": null }] })];

  let mut encoder = StreamEncoder::new(Dialect::OpenAi, "id", "m");
  let mut frames = Vec::new();
  for payload in upstream {
    for event in openai::parse_stream_event(&payload) {
      frames.extend(encoder.encode(&event));
    }
  }
  frames.extend(encoder.finish());

  assert!(frames.iter().any(|f| f.data.contains("finish_reason")));
  assert_eq!(frames.last().unwrap().data, "[DONE]");
}

#[test]
fn done_event_from_upstream_is_single_sentinel() {
  let mut encoder = StreamEncoder::new(Dialect::OpenAi, "id", "m");
  let mut frames = Vec::new();
  frames.extend(encoder.encode(&StreamEvent::TextDelta {
    text: "x".to_string(),
  }));
  frames.extend(encoder.encode(&StreamEvent::Done));
  frames.extend(encoder.finish());

  let sentinels = frames.iter().filter(|f| f.data == "[DONE]").count();
  assert_eq!(sentinels, 1);
}
