//! Streaming translation
//!
//! Encodes the canonical event stream into the target dialect's SSE
//! vocabulary. Frame order is strictly monotonic: delta frames, tool-call
//! frames, the finish frame, then the terminal sentinel; events arriving
//! after the sentinel are dropped. Tool-call argument fragments are buffered
//! per call so the finalized arguments always parse.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::Dialect;
use crate::ir::{FinishReason, StreamEvent, Usage};

/// One wire frame of a `text/event-stream` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
  /// Optional `event:` name (Anthropic-style typed events)
  pub event: Option<String>,
  /// The `data:` payload
  pub data: String,
}

impl SseFrame {
  fn data_json(value: &Value) -> Self {
    Self {
      event: None,
      data: value.to_string(),
    }
  }

  fn event_json(event: &str, value: &Value) -> Self {
    Self {
      event: Some(event.to_string()),
      data: value.to_string(),
    }
  }

  fn done() -> Self {
    Self {
      event: None,
      data: "[DONE]".to_string(),
    }
  }

  /// Render as wire bytes (`event: ...\ndata: ...\n\n`)
  pub fn to_wire(&self) -> String {
    match &self.event {
      Some(event) => format!("event: {event}\ndata: {}\n\n", self.data),
      None => format!("data: {}\n\n", self.data),
    }
  }
}

#[derive(Default)]
struct ToolState {
  id: String,
  name: String,
  arguments: String,
  /// Anthropic content-block index once opened
  block: Option<usize>,
  announced: bool,
}

/// Which Anthropic content block is currently open
#[derive(PartialEq)]
enum OpenBlock {
  None,
  Text(usize),
  Reasoning(usize),
  Tool(usize),
}

/// Translates canonical stream events into one target dialect.
pub struct StreamEncoder {
  dialect: Dialect,
  id: String,
  model: String,
  created: i64,
  started: bool,
  finished: bool,
  done: bool,
  tools: Vec<ToolState>,
  tool_order: HashMap<usize, usize>,
  open_block: OpenBlock,
  next_block: usize,
}

impl StreamEncoder {
  pub fn new(dialect: Dialect, id: impl Into<String>, model: impl Into<String>) -> Self {
    Self {
      dialect,
      id: id.into(),
      model: model.into(),
      created: chrono::Utc::now().timestamp(),
      started: false,
      finished: false,
      done: false,
      tools: Vec::new(),
      tool_order: HashMap::new(),
      open_block: OpenBlock::None,
      next_block: 0,
    }
  }

  /// Encode one canonical event into zero or more output frames.
  pub fn encode(&mut self, event: &StreamEvent) -> Vec<SseFrame> {
    if self.done {
      return Vec::new();
    }

    let mut frames = Vec::new();
    match event {
      StreamEvent::Start { id, model } => {
        if !id.is_empty() {
          self.id = id.clone();
        }
        if !model.is_empty() {
          self.model = model.clone();
        }
        self.ensure_started(&mut frames);
      }
      StreamEvent::TextDelta { text } if !self.finished => {
        self.ensure_started(&mut frames);
        self.encode_text(text, false, &mut frames);
      }
      StreamEvent::ReasoningDelta { text } if !self.finished => {
        self.ensure_started(&mut frames);
        self.encode_text(text, true, &mut frames);
      }
      StreamEvent::ToolCallDelta {
        index,
        id,
        name,
        arguments,
      } if !self.finished => {
        self.ensure_started(&mut frames);
        self.encode_tool_delta(*index, id.as_deref(), name.as_deref(), arguments, &mut frames);
      }
      StreamEvent::Finish { reason, usage } if !self.finished => {
        self.ensure_started(&mut frames);
        self.finished = true;
        self.encode_finish(reason, *usage, &mut frames);
      }
      StreamEvent::Done => {
        frames.extend(self.close(None));
      }
      _ => {}
    }
    frames
  }

  /// Flush the stream: synthesizes a finish frame and the terminal sentinel
  /// when the upstream ended without them.
  pub fn finish(&mut self) -> Vec<SseFrame> {
    self.close(Some(FinishReason::Stop))
  }

  fn close(&mut self, fallback: Option<FinishReason>) -> Vec<SseFrame> {
    if self.done {
      return Vec::new();
    }
    let mut frames = Vec::new();
    if !self.finished {
      if let Some(reason) = fallback {
        self.ensure_started(&mut frames);
        self.finished = true;
        self.encode_finish(&reason, None, &mut frames);
      }
    }
    self.done = true;
    match self.dialect {
      Dialect::OpenAi => frames.push(SseFrame::done()),
      Dialect::Anthropic => {
        frames.push(SseFrame::event_json(
          "message_stop",
          &json!({ "type": "message_stop" }),
        ));
      }
      Dialect::Gemini => {}
    }
    frames
  }

  fn ensure_started(&mut self, frames: &mut Vec<SseFrame>) {
    if self.started {
      return;
    }
    self.started = true;
    match self.dialect {
      Dialect::OpenAi => {
        frames.push(self.openai_chunk(json!({ "role": "assistant" }), None));
      }
      Dialect::Anthropic => {
        frames.push(SseFrame::event_json(
          "message_start",
          &json!({
            "type": "message_start",
            "message": {
              "id": self.id,
              "type": "message",
              "role": "assistant",
              "model": self.model,
              "content": [],
              "stop_reason": Value::Null,
              "usage": { "input_tokens": 0, "output_tokens": 0 }
            }
          }),
        ));
      }
      Dialect::Gemini => {}
    }
  }

  fn encode_text(&mut self, text: &str, reasoning: bool, frames: &mut Vec<SseFrame>) {
    if text.is_empty() {
      return;
    }
    match self.dialect {
      Dialect::OpenAi => {
        let delta = if reasoning {
          json!({ "reasoning_content": text })
        } else {
          json!({ "content": text })
        };
        frames.push(self.openai_chunk(delta, None));
      }
      Dialect::Anthropic => {
        let wanted = if reasoning { "thinking" } else { "text" };
        let index = self.ensure_block(wanted, frames);
        let delta = if reasoning {
          json!({ "type": "thinking_delta", "thinking": text })
        } else {
          json!({ "type": "text_delta", "text": text })
        };
        frames.push(SseFrame::event_json(
          "content_block_delta",
          &json!({ "type": "content_block_delta", "index": index, "delta": delta }),
        ));
      }
      Dialect::Gemini => {
        let part = if reasoning {
          json!({ "text": text, "thought": true })
        } else {
          json!({ "text": text })
        };
        frames.push(self.gemini_chunk(vec![part], None, None));
      }
    }
  }

  fn encode_tool_delta(
    &mut self,
    index: usize,
    id: Option<&str>,
    name: Option<&str>,
    arguments: &str,
    frames: &mut Vec<SseFrame>,
  ) {
    let ordinal = match self.tool_order.get(&index) {
      Some(ordinal) => *ordinal,
      None => {
        let ordinal = self.tools.len();
        self.tool_order.insert(index, ordinal);
        self.tools.push(ToolState::default());
        ordinal
      }
    };

    {
      let tool = &mut self.tools[ordinal];
      if let Some(id) = id {
        tool.id = id.to_string();
      }
      if let Some(name) = name {
        tool.name = name.to_string();
      }
      tool.arguments.push_str(arguments);
    }

    match self.dialect {
      Dialect::OpenAi => {
        let first = !self.tools[ordinal].announced;
        self.tools[ordinal].announced = true;
        let mut call = serde_json::Map::new();
        call.insert("index".to_string(), json!(ordinal));
        if first {
          let tool = &self.tools[ordinal];
          let id = if tool.id.is_empty() {
            format!("call_{ordinal}")
          } else {
            tool.id.clone()
          };
          call.insert("id".to_string(), json!(id));
          call.insert("type".to_string(), json!("function"));
          call.insert(
            "function".to_string(),
            json!({ "name": tool.name, "arguments": arguments }),
          );
        } else {
          call.insert("function".to_string(), json!({ "arguments": arguments }));
        }
        frames.push(self.openai_chunk(json!({ "tool_calls": [Value::Object(call)] }), None));
      }
      Dialect::Anthropic => {
        // A tool block can only open once the name is known
        if self.tools[ordinal].block.is_none() && !self.tools[ordinal].name.is_empty() {
          self.close_open_block(frames);
          let block = self.next_block;
          self.next_block += 1;
          self.tools[ordinal].block = Some(block);
          self.open_block = OpenBlock::Tool(block);
          let tool = &self.tools[ordinal];
          let id = if tool.id.is_empty() {
            format!("toolu_{ordinal}")
          } else {
            tool.id.clone()
          };
          frames.push(SseFrame::event_json(
            "content_block_start",
            &json!({
              "type": "content_block_start",
              "index": block,
              "content_block": { "type": "tool_use", "id": id, "name": tool.name, "input": {} }
            }),
          ));
        }
        if let Some(block) = self.tools[ordinal].block {
          if !arguments.is_empty() {
            frames.push(SseFrame::event_json(
              "content_block_delta",
              &json!({
                "type": "content_block_delta",
                "index": block,
                "delta": { "type": "input_json_delta", "partial_json": arguments }
              }),
            ));
          }
        }
      }
      // Gemini emits complete functionCall parts in the finish frame
      Dialect::Gemini => {}
    }
  }

  fn encode_finish(
    &mut self,
    reason: &FinishReason,
    usage: Option<Usage>,
    frames: &mut Vec<SseFrame>,
  ) {
    match self.dialect {
      Dialect::OpenAi => {
        let mut chunk = self.openai_chunk_value(json!({}), Some(reason.as_openai()));
        if let (Some(usage), Some(obj)) = (usage, chunk.as_object_mut()) {
          obj.insert(
            "usage".to_string(),
            json!({
              "prompt_tokens": usage.input_tokens,
              "completion_tokens": usage.output_tokens,
              "total_tokens": usage.total_tokens,
            }),
          );
        }
        frames.push(SseFrame::data_json(&chunk));
      }
      Dialect::Anthropic => {
        self.close_open_block(frames);
        let output_tokens = usage.map(|u| u.output_tokens).unwrap_or(0);
        frames.push(SseFrame::event_json(
          "message_delta",
          &json!({
            "type": "message_delta",
            "delta": { "stop_reason": reason.as_anthropic(), "stop_sequence": Value::Null },
            "usage": { "output_tokens": output_tokens }
          }),
        ));
      }
      Dialect::Gemini => {
        let mut parts = Vec::new();
        for tool in &self.tools {
          let args = serde_json::from_str::<Value>(&tool.arguments)
            .unwrap_or_else(|_| json!({ "raw": tool.arguments }));
          parts.push(json!({ "functionCall": { "name": tool.name, "args": args } }));
        }
        frames.push(self.gemini_chunk(parts, Some(reason.as_gemini()), usage));
      }
    }
  }

  fn ensure_block(&mut self, kind: &str, frames: &mut Vec<SseFrame>) -> usize {
    match (&self.open_block, kind) {
      (OpenBlock::Text(index), "text") | (OpenBlock::Reasoning(index), "thinking") => {
        return *index
      }
      _ => {}
    }
    self.close_open_block(frames);
    let index = self.next_block;
    self.next_block += 1;
    let content_block = if kind == "thinking" {
      self.open_block = OpenBlock::Reasoning(index);
      json!({ "type": "thinking", "thinking": "" })
    } else {
      self.open_block = OpenBlock::Text(index);
      json!({ "type": "text", "text": "" })
    };
    frames.push(SseFrame::event_json(
      "content_block_start",
      &json!({
        "type": "content_block_start",
        "index": index,
        "content_block": content_block
      }),
    ));
    index
  }

  fn close_open_block(&mut self, frames: &mut Vec<SseFrame>) {
    let index = match self.open_block {
      OpenBlock::None => return,
      OpenBlock::Text(index) | OpenBlock::Reasoning(index) | OpenBlock::Tool(index) => index,
    };
    self.open_block = OpenBlock::None;
    frames.push(SseFrame::event_json(
      "content_block_stop",
      &json!({ "type": "content_block_stop", "index": index }),
    ));
  }

  fn openai_chunk(&self, delta: Value, finish_reason: Option<&str>) -> SseFrame {
    SseFrame::data_json(&self.openai_chunk_value(delta, finish_reason))
  }

  fn openai_chunk_value(&self, delta: Value, finish_reason: Option<&str>) -> Value {
    json!({
      "id": self.id,
      "object": "chat.completion.chunk",
      "created": self.created,
      "model": self.model,
      "choices": [{
        "index": 0,
        "delta": delta,
        "finish_reason": finish_reason.map(|r| Value::String(r.to_string())).unwrap_or(Value::Null),
      }]
    })
  }

  fn gemini_chunk(
    &self,
    parts: Vec<Value>,
    finish_reason: Option<&str>,
    usage: Option<Usage>,
  ) -> SseFrame {
    let mut candidate = serde_json::Map::new();
    candidate.insert(
      "content".to_string(),
      json!({ "role": "model", "parts": parts }),
    );
    candidate.insert("index".to_string(), json!(0));
    if let Some(reason) = finish_reason {
      candidate.insert("finishReason".to_string(), json!(reason));
    }

    let mut chunk = serde_json::Map::new();
    chunk.insert(
      "candidates".to_string(),
      Value::Array(vec![Value::Object(candidate)]),
    );
    if let Some(usage) = usage {
      chunk.insert(
        "usageMetadata".to_string(),
        json!({
          "promptTokenCount": usage.input_tokens,
          "candidatesTokenCount": usage.output_tokens,
          "totalTokenCount": usage.total_tokens,
        }),
      );
    }
    chunk.insert("modelVersion".to_string(), json!(self.model));
    SseFrame::data_json(&Value::Object(chunk))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn text(t: &str) -> StreamEvent {
    StreamEvent::TextDelta {
      text: t.to_string(),
    }
  }

  #[test]
  fn test_openai_stream_ends_with_done_sentinel() {
    let mut encoder = StreamEncoder::new(Dialect::OpenAi, "chatcmpl-1", "gemini-2.5-flash");
    let mut frames = Vec::new();
    frames.extend(encoder.encode(&text("hello")));
    frames.extend(encoder.encode(&StreamEvent::Finish {
      reason: FinishReason::Stop,
      usage: None,
    }));
    frames.extend(encoder.finish());

    assert_eq!(frames.last().unwrap().data, "[DONE]");
    // role announcement precedes the first content delta
    let first: Value = serde_json::from_str(&frames[0].data).unwrap();
    assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
  }

  #[test]
  fn test_reasoning_precedes_content_in_order() {
    let mut encoder = StreamEncoder::new(Dialect::OpenAi, "id", "claude-sonnet-4-5-thinking");
    let mut frames = Vec::new();
    frames.extend(encoder.encode(&StreamEvent::ReasoningDelta {
      text: "hmm".to_string(),
    }));
    frames.extend(encoder.encode(&text("answer")));

    let reasoning_pos = frames
      .iter()
      .position(|f| f.data.contains("reasoning_content"))
      .unwrap();
    let content_pos = frames
      .iter()
      .position(|f| f.data.contains("\"content\":\"answer\""))
      .unwrap();
    assert!(reasoning_pos < content_pos);
  }

  #[test]
  fn test_anthropic_blocks_open_and_close_in_order() {
    let mut encoder = StreamEncoder::new(Dialect::Anthropic, "msg_1", "claude-sonnet-4-5");
    let mut frames = Vec::new();
    frames.extend(encoder.encode(&text("hi")));
    frames.extend(encoder.encode(&StreamEvent::Finish {
      reason: FinishReason::Stop,
      usage: Some(Usage {
        input_tokens: 1,
        output_tokens: 2,
        total_tokens: 3,
      }),
    }));
    frames.extend(encoder.encode(&StreamEvent::Done));

    let names: Vec<&str> = frames.iter().filter_map(|f| f.event.as_deref()).collect();
    assert_eq!(
      names,
      vec![
        "message_start",
        "content_block_start",
        "content_block_delta",
        "content_block_stop",
        "message_delta",
        "message_stop",
      ]
    );
  }

  #[test]
  fn test_tool_arguments_buffer_to_valid_json() {
    let mut encoder = StreamEncoder::new(Dialect::Gemini, "id", "gemini-2.5-pro");
    encoder.encode(&StreamEvent::ToolCallDelta {
      index: 0,
      id: Some("call_1".to_string()),
      name: Some("list_dir".to_string()),
      arguments: "{\"pa".to_string(),
    });
    encoder.encode(&StreamEvent::ToolCallDelta {
      index: 0,
      id: None,
      name: None,
      arguments: "th\":\".\"}".to_string(),
    });
    let frames = encoder.encode(&StreamEvent::Finish {
      reason: FinishReason::ToolCalls,
      usage: None,
    });

    let chunk: Value = serde_json::from_str(&frames[0].data).unwrap();
    let call = &chunk["candidates"][0]["content"]["parts"][0]["functionCall"];
    assert_eq!(call["name"], "list_dir");
    assert_eq!(call["args"]["path"], ".");
  }

  #[test]
  fn test_events_after_done_are_dropped() {
    let mut encoder = StreamEncoder::new(Dialect::OpenAi, "id", "m");
    encoder.encode(&text("a"));
    encoder.encode(&StreamEvent::Done);
    assert!(encoder.encode(&text("late")).is_empty());
    assert!(encoder.finish().is_empty());
  }

  #[test]
  fn test_openai_tool_delta_announces_once() {
    let mut encoder = StreamEncoder::new(Dialect::OpenAi, "id", "m");
    let first = encoder.encode(&StreamEvent::ToolCallDelta {
      index: 3,
      id: Some("call_a".to_string()),
      name: Some("fetch".to_string()),
      arguments: "{".to_string(),
    });
    let second = encoder.encode(&StreamEvent::ToolCallDelta {
      index: 3,
      id: None,
      name: None,
      arguments: "}".to_string(),
    });

    // frames[0] of `first` is the role announcement
    let call: Value = serde_json::from_str(&first[1].data).unwrap();
    assert_eq!(call["choices"][0]["delta"]["tool_calls"][0]["id"], "call_a");
    assert_eq!(
      call["choices"][0]["delta"]["tool_calls"][0]["index"],
      0,
      "canonical indexes are renumbered locally"
    );

    let call: Value = serde_json::from_str(&second[0].data).unwrap();
    assert!(call["choices"][0]["delta"]["tool_calls"][0].get("id").is_none());
  }
}
