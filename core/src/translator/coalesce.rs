//! Same-role content coalescing
//!
//! Gemini rejects consecutive contents with the same role, so serialization
//! merges them: the coalescer tracks the last emitted role and either
//! appends parts to the open content or starts a new one. Empty part lists
//! are dropped.

use serde_json::{json, Value};

/// Merges consecutive same-role contents while preserving part order.
#[derive(Default)]
pub struct ContentCoalescer {
  contents: Vec<(String, Vec<Value>)>,
  last_role: String,
}

impl ContentCoalescer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Emit one content; same-role contents merge into the previous one.
  pub fn emit(&mut self, role: &str, parts: Vec<Value>) {
    if parts.is_empty() {
      return;
    }
    if role == self.last_role {
      if let Some((_, last_parts)) = self.contents.last_mut() {
        last_parts.extend(parts);
        return;
      }
    }
    self.contents.push((role.to_string(), parts));
    self.last_role = role.to_string();
  }

  /// Consume the coalescer into a Gemini `contents` array.
  pub fn build(self) -> Vec<Value> {
    self
      .contents
      .into_iter()
      .map(|(role, parts)| json!({ "role": role, "parts": parts }))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_merges_consecutive_same_role() {
    let mut coalescer = ContentCoalescer::new();
    coalescer.emit("user", vec![json!({"text": "a"})]);
    coalescer.emit("user", vec![json!({"text": "b"})]);
    coalescer.emit("model", vec![json!({"text": "c"})]);

    let contents = coalescer.build();
    assert_eq!(contents.len(), 2);
    assert_eq!(contents[0]["parts"].as_array().unwrap().len(), 2);
    assert_eq!(contents[1]["role"], "model");
  }

  #[test]
  fn test_drops_empty_parts() {
    let mut coalescer = ContentCoalescer::new();
    coalescer.emit("user", vec![]);
    coalescer.emit("user", vec![json!({"text": "a"})]);
    assert_eq!(coalescer.build().len(), 1);
  }

  #[test]
  fn test_alternation_is_preserved() {
    let mut coalescer = ContentCoalescer::new();
    coalescer.emit("user", vec![json!({"text": "a"})]);
    coalescer.emit("model", vec![json!({"text": "b"})]);
    coalescer.emit("user", vec![json!({"text": "c"})]);
    assert_eq!(coalescer.build().len(), 3);
  }
}
