//! Tool-schema normalization
//!
//! The Anthropic Messages API requires JSON Schema draft 2020-12 for tool
//! input schemas. Empty or missing schemas become the canonical empty-object
//! schema; `additionalProperties` defaults to false.

use serde_json::{json, Map, Value};

/// Draft the Anthropic API expects for `input_schema`
pub const JSON_SCHEMA_DRAFT_2020_12: &str = "https://json-schema.org/draft/2020-12/schema";

/// Canonical schema for tools that accept no arguments
pub fn empty_object_schema() -> Value {
  json!({
    "type": "object",
    "properties": {},
    "additionalProperties": false,
    "$schema": JSON_SCHEMA_DRAFT_2020_12,
  })
}

/// Normalize an arbitrary tool parameter schema to draft 2020-12.
pub fn normalize(schema: &Value) -> Value {
  let obj = match schema {
    Value::Object(obj) if !obj.is_empty() => obj,
    _ => return empty_object_schema(),
  };

  let mut out: Map<String, Value> = obj.clone();
  out
    .entry("type".to_string())
    .or_insert_with(|| Value::String("object".to_string()));
  out
    .entry("additionalProperties".to_string())
    .or_insert(Value::Bool(false));
  out.insert(
    "$schema".to_string(),
    Value::String(JSON_SCHEMA_DRAFT_2020_12.to_string()),
  );
  Value::Object(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_schema_becomes_canonical() {
    assert_eq!(normalize(&json!({})), empty_object_schema());
    assert_eq!(normalize(&Value::Null), empty_object_schema());
  }

  #[test]
  fn test_existing_fields_preserved() {
    let schema = json!({
      "type": "object",
      "properties": { "path": { "type": "string" } },
      "required": ["path"]
    });
    let normalized = normalize(&schema);
    assert_eq!(normalized["properties"]["path"]["type"], "string");
    assert_eq!(normalized["additionalProperties"], false);
    assert_eq!(normalized["$schema"], JSON_SCHEMA_DRAFT_2020_12);
  }

  #[test]
  fn test_explicit_additional_properties_wins() {
    let schema = json!({ "type": "object", "additionalProperties": true });
    assert_eq!(normalize(&schema)["additionalProperties"], true);
  }
}
