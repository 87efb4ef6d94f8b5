//! Model registry
//!
//! Canonical model families and per-model quirks. A family maps one
//! provider-independent name to provider-specific bindings in priority
//! order; the first member whose provider currently has a usable credential
//! wins. The table is swapped atomically on reload so readers always see a
//! consistent snapshot.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A provider-specific model within a family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyMember {
  /// Provider type (e.g. "kiro", "antigravity", "claude")
  pub provider: &'static str,
  /// Provider-specific model ID
  pub model_id: &'static str,
}

/// Per-model quirks
#[derive(Debug, Clone, Default)]
pub struct ModelInfo {
  /// Model emits reasoning on a separate channel
  pub thinking: bool,
  /// Hard output token limit; 0 means unbounded from the gateway's view
  pub output_token_limit: u32,
  /// Secondary limit some providers report instead
  pub max_completion_tokens: u32,
  pub supports_tools: bool,
  pub supports_streaming: bool,
}

struct Table {
  families: HashMap<&'static str, Vec<FamilyMember>>,
  /// Declaration order of family keys, for stable model listings
  family_order: Vec<&'static str>,
  info: HashMap<&'static str, ModelInfo>,
}

/// Process-wide model registry
pub struct Registry {
  table: RwLock<Arc<Table>>,
}

impl Default for Registry {
  fn default() -> Self {
    Self::new()
  }
}

impl Registry {
  /// Build the registry with the built-in family table
  pub fn new() -> Self {
    Self {
      table: RwLock::new(Arc::new(builtin_table())),
    }
  }

  fn snapshot(&self) -> Arc<Table> {
    self.table.read().expect("registry lock poisoned").clone()
  }

  /// Resolve a canonical model name against the currently available
  /// providers.
  ///
  /// Returns `(provider, model_id, true)` for the first family member whose
  /// provider is available, in declaration order. When `canonical_id` is not
  /// a family key, returns `(None, canonical_id, false)` so the caller may
  /// treat the id as provider-specific.
  pub fn resolve(
    &self,
    canonical_id: &str,
    available_providers: &[String],
  ) -> (Option<&'static str>, String, bool) {
    let table = self.snapshot();
    let Some(family) = table.families.get(canonical_id) else {
      return (None, canonical_id.to_string(), false);
    };

    for member in family {
      if available_providers.iter().any(|p| p == member.provider) {
        return (Some(member.provider), member.model_id.to_string(), true);
      }
    }

    (None, canonical_id.to_string(), false)
  }

  /// Reverse lookup: canonical ID owning a provider-specific model ID.
  pub fn reverse(&self, provider_model_id: &str) -> Option<&'static str> {
    let table = self.snapshot();
    for key in &table.family_order {
      if let Some(members) = table.families.get(key) {
        if members.iter().any(|m| m.model_id == provider_model_id) {
          return Some(key);
        }
      }
    }
    None
  }

  /// True when the id is a canonical family name.
  pub fn is_canonical(&self, model_id: &str) -> bool {
    self.snapshot().families.contains_key(model_id)
  }

  /// Quirks for a model id, canonical or provider-specific.
  pub fn model_info(&self, model_id: &str) -> Option<ModelInfo> {
    self.snapshot().info.get(model_id).cloned()
  }

  /// Providers bound to a model id among the given available set,
  /// in family declaration order.
  pub fn providers_for_model(&self, model_id: &str, available: &[String]) -> Vec<&'static str> {
    let table = self.snapshot();
    let mut providers = Vec::new();
    for members in table.families.values() {
      for member in members {
        if member.model_id == model_id
          && available.iter().any(|p| p == member.provider)
          && !providers.contains(&member.provider)
        {
          providers.push(member.provider);
        }
      }
    }
    providers
  }

  /// Canonical family names routable with the given providers,
  /// in declaration order. Backs `GET /v1/models`.
  pub fn routable_models(&self, available_providers: &[String]) -> Vec<&'static str> {
    let table = self.snapshot();
    table
      .family_order
      .iter()
      .filter(|key| {
        table.families[*key]
          .iter()
          .any(|m| available_providers.iter().any(|p| p == m.provider))
      })
      .copied()
      .collect()
  }

  /// Swap in a new family table; readers holding the old snapshot are
  /// unaffected.
  pub fn reload(&self) {
    *self.table.write().expect("registry lock poisoned") = Arc::new(builtin_table());
  }
}

// Quirk helpers

/// True if the model name indicates a Claude model.
pub fn is_claude_model(model: &str) -> bool {
  model.to_ascii_lowercase().contains("claude")
}

/// True if the model name indicates a Gemini model.
pub fn is_gemini_model(model: &str) -> bool {
  model.to_ascii_lowercase().contains("gemini")
}

/// True when the model name carries the `-thinking` suffix.
pub fn has_thinking_suffix(model: &str) -> bool {
  model.ends_with("-thinking")
}

impl Registry {
  /// True if the model supports a reasoning channel.
  pub fn is_thinking_model(&self, model: &str) -> bool {
    self.model_info(model).map(|i| i.thinking).unwrap_or(false)
  }

  /// Thinking variant of a model: the model itself when already suffixed,
  /// `model-thinking` when that variant is registered, otherwise `None`.
  pub fn thinking_variant(&self, model: &str) -> Option<String> {
    if has_thinking_suffix(model) {
      return Some(model.to_string());
    }
    let candidate = format!("{model}-thinking");
    if self.model_info(&candidate).is_some() {
      return Some(candidate);
    }
    None
  }

  /// Max output tokens for a model; the explicit limit wins over
  /// `max_completion_tokens`; 0 means unbounded.
  pub fn output_token_limit(&self, model: &str) -> u32 {
    match self.model_info(model) {
      Some(info) if info.output_token_limit > 0 => info.output_token_limit,
      Some(info) => info.max_completion_tokens,
      None => 0,
    }
  }
}

macro_rules! members {
  ($(($provider:expr, $model:expr)),+ $(,)?) => {
    vec![$(FamilyMember { provider: $provider, model_id: $model }),+]
  };
}

fn builtin_table() -> Table {
  let mut families: HashMap<&'static str, Vec<FamilyMember>> = HashMap::new();
  let mut family_order = Vec::new();

  let mut add = |key: &'static str, ms: Vec<FamilyMember>| {
    family_order.push(key);
    families.insert(key, ms);
  };

  add(
    "claude-sonnet-4-5",
    members![
      ("kiro", "claude-sonnet-4-5"),
      ("antigravity", "gemini-claude-sonnet-4-5"),
      ("claude", "claude-sonnet-4-5-20250929"),
    ],
  );
  add(
    "claude-sonnet-4-5-thinking",
    members![
      ("antigravity", "gemini-claude-sonnet-4-5-thinking"),
      ("claude", "claude-sonnet-4-5-thinking"),
    ],
  );
  add(
    "claude-opus-4-5",
    members![
      ("kiro", "claude-opus-4-5-20251101"),
      ("claude", "claude-opus-4-5-20251101"),
    ],
  );
  add(
    "claude-opus-4-5-thinking",
    members![
      ("antigravity", "gemini-claude-opus-4-5-thinking"),
      ("claude", "claude-opus-4-5-thinking"),
    ],
  );
  add(
    "claude-sonnet-4",
    members![
      ("kiro", "claude-sonnet-4-20250514"),
      ("claude", "claude-sonnet-4-20250514"),
    ],
  );
  add(
    "claude-3-7-sonnet",
    members![
      ("kiro", "claude-3-7-sonnet-20250219"),
      ("claude", "claude-3-7-sonnet-20250219"),
    ],
  );
  add(
    "gemini-2.5-pro",
    members![
      ("gemini-cli", "gemini-2.5-pro"),
      ("antigravity", "gemini-2.5-pro"),
      ("aistudio", "gemini-2.5-pro"),
      ("gemini", "gemini-2.5-pro"),
    ],
  );
  add(
    "gemini-2.5-flash",
    members![
      ("gemini-cli", "gemini-2.5-flash"),
      ("antigravity", "gemini-2.5-flash"),
      ("aistudio", "gemini-2.5-flash"),
      ("gemini", "gemini-2.5-flash"),
    ],
  );
  add(
    "gemini-2.5-flash-lite",
    members![
      ("gemini-cli", "gemini-2.5-flash-lite"),
      ("antigravity", "gemini-2.5-flash-lite"),
      ("aistudio", "gemini-2.5-flash-lite"),
      ("gemini", "gemini-2.5-flash-lite"),
    ],
  );
  add(
    "gemini-3-pro-preview",
    members![
      ("gemini-cli", "gemini-3-pro-preview"),
      ("antigravity", "gemini-3-pro-preview"),
      ("aistudio", "gemini-3-pro-preview"),
      ("gemini", "gemini-3-pro-preview"),
    ],
  );
  add(
    "gpt-5.1-codex-max",
    members![
      ("github-copilot", "gpt-5.1-codex-max"),
      ("openai", "gpt-5.1-codex-max"),
    ],
  );

  let mut info: HashMap<&'static str, ModelInfo> = HashMap::new();
  let chat = |thinking: bool, limit: u32| ModelInfo {
    thinking,
    output_token_limit: limit,
    max_completion_tokens: 0,
    supports_tools: true,
    supports_streaming: true,
  };

  info.insert("claude-sonnet-4-5", chat(false, 64_000));
  info.insert("claude-sonnet-4-5-thinking", chat(true, 64_000));
  info.insert("claude-opus-4-5", chat(false, 32_000));
  info.insert("claude-opus-4-5-thinking", chat(true, 32_000));
  info.insert("claude-sonnet-4", chat(false, 64_000));
  info.insert("claude-3-7-sonnet", chat(false, 64_000));
  info.insert("gemini-2.5-pro", chat(true, 65_536));
  info.insert("gemini-2.5-flash", chat(false, 65_536));
  info.insert("gemini-2.5-flash-lite", chat(false, 65_536));
  info.insert("gemini-3-pro-preview", chat(true, 65_536));
  info.insert(
    "gpt-5.1-codex-max",
    ModelInfo {
      thinking: true,
      output_token_limit: 0,
      max_completion_tokens: 128_000,
      supports_tools: true,
      supports_streaming: true,
    },
  );

  Table {
    families,
    family_order,
    info,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn available(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_resolve_respects_declaration_order() {
    let registry = Registry::new();

    let (provider, model, found) = registry.resolve(
      "claude-sonnet-4-5",
      &available(&["claude", "antigravity", "kiro"]),
    );
    assert!(found);
    assert_eq!(provider, Some("kiro"));
    assert_eq!(model, "claude-sonnet-4-5");
  }

  #[test]
  fn test_resolve_skips_unavailable_members() {
    let registry = Registry::new();

    let (provider, model, found) =
      registry.resolve("claude-sonnet-4-5", &available(&["antigravity"]));
    assert!(found);
    assert_eq!(provider, Some("antigravity"));
    assert_eq!(model, "gemini-claude-sonnet-4-5");
  }

  #[test]
  fn test_resolve_unknown_id_passes_through() {
    let registry = Registry::new();

    let (provider, model, found) = registry.resolve("my-custom-model", &available(&["claude"]));
    assert!(!found);
    assert!(provider.is_none());
    assert_eq!(model, "my-custom-model");
  }

  #[test]
  fn test_resolve_no_available_member() {
    let registry = Registry::new();

    let (provider, _, found) = registry.resolve("gemini-2.5-flash", &available(&["claude"]));
    assert!(!found);
    assert!(provider.is_none());
  }

  #[test]
  fn test_reverse_lookup() {
    let registry = Registry::new();
    assert_eq!(
      registry.reverse("gemini-claude-sonnet-4-5"),
      Some("claude-sonnet-4-5")
    );
    assert_eq!(registry.reverse("no-such-model"), None);
  }

  #[test]
  fn test_thinking_variant() {
    let registry = Registry::new();
    assert_eq!(
      registry.thinking_variant("claude-sonnet-4-5").as_deref(),
      Some("claude-sonnet-4-5-thinking")
    );
    assert_eq!(
      registry
        .thinking_variant("claude-sonnet-4-5-thinking")
        .as_deref(),
      Some("claude-sonnet-4-5-thinking")
    );
    assert!(registry.thinking_variant("gemini-2.5-flash").is_none());
  }

  #[test]
  fn test_output_token_limit_prefers_explicit() {
    let registry = Registry::new();
    assert_eq!(registry.output_token_limit("claude-opus-4-5"), 32_000);
    assert_eq!(registry.output_token_limit("gpt-5.1-codex-max"), 128_000);
    assert_eq!(registry.output_token_limit("unknown"), 0);
  }

  #[test]
  fn test_quirk_predicates() {
    assert!(is_claude_model("gemini-claude-sonnet-4-5"));
    assert!(is_gemini_model("gemini-2.5-pro"));
    assert!(!is_claude_model("gpt-5.1-codex-max"));
  }

  #[test]
  fn test_routable_models_union() {
    let registry = Registry::new();
    let models = registry.routable_models(&available(&["aistudio"]));
    assert!(models.contains(&"gemini-2.5-flash"));
    assert!(!models.contains(&"claude-sonnet-4-5"));
  }
}
