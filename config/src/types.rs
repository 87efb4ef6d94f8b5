// Configuration Types
// All configuration type definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding credential records (one JSON file per record)
    pub auth_dir: String,
    /// Listen port for the gateway
    pub port: u16,
    /// Outbound proxy applied to upstream calls unless a credential
    /// carries its own `proxy_url` attribute
    pub proxy_url: Option<String>,
    /// Per-provider configuration overrides
    pub providers: HashMap<String, ProviderConfig>,
    /// Log verbosity
    pub log_level: LogLevel,
}

/// Per-provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Static API key (providers that support key auth)
    pub api_key: Option<String>,
    /// Base URL override for the upstream endpoint
    pub base_url: Option<String>,
    /// Cloud project id (gemini-cli, antigravity)
    pub project_id: Option<String>,
}

/// Log verbosity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string consumed by the tracing env-filter
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_dir: "~/.llm-mux/auths".to_string(),
            port: 8318,
            proxy_url: None,
            providers: HashMap::new(),
            log_level: LogLevel::Info,
        }
    }
}

impl Config {
    /// Resolve `auth_dir` to an absolute path, expanding a leading `~`
    pub fn resolved_auth_dir(&self) -> PathBuf {
        expand_home(&self.auth_dir)
    }

    /// Provider config lookup, empty default when absent
    pub fn provider(&self, provider: &str) -> ProviderConfig {
        self.providers.get(provider).cloned().unwrap_or_default()
    }
}

/// Expand a leading `~` to the user home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8318);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_provider_lookup_missing() {
        let config = Config::default();
        let provider = config.provider("qwen");
        assert!(provider.api_key.is_none());
    }
}
