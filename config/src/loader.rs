// Configuration Loader

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::Config;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// File is not valid YAML for the expected schema
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Default config location: `~/.config/llm-mux/config.yaml`
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("llm-mux")
        .join("config.yaml")
}

/// Load the configuration from the default location.
///
/// A missing file yields built-in defaults; a malformed file is an error.
pub fn load() -> Result<Config, ConfigError> {
    load_from(&default_path())
}

/// Load the configuration from an explicit path.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config.port, 8318);
    }

    #[test]
    fn test_load_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "port: 9000\nauth_dir: /tmp/auths\nlog_level: debug\nproviders:\n  aistudio:\n    api_key: test-key\n",
        )
        .unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.auth_dir, "/tmp/auths");
        assert_eq!(
            config.provider("aistudio").api_key.as_deref(),
            Some("test-key")
        );
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "port: [not a port").unwrap();
        assert!(load_from(&path).is_err());
    }
}
