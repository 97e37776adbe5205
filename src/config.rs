//! Configuration for the pipeline engine
//!
//! Loaded from a TOML file or assembled from the environment. Secrets are
//! never stored in the file: the access token is read from the environment
//! variable named by `backend.access_token_env` at use time.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the backend base URL
pub const BASE_URL_ENV: &str = "REACT_APP_COMPOSER_BASE_URL";

/// Default environment variable holding the backend access token
pub const DEFAULT_ACCESS_TOKEN_ENV: &str = "ACCESS_TOKEN";

/// Main engine configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComposerConfig {
    pub backend: BackendSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub chat: ChatSection,
}

/// Backend section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendSection {
    /// Base URL of the composer backend, without a trailing slash
    pub base_url: String,
    /// Environment variable containing the bearer token
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    /// Optional request timeout in seconds. No timeout when unset.
    pub timeout_secs: Option<u64>,
}

fn default_access_token_env() -> String {
    DEFAULT_ACCESS_TOKEN_ENV.to_string()
}

/// Resource limits for component code
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSection {
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,
    #[serde(default = "default_max_function_expr_depth")]
    pub max_function_expr_depth: usize,
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,
    #[serde(default = "default_max_collection_size")]
    pub max_array_size: usize,
    #[serde(default = "default_max_collection_size")]
    pub max_map_size: usize,
}

fn default_max_operations() -> u64 {
    5_000_000
}

fn default_max_call_levels() -> usize {
    64
}

fn default_max_expr_depth() -> usize {
    64
}

fn default_max_function_expr_depth() -> usize {
    32
}

fn default_max_string_size() -> usize {
    1024 * 1024
}

fn default_max_collection_size() -> usize {
    100_000
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
            max_function_expr_depth: default_max_function_expr_depth(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_collection_size(),
            max_map_size: default_max_collection_size(),
        }
    }
}

/// Chat history section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSection {
    /// Saved as the reply when the pipeline produced no `api_message`
    #[serde(default = "default_no_message_placeholder")]
    pub no_message_placeholder: String,
}

fn default_no_message_placeholder() -> String {
    "<no api message>".to_string()
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            no_message_placeholder: default_no_message_placeholder(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ComposerConfig {
    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: ComposerConfig = toml::from_str(content)?;
        config.normalize()?;
        Ok(config)
    }

    /// Build a configuration from `REACT_APP_COMPOSER_BASE_URL` with defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = Self::get_env_var_required(BASE_URL_ENV)?;
        let mut config = Self::with_base_url(base_url);
        config.normalize()?;
        Ok(config)
    }

    /// Default configuration pointing at `base_url`
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            backend: BackendSection {
                base_url: base_url.into(),
                access_token_env: default_access_token_env(),
                timeout_secs: None,
            },
            engine: EngineSection::default(),
            chat: ChatSection::default(),
        }
    }

    fn normalize(&mut self) -> Result<(), ConfigError> {
        let trimmed = self.backend.base_url.trim_end_matches('/').to_string();
        validate_base_url(&trimmed)?;
        self.backend.base_url = trimmed;

        if self.backend.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "backend.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.engine.max_operations == 0 {
            return Err(ConfigError::InvalidConfig(
                "engine.max_operations must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get the backend access token from its environment variable
    pub fn get_access_token(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.backend.access_token_env)
    }

    /// Request timeout, if one is configured
    pub fn request_timeout(&self) -> Option<Duration> {
        self.backend.timeout_secs.map(Duration::from_secs)
    }
}

fn validate_base_url(base_url: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(base_url).map_err(|e| ConfigError::InvalidBaseUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[backend]
base_url = "https://composer.example.com/"
access_token_env = "COMPOSER_TOKEN"
timeout_secs = 30

[engine]
max_operations = 10000
max_call_levels = 16

[chat]
no_message_placeholder = "(silence)"
"#;

        let config = ComposerConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.backend.base_url, "https://composer.example.com");
        assert_eq!(config.backend.access_token_env, "COMPOSER_TOKEN");
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.engine.max_operations, 10000);
        assert_eq!(config.engine.max_call_levels, 16);
        assert_eq!(config.engine.max_map_size, 100_000);
        assert_eq!(config.chat.no_message_placeholder, "(silence)");
    }

    #[test]
    fn test_minimal_config() {
        let toml_content = r#"
[backend]
base_url = "http://localhost:8000"
"#;

        let config = ComposerConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.backend.access_token_env, "ACCESS_TOKEN");
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.engine, EngineSection::default());
        assert_eq!(config.chat.no_message_placeholder, "<no api message>");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = ComposerConfig::from_toml_str(
            r#"
[backend]
base_url = "not a url"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidBaseUrl { .. })));

        let result = ComposerConfig::from_toml_str(
            r#"
[backend]
base_url = "ftp://composer.example.com"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidBaseUrl { .. })));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ComposerConfig::from_toml_str(
            r#"
[backend]
base_url = "http://localhost:8000"
timeout_secs = 0
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_backend_section() {
        let result = ComposerConfig::from_toml_str("[chat]\n");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_access_token_from_env() {
        let mut config = ComposerConfig::with_base_url("http://localhost:8000");
        config.backend.access_token_env = "COMPOSER_ENGINE_TEST_TOKEN_PRESENT".to_string();
        std::env::set_var("COMPOSER_ENGINE_TEST_TOKEN_PRESENT", "tok-123");
        assert_eq!(config.get_access_token().unwrap(), "tok-123");

        config.backend.access_token_env = "COMPOSER_ENGINE_TEST_TOKEN_ABSENT".to_string();
        assert!(matches!(
            config.get_access_token(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "COMPOSER_ENGINE_TEST_TOKEN_ABSENT"
        ));
    }
}
