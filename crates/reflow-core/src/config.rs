use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ReflowError, Result};

/// Top-level reflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Variables available to `${NAME}` placeholders in workflow definitions.
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Hard cap on ticks per run; bounds feedback loops.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Directory run results are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            output_dir: default_output_dir(),
        }
    }
}

/// Default bound on scheduler ticks per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 36;

fn default_max_iterations() -> usize { DEFAULT_MAX_ITERATIONS }
fn default_output_dir() -> String { "context".to_string() }

/// Retry configuration for rate-limited provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Added on top of a provider's "try again in N s" hint.
    #[serde(default = "default_retry_after_margin")]
    pub retry_after_margin_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            retry_after_margin_ms: default_retry_after_margin(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_base_delay() -> u64 { 2000 }
fn default_max_delay() -> u64 { 60000 }
fn default_retry_after_margin() -> u64 { 500 }

/// Defaults for remote completion nodes. Node config overrides each field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_model() -> String { "gpt-4o".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 4096 }
fn default_timeout_secs() -> u64 { 120 }

/// JSONL execution-log streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Directory for log files. Default: ./logs
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: None,
        }
    }
}

impl LogConfig {
    pub fn dir(&self) -> PathBuf {
        PathBuf::from(self.log_dir.as_deref().unwrap_or("logs"))
    }
}

impl AppConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ReflowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| ReflowError::Config(e.to_string()))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_REFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_REFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_REFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_REFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_REFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.scheduler.output_dir, "context");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.retry.max_delay_ms, 60000);
        assert_eq!(config.provider.model, "gpt-4o");
        assert!(config.provider.api_key.is_none());
        assert!(!config.log.enabled);
        assert!(config.vars.is_empty());
    }

    #[test]
    fn test_scheduler_default_matches_serde_default() {
        assert_eq!(SchedulerConfig::default().max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(DEFAULT_MAX_ITERATIONS, 36);
    }

    #[test]
    fn test_partial_sections() {
        let toml_str = r#"
[scheduler]
max_iterations = 5

[retry]
max_retries = 1

[vars]
TICKER = "ACME"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.max_iterations, 5);
        assert_eq!(config.scheduler.output_dir, "context");
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.max_delay_ms, 60000);
        assert_eq!(config.vars.get("TICKER").map(String::as_str), Some("ACME"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = AppConfig::load_or_default(Path::new("/nonexistent/reflow.toml")).unwrap();
        assert_eq!(config.scheduler.max_iterations, 36);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = AppConfig::load(Path::new("/nonexistent/reflow.toml")).unwrap_err();
        assert!(matches!(err, ReflowError::ConfigNotFound(_)));
    }
}
