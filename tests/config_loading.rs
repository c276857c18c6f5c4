use std::io::Write;

use reflow_core::config::AppConfig;
use reflow_llm::RetryPolicy;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[scheduler]
max_iterations = 12
output_dir = "/tmp/reflow-results"

[retry]
max_retries = 5
base_delay_ms = 1000
max_delay_ms = 30000
retry_after_margin_ms = 250

[provider]
base_url = "http://localhost:11434/v1"
api_key = "sk-test-key"
model = "llama3.2"
temperature = 0.2
max_tokens = 1024
timeout_secs = 30

[log]
enabled = true
log_dir = "/tmp/reflow-logs"

[vars]
TICKER = "ACME"
QUARTER = "Q3"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.scheduler.max_iterations, 12);
    assert_eq!(config.scheduler.output_dir, "/tmp/reflow-results");
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.provider.base_url, "http://localhost:11434/v1");
    assert_eq!(config.provider.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.provider.model, "llama3.2");
    assert_eq!(config.provider.max_tokens, 1024);
    assert_eq!(config.provider.timeout_secs, 30);
    assert!(config.log.enabled);
    assert_eq!(config.log.dir(), std::path::PathBuf::from("/tmp/reflow-logs"));
    assert_eq!(config.vars.len(), 2);
    assert_eq!(config.vars["QUARTER"], "Q3");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("REFLOW_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[provider]
api_key = "${REFLOW_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.provider.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("REFLOW_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[provider]
model = "gpt-4o-mini"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.provider.model, "gpt-4o-mini");
    assert_eq!(config.provider.base_url, "https://api.openai.com/v1");
    assert_eq!(config.scheduler.max_iterations, 36);
    assert!(!config.log.enabled);
    assert_eq!(config.log.dir(), std::path::PathBuf::from("logs"));
    assert!(config.vars.is_empty());
}

#[test]
fn test_retry_policy_from_config() {
    let toml_content = r#"
[retry]
max_retries = 2
base_delay_ms = 500
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    let policy = RetryPolicy::from(&config.retry);

    assert_eq!(policy.max_retries, 2);
    assert_eq!(policy.base_delay, std::time::Duration::from_millis(500));
    assert_eq!(policy.max_delay, std::time::Duration::from_secs(60));
    assert_eq!(policy.retry_after_margin, std::time::Duration::from_millis(500));
}

#[test]
fn test_malformed_config_is_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[scheduler\nmax_iterations = ").expect("write toml");

    assert!(AppConfig::load(tmp.path()).is_err());
}
