//! Config environment variable tests
//!
//! These tests verify that Config::from_env() reads and applies environment
//! variable overrides. Config::from_env() also loads a .env file via
//! dotenvy, so every test sets the required key itself.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use mcp_agent_orchestrator::config::{Config, LogFormat, DEFAULT_MAX_LOOPS};
use mcp_agent_orchestrator::tools::BUILTIN_TOOL_IDS;
use serial_test::serial;
use std::env;

fn with_key() {
    env::set_var("COMPLETION_API_KEY", "test-key");
}

#[test]
#[serial]
fn test_config_requires_api_key() {
    env::remove_var("COMPLETION_API_KEY");

    // A .env file in the working directory may still supply the key
    if let Err(e) = Config::from_env() {
        assert!(e.to_string().contains("COMPLETION_API_KEY"));
    }

    with_key();
    assert!(Config::from_env().is_ok());
}

#[test]
#[serial]
fn test_config_completion_overrides() {
    with_key();
    env::set_var("COMPLETION_BASE_URL", "https://llm.internal.test");
    env::set_var("COMPLETION_MODEL", "test-model");

    let config = Config::from_env().unwrap();
    assert_eq!(config.completion.api_key, "test-key");
    assert_eq!(config.completion.base_url, "https://llm.internal.test");
    assert_eq!(config.completion.model, "test-model");

    env::remove_var("COMPLETION_BASE_URL");
    env::remove_var("COMPLETION_MODEL");
}

#[test]
#[serial]
fn test_config_custom_database() {
    with_key();
    env::set_var("DATABASE_PATH", "/custom/path.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/path.db");
    assert_eq!(config.database.max_connections, 10);

    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_json_log_format() {
    with_key();
    env::set_var("LOG_FORMAT", "JSON");
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.logging.level, "debug");

    env::remove_var("LOG_FORMAT");
    env::remove_var("LOG_LEVEL");
}

#[test]
#[serial]
fn test_config_custom_request() {
    with_key();
    env::set_var("REQUEST_TIMEOUT_MS", "60000");
    env::set_var("MAX_RETRIES", "5");
    env::set_var("RETRY_DELAY_MS", "2000");

    let config = Config::from_env().unwrap();
    assert_eq!(config.request.timeout_ms, 60000);
    assert_eq!(config.request.max_retries, 5);
    assert_eq!(config.request.retry_delay_ms, 2000);

    env::remove_var("REQUEST_TIMEOUT_MS");
    env::remove_var("MAX_RETRIES");
    env::remove_var("RETRY_DELAY_MS");
}

#[test]
#[serial]
fn test_config_invalid_number_uses_default() {
    with_key();
    env::set_var("DATABASE_MAX_CONNECTIONS", "not-a-number");
    env::set_var("AGENT_MAX_LOOPS", "many");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.max_connections, 5);
    assert_eq!(config.agent.max_loops, DEFAULT_MAX_LOOPS);

    env::remove_var("DATABASE_MAX_CONNECTIONS");
    env::remove_var("AGENT_MAX_LOOPS");
}

#[test]
#[serial]
fn test_config_tools_enabled_list() {
    with_key();
    env::set_var("TOOLS_ENABLED", " web-search, github-repo ,,web-search");
    env::set_var("TOOLS_BASE_URL", "http://gateway.test");
    env::set_var("TOOLS_API_KEY", "");

    let config = Config::from_env().unwrap();
    assert_eq!(config.tools.enabled, vec!["web-search", "github-repo"]);
    assert_eq!(config.tools.base_url, "http://gateway.test");
    assert!(config.tools.api_key.is_none());

    env::remove_var("TOOLS_ENABLED");
    env::remove_var("TOOLS_BASE_URL");
    env::remove_var("TOOLS_API_KEY");

    let config = Config::from_env().unwrap();
    assert_eq!(config.tools.enabled.len(), BUILTIN_TOOL_IDS.len());
}

#[test]
#[serial]
fn test_config_agent_overrides() {
    with_key();
    env::set_var("AGENT_MAX_LOOPS", "4");
    env::set_var("AGENT_REQUEST_TIMEOUT_MS", "1500");
    env::set_var("AGENT_PARALLEL_BATCHES", "true");
    env::set_var("KNOWLEDGE_SIMILARITY_RATIO", "0.8");
    env::set_var("KNOWLEDGE_SIMILARITY_CAP", "2");
    env::set_var("KNOWLEDGE_PERSIST", "false");

    let config = Config::from_env().unwrap();
    assert_eq!(config.agent.max_loops, 4);
    assert_eq!(config.agent.request_timeout_ms, 1500);
    assert!(config.agent.parallel_batches);
    assert!((config.agent.similarity_ratio - 0.8).abs() < f64::EPSILON);
    assert_eq!(config.agent.similarity_cap, 2);
    assert!(!config.agent.persist_knowledge);

    env::remove_var("AGENT_MAX_LOOPS");
    env::remove_var("AGENT_REQUEST_TIMEOUT_MS");
    env::remove_var("AGENT_PARALLEL_BATCHES");
    env::remove_var("KNOWLEDGE_SIMILARITY_RATIO");
    env::remove_var("KNOWLEDGE_SIMILARITY_CAP");
    env::remove_var("KNOWLEDGE_PERSIST");
}

#[test]
#[serial]
fn test_config_out_of_range_similarity_uses_default() {
    with_key();
    env::set_var("KNOWLEDGE_SIMILARITY_RATIO", "1.7");
    env::set_var("KNOWLEDGE_SIMILARITY_CAP", "0");

    let config = Config::from_env().unwrap();
    assert!((config.agent.similarity_ratio - 0.6).abs() < f64::EPSILON);
    assert_eq!(config.agent.similarity_cap, 3);

    env::remove_var("KNOWLEDGE_SIMILARITY_RATIO");
    env::remove_var("KNOWLEDGE_SIMILARITY_CAP");
}
