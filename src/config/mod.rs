use std::env;
use std::path::PathBuf;

use crate::error::AppError;
use crate::tools::BUILTIN_TOOL_IDS;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub completion: CompletionConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub tools: ToolsConfig,
    pub agent: AgentConfig,
}

/// Completion service configuration
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Tool gateway configuration
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Gateway base URL; each tool lives at `{base_url}/tools/{id}`.
    pub base_url: String,
    pub api_key: Option<String>,
    /// Enabled tool identifiers, in registry order.
    pub enabled: Vec<String>,
}

/// Orchestration loop configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum reflection continuations per originating message.
    pub max_loops: u32,
    /// Deadline for the model-driven path of one iteration.
    pub request_timeout_ms: u64,
    /// Run dependency-free plan steps of one batch concurrently.
    pub parallel_batches: bool,
    /// Fraction of the shorter title's tokens that must overlap for two
    /// insight titles to count as duplicates.
    pub similarity_ratio: f64,
    /// Upper bound on the number of overlapping tokens required.
    pub similarity_cap: usize,
    /// Whether accepted insights are written to the knowledge store.
    pub persist_knowledge: bool,
}

/// Default number of reflection continuations.
pub const DEFAULT_MAX_LOOPS: u32 = 2;

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let completion = CompletionConfig {
            api_key: env::var("COMPLETION_API_KEY").map_err(|_| AppError::Config {
                message: "COMPLETION_API_KEY is required".to_string(),
            })?,
            base_url: env::var("COMPLETION_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            model: env::var("COMPLETION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/agent.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS").unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS").unwrap_or(30000),
            max_retries: parse_env("MAX_RETRIES").unwrap_or(3),
            retry_delay_ms: parse_env("RETRY_DELAY_MS").unwrap_or(1000),
        };

        let tools = ToolsConfig {
            base_url: env::var("TOOLS_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8787".to_string()),
            api_key: env::var("TOOLS_API_KEY").ok().filter(|k| !k.is_empty()),
            enabled: env::var("TOOLS_ENABLED")
                .map(|s| parse_tool_list(&s))
                .unwrap_or_else(|_| BUILTIN_TOOL_IDS.iter().map(|s| s.to_string()).collect()),
        };

        let defaults = AgentConfig::default();
        let agent = AgentConfig {
            max_loops: parse_env("AGENT_MAX_LOOPS").unwrap_or(defaults.max_loops),
            request_timeout_ms: parse_env("AGENT_REQUEST_TIMEOUT_MS")
                .unwrap_or(defaults.request_timeout_ms),
            parallel_batches: parse_env("AGENT_PARALLEL_BATCHES")
                .unwrap_or(defaults.parallel_batches),
            similarity_ratio: parse_env("KNOWLEDGE_SIMILARITY_RATIO")
                .filter(|r: &f64| (0.0..=1.0).contains(r))
                .unwrap_or(defaults.similarity_ratio),
            similarity_cap: parse_env("KNOWLEDGE_SIMILARITY_CAP")
                .filter(|c: &usize| *c > 0)
                .unwrap_or(defaults.similarity_cap),
            persist_knowledge: parse_env("KNOWLEDGE_PERSIST")
                .unwrap_or(defaults.persist_knowledge),
        };

        Ok(Config {
            completion,
            database,
            logging,
            request,
            tools,
            agent,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Split a comma separated tool list, dropping blanks and duplicates.
fn parse_tool_list(raw: &str) -> Vec<String> {
    let mut tools: Vec<String> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !tools.iter().any(|t| t == id) {
            tools.push(id.to_string());
        }
    }
    tools
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_loops: DEFAULT_MAX_LOOPS,
            request_timeout_ms: 60000,
            parallel_batches: false,
            similarity_ratio: 0.6,
            similarity_cap: 3,
            persist_knowledge: true,
        }
    }
}
