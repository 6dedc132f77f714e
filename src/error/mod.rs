use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Knowledge node not found: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Completion service errors
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Completion service unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Tool lookup and backend errors.
///
/// These never abort a request: the execution engine converts each one into
/// a failed tool result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {tool_name}")]
    NotFound { tool_name: String },

    #[error("Tool {tool_name} failed: {message}")]
    Backend {
        tool_name: String,
        message: String,
        status: Option<u16>,
    },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },
}

/// Raised by the decision analyzer for malformed input only.
///
/// A message that matches no category is a valid `general` decision, not an error.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message too long: {length} characters (max {max})")]
    MessageTooLong { length: usize, max: usize },
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ToolError {
    /// Short remediation hint shown next to a failed tool result.
    pub fn remediation(&self) -> &'static str {
        match self {
            ToolError::NotFound { .. } => {
                "The tool is not registered. Check TOOLS_ENABLED and the tool gateway configuration."
            }
            ToolError::InvalidParameters { .. } => {
                "Rephrase the request with the missing details (for example a full repository URL)."
            }
            ToolError::Backend { status, .. } => match status {
                Some(401) | Some(403) => {
                    "The backend rejected the credentials. Verify TOOLS_API_KEY or the resource is not private."
                }
                Some(404) => {
                    "The resource was not found. It may be private, renamed or misspelled."
                }
                Some(429) => "The backend is rate limiting requests. Wait a moment and try again.",
                Some(s) if *s >= 500 => "The backend is unavailable. Try again later.",
                _ => "Check the tool backend configuration and try again.",
            },
        }
    }
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for completion service operations
pub type CompletionResult<T> = Result<T, CompletionError>;

/// Result type alias for tool lookup and backend operations
pub type ToolCallResult<T> = Result<T, ToolError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::NodeNotFound {
            node_id: "node-1".to_string(),
        };
        assert_eq!(err.to_string(), "Knowledge node not found: node-1");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_completion_error_display() {
        let err = CompletionError::Unavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(
            err.to_string(),
            "Completion service unavailable: server down (retries: 3)"
        );

        let err = CompletionError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::NotFound {
            tool_name: "web-search".to_string(),
        };
        assert_eq!(err.to_string(), "Tool not found: web-search");

        let err = ToolError::Backend {
            tool_name: "github-repo".to_string(),
            message: "boom".to_string(),
            status: Some(500),
        };
        assert_eq!(err.to_string(), "Tool github-repo failed: boom");
    }

    #[test]
    fn test_tool_error_remediation_by_status() {
        let backend = |status| ToolError::Backend {
            tool_name: "github-repo".to_string(),
            message: "x".to_string(),
            status,
        };
        assert!(backend(Some(429)).remediation().contains("rate limiting"));
        assert!(backend(Some(404)).remediation().contains("private"));
        assert!(backend(Some(401)).remediation().contains("credentials"));
        assert!(backend(None).remediation().contains("configuration"));
    }

    #[test]
    fn test_classification_error_display() {
        let err = ClassificationError::MessageTooLong {
            length: 20,
            max: 10,
        };
        assert_eq!(err.to_string(), "Message too long: 20 characters (max 10)");
    }

    #[test]
    fn test_conversions_to_app_error() {
        let app_err: AppError = StorageError::Query {
            message: "bad".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Storage(_)));

        let app_err: AppError = CompletionError::Timeout { timeout_ms: 1 }.into();
        assert!(matches!(app_err, AppError::Completion(_)));

        let app_err: AppError = ClassificationError::EmptyMessage.into();
        assert!(matches!(app_err, AppError::Classification(_)));
    }

    #[test]
    fn test_app_error_conversion_to_mcp_error() {
        let app_err = AppError::Config {
            message: "test error".to_string(),
        };
        let mcp_err: McpError = app_err.into();
        assert!(matches!(mcp_err, McpError::ExecutionFailed { .. }));
        assert!(mcp_err.to_string().contains("Configuration error"));
    }
}
