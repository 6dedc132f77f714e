//! # MCP Agent Orchestrator
//!
//! A Model Context Protocol (MCP) server that answers requests with an
//! agentic tool loop: it decides whether a message needs external tools,
//! runs them through an HTTP tool gateway, synthesizes a failure-aware
//! answer, optionally reflects and iterates, and keeps durable insights in
//! a per-owner knowledge store.
//!
//! ## Pipeline
//!
//! ```text
//! message → DecisionAnalyzer → OrchestrationPlanner
//!         → model tool calls | orchestrated plan | forced fallback
//!         → SynthesisEngine → ReflectionController (bounded loop)
//!         → KnowledgeGate (background) → SQLite
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_agent_orchestrator::{AppState, Config, McpServer};
//! use mcp_agent_orchestrator::completion::CompletionClient;
//! use mcp_agent_orchestrator::storage::SqliteStorage;
//! use mcp_agent_orchestrator::tools::ToolRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let completion = CompletionClient::new(&config.completion, config.request.clone())?;
//!     let registry = ToolRegistry::from_config(&config.tools, &config.request)?;
//!     let state = Arc::new(AppState::new(config, storage, completion, registry));
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

/// Agent pipeline: decision, planning, execution, synthesis, reflection, persistence.
pub mod agent;
/// Chat completion client with tool calling.
pub mod completion;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// System prompts for the model calls.
pub mod prompts;
/// MCP server implementation and request handling.
pub mod server;
/// SQLite storage layer for conversations, knowledge and audit logs.
pub mod storage;
/// Tool registry and backends.
pub mod tools;

pub use agent::{AgentOrchestrator, QueryRequest, QueryResponse};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
