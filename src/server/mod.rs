//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state management

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::agent::AgentOrchestrator;
use crate::completion::CompletionClient;
use crate::config::Config;
use crate::storage::SqliteStorage;
use crate::tools::ToolRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// SQLite storage backend.
    pub storage: SqliteStorage,
    /// The agent loop, owning the tool registry and completion client.
    pub orchestrator: AgentOrchestrator,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: Config,
        storage: SqliteStorage,
        completion: CompletionClient,
        registry: ToolRegistry,
    ) -> Self {
        tracing::info!(
            model = %config.completion.model,
            tools_base_url = %config.tools.base_url,
            tools = registry.len(),
            "AppState initializing"
        );

        let orchestrator =
            AgentOrchestrator::new(storage.clone(), completion, registry, config.agent.clone());

        Self {
            config,
            storage,
            orchestrator,
        }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
