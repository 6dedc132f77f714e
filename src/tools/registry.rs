use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::{builtin_descriptor, HttpToolBackend, ToolBackend, ToolDescriptor};
use crate::completion::ToolDefinition;
use crate::config::{RequestConfig, ToolsConfig};
use crate::error::ToolCallResult;

/// A registered tool: its descriptor and the backend it runs on.
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub backend: Arc<dyn ToolBackend>,
}

/// Registry of available tools.
///
/// Lookup is by identifier; iteration follows registration order so that
/// tool listings and model tool definitions are deterministic.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry of built-in tools served by the configured gateway
    pub fn from_config(
        config: &ToolsConfig,
        request_config: &RequestConfig,
    ) -> ToolCallResult<Self> {
        let backend: Arc<dyn ToolBackend> = Arc::new(HttpToolBackend::new(config, request_config)?);
        let mut registry = Self::new();

        for id in &config.enabled {
            match builtin_descriptor(id) {
                Some(descriptor) => registry.register(descriptor, Arc::clone(&backend)),
                None => warn!(tool = %id, "Ignoring unknown tool in TOOLS_ENABLED"),
            }
        }

        info!(tools = ?registry.tool_ids(), "Tool registry initialized");
        Ok(registry)
    }

    /// Register (or replace) a tool
    pub fn register(&mut self, descriptor: ToolDescriptor, backend: Arc<dyn ToolBackend>) {
        let id = descriptor.id.clone();
        if !self.tools.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.tools.insert(id, RegisteredTool { descriptor, backend });
    }

    /// Look up a tool by identifier
    pub fn get(&self, id: &str) -> Option<&RegisteredTool> {
        self.tools.get(id)
    }

    /// Whether a tool is registered
    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    /// Descriptors of all tools, in registration order
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.tools.get(id))
            .map(|t| t.descriptor.clone())
            .collect()
    }

    /// Identifiers of all tools, in registration order
    pub fn tool_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Display name for a tool, falling back to its identifier
    pub fn display_name(&self, id: &str) -> String {
        self.tools
            .get(id)
            .map(|t| t.descriptor.title.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Function definitions for the model, default tools only
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list_tools()
            .into_iter()
            .filter(|d| d.is_default)
            .map(|d| ToolDefinition::function(d.id, d.description, d.parameter_schema))
            .collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no tools are registered
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
