//! Tool registry adapter.
//!
//! Exposes the available tools to the decision and execution layers:
//! - [`ToolDescriptor`]: identity, parameter schema and usage hints
//! - [`ToolBackend`]: the seam each tool is invoked through
//! - [`ToolRegistry`]: ordered lookup of descriptors and backends
//! - [`detect_github_request`]: repository coordinate extraction

mod backend;
mod catalog;
mod github;
mod registry;

pub use backend::*;
pub use catalog::*;
pub use github::*;
pub use registry::*;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Web search tool identifier.
pub const WEB_SEARCH: &str = "web-search";
/// Web page scraper tool identifier.
pub const WEB_SCRAPE: &str = "web-scrape";
/// Repository introspection tool identifier.
pub const GITHUB_REPO: &str = "github-repo";
/// Owned knowledge/document search tool identifier.
pub const KNOWLEDGE_SEARCH: &str = "knowledge-search";
/// Issue tracker search tool identifier.
pub const JIRA_SEARCH: &str = "jira-search";

/// Every tool the built-in catalog knows about, in registry order.
pub const BUILTIN_TOOL_IDS: [&str; 5] = [
    KNOWLEDGE_SEARCH,
    WEB_SEARCH,
    WEB_SCRAPE,
    GITHUB_REPO,
    JIRA_SEARCH,
];

/// Descriptor of one available tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Stable tool identifier used in tool calls.
    pub id: String,
    /// Human-readable name shown in progress updates.
    pub title: String,
    /// Usage hint for the model.
    pub description: String,
    /// JSON Schema of the tool's parameters.
    pub parameter_schema: Value,
    /// Whether the tool is offered to the model by default.
    pub is_default: bool,
}
