use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::agent::{KnowledgeCorrection, QueryRequest};
use crate::error::{McpError, McpResult};
use crate::storage::Storage;

/// Default number of hits for `knowledge_search`.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;
/// Upper bound on hits for `knowledge_search`.
pub const MAX_SEARCH_LIMIT: usize = 20;

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "agent_query" => handle_query(state, arguments).await,
        "agent_analyze" => handle_analyze(state, arguments),
        "agent_list_tools" => handle_list_tools(state),
        "knowledge_search" => handle_knowledge_search(state, arguments).await,
        "knowledge_correct" => handle_knowledge_correct(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

/// Handle agent_query: run the full agent loop
async fn handle_query(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let request: QueryRequest = parse_arguments("agent_query", arguments)?;
    let response = state.orchestrator.handle_query(request).await;
    serde_json::to_value(response).map_err(McpError::Json)
}

/// Handle agent_analyze: decision and plan without side effects
fn handle_analyze(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct AnalyzeParams {
        message: String,
    }

    let params: AnalyzeParams = parse_arguments("agent_analyze", arguments)?;
    let analysis = state
        .orchestrator
        .analyze(&params.message)
        .map_err(|e| McpError::InvalidParameters {
            tool_name: "agent_analyze".to_string(),
            message: e.to_string(),
        })?;
    serde_json::to_value(analysis).map_err(McpError::Json)
}

fn handle_list_tools(state: &SharedState) -> McpResult<Value> {
    let tools = state.orchestrator.registry().list_tools();
    Ok(serde_json::json!({
        "count": tools.len(),
        "tools": tools,
    }))
}

/// Handle knowledge_search over the caller's stored insights
async fn handle_knowledge_search(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct SearchParams {
        query: String,
        #[serde(default)]
        identity: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default, rename = "includeDeprecated")]
        include_deprecated: bool,
    }

    let params: SearchParams = parse_arguments("knowledge_search", arguments)?;
    let owner = params.identity.as_deref().unwrap_or("anonymous");
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let hits = state
        .storage
        .search_knowledge(owner, &params.query, limit, params.include_deprecated)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    Ok(serde_json::json!({
        "count": hits.len(),
        "results": hits,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CorrectionResult {
    superseded: String,
    node_id: String,
    title: String,
}

/// Handle knowledge_correct: add a corrected node, deprecate the old one
async fn handle_knowledge_correct(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CorrectParams {
        node_id: String,
        #[serde(flatten)]
        correction: KnowledgeCorrection,
    }

    let params: CorrectParams = parse_arguments("knowledge_correct", arguments)?;
    if params.correction.description.trim().is_empty() {
        return Err(McpError::InvalidParameters {
            tool_name: "knowledge_correct".to_string(),
            message: "description must not be empty".to_string(),
        });
    }

    let node = state
        .orchestrator
        .gate()
        .correct(&params.node_id, &params.correction)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(CorrectionResult {
        superseded: params.node_id,
        node_id: node.id,
        title: node.title,
    })
    .map_err(McpError::Json)
}

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}
