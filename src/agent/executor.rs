use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::{info, warn};

use super::{
    group_into_batches, serialize_for_log, CallerContext, ExecutionOutcome, ExecutionStep,
    ToolCallRequest, ToolProgress, ToolResult,
};
use crate::error::{ToolCallResult, ToolError};
use crate::storage::{Invocation, SqliteStorage, Storage};
use crate::tools::{detect_github_request, ToolRegistry, GITHUB_REPO, KNOWLEDGE_SEARCH};

/// Default number of knowledge results requested.
pub const KNOWLEDGE_DEFAULT_LIMIT: u64 = 5;
/// Default similarity threshold for knowledge matches.
pub const KNOWLEDGE_DEFAULT_THRESHOLD: f64 = 0.5;

const GITHUB_ACTIONS: [&str; 3] = ["get_repo", "list_issues", "get_readme"];

/// Runs tool calls against the registry and normalizes their results.
///
/// Failures are isolated per invocation: an unknown tool or a backend error
/// becomes a failed [`ToolResult`], never an error of the whole batch.
#[derive(Clone, Default)]
pub struct ToolExecutor {
    audit: Option<SqliteStorage>,
    parallel_batches: bool,
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every invocation to the audit table
    pub fn with_audit(mut self, storage: SqliteStorage) -> Self {
        self.audit = Some(storage);
        self
    }

    /// Run dependency-free steps of a batch concurrently
    pub fn with_parallel_batches(mut self, enabled: bool) -> Self {
        self.parallel_batches = enabled;
        self
    }

    /// Execute calls one after another, in request order.
    pub async fn execute(
        &self,
        calls: &[ToolCallRequest],
        registry: &ToolRegistry,
        caller: &CallerContext,
    ) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::default();
        for call in calls {
            let (result, progress, invoked) = self.run_one(call, registry, caller).await;
            outcome.push(result, progress, invoked);
        }
        outcome
    }

    /// Execute a plan batch by batch. Results keep plan order even when
    /// a batch runs concurrently.
    pub async fn execute_plan(
        &self,
        steps: &[ExecutionStep],
        registry: &ToolRegistry,
        caller: &CallerContext,
    ) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::default();

        for batch in group_into_batches(steps) {
            let calls: Vec<ToolCallRequest> = batch.iter().map(ToolCallRequest::from).collect();
            if self.parallel_batches && calls.len() > 1 {
                let runs =
                    join_all(calls.iter().map(|call| self.run_one(call, registry, caller))).await;
                for (result, progress, invoked) in runs {
                    outcome.push(result, progress, invoked);
                }
            } else {
                outcome.extend(self.execute(&calls, registry, caller).await);
            }
        }

        outcome
    }

    async fn run_one(
        &self,
        call: &ToolCallRequest,
        registry: &ToolRegistry,
        caller: &CallerContext,
    ) -> (ToolResult, ToolProgress, bool) {
        let mut progress = ToolProgress::new(
            &call.name,
            registry.display_name(&call.name),
            call.parameters.clone(),
        );

        let Some(tool) = registry.get(&call.name) else {
            let err = ToolError::NotFound {
                tool_name: call.name.clone(),
            };
            warn!(tool = %call.name, "Requested tool is not registered");
            progress.fail(err.to_string());
            return (
                ToolResult::failed(&call.name, call.parameters.clone(), &err),
                progress,
                false,
            );
        };

        progress.mark_executing();
        let start = Instant::now();

        let (sent, outcome) = match shape_parameters(&call.name, &call.parameters, caller) {
            Ok(params) => {
                let outcome = match tool.backend.invoke(&call.name, params.clone()).await {
                    Ok(body) => classify_response(&call.name, body),
                    Err(e) => Err(e),
                };
                (params, outcome)
            }
            Err(e) => (call.parameters.clone(), Err(e)),
        };
        let latency_ms = start.elapsed().as_millis() as i64;

        match outcome {
            Ok(payload) => {
                info!(tool = %call.name, latency_ms, "Tool invocation completed");
                self.audit(
                    Invocation::new(&call.name, sent)
                        .success(serialize_for_log(&payload, "tool payload"), latency_ms),
                    caller,
                )
                .await;
                progress.complete(payload.clone());
                (
                    ToolResult::ok(&call.name, call.parameters.clone(), payload),
                    progress,
                    true,
                )
            }
            Err(err) => {
                warn!(tool = %call.name, latency_ms, error = %err, "Tool invocation failed");
                self.audit(
                    Invocation::new(&call.name, sent).failure(err.to_string(), latency_ms),
                    caller,
                )
                .await;
                progress.fail(err.to_string());
                (
                    ToolResult::failed(&call.name, call.parameters.clone(), &err),
                    progress,
                    true,
                )
            }
        }
    }

    async fn audit(&self, invocation: Invocation, caller: &CallerContext) {
        let Some(storage) = &self.audit else {
            return;
        };
        let invocation = match &caller.session_id {
            Some(session) => invocation.with_session(session),
            None => invocation,
        };
        if let Err(e) = storage.log_invocation(&invocation).await {
            warn!(
                error = %e,
                tool = %invocation.tool_name,
                "Failed to log invocation - audit trail incomplete"
            );
        }
    }
}

/// Shape parameters for a tool's backend and inject the caller identity.
pub fn shape_parameters(
    tool_id: &str,
    params: &Value,
    caller: &CallerContext,
) -> ToolCallResult<Value> {
    match tool_id {
        KNOWLEDGE_SEARCH => {
            let query = string_param(params, &["query", "q", "search"])
                .or_else(|| params.as_str().map(str::to_string))
                .filter(|q| !q.trim().is_empty())
                .ok_or_else(|| ToolError::InvalidParameters {
                    tool_name: tool_id.to_string(),
                    message: "missing query".to_string(),
                })?;
            let limit = params
                .get("limit")
                .and_then(Value::as_u64)
                .unwrap_or(KNOWLEDGE_DEFAULT_LIMIT)
                .clamp(1, 20);
            let threshold = params
                .get("matchThreshold")
                .and_then(Value::as_f64)
                .unwrap_or(KNOWLEDGE_DEFAULT_THRESHOLD)
                .clamp(0.0, 1.0);
            let use_embeddings = params
                .get("useEmbeddings")
                .and_then(Value::as_bool)
                .unwrap_or(true);

            Ok(json!({
                "query": query,
                "limit": limit,
                "matchThreshold": threshold,
                "useEmbeddings": use_embeddings,
                "callerId": caller.caller_id(),
            }))
        }
        GITHUB_REPO => {
            let mut owner = string_param(params, &["owner"]);
            let mut repo = string_param(params, &["repo", "repository", "name"]);

            // "owner/repo" in the repo field, or a URL/free text to mine
            if let (None, Some(full)) = (&owner, &repo) {
                if let Some((o, r)) = full.split_once('/') {
                    owner = Some(o.to_string());
                    repo = Some(r.to_string());
                }
            }
            if owner.is_none() || repo.is_none() {
                if let Some(text) = string_param(params, &["url", "query", "full_name"]) {
                    let detected = detect_github_request(&text);
                    owner = owner.or(detected.owner);
                    repo = repo.or(detected.repo);
                }
            }

            let (Some(owner), Some(repo)) = (owner, repo) else {
                return Err(ToolError::InvalidParameters {
                    tool_name: tool_id.to_string(),
                    message: "missing repository owner and name".to_string(),
                });
            };
            let action = string_param(params, &["action"])
                .filter(|a| GITHUB_ACTIONS.contains(&a.as_str()))
                .unwrap_or_else(|| "get_repo".to_string());

            Ok(json!({
                "action": action,
                "owner": owner,
                "repo": repo,
                "callerId": caller.caller_id(),
            }))
        }
        _ => {
            let mut map = match params {
                Value::Object(map) => map.clone(),
                Value::Null => Map::new(),
                other => {
                    let mut map = Map::new();
                    map.insert("query".to_string(), other.clone());
                    map
                }
            };
            map.insert("callerId".to_string(), json!(caller.caller_id()));
            Ok(Value::Object(map))
        }
    }
}

/// Classify a backend response body.
///
/// `success: false` is an error; a `data` or `results` envelope is
/// unwrapped; anything else passes through unchanged.
pub fn classify_response(tool_id: &str, body: Value) -> ToolCallResult<Value> {
    let Value::Object(mut map) = body else {
        return Ok(body);
    };

    if map.get("success").and_then(Value::as_bool) == Some(false) {
        let message = match map.get("error") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(e)) => e
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("tool reported failure")
                .to_string(),
            _ => "tool reported failure".to_string(),
        };
        let status = map
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok());
        return Err(ToolError::Backend {
            tool_name: tool_id.to_string(),
            message,
            status,
        });
    }

    if let Some(data) = map.remove("data") {
        return Ok(data);
    }
    if let Some(results) = map.remove("results") {
        return Ok(results);
    }
    Ok(Value::Object(map))
}

fn string_param(params: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| params.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
