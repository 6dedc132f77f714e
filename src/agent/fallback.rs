//! Deterministic tool runs for when the model made no tool calls.
//!
//! Every path renders its answer straight from the raw payload, so the
//! caller gets a usable, non-empty response even if the model never
//! cooperates.

use serde_json::{json, Value};
use tracing::info;

use super::{
    truncate_chars, CallerContext, DetectedType, ExecutionOutcome, ToolCallRequest, ToolDecision,
    ToolExecutor, ToolResult,
};
use crate::error::ToolError;
use crate::tools::{
    detect_github_request, ToolRegistry, GITHUB_REPO, JIRA_SEARCH, KNOWLEDGE_SEARCH, WEB_SEARCH,
};

/// Knowledge results shown in a forced answer.
pub const MAX_KNOWLEDGE_RESULTS: usize = 3;
/// Web results shown in a forced answer.
pub const MAX_WEB_RESULTS: usize = 5;
/// Issues shown in a forced answer.
pub const MAX_JIRA_ISSUES: usize = 5;
/// Snippet length in a forced answer, in characters.
pub const SNIPPET_CHARS: usize = 200;

const LIKELY_CAUSES: &str = "This usually means the tool gateway is misconfigured, \
the resource is private or the service is rate limiting requests.";

/// Outcome of a forced run.
#[derive(Debug, Clone)]
pub struct ForcedResult {
    /// Never empty.
    pub final_response: String,
    pub outcome: ExecutionOutcome,
}

/// Drives the minimum tool execution a decision called for.
#[derive(Clone, Default)]
pub struct FallbackController {
    executor: ToolExecutor,
}

impl FallbackController {
    pub fn new(executor: ToolExecutor) -> Self {
        Self { executor }
    }

    /// Force tool execution when the decision wanted tools but the model
    /// produced no calls. Returns `None` otherwise.
    pub async fn maybe_force(
        &self,
        decision: &ToolDecision,
        message: &str,
        caller: &CallerContext,
        registry: &ToolRegistry,
        model_tool_calls: usize,
    ) -> Option<ForcedResult> {
        if !decision.should_use_tools || model_tool_calls > 0 {
            return None;
        }

        info!(
            detected_type = %decision.detected_type,
            "Model made no tool calls, forcing execution"
        );

        let forced = match decision.detected_type {
            DetectedType::Github => self.force_github(message, caller, registry).await,
            DetectedType::Knowledge => self.force_knowledge(message, caller, registry).await,
            DetectedType::Jira => self.force_jira(message, caller, registry).await,
            DetectedType::Search | DetectedType::General | DetectedType::None => {
                self.force_search(message, caller, registry).await
            }
        };
        Some(forced)
    }

    async fn run(
        &self,
        tool: &str,
        params: Value,
        caller: &CallerContext,
        registry: &ToolRegistry,
    ) -> (ToolResult, ExecutionOutcome) {
        let outcome = self
            .executor
            .execute(&[ToolCallRequest::new(tool, params)], registry, caller)
            .await;
        let result = outcome.results.first().cloned().unwrap_or_else(|| {
            ToolResult::failed(
                tool,
                Value::Null,
                &ToolError::NotFound {
                    tool_name: tool.to_string(),
                },
            )
        });
        (result, outcome)
    }

    async fn force_github(
        &self,
        message: &str,
        caller: &CallerContext,
        registry: &ToolRegistry,
    ) -> ForcedResult {
        let request = detect_github_request(message);
        let (Some(owner), Some(repo)) = (request.owner.clone(), request.repo.clone()) else {
            return ForcedResult {
                final_response: "I couldn't find a repository reference in your message. \
                    Please include it as a URL like https://github.com/owner/repo or as owner/repo."
                    .to_string(),
                outcome: ExecutionOutcome::default(),
            };
        };
        let full_name = format!("{}/{}", owner, repo);

        let (result, outcome) = self
            .run(GITHUB_REPO, json!({ "owner": owner, "repo": repo }), caller, registry)
            .await;

        let final_response = if result.success && !result.is_empty() {
            render_repository(&full_name, &result.result)
        } else if result.success {
            format!(
                "The repository tool returned no details for **{}**. {}",
                full_name, LIKELY_CAUSES
            )
        } else {
            format!(
                "I couldn't retrieve details for **{}**: {}. {} {}",
                full_name,
                result.error_message().unwrap_or("unknown error"),
                result.remediation().unwrap_or(""),
                LIKELY_CAUSES
            )
        };

        ForcedResult {
            final_response,
            outcome,
        }
    }

    async fn force_knowledge(
        &self,
        message: &str,
        caller: &CallerContext,
        registry: &ToolRegistry,
    ) -> ForcedResult {
        let (result, outcome) = self
            .run(KNOWLEDGE_SEARCH, json!({ "query": message }), caller, registry)
            .await;

        let final_response = if result.success {
            let items = result_items(&result.result);
            if items.is_empty() {
                format!(
                    "No results found in knowledge base for \"{}\". Try different keywords or add the relevant documents.",
                    truncate_chars(message, 80)
                )
            } else {
                render_knowledge(&items)
            }
        } else {
            failure_text("knowledge base", &result)
        };

        ForcedResult {
            final_response,
            outcome,
        }
    }

    async fn force_search(
        &self,
        message: &str,
        caller: &CallerContext,
        registry: &ToolRegistry,
    ) -> ForcedResult {
        // Owned data first; the web only when the knowledge base has nothing
        let (knowledge, mut outcome) = self
            .run(KNOWLEDGE_SEARCH, json!({ "query": message }), caller, registry)
            .await;
        let knowledge_items = if knowledge.success {
            result_items(&knowledge.result)
        } else {
            Vec::new()
        };
        if !knowledge_items.is_empty() {
            return ForcedResult {
                final_response: render_knowledge(&knowledge_items),
                outcome,
            };
        }

        let (web, web_outcome) = self
            .run(WEB_SEARCH, json!({ "query": message }), caller, registry)
            .await;
        outcome.extend(web_outcome);

        let knowledge_note = if knowledge.success {
            "No results found in knowledge base.".to_string()
        } else {
            failure_text("knowledge base", &knowledge)
        };

        let final_response = if web.success {
            let items = result_items(&web.result);
            if items.is_empty() {
                format!(
                    "{} No results found in web search either. Try rephrasing the request with more specific terms.",
                    knowledge_note
                )
            } else {
                format!("{}\n\n{}", knowledge_note, render_web(&items))
            }
        } else {
            format!("{}\n\n{}", knowledge_note, failure_text("web search", &web))
        };

        ForcedResult {
            final_response,
            outcome,
        }
    }

    async fn force_jira(
        &self,
        message: &str,
        caller: &CallerContext,
        registry: &ToolRegistry,
    ) -> ForcedResult {
        let (result, outcome) = self
            .run(
                JIRA_SEARCH,
                json!({ "action": "search", "query": message }),
                caller,
                registry,
            )
            .await;

        let final_response = if result.success {
            let issues = match result.result.get("issues") {
                Some(Value::Array(issues)) => issues.clone(),
                _ => result_items(&result.result),
            };
            if issues.is_empty() {
                "No results found in Jira for this request. Check the project key or try broader terms."
                    .to_string()
            } else {
                render_issues(&issues)
            }
        } else {
            failure_text("Jira", &result)
        };

        ForcedResult {
            final_response,
            outcome,
        }
    }
}

/// Items of a list-shaped payload: the payload itself or its `results`.
fn result_items(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.clone(),
        Value::Object(map) => ["results", "items", "documents"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn failure_text(source: &str, result: &ToolResult) -> String {
    format!(
        "I couldn't search the {}: {}. {} {}",
        source,
        result.error_message().unwrap_or("unknown error"),
        result.remediation().unwrap_or(""),
        LIKELY_CAUSES
    )
}

fn text_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match value.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Render a repository summary. Always names `full_name`.
pub fn render_repository(full_name: &str, payload: &Value) -> String {
    let repo = payload
        .get("repository")
        .or_else(|| payload.get("repo"))
        .filter(|v| v.is_object())
        .unwrap_or(payload);

    let license = match repo.get("license") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(obj @ Value::Object(_)) => text_field(obj, &["name", "spdx_id", "key"]),
        _ => None,
    };
    let or_unknown = |v: Option<String>| v.unwrap_or_else(|| "Not specified".to_string());

    let mut lines = vec![format!("**{}**", full_name)];
    lines.push(format!(
        "Description: {}",
        or_unknown(text_field(repo, &["description"]))
    ));
    lines.push(format!(
        "Language: {}",
        or_unknown(text_field(repo, &["language"]))
    ));
    lines.push(format!(
        "Stars: {} | Forks: {}",
        or_unknown(text_field(repo, &["stargazers_count", "stars", "stargazers"])),
        or_unknown(text_field(repo, &["forks_count", "forks"]))
    ));
    lines.push(format!("License: {}", or_unknown(license)));
    lines.push(format!(
        "Created: {} | Last updated: {}",
        or_unknown(text_field(repo, &["created_at", "createdAt"])),
        or_unknown(text_field(repo, &["updated_at", "updatedAt", "pushed_at"]))
    ));
    if let Some(issues) = text_field(repo, &["open_issues_count", "open_issues"]) {
        lines.push(format!("Open issues: {}", issues));
    }
    if let Some(url) = text_field(repo, &["html_url", "url"]) {
        lines.push(format!("URL: {}", url));
    }
    lines.join("\n")
}

fn render_knowledge(items: &[Value]) -> String {
    let mut out = String::from("Here is what I found in the knowledge base:");
    for (i, item) in items.iter().take(MAX_KNOWLEDGE_RESULTS).enumerate() {
        let title = text_field(item, &["title", "name", "source"])
            .or_else(|| item.get("metadata").and_then(|m| text_field(m, &["title", "source"])))
            .unwrap_or_else(|| format!("Result {}", i + 1));
        let snippet = text_field(item, &["content", "text", "snippet", "chunk"])
            .map(|s| truncate_chars(&s, SNIPPET_CHARS))
            .unwrap_or_default();
        out.push_str(&format!("\n\n{}. **{}**\n{}", i + 1, title, snippet));
    }
    out
}

fn render_web(items: &[Value]) -> String {
    let mut out = String::from("Here is what I found on the web:");
    for (i, item) in items.iter().take(MAX_WEB_RESULTS).enumerate() {
        let title =
            text_field(item, &["title", "name"]).unwrap_or_else(|| format!("Result {}", i + 1));
        out.push_str(&format!("\n\n{}. **{}**", i + 1, title));
        if let Some(url) = text_field(item, &["url", "link"]) {
            out.push_str(&format!("\n{}", url));
        }
        if let Some(snippet) = text_field(item, &["snippet", "description", "content"]) {
            out.push_str(&format!("\n{}", truncate_chars(&snippet, SNIPPET_CHARS)));
        }
    }
    out
}

fn render_issues(issues: &[Value]) -> String {
    let mut out = format!(
        "Found {} matching issue{}:",
        issues.len(),
        if issues.len() == 1 { "" } else { "s" }
    );
    for issue in issues.iter().take(MAX_JIRA_ISSUES) {
        let fields = issue.get("fields").unwrap_or(issue);
        let key = text_field(issue, &["key", "id"]).unwrap_or_else(|| "?".to_string());
        let summary = text_field(fields, &["summary", "title"]).unwrap_or_default();
        let status = match fields.get("status") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(obj @ Value::Object(_)) => text_field(obj, &["name"]),
            _ => None,
        };
        out.push_str(&format!("\n- {}: {}", key, summary));
        if let Some(status) = status {
            out.push_str(&format!(" ({})", status));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::DecisionAnalyzer;
    use crate::error::ToolCallResult;
    use crate::tools::{builtin_descriptor, ToolBackend, BUILTIN_TOOL_IDS};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedBackend(fn(&str, &Value) -> ToolCallResult<Value>);

    #[async_trait]
    impl ToolBackend for FixedBackend {
        async fn invoke(&self, tool_id: &str, params: Value) -> ToolCallResult<Value> {
            (self.0)(tool_id, &params)
        }
    }

    fn registry(reply: fn(&str, &Value) -> ToolCallResult<Value>) -> ToolRegistry {
        let backend: Arc<dyn ToolBackend> = Arc::new(FixedBackend(reply));
        let mut registry = ToolRegistry::new();
        for id in BUILTIN_TOOL_IDS {
            registry.register(builtin_descriptor(id).unwrap(), backend.clone());
        }
        registry
    }

    fn decide(message: &str) -> ToolDecision {
        DecisionAnalyzer::new(BUILTIN_TOOL_IDS.iter().map(|s| s.to_string()).collect())
            .analyze(message)
            .unwrap()
    }

    async fn force(
        message: &str,
        reply: fn(&str, &Value) -> ToolCallResult<Value>,
    ) -> ForcedResult {
        let caller = CallerContext::default();
        FallbackController::default()
            .maybe_force(&decide(message), message, &caller, &registry(reply), 0)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_not_triggered_when_model_called_tools() {
        let msg = "https://github.com/acme/widgets";
        let caller = CallerContext::default();
        let tools = registry(|_, _| Ok(json!({})));
        let out = FallbackController::default()
            .maybe_force(&decide(msg), msg, &caller, &tools, 1)
            .await;
        assert!(out.is_none());

        let mut decision = decide(msg);
        decision.should_use_tools = false;
        let out = FallbackController::default()
            .maybe_force(&decision, msg, &caller, &tools, 0)
            .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_github_summary_names_repository() {
        let forced = force("https://github.com/acme/widgets", |_, params| {
            assert_eq!(params["owner"], "acme");
            assert_eq!(params["repo"], "widgets");
            Ok(json!({"success": true, "data": {
                "description": "Widget toolkit",
                "language": "Rust",
                "stargazers_count": 42,
                "forks_count": 7,
                "license": {"name": "MIT License"},
                "created_at": "2020-01-01T00:00:00Z",
                "updated_at": "2024-06-01T00:00:00Z"
            }}))
        })
        .await;

        let text = forced.final_response;
        assert!(text.contains("acme/widgets"));
        assert!(text.contains("Widget toolkit"));
        assert!(text.contains("Stars: 42 | Forks: 7"));
        assert!(text.contains("MIT License"));
        assert_eq!(forced.outcome.used, vec![GITHUB_REPO.to_string()]);
    }

    #[tokio::test]
    async fn test_github_failure_still_names_repository() {
        let forced = force("https://github.com/acme/widgets", |_, _| {
            Err(ToolError::Backend {
                tool_name: GITHUB_REPO.to_string(),
                message: "Not Found".to_string(),
                status: Some(404),
            })
        })
        .await;
        assert!(forced.final_response.contains("acme/widgets"));
        assert!(forced.final_response.contains("private"));
    }

    #[tokio::test]
    async fn test_search_prefers_knowledge() {
        let forced = force("search for quantum computing news", |tool, _| match tool {
            KNOWLEDGE_SEARCH => Ok(json!({"results": [
                {"title": "Qubits 101", "content": "Superposition explained"},
                {"title": "B"}, {"title": "C"}, {"title": "D"}
            ]})),
            _ => panic!("web search must not run when knowledge has results"),
        })
        .await;
        assert!(forced.final_response.contains("Qubits 101"));
        assert!(!forced.final_response.contains("4. "));
        assert_eq!(forced.outcome.used, vec![KNOWLEDGE_SEARCH.to_string()]);
    }

    #[tokio::test]
    async fn test_search_escalates_on_empty_knowledge() {
        let forced = force("search for quantum computing news", |tool, _| match tool {
            KNOWLEDGE_SEARCH => Ok(json!({"success": true, "results": []})),
            _ => Ok(json!({"success": true, "data": [
                {"title": "Quantum leap", "url": "https://example.com/q"}
            ]})),
        })
        .await;
        let text = forced.final_response;
        assert!(text.contains("No results found in knowledge base."));
        assert!(text.contains("Quantum leap"));
        assert!(!text.to_lowercase().contains("no data exists"));
        assert_eq!(forced.outcome.results.len(), 2);
    }

    #[tokio::test]
    async fn test_total_failure_is_explained() {
        let forced = force("search for quantum computing news", |tool, _| {
            Err(ToolError::Backend {
                tool_name: tool.to_string(),
                message: "connection refused".to_string(),
                status: None,
            })
        })
        .await;
        assert!(!forced.final_response.is_empty());
        assert!(forced.final_response.contains("misconfigured"));
    }

    #[tokio::test]
    async fn test_jira_lists_at_most_five() {
        let forced = force("Show open tickets in jira for the ABC-1 epic", |_, _| {
            let issues: Vec<Value> = (1..=7)
                .map(|i| {
                    json!({
                        "key": format!("ABC-{}", i),
                        "fields": {"summary": "Fix", "status": {"name": "Open"}}
                    })
                })
                .collect();
            Ok(json!({"success": true, "data": {"issues": issues}}))
        })
        .await;
        assert!(forced.final_response.starts_with("Found 7 matching issues"));
        assert!(forced.final_response.contains("ABC-5: Fix (Open)"));
        assert!(!forced.final_response.contains("ABC-6"));
    }

    #[test]
    fn test_render_repository_defaults() {
        let text = render_repository("acme/widgets", &json!({}));
        assert!(text.starts_with("**acme/widgets**"));
        assert!(text.contains("Language: Not specified"));
    }
}
