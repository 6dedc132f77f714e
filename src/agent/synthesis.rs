use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{truncate_chars, ToolResult};
use crate::completion::{CompletionClient, Message, ModelSettings};
use crate::prompts::{synthesis_request, SYNTHESIS_PROMPT};
use crate::storage::{KnowledgeHit, ValidationStatus};
use crate::tools::{GITHUB_REPO, JIRA_SEARCH, KNOWLEDGE_SEARCH, WEB_SCRAPE, WEB_SEARCH};

/// Characters of each tool payload passed to the model.
pub const MAX_PAYLOAD_CHARS: usize = 8_000;
/// Characters of each tool payload quoted in a fallback answer.
pub const FALLBACK_PAYLOAD_CHARS: usize = 600;
/// Temperature of the synthesis call.
pub const SYNTHESIS_TEMPERATURE: f64 = 0.3;

/// How useful a batch of tool results is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionQuality {
    /// Every invocation failed.
    Failed,
    /// More than half of the successful invocations came back empty.
    Low,
    /// Some failures or some empty results.
    Medium,
    /// Everything succeeded with data.
    High,
}

impl ToolExecutionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolExecutionQuality::Failed => "failed",
            ToolExecutionQuality::Low => "low",
            ToolExecutionQuality::Medium => "medium",
            ToolExecutionQuality::High => "high",
        }
    }
}

impl std::fmt::Display for ToolExecutionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify a batch of tool results. An empty batch is `Low`: there is
/// nothing to ground an answer on.
pub fn assess_quality(results: &[ToolResult]) -> ToolExecutionQuality {
    if results.is_empty() {
        return ToolExecutionQuality::Low;
    }

    let successful: Vec<&ToolResult> = results.iter().filter(|r| r.success).collect();
    if successful.is_empty() {
        return ToolExecutionQuality::Failed;
    }

    let empty = successful.iter().filter(|r| r.is_empty()).count();
    if empty * 2 > successful.len() {
        ToolExecutionQuality::Low
    } else if successful.len() < results.len() || empty > 0 {
        ToolExecutionQuality::Medium
    } else {
        ToolExecutionQuality::High
    }
}

/// Human name of the place a tool looks in, for "no results found in ..."
pub fn source_label(tool: &str) -> &str {
    match tool {
        KNOWLEDGE_SEARCH => "knowledge base",
        WEB_SEARCH => "web search",
        WEB_SCRAPE => "the scraped page",
        GITHUB_REPO => "GitHub",
        JIRA_SEARCH => "Jira",
        other => other,
    }
}

fn status_tag(status: ValidationStatus) -> &'static str {
    match status {
        ValidationStatus::Validated => "VALIDATED",
        ValidationStatus::Tentative => "TENTATIVE",
        ValidationStatus::Deprecated => "DEPRECATED",
    }
}

fn render_payload(payload: &Value, max: usize) -> String {
    let text = match payload {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    truncate_chars(&text, max)
}

/// Numbered tool sections for the synthesis prompt.
fn tool_sections(results: &[ToolResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            if r.success {
                let state = if r.is_empty() {
                    format!("SUCCESS, no results found in {}", source_label(&r.name))
                } else {
                    "SUCCESS".to_string()
                };
                format!(
                    "[{}] {} - {}\nParameters: {}\nResult:\n{}",
                    i + 1,
                    r.name,
                    state,
                    r.parameters,
                    render_payload(&r.result, MAX_PAYLOAD_CHARS)
                )
            } else {
                format!(
                    "[{}] {} - FAILED\nError: {}\nRemediation: {}",
                    i + 1,
                    r.name,
                    r.error_message().unwrap_or("unknown error"),
                    r.remediation().unwrap_or("none")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn knowledge_sections(knowledge: &[KnowledgeHit]) -> String {
    knowledge
        .iter()
        .map(|k| {
            format!(
                "- [{}] {}: {}",
                status_tag(k.validation_status),
                k.title,
                truncate_chars(&k.content, 1_000)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic answer built from the quality classification, the tool
/// results and any stored knowledge. Never empty.
pub fn generate_fallback_response(
    message: &str,
    results: &[ToolResult],
    knowledge: &[KnowledgeHit],
    quality: ToolExecutionQuality,
) -> String {
    let mut out = match quality {
        ToolExecutionQuality::Failed => format!(
            "I wasn't able to retrieve information for \"{}\" because every tool call failed.",
            truncate_chars(message, 80)
        ),
        ToolExecutionQuality::Low => format!(
            "I found only limited information for \"{}\".",
            truncate_chars(message, 80)
        ),
        ToolExecutionQuality::Medium => {
            "Here is what I found. Some sources returned partial results.".to_string()
        }
        ToolExecutionQuality::High => "Here is what I found.".to_string(),
    };

    for result in results {
        let label = source_label(&result.name);
        if !result.success {
            out.push_str(&format!(
                "\n\n**{}** failed: {}. {}",
                result.name,
                result.error_message().unwrap_or("unknown error"),
                result.remediation().unwrap_or("")
            ));
        } else if result.is_empty() {
            out.push_str(&format!("\n\n**{}**: no results found in {}.", result.name, label));
        } else {
            out.push_str(&format!(
                "\n\n**{}**:\n{}",
                result.name,
                render_payload(&result.result, FALLBACK_PAYLOAD_CHARS)
            ));
        }
    }

    if !knowledge.is_empty() {
        out.push_str("\n\nRelated stored knowledge:");
        for hit in knowledge.iter().take(3) {
            out.push_str(&format!(
                "\n- [{}] {}: {}",
                status_tag(hit.validation_status),
                hit.title,
                truncate_chars(&hit.content, 200)
            ));
        }
    }

    if matches!(quality, ToolExecutionQuality::Failed | ToolExecutionQuality::Low) {
        out.push_str(
            "\n\nNext steps: try rephrasing the request with more specific terms, \
             check that the tool gateway is reachable and configured, or try again in a few minutes.",
        );
    }

    out
}

/// Merges tool output and stored knowledge into one answer.
#[derive(Clone)]
pub struct SynthesisEngine {
    completion: CompletionClient,
}

impl SynthesisEngine {
    pub fn new(completion: CompletionClient) -> Self {
        Self { completion }
    }

    /// Produce the final answer. Never empty: a failed or empty model
    /// answer is replaced by [`generate_fallback_response`].
    pub async fn synthesize(
        &self,
        message: &str,
        results: &[ToolResult],
        knowledge: &[KnowledgeHit],
        settings: &ModelSettings,
    ) -> String {
        let quality = assess_quality(results);
        debug!(quality = %quality, results = results.len(), "Synthesizing answer");

        let messages = vec![
            Message::system(SYNTHESIS_PROMPT),
            Message::user(synthesis_request(
                message,
                quality.as_str(),
                &tool_sections(results),
                &knowledge_sections(knowledge),
            )),
        ];

        match self
            .completion
            .complete(messages, settings, SYNTHESIS_TEMPERATURE)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("Synthesis returned empty output, using fallback response");
                generate_fallback_response(message, results, knowledge, quality)
            }
            Err(e) => {
                warn!(error = %e, "Synthesis call failed, using fallback response");
                generate_fallback_response(message, results, knowledge, quality)
            }
        }
    }
}
