//! Learn-or-skip knowledge persistence.
//!
//! After a request finishes, the gate decides whether the exchange taught
//! anything worth keeping, asks the model to distil it into one insight,
//! rejects duplicates by title similarity and writes the node together with
//! its searchable chunk.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::{extract_json_value, ToolResult};
use crate::completion::{CompletionClient, Message, ModelSettings};
use crate::config::AgentConfig;
use crate::error::{StorageError, StorageResult};
use crate::prompts::{insight_request, INSIGHT_EXTRACTION_PROMPT};
use crate::storage::{InsightType, KnowledgeNode, SqliteStorage, Storage, ValidationStatus};

/// Temperature of the extraction call.
pub const EXTRACTION_TEMPERATURE: f64 = 0.2;

const TITLE_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "about", "how", "what", "why", "use", "using",
    "are", "its", "your", "our", "this", "that",
];

/// A distilled, durable insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeInsight {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub insight_type: InsightType,
    pub confidence: f64,
    pub domain: String,
    pub tags: Vec<String>,
    pub is_significant: bool,
    pub tools_involved: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Result of the learn-or-skip check.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningValidation {
    pub should_learn: bool,
    /// Store as tentative knowledge.
    pub tentative: bool,
    /// Multiplier applied to the extracted confidence.
    pub confidence_scale: f64,
    pub reason: String,
}

/// Context of the iteration that produced the final answer.
#[derive(Debug, Clone, Default)]
pub struct IterationContext {
    pub owner_id: String,
    pub session_id: Option<String>,
    pub iteration: u32,
    pub tools_used: Vec<String>,
    /// Caller model overrides for the extraction call.
    pub settings: ModelSettings,
}

/// Outcome of a persistence attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOutcome {
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub reason: String,
}

impl PersistOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            persisted: false,
            node_id: None,
            reason: reason.into(),
        }
    }
}

/// Correction of an existing knowledge node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeCorrection {
    pub title: Option<String>,
    pub description: String,
    pub confidence: Option<f64>,
}

/// Skip when every tool failed; tentative when most successful results
/// were empty; otherwise learn with confidence scaled by success ratio.
/// With no tool results there is nothing grounded to learn from.
pub fn validate_learning(results: &[ToolResult]) -> LearningValidation {
    if results.is_empty() {
        return LearningValidation {
            should_learn: false,
            tentative: false,
            confidence_scale: 0.0,
            reason: "No tool evidence to learn from".to_string(),
        };
    }

    let successful: Vec<&ToolResult> = results.iter().filter(|r| r.success).collect();
    if successful.is_empty() {
        return LearningValidation {
            should_learn: false,
            tentative: false,
            confidence_scale: 0.0,
            reason: "All tools failed".to_string(),
        };
    }

    let ratio = successful.len() as f64 / results.len() as f64;
    let empty = successful.iter().filter(|r| r.is_empty()).count();
    if empty * 2 > successful.len() {
        return LearningValidation {
            should_learn: true,
            tentative: true,
            confidence_scale: ratio * 0.5,
            reason: format!("{} of {} successful tools returned no data", empty, successful.len()),
        };
    }

    LearningValidation {
        should_learn: true,
        tentative: false,
        confidence_scale: ratio,
        reason: format!("{} of {} tools succeeded", successful.len(), results.len()),
    }
}

/// Parse an extraction answer into an insight.
///
/// Fails when no JSON can be recovered or `title`, `description` or
/// `isSignificant` is missing.
pub fn parse_insight(text: &str, tools_involved: &[String]) -> Result<KnowledgeInsight, String> {
    let value = extract_json_value(text).ok_or_else(|| "No JSON found in extraction".to_string())?;
    let Value::Object(map) = value else {
        return Err("Extraction is not a JSON object".to_string());
    };

    let required_str = |key: &str| -> Result<String, String> {
        map.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| format!("Missing required field: {}", key))
    };

    let title = required_str("title")?;
    let description = required_str("description")?;
    let is_significant = map
        .get("isSignificant")
        .or_else(|| map.get("is_significant"))
        .and_then(Value::as_bool)
        .ok_or_else(|| "Missing required field: isSignificant".to_string())?;

    Ok(KnowledgeInsight {
        title,
        description,
        insight_type: map
            .get("type")
            .and_then(Value::as_str)
            .and_then(|t| t.parse().ok())
            .unwrap_or_default(),
        confidence: map
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0),
        domain: map
            .get("domain")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("general")
            .to_string(),
        tags: map
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        is_significant,
        tools_involved: tools_involved.to_vec(),
        reasoning: map.get("reasoning").and_then(Value::as_str).map(str::to_string),
    })
}

fn title_tokens(title: &str) -> HashSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !TITLE_STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Whether two titles count as the same memory.
///
/// Titles match when they are equal ignoring case, or when their overlap
/// reaches `min(ceil(ratio * shorter), cap)` significant tokens.
pub fn titles_similar(a: &str, b: &str, ratio: f64, cap: usize) -> bool {
    if a.trim().eq_ignore_ascii_case(b.trim()) {
        return true;
    }
    let (ta, tb) = (title_tokens(a), title_tokens(b));
    let shorter = ta.len().min(tb.len());
    if shorter == 0 {
        return false;
    }
    let required = ((ratio * shorter as f64).ceil() as usize).min(cap).max(1);
    ta.intersection(&tb).count() >= required
}

/// Persists insights from finished exchanges.
#[derive(Clone)]
pub struct KnowledgeGate {
    storage: SqliteStorage,
    completion: CompletionClient,
    similarity_ratio: f64,
    similarity_cap: usize,
    enabled: bool,
}

impl KnowledgeGate {
    pub fn new(storage: SqliteStorage, completion: CompletionClient, config: &AgentConfig) -> Self {
        Self {
            storage,
            completion,
            similarity_ratio: config.similarity_ratio,
            similarity_cap: config.similarity_cap,
            enabled: config.persist_knowledge,
        }
    }

    /// Extract and store an insight if the exchange warrants one.
    ///
    /// Best effort: every failure is reported in the outcome, never raised.
    pub async fn maybe_persist(
        &self,
        message: &str,
        final_response: &str,
        context: &IterationContext,
        results: &[ToolResult],
    ) -> PersistOutcome {
        if !self.enabled {
            return PersistOutcome::skipped("Knowledge persistence disabled");
        }

        let validation = validate_learning(results);
        if !validation.should_learn {
            debug!(reason = %validation.reason, "Skipping knowledge persistence");
            return PersistOutcome::skipped(validation.reason);
        }

        let messages = vec![
            Message::system(INSIGHT_EXTRACTION_PROMPT),
            Message::user(insight_request(message, final_response, &context.tools_used)),
        ];
        let text = match self
            .completion
            .complete(
                messages,
                &context.settings.without_temperature(),
                EXTRACTION_TEMPERATURE,
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Insight extraction failed");
                return PersistOutcome::skipped(format!("Extraction failed: {}", e));
            }
        };

        let insight = match parse_insight(&text, &context.tools_used) {
            Ok(insight) => insight,
            Err(reason) => {
                debug!(reason = %reason, "Rejected insight");
                return PersistOutcome::skipped(reason);
            }
        };
        if !insight.is_significant {
            return PersistOutcome::skipped("Insight not significant");
        }

        self.store(message, insight, &validation, &context.owner_id).await
    }

    /// Store an already-extracted insight, enforcing the duplicate probe.
    pub async fn store(
        &self,
        message: &str,
        insight: KnowledgeInsight,
        validation: &LearningValidation,
        owner_id: &str,
    ) -> PersistOutcome {
        let existing = match self.storage.list_knowledge_titles(owner_id).await {
            Ok(titles) => titles,
            Err(e) => {
                warn!(error = %e, "Duplicate probe failed, not persisting");
                return PersistOutcome::skipped(format!("Duplicate probe failed: {}", e));
            }
        };
        if let Some(dup) = existing.iter().find(|t| {
            t.validation_status != ValidationStatus::Deprecated
                && titles_similar(
                    &t.title,
                    &insight.title,
                    self.similarity_ratio,
                    self.similarity_cap,
                )
        }) {
            debug!(existing = %dup.title, title = %insight.title, "Duplicate insight skipped");
            return PersistOutcome::skipped(format!(
                "Similar insight already stored: {}",
                dup.title
            ));
        }

        let (node_type, status) = if validation.tentative {
            (InsightType::TentativeFact, ValidationStatus::Tentative)
        } else {
            (insight.insight_type, ValidationStatus::Validated)
        };

        let node = KnowledgeNode::new(owner_id, &insight.title, &insight.description)
            .with_type(node_type)
            .with_confidence(insight.confidence * validation.confidence_scale)
            .with_domain(&insight.domain)
            .with_tags(insight.tags.clone())
            .with_tools(insight.tools_involved.clone())
            .with_status(status)
            .with_source(message);
        let chunk = node.to_chunk();

        match self.storage.create_knowledge(&node, &chunk).await {
            Ok(()) => {
                info!(
                    node_id = %node.id,
                    title = %node.title,
                    status = %status,
                    "Insight persisted"
                );
                PersistOutcome {
                    persisted: true,
                    node_id: Some(node.id),
                    reason: validation.reason.clone(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist insight");
                PersistOutcome::skipped(format!("Storage error: {}", e))
            }
        }
    }

    /// Add a corrected node and deprecate the old one. Nothing is deleted.
    pub async fn correct(
        &self,
        node_id: &str,
        correction: &KnowledgeCorrection,
    ) -> StorageResult<KnowledgeNode> {
        let old = self
            .storage
            .get_knowledge_node(node_id)
            .await?
            .ok_or_else(|| StorageError::NodeNotFound {
                node_id: node_id.to_string(),
            })?;

        let title = correction
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&old.title);
        let node = KnowledgeNode::new(&old.owner_id, title, &correction.description)
            .with_type(old.node_type)
            .with_confidence(correction.confidence.unwrap_or(old.confidence))
            .with_domain(&old.domain)
            .with_tags(old.tags.clone())
            .with_tools(old.tools_involved.clone())
            .with_status(ValidationStatus::Validated);
        let node = match &old.source_message {
            Some(source) => node.with_source(source),
            None => node,
        };
        let chunk = node.to_chunk();

        self.storage.supersede_knowledge(&old.id, &node, &chunk).await?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use serde_json::json;

    fn ok(payload: Value) -> ToolResult {
        ToolResult::ok("web-search", json!({}), payload)
    }

    fn failed() -> ToolResult {
        ToolResult::failed(
            "web-search",
            json!({}),
            &ToolError::NotFound {
                tool_name: "web-search".to_string(),
            },
        )
    }

    #[test]
    fn test_validation_skips_total_failure() {
        let v = validate_learning(&[failed(), failed()]);
        assert!(!v.should_learn);
        assert!(!validate_learning(&[]).should_learn);
    }

    #[test]
    fn test_validation_tentative_when_mostly_empty() {
        let v = validate_learning(&[ok(json!([])), ok(json!({"results": []})), ok(json!([1]))]);
        assert!(v.should_learn);
        assert!(v.tentative);
    }

    #[test]
    fn test_validation_scales_by_success_ratio() {
        let v = validate_learning(&[ok(json!([1])), failed()]);
        assert!(v.should_learn);
        assert!(!v.tentative);
        assert!((v.confidence_scale - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_insight_fenced() {
        let text = "```json\n{\"title\": \"Tokio runtime\", \"description\": \"Multi-threaded scheduler\", \"type\": \"concept\", \"confidence\": 0.9, \"tags\": [\"Rust\"], \"isSignificant\": true}\n```";
        let insight = parse_insight(text, &["web-search".to_string()]).unwrap();
        assert_eq!(insight.title, "Tokio runtime");
        assert_eq!(insight.insight_type, InsightType::Concept);
        assert_eq!(insight.tags, vec!["rust".to_string()]);
        assert_eq!(insight.domain, "general");
        assert_eq!(insight.tools_involved, vec!["web-search".to_string()]);
    }

    #[test]
    fn test_parse_insight_rejects_missing_fields() {
        assert!(parse_insight(r#"{"title": "x", "isSignificant": true}"#, &[]).is_err());
        assert!(parse_insight(r#"{"title": "x", "description": "y"}"#, &[]).is_err());
        assert!(parse_insight("nothing useful", &[]).is_err());
    }

    #[test]
    fn test_title_similarity() {
        assert!(titles_similar("Tokio Runtime", "tokio runtime", 0.6, 3));
        assert!(titles_similar(
            "Tokio runtime scheduling model",
            "Scheduling model of the Tokio runtime explained in depth",
            0.6,
            3
        ));
        assert!(!titles_similar("Tokio runtime", "Python asyncio loop", 0.6, 3));
        // Shorter title has 2 tokens: ceil(0.6 * 2) = 2 must overlap
        assert!(!titles_similar("Tokio runtime", "Tokio channels", 0.6, 3));
    }
}
