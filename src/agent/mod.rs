//! Agentic orchestration components.
//!
//! The request pipeline is split into one component per stage:
//! - [`DecisionAnalyzer`]: pattern-table classification of tool need
//! - [`OrchestrationPlanner`]: decision to ordered, dependency-annotated steps
//! - [`ToolExecutor`]: invocation, parameter shaping and progress tracking
//! - [`FallbackController`]: deterministic tool runs when the model made none
//! - [`SynthesisEngine`]: failure-aware merge of tool output into an answer
//! - [`ReflectionController`]: bounded continue/stop decisions
//! - [`KnowledgeGate`]: learn-or-skip insight persistence
//!
//! [`AgentOrchestrator`] wires them together behind `handle_query`.

mod core;
mod decision;
mod executor;
mod fallback;
mod orchestrator;
mod persistence;
mod planner;
mod reflection;
mod synthesis;
mod types;

pub use core::*;
pub use decision::*;
pub use executor::*;
pub use fallback::*;
pub use orchestrator::*;
pub use persistence::*;
pub use planner::*;
pub use reflection::*;
pub use synthesis::*;
pub use types::*;

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::warn;

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid trailing comma regex"));

/// Serialize a value to JSON for logging, with warning on failure.
pub(crate) fn serialize_for_log<T: serde::Serialize>(value: &T, context: &str) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(
            error = %e,
            context = %context,
            "Failed to serialize value for invocation log"
        );
        serde_json::json!({
            "serialization_error": e.to_string(),
            "context": context
        })
    })
}

/// Recover a JSON value from model output.
///
/// Attempts extraction in this order:
/// 1. Parse the whole text
/// 2. Parse the body of a ```json or ``` code block
/// 3. Parse the first balanced `{...}` object found in prose
/// 4. Parse that object again after stripping smart quotes, control
///    characters and trailing commas
pub(crate) fn extract_json_value(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(block) = code_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            return Some(value);
        }
    }

    let object = first_json_object(trimmed)?;
    if let Ok(value) = serde_json::from_str::<Value>(object) {
        return Some(value);
    }

    serde_json::from_str::<Value>(&aggressive_strip(object)).ok()
}

fn code_block(text: &str) -> Option<&str> {
    let body = if text.contains("```json") {
        text.split("```json").nth(1)?
    } else {
        text.split("```").nth(1)?
    };
    let body = body.split("```").next()?.trim();
    (!body.is_empty()).then_some(body)
}

/// Return the first brace-balanced object in `text`, ignoring braces
/// inside string literals.
pub(crate) fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    // Unbalanced: hand back everything up to the last closing brace
    text.rfind('}')
        .filter(|end| *end > start)
        .map(|end| &text[start..=end])
}

fn aggressive_strip(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| match c {
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            '\n' | '\r' | '\t' => ' ',
            c => c,
        })
        .filter(|c| !c.is_control())
        .collect();
    TRAILING_COMMA.replace_all(&cleaned, "$1").into_owned()
}

/// Truncate to at most `max` characters, appending an ellipsis when cut.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}
