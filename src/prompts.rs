//! Centralized prompt definitions for the agent loop
//!
//! This module contains all system prompts used by the orchestrator and
//! its components. Keeping them in one place keeps the parsing code and
//! the format it expects side by side.

use crate::agent::{ExecutionStep, ToolDecision};

/// System prompt for the model-driven tool-calling pass.
pub const AGENT_SYSTEM_PROMPT: &str = r#"You are a research assistant with access to external tools.

Guidelines:
- Call a tool whenever the user asks about repositories, current events, stored documents or tickets
- Prefer the knowledge search tool before searching the web
- Pass complete parameters; for repositories always include owner and repo
- If no tool is needed, answer directly and concisely
- Never invent tool output"#;

/// System prompt for merging tool output into a final answer.
pub const SYNTHESIS_PROMPT: &str = r#"You are an assistant that writes the final answer from tool results and stored knowledge.

Rules:
- Distinguish "no results found in <source>" from "no data exists"; never claim that no data exists
- Mark knowledge flagged TENTATIVE or DEPRECATED explicitly when you use it
- Include the full detail of tool payloads (names, numbers, dates, links) instead of summarizing it away
- When a tool failed, say which one and why, using the error text provided
- When result quality is LOW or FAILED, end with concrete next steps the user can take
- Answer in plain prose or markdown, never JSON"#;

/// System prompt for judging whether an answer needs another iteration.
pub const REFLECTION_PROMPT: &str = r#"You review an assistant's answer and decide whether another improvement pass is worthwhile.

Your response MUST be valid JSON in this exact format:
{
  "continue": false,
  "reasoning": "why the answer is or is not complete",
  "nextAction": "the refined request to run next, only when continue is true"
}

Guidelines:
- Continue only when the answer is missing information a tool could plausibly provide
- Do not continue to rephrase or polish an answer that is already complete
- nextAction must be a self-contained request, not an instruction to yourself

Always respond with valid JSON only, no other text."#;

/// System prompt for distilling a durable insight from a finished exchange.
pub const INSIGHT_EXTRACTION_PROMPT: &str = r#"You extract one durable, reusable insight from a question, its answer and the tools used.

Your response MUST be valid JSON in this exact format:
{
  "title": "short title, at most 10 words",
  "description": "the insight itself, self-contained",
  "type": "insight|concept|process|fact|strategy",
  "confidence": 0.8,
  "domain": "subject area",
  "tags": ["tag1", "tag2"],
  "isSignificant": true,
  "reasoning": "why this is or is not worth remembering"
}

Guidelines:
- Set isSignificant to false for greetings, small talk, failures and anything time-sensitive
- Only record facts that appear in the answer or tool output
- confidence should be between 0.0 and 1.0

Always respond with valid JSON only, no other text."#;

/// Render the decision and plan as hints appended to the system prompt.
pub fn plan_hints(decision: &ToolDecision, plan: &[ExecutionStep]) -> Option<String> {
    if !decision.should_use_tools || decision.suggested_tools.is_empty() {
        return None;
    }

    let mut hints = format!(
        "Request analysis: {} request ({} complexity). Suggested tools: {}.",
        decision.detected_type,
        decision.complexity,
        decision.suggested_tools.join(", ")
    );
    if !plan.is_empty() {
        hints.push_str("\nSuggested steps:");
        for step in plan {
            hints.push_str(&format!("\n{}. {} ({})", step.step, step.description, step.tool));
        }
    }
    Some(hints)
}

/// Build the user message for the synthesis call.
pub fn synthesis_request(
    message: &str,
    quality: &str,
    tool_sections: &str,
    knowledge_sections: &str,
) -> String {
    format!(
        "User request:\n{}\n\nTool result quality: {}\n\nTool results:\n{}\n\nStored knowledge:\n{}",
        message,
        quality.to_uppercase(),
        if tool_sections.is_empty() { "(none)" } else { tool_sections },
        if knowledge_sections.is_empty() { "(none)" } else { knowledge_sections },
    )
}

/// Build the user message for the reflection call.
pub fn reflection_request(message: &str, response: &str, tools_used: &[String]) -> String {
    format!(
        "Original request:\n{}\n\nTools used: {}\n\nAnswer to review:\n{}",
        message,
        if tools_used.is_empty() {
            "none".to_string()
        } else {
            tools_used.join(", ")
        },
        response
    )
}

/// Build the user message for insight extraction.
pub fn insight_request(message: &str, response: &str, tools_used: &[String]) -> String {
    format!(
        "Question:\n{}\n\nAnswer:\n{}\n\nTools used: {}",
        message,
        response,
        if tools_used.is_empty() {
            "none".to_string()
        } else {
            tools_used.join(", ")
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Complexity, DetectedType};

    fn decision(should_use: bool, tools: &[&str]) -> ToolDecision {
        ToolDecision {
            should_use_tools: should_use,
            detected_type: DetectedType::Search,
            reasoning: String::new(),
            confidence: 0.5,
            complexity: Complexity::Simple,
            suggested_tools: tools.iter().map(|s| s.to_string()).collect(),
            estimated_steps: 2,
            fallback_strategy: None,
        }
    }

    #[test]
    fn test_json_prompts_request_json() {
        for prompt in [REFLECTION_PROMPT, INSIGHT_EXTRACTION_PROMPT] {
            assert!(prompt.contains("valid JSON"));
        }
        assert!(INSIGHT_EXTRACTION_PROMPT.contains("isSignificant"));
        assert!(REFLECTION_PROMPT.contains("nextAction"));
    }

    #[test]
    fn test_synthesis_prompt_wording_rule() {
        assert!(SYNTHESIS_PROMPT.contains("no results found in <source>"));
        assert!(SYNTHESIS_PROMPT.contains("TENTATIVE"));
    }

    #[test]
    fn test_plan_hints_absent_without_tools() {
        assert!(plan_hints(&decision(false, &[]), &[]).is_none());
        assert!(plan_hints(&decision(true, &[]), &[]).is_none());
    }

    #[test]
    fn test_plan_hints_lists_steps() {
        let step = ExecutionStep::new(1, "web-search", "Search the web", serde_json::json!({}));
        let hints = plan_hints(&decision(true, &["web-search"]), &[step]).unwrap();
        assert!(hints.contains("Suggested tools: web-search"));
        assert!(hints.contains("1. Search the web (web-search)"));
    }

    #[test]
    fn test_synthesis_request_placeholders() {
        let text = synthesis_request("q", "failed", "", "");
        assert!(text.contains("FAILED"));
        assert_eq!(text.matches("(none)").count(), 2);
    }
}
