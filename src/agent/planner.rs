use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

use super::{DetectedType, ExecutionStep, ToolDecision};
use crate::tools::{
    detect_github_request, GITHUB_REPO, JIRA_SEARCH, KNOWLEDGE_SEARCH, WEB_SCRAPE, WEB_SEARCH,
};

static SMALL_TALK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(hi|hello|hey|howdy|yo|hiya|greetings|thanks|thank you|thx|ok|okay|cool|bye|goodbye|good (morning|afternoon|evening|night)|how are you( doing)?|what'?s up|sup)( there| everyone| all| again| so much)?[\s!.,?:)]*$",
    )
    .expect("valid small talk regex")
});

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"')]+"#).expect("valid url regex"));

/// Whether a message is a greeting or small talk
pub fn is_small_talk(message: &str) -> bool {
    SMALL_TALK.is_match(message.trim())
}

/// Turns a tool decision into an ordered, dependency-annotated plan.
#[derive(Debug, Clone, Default)]
pub struct OrchestrationPlanner;

impl OrchestrationPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Plan the tool invocations for a message.
    ///
    /// Dependencies only say "needs the output of"; nothing is threaded
    /// between steps here.
    pub fn plan(&self, decision: &ToolDecision, message: &str) -> Vec<ExecutionStep> {
        if is_small_talk(message) {
            debug!("Small talk, empty plan");
            return Vec::new();
        }
        if !decision.should_use_tools {
            return Vec::new();
        }

        let coordinates = detect_github_request(message);
        let mut steps: Vec<ExecutionStep> = Vec::new();

        for tool in &decision.suggested_tools {
            let number = steps.len() as u32 + 1;
            let step = match tool.as_str() {
                KNOWLEDGE_SEARCH => ExecutionStep::new(
                    number,
                    KNOWLEDGE_SEARCH,
                    "Search stored documents and insights",
                    json!({ "query": message }),
                )
                .with_duration(1_500),
                WEB_SEARCH => {
                    // With a repository in hand, search for context about it
                    let query = match (decision.detected_type, coordinates.full_name()) {
                        (DetectedType::Github, Some(name)) => name,
                        _ => message.to_string(),
                    };
                    ExecutionStep::new(
                        number,
                        WEB_SEARCH,
                        "Search the web for current information",
                        json!({ "query": query }),
                    )
                    .with_duration(3_000)
                }
                WEB_SCRAPE => {
                    let search_step = steps
                        .iter()
                        .rev()
                        .find(|s| s.tool == WEB_SEARCH)
                        .map(|s| s.step);
                    let parameters = match URL.find(message) {
                        Some(url) => json!({ "url": url.as_str() }),
                        None => json!({}),
                    };
                    ExecutionStep::new(
                        number,
                        WEB_SCRAPE,
                        "Read the most relevant page in full",
                        parameters,
                    )
                    .with_dependencies(search_step.into_iter().collect())
                    .with_duration(5_000)
                }
                GITHUB_REPO => {
                    let parameters = match (&coordinates.owner, &coordinates.repo) {
                        (Some(owner), Some(repo)) => json!({ "owner": owner, "repo": repo }),
                        _ => json!({ "query": message }),
                    };
                    ExecutionStep::new(
                        number,
                        GITHUB_REPO,
                        "Fetch repository details",
                        parameters,
                    )
                    .with_duration(2_000)
                }
                JIRA_SEARCH => ExecutionStep::new(
                    number,
                    JIRA_SEARCH,
                    "Search the issue tracker",
                    json!({ "action": "search", "query": message }),
                )
                .with_duration(2_500),
                other => ExecutionStep::new(
                    number,
                    other,
                    format!("Run {}", other),
                    json!({ "query": message }),
                ),
            };
            steps.push(step);
        }

        debug!(
            steps = steps.len(),
            tools = ?steps.iter().map(|s| s.tool.as_str()).collect::<Vec<_>>(),
            "Plan created"
        );
        steps
    }
}

/// Group steps into batches whose dependencies are all satisfied by
/// earlier batches. Order within a batch follows plan order.
pub fn group_into_batches(steps: &[ExecutionStep]) -> Vec<Vec<ExecutionStep>> {
    let known: HashSet<u32> = steps.iter().map(|s| s.step).collect();
    let mut done: HashSet<u32> = HashSet::new();
    let mut remaining: Vec<&ExecutionStep> = steps.iter().collect();
    let mut batches: Vec<Vec<ExecutionStep>> = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&ExecutionStep>, Vec<&ExecutionStep>) =
            remaining.into_iter().partition(|s| {
                s.dependencies
                    .iter()
                    .all(|d| done.contains(d) || !known.contains(d))
            });

        if ready.is_empty() {
            // Cyclic dependencies: run the rest one at a time in plan order
            batches.extend(blocked.into_iter().map(|s| vec![s.clone()]));
            break;
        }

        done.extend(ready.iter().map(|s| s.step));
        batches.push(ready.into_iter().cloned().collect());
        remaining = blocked;
    }

    batches
}
