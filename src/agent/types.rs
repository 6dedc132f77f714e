use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ToolError;

/// Request category detected by the decision analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedType {
    Search,
    Github,
    Knowledge,
    Jira,
    General,
    /// No classification was made.
    None,
}

impl DetectedType {
    /// Get the type name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectedType::Search => "search",
            DetectedType::Github => "github",
            DetectedType::Knowledge => "knowledge",
            DetectedType::Jira => "jira",
            DetectedType::General => "general",
            DetectedType::None => "none",
        }
    }
}

impl std::fmt::Display for DetectedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Estimated request complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// Number of steps a request of this complexity is expected to take
    pub fn estimated_steps(&self) -> u32 {
        match self {
            Complexity::Simple => 2,
            Complexity::Moderate => 3,
            Complexity::Complex => 4,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Moderate => write!(f, "moderate"),
            Complexity::Complex => write!(f, "complex"),
        }
    }
}

/// Whether and which tools a message needs. Produced once per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDecision {
    pub should_use_tools: bool,
    pub detected_type: DetectedType,
    pub reasoning: String,
    pub confidence: f64,
    pub complexity: Complexity,
    /// Ordered, duplicate-free, always a subset of the registry.
    pub suggested_tools: Vec<String>,
    pub estimated_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_strategy: Option<String>,
}

impl ToolDecision {
    /// A decision that uses no tools
    pub fn general(reasoning: impl Into<String>) -> Self {
        Self {
            should_use_tools: false,
            detected_type: DetectedType::General,
            reasoning: reasoning.into(),
            confidence: 0.0,
            complexity: Complexity::Simple,
            suggested_tools: Vec::new(),
            estimated_steps: Complexity::Simple.estimated_steps(),
            fallback_strategy: None,
        }
    }
}

/// One planned tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    /// 1-based position in the plan.
    pub step: u32,
    pub tool: String,
    pub description: String,
    pub parameters: Value,
    /// Steps whose output this step needs.
    pub dependencies: Vec<u32>,
    pub estimated_duration_ms: u64,
}

impl ExecutionStep {
    /// Create a step with no dependencies
    pub fn new(
        step: u32,
        tool: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            step,
            tool: tool.into(),
            description: description.into(),
            parameters,
            dependencies: Vec::new(),
            estimated_duration_ms: 0,
        }
    }

    /// Set dependencies
    pub fn with_dependencies(mut self, dependencies: Vec<u32>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Set estimated duration
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.estimated_duration_ms = duration_ms;
        self
    }
}

/// A tool invocation request, from the model or from a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub parameters: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }
}

impl From<&ExecutionStep> for ToolCallRequest {
    fn from(step: &ExecutionStep) -> Self {
        Self::new(step.tool.clone(), step.parameters.clone())
    }
}

impl From<crate::completion::ToolCall> for ToolCallRequest {
    fn from(call: crate::completion::ToolCall) -> Self {
        Self::new(call.name, call.arguments)
    }
}

/// Lifecycle of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Starting,
    Executing,
    Completed,
    Failed,
}

impl ToolStatus {
    /// Completed and failed invocations never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolStatus::Completed | ToolStatus::Failed)
    }

    fn can_transition_to(&self, next: ToolStatus) -> bool {
        match (self, next) {
            (ToolStatus::Starting, ToolStatus::Executing) => true,
            (ToolStatus::Starting | ToolStatus::Executing, ToolStatus::Completed) => true,
            (ToolStatus::Starting | ToolStatus::Executing, ToolStatus::Failed) => true,
            _ => false,
        }
    }
}

/// Progress record of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolProgress {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub status: ToolStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub parameters: Value,
    /// Percent complete (0-100).
    pub progress: u8,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolProgress {
    /// Start tracking an invocation
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            display_name: display_name.into(),
            status: ToolStatus::Starting,
            start_time: Utc::now(),
            end_time: None,
            parameters,
            progress: 0,
            result: None,
            error: None,
        }
    }

    /// Move to `executing`. Returns false if the transition is not allowed.
    pub fn mark_executing(&mut self) -> bool {
        if !self.status.can_transition_to(ToolStatus::Executing) {
            return false;
        }
        self.status = ToolStatus::Executing;
        self.progress = 50;
        true
    }

    /// Move to `completed`. Returns false if already terminal.
    pub fn complete(&mut self, result: Value) -> bool {
        if !self.status.can_transition_to(ToolStatus::Completed) {
            return false;
        }
        self.status = ToolStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.end_time = Some(Utc::now());
        true
    }

    /// Move to `failed`. Returns false if already terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.status.can_transition_to(ToolStatus::Failed) {
            return false;
        }
        self.status = ToolStatus::Failed;
        self.progress = 100;
        self.error = Some(error.into());
        self.end_time = Some(Utc::now());
        true
    }
}

/// Normalized outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub parameters: Value,
    pub result: Value,
    pub success: bool,
}

impl ToolResult {
    /// A successful result carrying the unwrapped payload
    pub fn ok(name: impl Into<String>, parameters: Value, result: Value) -> Self {
        Self {
            name: name.into(),
            parameters,
            result,
            success: true,
        }
    }

    /// A failed result carrying the error and a remediation hint
    pub fn failed(name: impl Into<String>, parameters: Value, error: &ToolError) -> Self {
        Self {
            name: name.into(),
            parameters,
            result: json!({
                "error": error.to_string(),
                "remediation": error.remediation(),
            }),
            success: false,
        }
    }

    /// Error text of a failed result
    pub fn error_message(&self) -> Option<&str> {
        if self.success {
            return None;
        }
        self.result.get("error").and_then(Value::as_str)
    }

    /// Remediation hint of a failed result
    pub fn remediation(&self) -> Option<&str> {
        if self.success {
            return None;
        }
        self.result.get("remediation").and_then(Value::as_str)
    }

    /// Whether a successful result carried nothing useful
    pub fn is_empty(&self) -> bool {
        self.success && payload_is_empty(&self.result)
    }
}

/// Type-specific emptiness check for tool payloads.
///
/// Empty strings, arrays and objects are empty; so are objects whose
/// nested `results`, `issues`, `items` or `data` field is empty, and
/// objects reporting a zero `count`/`total`.
pub fn payload_is_empty(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => {
            if map.is_empty() {
                return true;
            }
            for key in ["results", "issues", "items", "data"] {
                if let Some(nested) = map.get(key) {
                    return payload_is_empty(nested);
                }
            }
            ["count", "total", "totalCount", "total_count"]
                .iter()
                .any(|key| map.get(*key).and_then(Value::as_u64) == Some(0))
        }
        _ => false,
    }
}

/// Results of one execution pass, all in request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub results: Vec<ToolResult>,
    /// Registered tools that were invoked, duplicate-free.
    pub used: Vec<String>,
    pub progress: Vec<ToolProgress>,
}

impl ExecutionOutcome {
    /// Record one invocation
    pub fn push(&mut self, result: ToolResult, progress: ToolProgress, invoked: bool) {
        if invoked && !self.used.contains(&result.name) {
            self.used.push(result.name.clone());
        }
        self.results.push(result);
        self.progress.push(progress);
    }

    /// Append another outcome, keeping order
    pub fn extend(&mut self, other: ExecutionOutcome) {
        for name in other.used {
            if !self.used.contains(&name) {
                self.used.push(name);
            }
        }
        self.results.extend(other.results);
        self.progress.extend(other.progress);
    }

    /// Whether any invocation happened
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Caller identity injected into tool parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerContext {
    pub identity: Option<String>,
    pub session_id: Option<String>,
}

impl CallerContext {
    pub fn new(identity: Option<String>, session_id: Option<String>) -> Self {
        Self {
            identity,
            session_id,
        }
    }

    /// Identity passed to backends as `callerId`
    pub fn caller_id(&self) -> &str {
        self.identity.as_deref().unwrap_or("anonymous")
    }
}

/// Continue-or-stop verdict of the reflection controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionDecision {
    #[serde(rename = "continue")]
    pub continue_loop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ReflectionDecision {
    /// Stop with a reason
    pub fn stop(reasoning: impl Into<String>) -> Self {
        Self {
            continue_loop: false,
            next_action: None,
            reasoning: Some(reasoning.into()),
        }
    }

    /// Continue with an optional refined input
    pub fn proceed(next_action: Option<String>, reasoning: impl Into<String>) -> Self {
        Self {
            continue_loop: true,
            next_action,
            reasoning: Some(reasoning.into()),
        }
    }
}

/// Explicit reflection loop state, passed by value between iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopState {
    /// Continuations authorized so far.
    pub iteration: u32,
    pub max_iterations: u32,
    pub history: Vec<ReflectionDecision>,
}

impl LoopState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            iteration: 0,
            max_iterations,
            history: Vec::new(),
        }
    }

    /// Whether another continuation may still be authorized
    pub fn has_budget(&self) -> bool {
        self.iteration < self.max_iterations
    }

    /// State after applying a decision. A continuation past the budget is
    /// recorded but not counted.
    pub fn advance(&self, decision: ReflectionDecision) -> LoopState {
        let mut next = self.clone();
        if decision.continue_loop && next.has_budget() {
            next.iteration += 1;
        }
        next.history.push(decision);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_progress_lifecycle() {
        let mut p = ToolProgress::new("web-search", "Web Search", json!({}));
        assert_eq!(p.status, ToolStatus::Starting);
        assert!(p.mark_executing());
        assert!(p.complete(json!({"ok": true})));
        assert_eq!(p.progress, 100);
        assert!(p.end_time.is_some());
    }

    #[test]
    fn test_terminal_status_never_transitions() {
        let mut p = ToolProgress::new("web-search", "Web Search", json!({}));
        assert!(p.fail("boom"));
        assert!(!p.mark_executing());
        assert!(!p.complete(json!(1)));
        assert!(!p.fail("again"));
        assert_eq!(p.status, ToolStatus::Failed);
        assert_eq!(p.error.as_deref(), Some("boom"));

        let mut p = ToolProgress::new("web-search", "Web Search", json!({}));
        p.mark_executing();
        assert!(!p.mark_executing());
        p.complete(json!(1));
        assert!(!p.fail("late"));
        assert_eq!(p.status, ToolStatus::Completed);
    }

    #[test]
    fn test_payload_emptiness() {
        assert!(payload_is_empty(&json!(null)));
        assert!(payload_is_empty(&json!([])));
        assert!(payload_is_empty(&json!({})));
        assert!(payload_is_empty(&json!("  ")));
        assert!(payload_is_empty(&json!({"results": []})));
        assert!(payload_is_empty(&json!({"issues": [], "total": 0})));
        assert!(payload_is_empty(&json!({"count": 0, "name": "x"})));
        assert!(!payload_is_empty(&json!({"results": [1]})));
        assert!(!payload_is_empty(&json!({"full_name": "acme/widgets"})));
        assert!(!payload_is_empty(&json!(0)));
    }

    #[test]
    fn test_failed_result_carries_remediation() {
        let err = ToolError::Backend {
            tool_name: "github-repo".to_string(),
            message: "Not Found".to_string(),
            status: Some(404),
        };
        let r = ToolResult::failed("github-repo", json!({}), &err);
        assert!(!r.success);
        assert!(r.error_message().unwrap().contains("Not Found"));
        assert!(r.remediation().unwrap().contains("private"));
        assert!(!r.is_empty());
    }

    #[test]
    fn test_outcome_used_is_deduplicated() {
        let mut outcome = ExecutionOutcome::default();
        for _ in 0..2 {
            outcome.push(
                ToolResult::ok("web-search", json!({}), json!([1])),
                ToolProgress::new("web-search", "Web Search", json!({})),
                true,
            );
        }
        outcome.push(
            ToolResult::ok("missing", json!({}), json!(null)),
            ToolProgress::new("missing", "missing", json!({})),
            false,
        );
        assert_eq!(outcome.used, vec!["web-search".to_string()]);
        assert_eq!(outcome.results.len(), 3);
    }

    #[test]
    fn test_loop_state_advance_is_pure_and_bounded() {
        let start = LoopState::new(2);
        let mut state = start.clone();
        for _ in 0..5 {
            state = state.advance(ReflectionDecision::proceed(None, "more"));
        }
        assert_eq!(start.iteration, 0);
        assert_eq!(state.iteration, 2);
        assert_eq!(state.history.len(), 5);
        assert!(!state.has_budget());
    }

    #[test]
    fn test_loop_state_stop_does_not_count() {
        let state = LoopState::new(2).advance(ReflectionDecision::stop("done"));
        assert_eq!(state.iteration, 0);
        assert!(state.has_budget());
    }

    #[test]
    fn test_reflection_decision_serializes_continue() {
        let json =
            serde_json::to_value(ReflectionDecision::proceed(Some("x".into()), "r")).unwrap();
        assert_eq!(json["continue"], true);
        assert_eq!(json["nextAction"], "x");
    }

    #[test]
    fn test_caller_id_default() {
        assert_eq!(CallerContext::default().caller_id(), "anonymous");
    }
}
