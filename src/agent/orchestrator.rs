//! Request entry point of the agent loop.
//!
//! One call to [`AgentOrchestrator::handle_query`] analyzes the message,
//! runs model-driven or deterministic tool execution, synthesizes an answer,
//! lets the reflection controller decide on further iterations and finally
//! hands the exchange to the knowledge gate in a background task.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    assess_quality, generate_fallback_response, group_into_batches, AgentCore, CallerContext,
    DecisionAnalyzer, ExecutionOutcome, ExecutionStep, FallbackController, IterationContext,
    KnowledgeGate, LoopState, OrchestrationPlanner, ReflectionController, ReflectionDecision,
    ReflectionInput, SynthesisEngine, ToolCallRequest, ToolDecision, ToolExecutionQuality,
    ToolExecutor, ToolProgress,
};
use crate::completion::{Completion, CompletionClient, Message, ModelSettings};
use crate::config::AgentConfig;
use crate::error::ClassificationError;
use crate::prompts::{plan_hints, AGENT_SYSTEM_PROMPT};
use crate::storage::{ConversationEntry, KnowledgeHit, SqliteStorage, Storage};
use crate::tools::ToolRegistry;

/// Stored knowledge passed to synthesis per iteration.
pub const KNOWLEDGE_CONTEXT_LIMIT: usize = 5;

fn has_dependent_steps(plan: &[ExecutionStep]) -> bool {
    plan.iter().any(|step| !step.dependencies.is_empty())
}

fn default_loop_enabled() -> bool {
    true
}

/// Caller request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model_settings: Option<ModelSettings>,
    #[serde(default = "default_loop_enabled")]
    pub loop_enabled: bool,
}

impl QueryRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            loop_enabled: true,
            ..Default::default()
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn without_loop(mut self) -> Self {
        self.loop_enabled = false;
        self
    }
}

/// Caller response. `message` is never empty.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub success: bool,
    pub message: String,
    pub tools_used: Vec<String>,
    pub tool_progress: Vec<ToolProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_reflection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection_decision: Option<ReflectionDecision>,
    pub session_id: String,
    /// Iterations run, including the first pass.
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<ToolExecutionQuality>,
}

impl QueryResponse {
    fn failure(session_id: String, cause: impl Into<String>) -> Self {
        Self {
            success: false,
            message: cause.into(),
            tools_used: Vec::new(),
            tool_progress: Vec::new(),
            self_reflection: None,
            reflection_decision: None,
            session_id,
            iterations: 0,
            quality: None,
        }
    }
}

/// Side-effect-free view of how a message would be handled.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAnalysis {
    pub decision: ToolDecision,
    pub plan: Vec<ExecutionStep>,
    /// Step numbers grouped into dependency batches.
    pub batches: Vec<Vec<u32>>,
}

/// What one iteration produced.
#[derive(Debug, Clone)]
struct IterationOutcome {
    response: String,
    outcome: ExecutionOutcome,
    quality: Option<ToolExecutionQuality>,
}

/// Wires the pipeline stages together.
#[derive(Clone)]
pub struct AgentOrchestrator {
    core: AgentCore,
    registry: Arc<ToolRegistry>,
    analyzer: DecisionAnalyzer,
    planner: OrchestrationPlanner,
    executor: ToolExecutor,
    fallback: FallbackController,
    synthesis: SynthesisEngine,
    reflection: ReflectionController,
    gate: KnowledgeGate,
    config: AgentConfig,
}

impl AgentOrchestrator {
    pub fn new(
        storage: SqliteStorage,
        completion: CompletionClient,
        registry: ToolRegistry,
        config: AgentConfig,
    ) -> Self {
        let executor = ToolExecutor::new()
            .with_audit(storage.clone())
            .with_parallel_batches(config.parallel_batches);

        info!(
            tools = ?registry.tool_ids(),
            max_loops = config.max_loops,
            parallel_batches = config.parallel_batches,
            "Agent orchestrator initialized"
        );

        Self {
            analyzer: DecisionAnalyzer::new(registry.tool_ids()),
            planner: OrchestrationPlanner::new(),
            fallback: FallbackController::new(executor.clone()),
            executor,
            synthesis: SynthesisEngine::new(completion.clone()),
            reflection: ReflectionController::new(completion.clone()),
            gate: KnowledgeGate::new(storage.clone(), completion.clone(), &config),
            core: AgentCore::new(storage, completion),
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn core(&self) -> &AgentCore {
        &self.core
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &KnowledgeGate {
        &self.gate
    }

    /// Decision and plan for a message, without invoking anything.
    pub fn analyze(&self, message: &str) -> Result<QueryAnalysis, ClassificationError> {
        let decision = self.analyzer.analyze(message)?;
        let plan = self.planner.plan(&decision, message);
        let batches = group_into_batches(&plan)
            .iter()
            .map(|batch| batch.iter().map(|s| s.step).collect())
            .collect();
        Ok(QueryAnalysis {
            decision,
            plan,
            batches,
        })
    }

    /// Answer a request. Failures reduce to `success: false` with the cause.
    pub async fn handle_query(&self, request: QueryRequest) -> QueryResponse {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let caller = CallerContext::new(request.identity.clone(), Some(session_id.clone()));
        let settings = request.model_settings.clone().unwrap_or_default();

        let mut decision = match self.analyzer.analyze(&request.message) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Rejected request");
                return QueryResponse::failure(session_id, e.to_string());
            }
        };

        info!(
            session_id = %session_id,
            detected_type = %decision.detected_type,
            should_use_tools = decision.should_use_tools,
            "Handling query"
        );

        self.record(
            ConversationEntry::new(&session_id, "user", &request.message)
                .with_owner(caller.caller_id()),
        )
        .await;

        let max_loops = if request.loop_enabled {
            self.config.max_loops
        } else {
            0
        };
        let mut state = LoopState::new(max_loops);
        let mut input = request.message.clone();
        let mut all = ExecutionOutcome::default();
        let mut last: Option<IterationOutcome> = None;
        let mut last_decision: Option<ReflectionDecision> = None;
        let mut iterations = 0;

        loop {
            let iteration = match self
                .run_iteration(&input, &decision, &request.history, &caller, &settings)
                .await
            {
                Ok(iteration) => iteration,
                Err(cause) if last.is_none() => {
                    return QueryResponse::failure(session_id, cause);
                }
                Err(cause) => {
                    warn!(error = %cause, "Continuation failed, keeping previous answer");
                    break;
                }
            };
            iterations += 1;
            all.extend(iteration.outcome.clone());

            let reflection = self
                .reflection
                .evaluate(
                    &ReflectionInput {
                        message: request.message.clone(),
                        response: iteration.response.clone(),
                        tools_used: iteration.outcome.used.clone(),
                        settings: settings.clone(),
                    },
                    &state,
                    request.loop_enabled,
                )
                .await;

            let mut entry = ConversationEntry::new(&session_id, "assistant", &iteration.response)
                .with_owner(caller.caller_id())
                .with_tools(iteration.outcome.used.clone())
                .with_iteration(state.iteration);
            if let Some(reasoning) = &reflection.reasoning {
                entry = entry.with_reflection(reasoning);
            }
            self.record(entry).await;

            let proceed = reflection.continue_loop && state.has_budget();
            let next_action = reflection.next_action.clone();
            state = state.advance(reflection.clone());
            last_decision = Some(reflection);
            last = Some(iteration);

            if !proceed {
                break;
            }

            input = next_action.unwrap_or_else(|| request.message.clone());
            decision = self
                .analyzer
                .analyze(&input)
                .unwrap_or_else(|e| ToolDecision::general(e.to_string()));
            debug!(iteration = state.iteration, input = %input, "Continuing reflection loop");
        }

        let Some(final_iteration) = last else {
            return QueryResponse::failure(session_id, "No answer was produced");
        };

        self.spawn_persistence(
            &request.message,
            &final_iteration,
            IterationContext {
                owner_id: caller.caller_id().to_string(),
                session_id: Some(session_id.clone()),
                iteration: state.iteration,
                tools_used: all.used.clone(),
                settings,
            },
        );

        QueryResponse {
            success: true,
            message: final_iteration.response,
            tools_used: all.used,
            tool_progress: all.progress,
            self_reflection: last_decision.as_ref().and_then(|d| d.reasoning.clone()),
            reflection_decision: last_decision,
            session_id,
            iterations,
            quality: final_iteration.quality,
        }
    }

    async fn run_iteration(
        &self,
        input: &str,
        decision: &ToolDecision,
        history: &[Message],
        caller: &CallerContext,
        settings: &ModelSettings,
    ) -> Result<IterationOutcome, String> {
        let plan = self.planner.plan(decision, input);
        let offer_tools = decision.should_use_tools && !plan.is_empty();

        let mut system = AGENT_SYSTEM_PROMPT.to_string();
        if let Some(hints) = plan_hints(decision, &plan) {
            system.push_str("\n\n");
            system.push_str(&hints);
        }
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(input));

        let mut chat = self.core.completion().request(messages).with_settings(settings);
        if offer_tools {
            chat = chat.with_tools(self.registry.definitions());
        }

        let deadline = Duration::from_millis(self.config.request_timeout_ms);
        let completion: Result<Completion, String> =
            match tokio::time::timeout(deadline, self.core.completion().chat(chat)).await {
                Ok(Ok(completion)) => Ok(completion),
                Ok(Err(e)) => {
                    warn!(error = %e, "Model-driven pass failed");
                    Err(e.to_string())
                }
                Err(_) => {
                    warn!(
                        timeout_ms = self.config.request_timeout_ms,
                        "Model-driven pass timed out"
                    );
                    Err(format!(
                        "Completion service did not answer within {} ms",
                        self.config.request_timeout_ms
                    ))
                }
            };

        if let Ok(completion) = &completion {
            if !completion.tool_calls.is_empty() {
                let calls: Vec<ToolCallRequest> = completion
                    .tool_calls
                    .iter()
                    .cloned()
                    .map(ToolCallRequest::from)
                    .collect();
                debug!(calls = calls.len(), "Executing model tool calls");
                let outcome = self.executor.execute(&calls, &self.registry, caller).await;
                let knowledge = self.knowledge_for(caller, input).await;
                let response = self
                    .synthesis
                    .synthesize(input, &outcome.results, &knowledge, settings)
                    .await;
                return Ok(IterationOutcome {
                    response,
                    quality: Some(assess_quality(&outcome.results)),
                    outcome,
                });
            }
        }

        if decision.should_use_tools {
            // The forced controller covers single-source lookups; only
            // dependent chains such as search then scrape run the full plan
            if has_dependent_steps(&plan) {
                debug!(steps = plan.len(), "Executing orchestration plan");
                let outcome = self.executor.execute_plan(&plan, &self.registry, caller).await;
                let knowledge = self.knowledge_for(caller, input).await;
                let quality = assess_quality(&outcome.results);
                let response = if completion.is_ok() {
                    self.synthesis
                        .synthesize(input, &outcome.results, &knowledge, settings)
                        .await
                } else {
                    generate_fallback_response(input, &outcome.results, &knowledge, quality)
                };
                return Ok(IterationOutcome {
                    response,
                    outcome,
                    quality: Some(quality),
                });
            }

            if let Some(forced) = self
                .fallback
                .maybe_force(decision, input, caller, &self.registry, 0)
                .await
            {
                return Ok(IterationOutcome {
                    quality: Some(assess_quality(&forced.outcome.results)),
                    response: forced.final_response,
                    outcome: forced.outcome,
                });
            }
        }

        match completion {
            Ok(completion) if !completion.content.trim().is_empty() => Ok(IterationOutcome {
                response: completion.content,
                outcome: ExecutionOutcome::default(),
                quality: None,
            }),
            Ok(_) => Err("The completion service returned an empty answer".to_string()),
            Err(cause) => Err(cause),
        }
    }

    async fn knowledge_for(&self, caller: &CallerContext, query: &str) -> Vec<KnowledgeHit> {
        match self
            .core
            .storage()
            .search_knowledge(caller.caller_id(), query, KNOWLEDGE_CONTEXT_LIMIT, true)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Knowledge lookup failed");
                Vec::new()
            }
        }
    }

    async fn record(&self, entry: ConversationEntry) {
        if let Err(e) = self.core.storage().append_conversation(&entry).await {
            warn!(error = %e, role = %entry.role, "Failed to append conversation entry");
        }
    }

    fn spawn_persistence(
        &self,
        message: &str,
        iteration: &IterationOutcome,
        context: IterationContext,
    ) {
        let gate = self.gate.clone();
        let message = message.to_string();
        let response = iteration.response.clone();
        let results = iteration.outcome.results.clone();
        tokio::spawn(async move {
            let outcome = gate
                .maybe_persist(&message, &response, &context, &results)
                .await;
            debug!(
                persisted = outcome.persisted,
                node_id = ?outcome.node_id,
                reason = %outcome.reason,
                "Knowledge persistence finished"
            );
        });
    }
}
