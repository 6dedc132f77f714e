use serde_json::Value;
use tracing::{debug, warn};

use super::{extract_json_value, first_json_object, LoopState, ReflectionDecision};
use crate::completion::{CompletionClient, Message, ModelSettings};
use crate::prompts::{reflection_request, REFLECTION_PROMPT};

/// Temperature of the reflection call.
pub const REFLECTION_TEMPERATURE: f64 = 0.2;

const CONTINUE_KEYWORDS: [&str; 3] = ["true", "improve", "additional"];

/// What the controller evaluates.
#[derive(Debug, Clone)]
pub struct ReflectionInput {
    /// The request the response answered.
    pub message: String,
    pub response: String,
    pub tools_used: Vec<String>,
    /// Caller model overrides; the temperature stays at the reflection value.
    pub settings: ModelSettings,
}

/// Decides whether an answer deserves another iteration.
///
/// Never calls tools or synthesis; on `continue` the caller feeds
/// `next_action` back in as the next input.
#[derive(Clone)]
pub struct ReflectionController {
    completion: CompletionClient,
}

impl ReflectionController {
    pub fn new(completion: CompletionClient) -> Self {
        Self { completion }
    }

    pub async fn evaluate(
        &self,
        input: &ReflectionInput,
        state: &LoopState,
        loop_enabled: bool,
    ) -> ReflectionDecision {
        if !loop_enabled {
            return ReflectionDecision::stop("Reflection loop disabled");
        }
        if !state.has_budget() {
            return ReflectionDecision::stop(format!(
                "Reached the maximum of {} continuations",
                state.max_iterations
            ));
        }
        if input.response.trim().is_empty() {
            return ReflectionDecision::stop("No response to evaluate");
        }

        let messages = vec![
            Message::system(REFLECTION_PROMPT),
            Message::user(reflection_request(
                &input.message,
                &input.response,
                &input.tools_used,
            )),
        ];

        match self
            .completion
            .complete(
                messages,
                &input.settings.without_temperature(),
                REFLECTION_TEMPERATURE,
            )
            .await
        {
            Ok(text) => {
                let decision = parse_reflection(&text);
                debug!(
                    iteration = state.iteration,
                    continue_loop = decision.continue_loop,
                    "Reflection evaluated"
                );
                decision
            }
            Err(e) => {
                warn!(error = %e, "Reflection call failed, stopping");
                ReflectionDecision::stop(format!("Reflection unavailable: {}", e))
            }
        }
    }
}

/// Parse the model's verdict: the first JSON object in the text, or a
/// keyword heuristic when there is none.
pub fn parse_reflection(text: &str) -> ReflectionDecision {
    let parsed = first_json_object(text)
        .and_then(extract_json_value)
        .or_else(|| extract_json_value(text));

    if let Some(Value::Object(map)) = parsed {
        if let Some(flag) = map.get("continue").and_then(flag_value) {
            let reasoning = map
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let next_action = map
                .get("nextAction")
                .or_else(|| map.get("next_action"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            return if flag {
                ReflectionDecision::proceed(next_action, reasoning)
            } else {
                ReflectionDecision::stop(reasoning)
            };
        }
    }

    let lower = text.to_lowercase();
    if CONTINUE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ReflectionDecision::proceed(None, "Unstructured verdict suggests improvement")
    } else {
        ReflectionDecision::stop("Unstructured verdict suggests the answer is complete")
    }
}

fn flag_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompletionConfig, RequestConfig};

    fn controller() -> ReflectionController {
        // Unroutable endpoint: any test reaching the network would fail
        let config = CompletionConfig {
            api_key: "k".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            model: "m".to_string(),
        };
        let request = RequestConfig {
            timeout_ms: 200,
            max_retries: 0,
            retry_delay_ms: 0,
        };
        ReflectionController::new(CompletionClient::new(&config, request).unwrap())
    }

    fn input(response: &str) -> ReflectionInput {
        ReflectionInput {
            message: "q".to_string(),
            response: response.to_string(),
            tools_used: vec![],
            settings: ModelSettings::default(),
        }
    }

    #[test]
    fn test_parse_json_in_prose() {
        let d = parse_reflection(
            r#"Sure. {"continue": true, "reasoning": "missing stars", "nextAction": "Get star count"} Thanks"#,
        );
        assert!(d.continue_loop);
        assert_eq!(d.next_action.as_deref(), Some("Get star count"));
        assert_eq!(d.reasoning.as_deref(), Some("missing stars"));
    }

    #[test]
    fn test_parse_stop() {
        let d = parse_reflection(r#"{"continue": "false", "reasoning": "complete"}"#);
        assert!(!d.continue_loop);
        assert!(d.next_action.is_none());
    }

    #[test]
    fn test_keyword_heuristic() {
        assert!(parse_reflection("The answer could improve with more sources").continue_loop);
        assert!(parse_reflection("Additional detail needed").continue_loop);
        assert!(!parse_reflection("Looks complete to me").continue_loop);
    }

    #[tokio::test]
    async fn test_short_circuits_without_model_call() {
        let c = controller();
        let d = c.evaluate(&input("answer"), &LoopState::new(2), false).await;
        assert!(!d.continue_loop);

        let exhausted = LoopState {
            iteration: 2,
            max_iterations: 2,
            history: vec![],
        };
        let d = c.evaluate(&input("answer"), &exhausted, true).await;
        assert!(!d.continue_loop);
        assert!(d.reasoning.unwrap().contains("maximum"));

        let d = c.evaluate(&input("  "), &LoopState::new(2), true).await;
        assert!(!d.continue_loop);
    }

    #[tokio::test]
    async fn test_loop_bound_with_always_continue() {
        // Feed an always-continue verdict through the state machine
        let mut state = LoopState::new(2);
        let c = controller();
        let mut continuations = 0;
        for _ in 0..10 {
            let d = if state.has_budget() {
                parse_reflection(r#"{"continue": true}"#)
            } else {
                c.evaluate(&input("answer"), &state, true).await
            };
            let go = d.continue_loop;
            state = state.advance(d);
            if !go {
                break;
            }
            continuations += 1;
        }
        assert_eq!(continuations, 2);
    }
}
