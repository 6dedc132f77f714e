use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{ChatRequest, Completion, CompletionEnvelope, Message, ModelSettings};
use crate::config::{CompletionConfig, RequestConfig};
use crate::error::{CompletionError, CompletionResult};

/// Client for an OpenAI-compatible chat completion service
#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    request_config: RequestConfig,
}

impl CompletionClient {
    /// Create a new completion client
    pub fn new(config: &CompletionConfig, request_config: RequestConfig) -> CompletionResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(CompletionError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            request_config,
        })
    }

    /// Default model name used when the caller supplies none
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start a request for the default model
    pub fn request(&self, messages: Vec<Message>) -> ChatRequest {
        ChatRequest::new(&self.model, messages)
    }

    /// Send a chat request, retrying with exponential backoff
    pub async fn chat(&self, request: ChatRequest) -> CompletionResult<Completion> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    model = %request.model,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying completion request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, &request).await {
                Ok(completion) => {
                    info!(
                        model = %request.model,
                        latency_ms = start.elapsed().as_millis(),
                        tool_calls = completion.tool_calls.len(),
                        "Completion call succeeded"
                    );
                    return Ok(completion);
                }
                Err(e) => {
                    error!(
                        model = %request.model,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Completion call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(CompletionError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Convenience wrapper returning only the text of a completion
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        settings: &ModelSettings,
        temperature: f64,
    ) -> CompletionResult<String> {
        let request = self
            .request(messages)
            .with_temperature(temperature)
            .with_settings(settings);
        let completion = self.chat(request).await?;
        Ok(completion.content)
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        url: &str,
        request: &ChatRequest,
    ) -> CompletionResult<Completion> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map(Vec::len).unwrap_or(0),
            "Calling completion service"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    CompletionError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CompletionError::InvalidResponse {
                message: format!("Failed to read response body: {}", e),
            })?;

        // Non-JSON bodies are treated as a bare string answer
        let raw = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));

        CompletionEnvelope::decode(&raw)
            .map(CompletionEnvelope::into_completion)
            .ok_or_else(|| CompletionError::InvalidResponse {
                message: format!(
                    "Unrecognized completion envelope: {}",
                    raw.to_string().chars().take(200).collect::<String>()
                ),
            })
    }
}
