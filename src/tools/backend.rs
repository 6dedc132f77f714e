use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{RequestConfig, ToolsConfig};
use crate::error::{ToolCallResult, ToolError};

/// Backend a tool is invoked through.
///
/// Implementations return the backend's raw response body. Classifying the
/// `{success, data|results|error}` envelope is the execution engine's job.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Invoke the tool with already-shaped parameters.
    async fn invoke(&self, tool_id: &str, params: Value) -> ToolCallResult<Value>;
}

/// Tool backend reached over HTTP at `{base_url}/tools/{id}`.
#[derive(Clone)]
pub struct HttpToolBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpToolBackend {
    /// Create a backend for the configured tool gateway
    pub fn new(config: &ToolsConfig, request_config: &RequestConfig) -> ToolCallResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(|e| ToolError::Backend {
                tool_name: "gateway".to_string(),
                message: format!("Failed to build HTTP client: {}", e),
                status: None,
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Endpoint for a tool
    pub fn endpoint(&self, tool_id: &str) -> String {
        format!("{}/tools/{}", self.base_url, tool_id)
    }
}

#[async_trait]
impl ToolBackend for HttpToolBackend {
    async fn invoke(&self, tool_id: &str, params: Value) -> ToolCallResult<Value> {
        let url = self.endpoint(tool_id);
        let start = Instant::now();

        debug!(tool = %tool_id, url = %url, "Invoking tool backend");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&params);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| ToolError::Backend {
            tool_name: tool_id.to_string(),
            message: if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            },
            status: None,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                tool = %tool_id,
                status = status.as_u16(),
                latency_ms = start.elapsed().as_millis(),
                "Tool backend returned error status"
            );
            return Err(ToolError::Backend {
                tool_name: tool_id.to_string(),
                message: error_message(&body)
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
                status: Some(status.as_u16()),
            });
        }

        let body: Value = response.json().await.map_err(|e| ToolError::Backend {
            tool_name: tool_id.to_string(),
            message: format!("Invalid JSON response: {}", e),
            status: Some(status.as_u16()),
        })?;

        info!(
            tool = %tool_id,
            latency_ms = start.elapsed().as_millis(),
            "Tool backend call succeeded"
        );

        Ok(body)
    }
}

/// Pull a readable message out of an error body
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("message").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
