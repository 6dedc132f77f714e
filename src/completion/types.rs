use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Function-calling tool definition sent with a chat request
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

/// Function signature inside a [`ToolDefinition`]
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a function tool definition
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Chat-style completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Create a new request with default sampling settings
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            tool_choice: None,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }

    /// Offer tools to the model with `tool_choice = "auto"`
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        if !tools.is_empty() {
            self.tools = Some(tools);
            self.tool_choice = Some("auto".to_string());
        }
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Apply caller-supplied model settings on top of the defaults
    pub fn with_settings(mut self, settings: &ModelSettings) -> Self {
        if let Some(model) = &settings.model {
            self.model = model.clone();
        }
        if let Some(temperature) = settings.temperature {
            self.temperature = temperature.clamp(0.0, 2.0);
        }
        if let Some(max_tokens) = settings.max_tokens {
            self.max_tokens = max_tokens;
        }
        self
    }
}

/// Caller overrides for the completion model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "maxTokens")]
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    /// Model and token budget only; the calling stage picks the temperature.
    pub fn without_temperature(&self) -> Self {
        Self {
            temperature: None,
            ..self.clone()
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Normalized completion: the single shape every call site works with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    /// True when there is neither text nor tool calls
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// The response shapes a completion backend may answer with.
///
/// Decoding tries each shape in a fixed priority order:
/// chat choices, then `result`/`completion`, then `content`/`message`,
/// then a bare string.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEnvelope {
    ChatChoices(Completion),
    Result(String),
    Content(String),
    Bare(String),
}

impl CompletionEnvelope {
    /// Decode a raw response body into an envelope
    pub fn decode(raw: &Value) -> Option<Self> {
        if let Some(completion) = decode_choices(raw) {
            return Some(CompletionEnvelope::ChatChoices(completion));
        }

        for key in ["result", "completion"] {
            if let Some(text) = raw.get(key).and_then(text_of) {
                return Some(CompletionEnvelope::Result(text));
            }
        }

        for key in ["content", "message"] {
            if let Some(text) = raw.get(key).and_then(text_of) {
                return Some(CompletionEnvelope::Content(text));
            }
        }

        raw.as_str()
            .map(|s| CompletionEnvelope::Bare(s.to_string()))
    }

    /// Collapse the envelope into a [`Completion`]
    pub fn into_completion(self) -> Completion {
        match self {
            CompletionEnvelope::ChatChoices(completion) => completion,
            CompletionEnvelope::Result(content)
            | CompletionEnvelope::Content(content)
            | CompletionEnvelope::Bare(content) => Completion {
                content,
                tool_calls: Vec::new(),
            },
        }
    }
}

/// `{choices: [{message: {content, tool_calls}}]}`
fn decode_choices(raw: &Value) -> Option<Completion> {
    let message = raw.get("choices")?.as_array()?.first()?.get("message")?;

    let content = message
        .get("content")
        .and_then(text_of)
        .unwrap_or_default();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(decode_tool_call).collect())
        .unwrap_or_default();

    Some(Completion {
        content,
        tool_calls,
    })
}

fn decode_tool_call(raw: &Value) -> Option<ToolCall> {
    let function = raw.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) if s.trim().is_empty() => Value::Object(Default::default()),
        Some(Value::String(s)) => serde_json::from_str(s)
            .unwrap_or_else(|_| serde_json::json!({ "query": s })),
        Some(other) => other.clone(),
        None => Value::Object(Default::default()),
    };
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));

    Some(ToolCall {
        id,
        name,
        arguments,
    })
}

/// Text of a string value, or of an object's `content`/`text` field
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("content")
            .or_else(|| map.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_decode_chat_choices_with_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "github-repo",
                            "arguments": "{\"owner\":\"acme\",\"repo\":\"widgets\"}"
                        }
                    }]
                }
            }]
        });

        let completion = CompletionEnvelope::decode(&raw).unwrap().into_completion();
        assert_eq!(completion.content, "");
        assert_eq!(
            completion.tool_calls,
            vec![ToolCall {
                id: "call_1".to_string(),
                name: "github-repo".to_string(),
                arguments: json!({"owner": "acme", "repo": "widgets"}),
            }]
        );
    }

    #[test]
    fn test_decode_priority_prefers_choices_over_result() {
        let raw = json!({
            "choices": [{"message": {"content": "from choices"}}],
            "result": "from result"
        });
        let envelope = CompletionEnvelope::decode(&raw).unwrap();
        assert!(matches!(envelope, CompletionEnvelope::ChatChoices(_)));
        assert_eq!(envelope.into_completion().content, "from choices");
    }

    #[test]
    fn test_decode_result_and_completion_keys() {
        let raw = json!({"result": "answer"});
        assert_eq!(
            CompletionEnvelope::decode(&raw),
            Some(CompletionEnvelope::Result("answer".to_string()))
        );

        let raw = json!({"success": true, "completion": "gateway answer"});
        assert_eq!(
            CompletionEnvelope::decode(&raw),
            Some(CompletionEnvelope::Result("gateway answer".to_string()))
        );
    }

    #[test]
    fn test_decode_content_and_message_shapes() {
        let raw = json!({"content": "plain content"});
        assert_eq!(
            CompletionEnvelope::decode(&raw),
            Some(CompletionEnvelope::Content("plain content".to_string()))
        );

        let raw = json!({"message": {"role": "assistant", "content": "nested"}});
        assert_eq!(
            CompletionEnvelope::decode(&raw),
            Some(CompletionEnvelope::Content("nested".to_string()))
        );
    }

    #[test]
    fn test_decode_bare_string() {
        let raw = json!("just text");
        assert_eq!(
            CompletionEnvelope::decode(&raw),
            Some(CompletionEnvelope::Bare("just text".to_string()))
        );
    }

    #[test]
    fn test_decode_unknown_shape() {
        assert!(CompletionEnvelope::decode(&json!({"foo": 1})).is_none());
        assert!(CompletionEnvelope::decode(&json!(42)).is_none());
    }

    #[test]
    fn test_tool_call_with_non_json_arguments() {
        let raw = json!({
            "choices": [{"message": {"tool_calls": [{
                "function": {"name": "web-search", "arguments": "rust async"}
            }]}}]
        });
        let completion = CompletionEnvelope::decode(&raw).unwrap().into_completion();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].arguments, json!({"query": "rust async"}));
        assert!(completion.tool_calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_chat_request_with_settings() {
        let settings = ModelSettings {
            model: Some("custom-model".to_string()),
            temperature: Some(5.0),
            max_tokens: Some(100),
        };
        let request =
            ChatRequest::new("default", vec![Message::user("hi")]).with_settings(&settings);
        assert_eq!(request.model, "custom-model");
        assert_eq!(request.temperature, 2.0);
        assert_eq!(request.max_tokens, 100);

        let request = ChatRequest::new("default", vec![Message::user("hi")])
            .with_temperature(0.2)
            .with_settings(&settings.without_temperature());
        assert_eq!(request.model, "custom-model");
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.max_tokens, 100);
    }

    #[test]
    fn test_chat_request_without_tools_skips_fields() {
        let request = ChatRequest::new("m", vec![Message::system("s")]).with_tools(vec![]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
        assert_eq!(json["messages"][0]["role"], "system");
    }
}
