//! Integration tests for MCP protocol handling
//!
//! Drives `McpServer::handle_line` the way a stdio client would, with the
//! completion service and tool gateway mocked by wiremock.

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use mcp_agent_orchestrator::completion::CompletionClient;
use mcp_agent_orchestrator::config::{
    AgentConfig, CompletionConfig, Config, DatabaseConfig, LogFormat, LoggingConfig,
    RequestConfig, ToolsConfig,
};
use mcp_agent_orchestrator::server::{AppState, McpServer};
use mcp_agent_orchestrator::storage::{InsightType, KnowledgeNode, SqliteStorage, Storage};
use mcp_agent_orchestrator::tools::{ToolRegistry, BUILTIN_TOOL_IDS};

async fn create_server(mock: &MockServer) -> (McpServer, SqliteStorage) {
    let config = Config {
        completion: CompletionConfig {
            api_key: "test-key".to_string(),
            base_url: mock.uri(),
            model: "test-model".to_string(),
        },
        database: DatabaseConfig {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        },
        request: RequestConfig {
            timeout_ms: 2_000,
            max_retries: 0,
            retry_delay_ms: 0,
        },
        tools: ToolsConfig {
            base_url: mock.uri(),
            api_key: None,
            enabled: BUILTIN_TOOL_IDS.iter().map(|s| s.to_string()).collect(),
        },
        agent: AgentConfig {
            persist_knowledge: false,
            ..AgentConfig::default()
        },
    };

    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let completion = CompletionClient::new(&config.completion, config.request.clone()).unwrap();
    let registry = ToolRegistry::from_config(&config.tools, &config.request).unwrap();
    let state = AppState::new(config, storage.clone(), completion, registry);
    (McpServer::new(Arc::new(state)), storage)
}

async fn call(server: &McpServer, request: Value) -> Value {
    let response = server
        .handle_line(&request.to_string())
        .await
        .expect("request should produce a response");
    serde_json::to_value(response).unwrap()
}

async fn call_tool(server: &McpServer, id: u64, name: &str, arguments: Value) -> Value {
    call(
        server,
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        }),
    )
    .await
}

/// Decode the JSON text payload of a successful tool call.
fn tool_payload(response: &Value) -> Value {
    assert!(response["result"]["isError"].is_null(), "unexpected error: {}", response);
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}

fn assert_valid_jsonrpc_response(response: &Value) {
    assert_eq!(response["jsonrpc"], "2.0", "Invalid JSON-RPC version");
    assert!(
        response.get("result").is_some() || response.get("error").is_some(),
        "Response must have result or error"
    );
}

#[cfg(test)]
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_and_listing() {
        let mock = MockServer::start().await;
        let (server, _) = create_server(&mock).await;

        let init = call(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "1.0.0"}
                }
            }),
        )
        .await;
        assert_valid_jsonrpc_response(&init);
        assert_eq!(init["id"], 1);
        assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(init["result"]["serverInfo"]["name"], "mcp-agent-orchestrator");

        let notified = server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(notified.is_none());

        let list = call(
            &server,
            json!({"jsonrpc": "2.0", "id": "list-1", "method": "tools/list"}),
        )
        .await;
        assert_eq!(list["id"], "list-1");
        let names: Vec<&str> = list["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "agent_query",
                "agent_analyze",
                "agent_list_tools",
                "knowledge_search",
                "knowledge_correct"
            ]
        );
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Hello from the agent."}}]
            })))
            .mount(&mock)
            .await;
        let (server, storage) = create_server(&mock).await;

        let response = call_tool(
            &server,
            2,
            "agent_query",
            json!({"message": "hello", "sessionId": "mcp-1", "loopEnabled": false}),
        )
        .await;
        let payload = tool_payload(&response);

        assert_eq!(payload["success"], true);
        assert_eq!(payload["message"], "Hello from the agent.");
        assert_eq!(payload["sessionId"], "mcp-1");
        assert_eq!(payload["iterations"], 1);
        assert_eq!(payload["toolsUsed"], json!([]));

        let log = storage.get_session_conversation("mcp-1").await.unwrap();
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_knowledge_search_and_correct() {
        let mock = MockServer::start().await;
        let (server, storage) = create_server(&mock).await;

        let node = KnowledgeNode::new("alice", "Tokio scheduler", "Tokio is single threaded")
            .with_type(InsightType::Fact)
            .with_confidence(0.7);
        storage.create_knowledge(&node, &node.to_chunk()).await.unwrap();

        let found = tool_payload(
            &call_tool(
                &server,
                3,
                "knowledge_search",
                json!({"query": "tokio scheduler", "identity": "alice"}),
            )
            .await,
        );
        assert_eq!(found["count"], 1);

        let anonymous = tool_payload(
            &call_tool(&server, 4, "knowledge_search", json!({"query": "tokio"})).await,
        );
        assert_eq!(anonymous["count"], 0);

        let corrected = tool_payload(
            &call_tool(
                &server,
                5,
                "knowledge_correct",
                json!({
                    "nodeId": node.id,
                    "description": "Tokio defaults to a multi-threaded work-stealing scheduler"
                }),
            )
            .await,
        );
        assert_eq!(corrected["superseded"], node.id.as_str());
        assert_eq!(corrected["title"], "Tokio scheduler");

        let after = tool_payload(
            &call_tool(
                &server,
                6,
                "knowledge_search",
                json!({"query": "tokio scheduler", "identity": "alice"}),
            )
            .await,
        );
        assert_eq!(after["count"], 1);
        assert_eq!(after["results"][0]["node_id"], corrected["nodeId"]);
    }
}

#[cfg(test)]
mod error_handling_tests {
    use super::*;

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let mock = MockServer::start().await;
        let (server, _) = create_server(&mock).await;

        let response = server.handle_line("{not json").await.unwrap();
        let response = serde_json::to_value(response).unwrap();
        assert_eq!(response["error"]["code"], -32700);
        assert!(response["id"].is_null());
    }

    #[tokio::test]
    async fn test_method_not_found() {
        let mock = MockServer::start().await;
        let (server, _) = create_server(&mock).await;

        let response = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 7, "method": "resources/list"}),
        )
        .await;
        assert_eq!(response["error"]["code"], -32601);
        assert_eq!(response["id"], 7);
    }

    #[tokio::test]
    async fn test_missing_params() {
        let mock = MockServer::start().await;
        let (server, _) = create_server(&mock).await;

        let response =
            call(&server, json!({"jsonrpc": "2.0", "id": 8, "method": "tools/call"})).await;
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_tool_failures_are_tool_errors() {
        let mock = MockServer::start().await;
        let (server, _) = create_server(&mock).await;

        for (name, arguments) in [
            ("no_such_tool", json!({})),
            ("agent_query", json!({"identity": "u"})),
            ("knowledge_correct", json!({"nodeId": "x", "description": "  "})),
        ] {
            let response = call_tool(&server, 9, name, arguments).await;
            assert_valid_jsonrpc_response(&response);
            assert_eq!(response["result"]["isError"], true, "{} should fail", name);
            assert!(response["result"]["content"][0]["text"]
                .as_str()
                .unwrap()
                .starts_with("Error:"));
        }
    }
}
