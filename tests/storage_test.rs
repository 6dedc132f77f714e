//! Integration tests for SQLite storage layer
//!
//! Tests database operations against in-memory and file-backed SQLite.

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use mcp_agent_orchestrator::config::DatabaseConfig;
use mcp_agent_orchestrator::error::StorageError;
use mcp_agent_orchestrator::storage::{
    ConversationEntry, InsightType, Invocation, KnowledgeNode, SqliteStorage, Storage,
    ValidationStatus,
};

async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

fn node(owner: &str, title: &str, description: &str) -> KnowledgeNode {
    KnowledgeNode::new(owner, title, description)
        .with_type(InsightType::Fact)
        .with_confidence(0.8)
        .with_domain("rust")
        .with_tags(vec!["async".to_string()])
}

#[cfg(test)]
mod conversation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_conversation_round_trip() {
        let storage = create_test_storage().await;

        let user = ConversationEntry::new("s1", "user", "What is tokio?").with_owner("alice");
        let assistant = ConversationEntry::new("s1", "assistant", "An async runtime.")
            .with_owner("alice")
            .with_tools(vec!["web-search".to_string()])
            .with_reflection("complete")
            .with_iteration(1);
        storage.append_conversation(&user).await.unwrap();
        storage.append_conversation(&assistant).await.unwrap();
        storage
            .append_conversation(&ConversationEntry::new("s2", "user", "other"))
            .await
            .unwrap();

        let history = storage.get_session_conversation("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].tools_used, vec!["web-search".to_string()]);
        assert_eq!(history[1].self_reflection.as_deref(), Some("complete"));
        assert_eq!(history[1].loop_iteration, 1);
        assert_eq!(history[1].owner_id.as_deref(), Some("alice"));
    }
}

#[cfg(test)]
mod knowledge_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_and_get_node() {
        let storage = create_test_storage().await;
        let n = node("alice", "Tokio runtime", "Work-stealing scheduler");
        storage.create_knowledge(&n, &n.to_chunk()).await.unwrap();

        let fetched = storage.get_knowledge_node(&n.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Tokio runtime");
        assert_eq!(fetched.node_type, InsightType::Fact);
        assert_eq!(fetched.tags, vec!["async".to_string()]);
        assert_eq!(fetched.validation_status, ValidationStatus::Validated);

        assert!(storage.get_knowledge_node("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_titles_are_owner_scoped() {
        let storage = create_test_storage().await;
        let a = node("alice", "Tokio runtime", "x");
        let b = node("bob", "Serde derive", "y");
        storage.create_knowledge(&a, &a.to_chunk()).await.unwrap();
        storage.create_knowledge(&b, &b.to_chunk()).await.unwrap();

        let titles = storage.list_knowledge_titles("alice").await.unwrap();
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].title, "Tokio runtime");
    }

    #[tokio::test]
    async fn test_supersede_keeps_old_node() {
        let storage = create_test_storage().await;
        let old = node("alice", "Tokio default threads", "One thread");
        storage.create_knowledge(&old, &old.to_chunk()).await.unwrap();

        let new = node("alice", "Tokio default threads", "One thread per core");
        storage
            .supersede_knowledge(&old.id, &new, &new.to_chunk())
            .await
            .unwrap();

        let old_fetched = storage.get_knowledge_node(&old.id).await.unwrap().unwrap();
        assert_eq!(old_fetched.validation_status, ValidationStatus::Deprecated);
        assert_eq!(old_fetched.superseded_by.as_deref(), Some(new.id.as_str()));
        assert!(storage.get_knowledge_node(&new.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_supersede_missing_node() {
        let storage = create_test_storage().await;
        let new = node("alice", "t", "d");
        let err = storage
            .supersede_knowledge("missing", &new, &new.to_chunk())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NodeNotFound { .. }));
        assert!(storage.get_knowledge_node(&new.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_skips_deprecated_and_ranks() {
        let storage = create_test_storage().await;
        let strong = node("alice", "Tokio scheduler", "Tokio uses a work-stealing scheduler");
        let weak = node("alice", "Runtime notes", "The scheduler is configurable");
        let stale = node("alice", "Tokio scheduler old", "Tokio scheduler is single threaded");
        for n in [&strong, &weak, &stale] {
            storage.create_knowledge(n, &n.to_chunk()).await.unwrap();
        }
        storage
            .update_validation_status(&stale.id, ValidationStatus::Deprecated)
            .await
            .unwrap();

        let hits = storage
            .search_knowledge("alice", "tokio scheduler", 5, false)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].node_id, strong.id);
        assert!(hits[0].score > hits[1].score);
        assert!(hits.iter().all(|h| h.node_id != stale.id));

        // Superseded knowledge is still visible on request, after live nodes
        let with_stale = storage
            .search_knowledge("alice", "tokio scheduler", 5, true)
            .await
            .unwrap();
        assert_eq!(with_stale.len(), 3);
        assert_eq!(with_stale[0].node_id, strong.id);
        assert_eq!(with_stale[1].node_id, stale.id);
        assert_eq!(with_stale[1].validation_status, ValidationStatus::Deprecated);

        let none = storage.search_knowledge("bob", "tokio", 5, false).await.unwrap();
        assert!(none.is_empty());
    }
}

#[cfg(test)]
mod invocation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_invocation_audit() {
        let storage = create_test_storage().await;
        let ok = Invocation::new("web-search", json!({"query": "rust"}))
            .with_session("s1")
            .success(json!([1, 2]), 12);
        let failed = Invocation::new("github-repo", json!({"owner": "a", "repo": "b"}))
            .with_session("s1")
            .failure("HTTP 404", 30);
        storage.log_invocation(&ok).await.unwrap();
        storage.log_invocation(&failed).await.unwrap();

        let logged = storage.get_session_invocations("s1").await.unwrap();
        assert_eq!(logged.len(), 2);
        assert!(logged[0].success);
        assert_eq!(logged[0].output, Some(json!([1, 2])));
        assert!(!logged[1].success);
        assert_eq!(logged[1].error.as_deref(), Some("HTTP 404"));
    }
}

#[cfg(test)]
mod file_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_file_database_persists_across_connections() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("agent.db"),
            max_connections: 2,
        };

        let n = node("alice", "Durable fact", "Survives reconnects");
        {
            let storage = SqliteStorage::new(&config).await.unwrap();
            storage.create_knowledge(&n, &n.to_chunk()).await.unwrap();
        }

        let storage = SqliteStorage::new(&config).await.unwrap();
        let fetched = storage.get_knowledge_node(&n.id).await.unwrap();
        assert_eq!(fetched.map(|f| f.title), Some("Durable fact".to_string()));
    }
}
