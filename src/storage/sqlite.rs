use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{
    ConversationEntry, Invocation, KnowledgeChunk, KnowledgeHit, KnowledgeNode, KnowledgeTitle,
    Storage, ValidationStatus,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Chunks scanned per knowledge search, newest first
const SEARCH_SCAN_LIMIT: i64 = 500;

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory database, mainly for tests.
    ///
    /// Pinned to a single connection: every SQLite `:memory:` connection
    /// is a separate database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn insert_node<'e, E>(executor: E, node: &KnowledgeNode) -> StorageResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO knowledge_nodes (
            id, owner_id, title, description, node_type, confidence, domain, tags,
            tools_involved, validation_status, superseded_by, source_message, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&node.id)
    .bind(&node.owner_id)
    .bind(&node.title)
    .bind(&node.description)
    .bind(node.node_type.to_string())
    .bind(node.confidence)
    .bind(&node.domain)
    .bind(serde_json::to_string(&node.tags).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&node.tools_involved).unwrap_or_else(|_| "[]".to_string()))
    .bind(node.validation_status.to_string())
    .bind(&node.superseded_by)
    .bind(&node.source_message)
    .bind(node.created_at.to_rfc3339())
    .bind(node.updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

async fn insert_chunk<'e, E>(executor: E, chunk: &KnowledgeChunk) -> StorageResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO knowledge_chunks (id, node_id, owner_id, content, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&chunk.id)
    .bind(&chunk.node_id)
    .bind(&chunk.owner_id)
    .bind(&chunk.content)
    .bind(chunk.created_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn append_conversation(&self, entry: &ConversationEntry) -> StorageResult<()> {
        let tools_used = serde_json::to_string(&entry.tools_used).unwrap_or_else(|_| "[]".into());

        sqlx::query(
            r#"
            INSERT INTO conversations (
                id, session_id, owner_id, role, content, tools_used, self_reflection,
                loop_iteration, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.session_id)
        .bind(&entry.owner_id)
        .bind(&entry.role)
        .bind(&entry.content)
        .bind(&tools_used)
        .bind(&entry.self_reflection)
        .bind(entry.loop_iteration as i64)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session_conversation(
        &self,
        session_id: &str,
    ) -> StorageResult<Vec<ConversationEntry>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, owner_id, role, content, tools_used, self_reflection,
                   loop_iteration, created_at
            FROM conversations
            WHERE session_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn create_knowledge(
        &self,
        node: &KnowledgeNode,
        chunk: &KnowledgeChunk,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_node(&mut *tx, node).await?;
        insert_chunk(&mut *tx, chunk).await?;
        tx.commit().await?;

        debug!(node_id = %node.id, owner = %node.owner_id, "Knowledge node stored");
        Ok(())
    }

    async fn get_knowledge_node(&self, id: &str) -> StorageResult<Option<KnowledgeNode>> {
        let row: Option<KnowledgeNodeRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, title, description, node_type, confidence, domain, tags,
                   tools_involved, validation_status, superseded_by, source_message,
                   created_at, updated_at
            FROM knowledge_nodes
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list_knowledge_titles(&self, owner_id: &str) -> StorageResult<Vec<KnowledgeTitle>> {
        let rows: Vec<KnowledgeTitleRow> = sqlx::query_as(
            r#"
            SELECT id, title, validation_status
            FROM knowledge_nodes
            WHERE owner_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn update_validation_status(
        &self,
        id: &str,
        status: ValidationStatus,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE knowledge_nodes
            SET validation_status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NodeNotFound {
                node_id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn supersede_knowledge(
        &self,
        old_id: &str,
        node: &KnowledgeNode,
        chunk: &KnowledgeChunk,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE knowledge_nodes
            SET validation_status = ?, superseded_by = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(ValidationStatus::Deprecated.to_string())
        .bind(&node.id)
        .bind(Utc::now().to_rfc3339())
        .bind(old_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls it back
            return Err(StorageError::NodeNotFound {
                node_id: old_id.to_string(),
            });
        }

        insert_node(&mut *tx, node).await?;
        insert_chunk(&mut *tx, chunk).await?;
        tx.commit().await?;

        info!(old = %old_id, new = %node.id, "Knowledge node superseded");
        Ok(())
    }

    async fn search_knowledge(
        &self,
        owner_id: &str,
        query: &str,
        limit: usize,
        include_deprecated: bool,
    ) -> StorageResult<Vec<KnowledgeHit>> {
        let tokens = query_tokens(query);
        if tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<KnowledgeHitRow> = sqlx::query_as(
            r#"
            SELECT c.node_id, n.title, c.content, n.validation_status
            FROM knowledge_chunks c
            JOIN knowledge_nodes n ON n.id = c.node_id
            WHERE c.owner_id = ? AND (? OR n.validation_status != 'deprecated')
            ORDER BY c.created_at DESC
            LIMIT ?
            "#,
        )
        .bind(owner_id)
        .bind(include_deprecated)
        .bind(SEARCH_SCAN_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<KnowledgeHit> = rows
            .into_iter()
            .filter_map(|row| {
                let haystack = row.content.to_lowercase();
                let matched = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
                if matched == 0 {
                    return None;
                }
                Some(KnowledgeHit {
                    node_id: row.node_id,
                    title: row.title,
                    content: row.content,
                    validation_status: row
                        .validation_status
                        .parse()
                        .unwrap_or(ValidationStatus::Tentative),
                    score: matched as f64 / tokens.len() as f64,
                })
            })
            .collect();

        // Stable sort keeps newest-first among equal scores
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let rank = |s: ValidationStatus| (s != ValidationStatus::Validated) as u8;
                    rank(a.validation_status).cmp(&rank(b.validation_status))
                })
        });
        hits.truncate(limit);

        Ok(hits)
    }

    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()> {
        let input = serde_json::to_string(&invocation.input).unwrap_or_default();
        let output = invocation
            .output
            .as_ref()
            .map(|o| serde_json::to_string(o).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO invocations (id, session_id, tool_name, input, output, latency_ms, success, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&invocation.id)
        .bind(&invocation.session_id)
        .bind(&invocation.tool_name)
        .bind(&input)
        .bind(&output)
        .bind(invocation.latency_ms)
        .bind(invocation.success)
        .bind(&invocation.error)
        .bind(invocation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session_invocations(&self, session_id: &str) -> StorageResult<Vec<Invocation>> {
        let rows: Vec<InvocationRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, tool_name, input, output, latency_ms, success, error, created_at
            FROM invocations
            WHERE session_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

/// Lowercased query words worth matching on.
fn query_tokens(query: &str) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "the", "and", "for", "with", "what", "how", "does", "about", "from", "this", "that",
        "are", "was", "you", "can", "tell",
    ];

    let mut tokens: Vec<String> = Vec::new();
    for word in query
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
    {
        if !tokens.contains(&word) {
            tokens.push(word);
        }
    }
    tokens
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    session_id: String,
    owner_id: Option<String>,
    role: String,
    content: String,
    tools_used: String,
    self_reflection: Option<String>,
    loop_iteration: i64,
    created_at: String,
}

impl From<ConversationRow> for ConversationEntry {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            owner_id: row.owner_id,
            role: row.role,
            content: row.content,
            tools_used: parse_list(&row.tools_used),
            self_reflection: row.self_reflection,
            loop_iteration: row.loop_iteration.max(0) as u32,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct KnowledgeNodeRow {
    id: String,
    owner_id: String,
    title: String,
    description: String,
    node_type: String,
    confidence: f64,
    domain: String,
    tags: String,
    tools_involved: String,
    validation_status: String,
    superseded_by: Option<String>,
    source_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<KnowledgeNodeRow> for KnowledgeNode {
    fn from(row: KnowledgeNodeRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            description: row.description,
            node_type: row.node_type.parse().unwrap_or_default(),
            confidence: row.confidence,
            domain: row.domain,
            tags: parse_list(&row.tags),
            tools_involved: parse_list(&row.tools_involved),
            validation_status: row.validation_status.parse().unwrap_or_default(),
            superseded_by: row.superseded_by,
            source_message: row.source_message,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct KnowledgeTitleRow {
    id: String,
    title: String,
    validation_status: String,
}

impl From<KnowledgeTitleRow> for KnowledgeTitle {
    fn from(row: KnowledgeTitleRow) -> Self {
        Self {
            node_id: row.id,
            title: row.title,
            validation_status: row.validation_status.parse().unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct KnowledgeHitRow {
    node_id: String,
    title: String,
    content: String,
    validation_status: String,
}

#[derive(sqlx::FromRow)]
struct InvocationRow {
    id: String,
    session_id: Option<String>,
    tool_name: String,
    input: String,
    output: Option<String>,
    latency_ms: Option<i64>,
    success: bool,
    error: Option<String>,
    created_at: String,
}

impl From<InvocationRow> for Invocation {
    fn from(row: InvocationRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            tool_name: row.tool_name,
            input: serde_json::from_str(&row.input).unwrap_or(serde_json::Value::Null),
            output: row.output.and_then(|s| serde_json::from_str(&s).ok()),
            latency_ms: row.latency_ms,
            success: row.success,
            error: row.error,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_tokens_drop_stopwords_and_short_words() {
        assert_eq!(
            query_tokens("What is the Tokio runtime, and how does tokio scale?"),
            vec!["tokio".to_string(), "runtime".to_string(), "scale".to_string()]
        );
        assert!(query_tokens("a an to").is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let node = KnowledgeNode::new("u1", "Tokio runtime", "Tokio schedules async tasks");
        storage.create_knowledge(&node, &node.to_chunk()).await.unwrap();

        let loaded = storage.get_knowledge_node(&node.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Tokio runtime");

        let hits = storage.search_knowledge("u1", "tokio tasks", 5, false).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < f64::EPSILON);

        assert!(storage.search_knowledge("u2", "tokio", 5, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_node_fails() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let err = storage
            .update_validation_status("missing", ValidationStatus::Deprecated)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NodeNotFound { .. }));
    }
}
