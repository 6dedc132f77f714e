//! Storage layer for conversations and durable knowledge.
//!
//! This module provides SQLite-based storage for the conversation log,
//! knowledge nodes with their searchable chunks, and the tool invocation
//! audit trail. Knowledge is append-mostly: nodes are never deleted, a
//! correction adds a new node and marks the old one deprecated.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// One message appended to a session's conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Unique entry identifier.
    pub id: String,
    /// Session the entry belongs to.
    pub session_id: String,
    /// Caller identity, if known.
    pub owner_id: Option<String>,
    /// `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
    /// Tools used while producing this message.
    pub tools_used: Vec<String>,
    /// Reflection notes attached to an assistant message.
    pub self_reflection: Option<String>,
    /// Reflection loop iteration that produced the message (0 = first pass).
    pub loop_iteration: u32,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
}

impl ConversationEntry {
    /// Create a new conversation entry
    pub fn new(
        session_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            owner_id: None,
            role: role.into(),
            content: content.into(),
            tools_used: Vec::new(),
            self_reflection: None,
            loop_iteration: 0,
            created_at: Utc::now(),
        }
    }

    /// Set the owner
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Set the tools used
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools_used = tools;
        self
    }

    /// Attach reflection notes
    pub fn with_reflection(mut self, reflection: impl Into<String>) -> Self {
        self.self_reflection = Some(reflection.into());
        self
    }

    /// Set the loop iteration
    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.loop_iteration = iteration;
        self
    }
}

/// Kind of knowledge an insight captures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    /// A general observation.
    #[default]
    Insight,
    /// A definition or idea.
    Concept,
    /// A how-to or procedure.
    Process,
    /// A verified fact.
    Fact,
    /// An approach that worked.
    Strategy,
    /// A fact learned from weak evidence.
    TentativeFact,
}

impl std::fmt::Display for InsightType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsightType::Insight => write!(f, "insight"),
            InsightType::Concept => write!(f, "concept"),
            InsightType::Process => write!(f, "process"),
            InsightType::Fact => write!(f, "fact"),
            InsightType::Strategy => write!(f, "strategy"),
            InsightType::TentativeFact => write!(f, "tentative_fact"),
        }
    }
}

impl std::str::FromStr for InsightType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "insight" => Ok(InsightType::Insight),
            "concept" => Ok(InsightType::Concept),
            "process" => Ok(InsightType::Process),
            "fact" => Ok(InsightType::Fact),
            "strategy" => Ok(InsightType::Strategy),
            "tentative_fact" | "tentative" => Ok(InsightType::TentativeFact),
            _ => Err(format!("Unknown insight type: {}", s)),
        }
    }
}

/// Validation state of a knowledge node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Learned from successful, non-empty tool data.
    #[default]
    Validated,
    /// Learned from mostly empty tool data.
    Tentative,
    /// Superseded by a newer node.
    Deprecated,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationStatus::Validated => write!(f, "validated"),
            ValidationStatus::Tentative => write!(f, "tentative"),
            ValidationStatus::Deprecated => write!(f, "deprecated"),
        }
    }
}

impl std::str::FromStr for ValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "validated" => Ok(ValidationStatus::Validated),
            "tentative" => Ok(ValidationStatus::Tentative),
            "deprecated" => Ok(ValidationStatus::Deprecated),
            _ => Err(format!("Unknown validation status: {}", s)),
        }
    }
}

/// A durable knowledge node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeNode {
    /// Unique node identifier.
    pub id: String,
    /// Owner (caller identity) the knowledge belongs to.
    pub owner_id: String,
    /// Short title, used for deduplication.
    pub title: String,
    /// Full description of the insight.
    pub description: String,
    /// Kind of knowledge.
    pub node_type: InsightType,
    /// Confidence (0.0-1.0).
    pub confidence: f64,
    /// Subject domain.
    pub domain: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Tools whose output the insight was distilled from.
    pub tools_involved: Vec<String>,
    /// Validation state.
    pub validation_status: ValidationStatus,
    /// Node that replaced this one, if deprecated.
    pub superseded_by: Option<String>,
    /// The user message the insight came from.
    pub source_message: Option<String>,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// When the node was last updated.
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeNode {
    /// Create a new knowledge node
    pub fn new(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            title: title.into(),
            description: description.into(),
            node_type: InsightType::Insight,
            confidence: 0.5,
            domain: "general".to_string(),
            tags: Vec::new(),
            tools_involved: Vec::new(),
            validation_status: ValidationStatus::Validated,
            superseded_by: None,
            source_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set node type
    pub fn with_type(mut self, node_type: InsightType) -> Self {
        self.node_type = node_type;
        self
    }

    /// Set confidence
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set tools involved
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools_involved = tools;
        self
    }

    /// Set validation status
    pub fn with_status(mut self, status: ValidationStatus) -> Self {
        self.validation_status = status;
        self
    }

    /// Record the originating message
    pub fn with_source(mut self, message: impl Into<String>) -> Self {
        self.source_message = Some(message.into());
        self
    }

    /// Build the searchable chunk derived from this node
    pub fn to_chunk(&self) -> KnowledgeChunk {
        let mut content = format!("{}\n\n{}", self.title, self.description);
        if !self.tags.is_empty() {
            content.push_str(&format!("\n\nTags: {}", self.tags.join(", ")));
        }
        KnowledgeChunk {
            id: Uuid::new_v4().to_string(),
            node_id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            content,
            created_at: self.created_at,
        }
    }
}

/// Searchable text derived from a knowledge node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    /// Unique chunk identifier.
    pub id: String,
    /// Node the chunk was derived from.
    pub node_id: String,
    /// Owner of the node.
    pub owner_id: String,
    /// Searchable text.
    pub content: String,
    /// When the chunk was created.
    pub created_at: DateTime<Utc>,
}

/// Title of an existing node, used by the duplicate probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeTitle {
    pub node_id: String,
    pub title: String,
    pub validation_status: ValidationStatus,
}

/// A chunk matched by a knowledge search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub node_id: String,
    pub title: String,
    pub content: String,
    pub validation_status: ValidationStatus,
    /// Fraction of query tokens found in the chunk (0.0-1.0).
    pub score: f64,
}

/// Tool invocation log entry for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique invocation identifier.
    pub id: String,
    /// Optional session ID.
    pub session_id: Option<String>,
    /// Name of the tool invoked.
    pub tool_name: String,
    /// Input parameters sent to the backend.
    pub input: serde_json::Value,
    /// Output (if successful).
    pub output: Option<serde_json::Value>,
    /// Latency in milliseconds.
    pub latency_ms: Option<i64>,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Error message (if failed).
    pub error: Option<String>,
    /// When the invocation occurred.
    pub created_at: DateTime<Utc>,
}

impl Invocation {
    /// Create a new invocation log
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: None,
            tool_name: tool_name.into(),
            input,
            output: None,
            latency_ms: None,
            success: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Set session ID
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Mark as successful
    pub fn success(mut self, output: serde_json::Value, latency_ms: i64) -> Self {
        self.success = true;
        self.output = Some(output);
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Mark as failed
    pub fn failure(mut self, error: impl Into<String>, latency_ms: i64) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Storage trait for database operations.
#[async_trait]
pub trait Storage: Send + Sync {
    // Conversation operations

    /// Append a message to a session's conversation.
    async fn append_conversation(&self, entry: &ConversationEntry) -> StorageResult<()>;
    /// Get a session's conversation in append order.
    async fn get_session_conversation(&self, session_id: &str)
        -> StorageResult<Vec<ConversationEntry>>;

    // Knowledge operations

    /// Insert a node and its chunk in one transaction.
    async fn create_knowledge(
        &self,
        node: &KnowledgeNode,
        chunk: &KnowledgeChunk,
    ) -> StorageResult<()>;
    /// Get a node by ID.
    async fn get_knowledge_node(&self, id: &str) -> StorageResult<Option<KnowledgeNode>>;
    /// List an owner's node titles, newest first.
    async fn list_knowledge_titles(&self, owner_id: &str) -> StorageResult<Vec<KnowledgeTitle>>;
    /// Change a node's validation status.
    async fn update_validation_status(
        &self,
        id: &str,
        status: ValidationStatus,
    ) -> StorageResult<()>;
    /// Insert a replacement node and deprecate the old one in one transaction.
    async fn supersede_knowledge(
        &self,
        old_id: &str,
        node: &KnowledgeNode,
        chunk: &KnowledgeChunk,
    ) -> StorageResult<()>;
    /// Token-match an owner's chunks against a query. Deprecated nodes are
    /// only returned when asked for, ranked after live ones of equal score.
    async fn search_knowledge(
        &self,
        owner_id: &str,
        query: &str,
        limit: usize,
        include_deprecated: bool,
    ) -> StorageResult<Vec<KnowledgeHit>>;

    // Invocation logging

    /// Log a tool invocation.
    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()>;
    /// Get a session's invocations in order.
    async fn get_session_invocations(&self, session_id: &str) -> StorageResult<Vec<Invocation>>;
}
