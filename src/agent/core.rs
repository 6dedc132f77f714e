//! Dependencies shared by the agent components.

use crate::completion::CompletionClient;
use crate::storage::SqliteStorage;

/// Storage backend and completion client used across the pipeline.
///
/// Composed into the orchestrator so each stage that needs persistence or
/// a model call borrows from one place.
#[derive(Clone)]
pub struct AgentCore {
    storage: SqliteStorage,
    completion: CompletionClient,
}

impl AgentCore {
    pub fn new(storage: SqliteStorage, completion: CompletionClient) -> Self {
        Self {
            storage,
            completion,
        }
    }

    #[inline]
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    #[inline]
    pub fn completion(&self) -> &CompletionClient {
        &self.completion
    }
}
