//! `StatusStore` trait, the async persistence interface of the engine.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::unsubscribe::types::{MessageMetadata, OutcomeRecord};

/// Backend-agnostic storage for message metadata and unsubscribe outcomes.
///
/// Writes for one message id are serialized by the orchestrator; backends
/// only need to be safe for concurrent use across ids.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert or replace the unsubscribe metadata of a message.
    async fn upsert_message(
        &self,
        message_id: &str,
        metadata: &MessageMetadata,
    ) -> Result<(), DatabaseError>;

    /// Look up a message's metadata.
    async fn get_message(&self, message_id: &str) -> Result<Option<MessageMetadata>, DatabaseError>;

    // ── Outcomes ────────────────────────────────────────────────────

    /// Get the outcome record of a message, if a run ever touched it.
    async fn get_outcome(&self, message_id: &str) -> Result<Option<OutcomeRecord>, DatabaseError>;

    /// Get outcome records for several messages. Unknown ids are skipped.
    async fn get_outcomes(&self, message_ids: &[String]) -> Result<Vec<OutcomeRecord>, DatabaseError>;

    /// Create or fully overwrite the outcome record of `record.message_id`.
    async fn save_outcome(&self, record: &OutcomeRecord) -> Result<(), DatabaseError>;

    /// Reset the record to the run-started state and bump its attempt count.
    /// Returns the new attempt count.
    async fn begin_attempt(&self, message_id: &str) -> Result<u32, DatabaseError>;
}
