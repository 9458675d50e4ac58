//! Persistence collaborator for the zapflow runtime.
//!
//! The [`Store`] trait covers the three concerns the runtime persists:
//! conversation logs, per-account logic configs, and broadcast campaign
//! state. [`sqlite::SqliteStore`] is the production implementation;
//! [`memory::MemoryStore`] backs tests.

pub mod memory;
pub mod model;
pub mod sqlite;

use async_trait::async_trait;

use zapflow_rules::LogicConfig;

pub use model::{
    BroadcastContact, BroadcastJob, ContactPatch, ContactStatus, Direction, JobPatch, JobStatus,
};

/// Error from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Rejected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    // ---- conversations ----
    async fn get_or_create_conversation(
        &self,
        account_id: &str,
        address: &str,
    ) -> StoreResult<String>;

    async fn append_message(
        &self,
        conversation_id: &str,
        direction: Direction,
        content: &str,
        from_bot: bool,
    ) -> StoreResult<()>;

    // ---- logic configs ----
    async fn get_logic_config(&self, account_id: &str) -> StoreResult<Option<LogicConfig>>;
    async fn put_logic_config(&self, account_id: &str, config: &LogicConfig) -> StoreResult<()>;

    // ---- broadcast jobs ----
    async fn create_broadcast_job(
        &self,
        account_id: &str,
        message: &str,
        media: Option<&zapflow_common::MediaRef>,
        contacts: &[String],
    ) -> StoreResult<BroadcastJob>;

    async fn get_broadcast_job(&self, job_id: &str) -> StoreResult<Option<BroadcastJob>>;
    async fn update_broadcast_job(&self, job_id: &str, patch: JobPatch) -> StoreResult<()>;

    /// Delete a job and its contacts. Refused while the job is running.
    async fn delete_broadcast_job(&self, job_id: &str) -> StoreResult<()>;

    // ---- broadcast contacts ----
    /// The earliest contact still pending for a job, if any.
    async fn next_pending_contact(&self, job_id: &str) -> StoreResult<Option<BroadcastContact>>;
    async fn list_pending_contacts(&self, job_id: &str) -> StoreResult<Vec<BroadcastContact>>;
    async fn update_contact(&self, contact_id: &str, patch: ContactPatch) -> StoreResult<()>;
}
