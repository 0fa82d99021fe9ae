//! Storage Trait Definitions
//!
//! Narrow persistence interfaces for swap records and reconciliation
//! checkpoints: get/put/delete with last-write-wins semantics, no
//! transactional guarantees. Implementations are SQLite (production) and
//! in-memory (testing).

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{PaymentHash, SwapRecord, SwapState, SyncCheckpoint};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Swap record storage, keyed by payment hash
#[async_trait]
pub trait SwapStore: Send + Sync {
    /// Save a record (upsert, last-write-wins)
    async fn put(&self, record: &SwapRecord) -> StorageResult<()>;

    /// Load a record by payment hash
    async fn get(&self, payment_hash: &PaymentHash) -> StorageResult<Option<SwapRecord>>;

    /// Delete a record; returns whether it existed
    async fn delete(&self, payment_hash: &PaymentHash) -> StorageResult<bool>;

    /// All records in a specific state
    async fn get_by_state(&self, state: SwapState) -> StorageResult<Vec<SwapRecord>>;

    /// All records not in a terminal state
    async fn get_active(&self) -> StorageResult<Vec<SwapRecord>>;

    /// Every stored record
    async fn get_all(&self) -> StorageResult<Vec<SwapRecord>>;
}

/// Reconciliation checkpoint storage, keyed by listener id
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, checkpoint: &SyncCheckpoint) -> StorageResult<()>;

    async fn get(&self, listener_id: &str) -> StorageResult<Option<SyncCheckpoint>>;

    async fn delete(&self, listener_id: &str) -> StorageResult<bool>;
}
