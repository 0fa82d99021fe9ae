//! Persistence: narrow get/put/delete stores for swap records and
//! reconciliation checkpoints.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::{MemoryCheckpointStore, MemorySwapStore};
pub use sqlite::SqliteStore;
pub use traits::{CheckpointStore, StorageError, StorageResult, SwapStore};
