//! Core data model: swap records, relay headers, sync checkpoints.

pub mod checkpoint;
pub mod header;
pub mod swap;

pub use checkpoint::{LogPosition, SyncCheckpoint};
pub use header::{BlockHeader, ForkId, StoredHeader};
pub use swap::{
    EventOutcome, PaymentHash, SwapEvent, SwapKind, SwapParams, SwapRecord, SwapState,
};
