//! Reconciliation Checkpoints
//!
//! Tracks the last-processed on-chain log position per listener so event
//! reconciliation resumes where it left off instead of re-scanning from
//! genesis.

use serde::{Deserialize, Serialize};

/// Position within a chain's log stream.
///
/// EVM-style chains cursor by block height; Solana-style chains cursor by
/// transaction signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LogPosition {
    Height(u64),
    Signature(String),
}

impl std::fmt::Display for LogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogPosition::Height(h) => write!(f, "height:{}", h),
            LogPosition::Signature(s) => write!(f, "sig:{}", s),
        }
    }
}

/// Last-processed log position for one listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub listener_id: String,
    pub position: LogPosition,
    pub updated_at: u64,
}

impl SyncCheckpoint {
    pub fn new(listener_id: impl Into<String>, position: LogPosition) -> Self {
        Self {
            listener_id: listener_id.into(),
            position,
            updated_at: crate::common::now_ts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_round_trip() {
        let cp = SyncCheckpoint::new("swap-events", LogPosition::Height(1_234_567));
        let json = serde_json::to_string(&cp).unwrap();
        let back: SyncCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(cp, back);

        let cp = SyncCheckpoint::new("swap-events", LogPosition::Signature("5Nf3...".into()));
        let json = serde_json::to_string(&cp).unwrap();
        let back: SyncCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(cp, back);
    }
}
