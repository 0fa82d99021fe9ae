//! In-Memory Storage Implementations
//!
//! Thread-safe stores for testing and development. Data is lost when the
//! process exits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{CheckpointStore, StorageResult, SwapStore};
use crate::types::{PaymentHash, SwapRecord, SwapState, SyncCheckpoint};

/// In-memory swap store
#[derive(Clone, Default)]
pub struct MemorySwapStore {
    records: Arc<RwLock<HashMap<PaymentHash, SwapRecord>>>,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SwapStore for MemorySwapStore {
    async fn put(&self, record: &SwapRecord) -> StorageResult<()> {
        self.records
            .write()
            .await
            .insert(record.payment_hash, record.clone());
        Ok(())
    }

    async fn get(&self, payment_hash: &PaymentHash) -> StorageResult<Option<SwapRecord>> {
        Ok(self.records.read().await.get(payment_hash).cloned())
    }

    async fn delete(&self, payment_hash: &PaymentHash) -> StorageResult<bool> {
        Ok(self.records.write().await.remove(payment_hash).is_some())
    }

    async fn get_by_state(&self, state: SwapState) -> StorageResult<Vec<SwapRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect())
    }

    async fn get_active(&self) -> StorageResult<Vec<SwapRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn get_all(&self) -> StorageResult<Vec<SwapRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

/// In-memory checkpoint store
#[derive(Clone, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, SyncCheckpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, checkpoint: &SyncCheckpoint) -> StorageResult<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.listener_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn get(&self, listener_id: &str) -> StorageResult<Option<SyncCheckpoint>> {
        Ok(self.checkpoints.read().await.get(listener_id).cloned())
    }

    async fn delete(&self, listener_id: &str) -> StorageResult<bool> {
        Ok(self.checkpoints.write().await.remove(listener_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogPosition, SwapKind, SwapParams};

    fn record(hash: u8) -> SwapRecord {
        SwapRecord::new(SwapParams {
            payment_hash: [hash; 32],
            kind: SwapKind::Htlc,
            offerer: "offerer".into(),
            claimer: "claimer".into(),
            token: "token".into(),
            amount: 1000,
            security_deposit: 0,
            claimer_bounty: 0,
            expiry: 2_000_000_000,
            required_confirmations: 1,
            nonce: 0,
            pay_in: true,
            pay_out: false,
            txo_hash: None,
        })
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemorySwapStore::new();
        let rec = record(1);

        store.put(&rec).await.unwrap();
        assert_eq!(store.get(&rec.payment_hash).await.unwrap(), Some(rec.clone()));

        assert!(store.delete(&rec.payment_hash).await.unwrap());
        assert!(!store.delete(&rec.payment_hash).await.unwrap());
        assert_eq!(store.get(&rec.payment_hash).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_is_last_write_wins() {
        let store = MemorySwapStore::new();
        let mut rec = record(1);

        store.put(&rec).await.unwrap();
        rec.mark_committed("commit-tx".into());
        store.put(&rec).await.unwrap();

        let loaded = store.get(&rec.payment_hash).await.unwrap().unwrap();
        assert_eq!(loaded.state, SwapState::Committed);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_active_excludes_terminal() {
        let store = MemorySwapStore::new();
        let active = record(1);
        let mut done = record(2);
        done.mark_committed("tx".into());
        done.mark_claimed(None);

        store.put(&active).await.unwrap();
        store.put(&done).await.unwrap();

        let result = store.get_active().await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].payment_hash, active.payment_hash);
    }

    #[tokio::test]
    async fn test_checkpoint_store() {
        let store = MemoryCheckpointStore::new();
        let cp = SyncCheckpoint::new("listener-1", LogPosition::Height(42));

        store.put(&cp).await.unwrap();
        assert_eq!(store.get("listener-1").await.unwrap(), Some(cp));
        assert_eq!(store.get("listener-2").await.unwrap(), None);
        assert!(store.delete("listener-1").await.unwrap());
    }
}
