//! Event Reconciler
//!
//! Polls on-chain logs in bounded windows, decodes them into the closed
//! set of swap events and dispatches each to registered listeners.
//! Delivery is at-least-once: listeners consult the swap record's state
//! and ignore anything already applied. Progress is checkpointed per
//! listener id so a restart resumes where it left off.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
#[cfg(test)]
use mockall::automock;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::common::{retry_with_backoff, Backoff, CancelToken, SwapError, Ticker};
use crate::storage::CheckpointStore;
use crate::types::{LogPosition, SwapEvent, SwapKind, SyncCheckpoint};

// Event discriminators, Anchor-style: the first 8 bytes of a raw log
// select the payload type.
pub const INITIALIZED_EVENT_TAG: [u8; 8] = [0xd5, 0x1f, 0x9c, 0x42, 0x6a, 0x0b, 0x37, 0xe8];
pub const CLAIMED_EVENT_TAG: [u8; 8] = [0x21, 0xc0, 0x5e, 0x8f, 0xb3, 0x74, 0xa9, 0x1d];
pub const REFUNDED_EVENT_TAG: [u8; 8] = [0x7a, 0xe4, 0x02, 0xd8, 0x96, 0x5c, 0xc1, 0x33];

#[derive(BorshSerialize, BorshDeserialize)]
struct InitializedPayload {
    hash: [u8; 32],
    txo_hash: [u8; 32],
    nonce: u64,
    kind: u8,
    sequence: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct ClaimedPayload {
    hash: [u8; 32],
    secret: [u8; 32],
    sequence: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RefundedPayload {
    hash: [u8; 32],
    sequence: u64,
}

/// One raw log entry as fetched from the chain
#[derive(Debug, Clone)]
pub struct RawLog {
    pub position: LogPosition,
    /// Transaction that emitted the log
    pub txid: String,
    pub data: Vec<u8>,
}

/// Decode a raw log into a swap event.
///
/// Returns `Ok(None)` for logs with a foreign discriminator (other
/// programs share the log stream); malformed payloads behind a known
/// discriminator are errors.
pub fn decode_event(raw: &RawLog) -> Result<Option<SwapEvent>, SwapError> {
    if raw.data.len() < 8 {
        return Ok(None);
    }
    let tag: [u8; 8] = raw.data[..8].try_into().unwrap();
    let payload = &raw.data[8..];

    let event = match tag {
        INITIALIZED_EVENT_TAG => {
            let p = InitializedPayload::try_from_slice(payload)
                .map_err(|e| SwapError::validation(format!("malformed initialized event: {}", e)))?;
            let kind = SwapKind::from_raw(p.kind).ok_or_else(|| {
                SwapError::validation(format!("initialized event has unknown kind {}", p.kind))
            })?;
            SwapEvent::Initialized {
                payment_hash: p.hash,
                txo_hash: p.txo_hash,
                kind,
                nonce: p.nonce,
                sequence: p.sequence,
                txid: raw.txid.clone(),
            }
        }
        CLAIMED_EVENT_TAG => {
            let p = ClaimedPayload::try_from_slice(payload)
                .map_err(|e| SwapError::validation(format!("malformed claimed event: {}", e)))?;
            SwapEvent::Claimed {
                payment_hash: p.hash,
                secret: p.secret,
                sequence: p.sequence,
                txid: raw.txid.clone(),
            }
        }
        REFUNDED_EVENT_TAG => {
            let p = RefundedPayload::try_from_slice(payload)
                .map_err(|e| SwapError::validation(format!("malformed refunded event: {}", e)))?;
            SwapEvent::Refunded {
                payment_hash: p.hash,
                sequence: p.sequence,
                txid: raw.txid.clone(),
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(event))
}

/// Chain log feed, cursored by [`LogPosition`]
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Logs strictly after `after` (from the beginning when `None`),
    /// oldest first, at most `limit` entries.
    async fn fetch_logs(
        &self,
        after: Option<LogPosition>,
        limit: usize,
    ) -> Result<Vec<RawLog>, SwapError>;
}

/// Receiver of decoded swap events
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &SwapEvent) -> Result<(), SwapError>;
}

/// Reconciler tuning
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Checkpoint key for this listener
    pub listener_id: String,
    /// Maximum logs fetched per request
    pub window: usize,
    pub poll_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            listener_id: "swap-events".into(),
            window: 100,
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Polls chain logs and feeds decoded events to registered listeners
pub struct EventReconciler {
    source: Arc<dyn EventSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    /// Registry owned here; snapshotted before each dispatch pass so a
    /// listener registered mid-pass never mutates the iteration.
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    /// Live events arriving while a backlog is draining, replayed in
    /// order afterwards
    live_queue: Mutex<VecDeque<SwapEvent>>,
    draining: AtomicBool,
    config: ReconcilerConfig,
}

impl EventReconciler {
    pub fn new(
        source: Arc<dyn EventSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            source,
            checkpoints,
            listeners: RwLock::new(Vec::new()),
            live_queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            config,
        }
    }

    pub fn register(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Feed a push-delivered event (e.g. from a websocket subscription).
    /// While a backlog drain is in progress the event is queued so causal
    /// order is preserved.
    pub async fn submit_live(&self, event: SwapEvent) {
        if self.draining.load(Ordering::Acquire) {
            self.live_queue.lock().await.push_back(event);
        } else {
            self.dispatch(&event).await;
        }
    }

    /// Drain all pending logs from the last checkpoint, then replay any
    /// live events queued meanwhile. Returns the number of logs processed.
    pub async fn drain_backlog(&self, cancel: &CancelToken) -> Result<usize, SwapError> {
        self.draining.store(true, Ordering::Release);
        let result = self.drain_inner(cancel).await;
        self.draining.store(false, Ordering::Release);

        // Replay queued live events in arrival order
        loop {
            let next = self.live_queue.lock().await.pop_front();
            match next {
                Some(event) => self.dispatch(&event).await,
                None => break,
            }
        }

        result
    }

    async fn drain_inner(&self, cancel: &CancelToken) -> Result<usize, SwapError> {
        let backoff = Backoff::default();
        let mut cursor = self
            .checkpoints
            .get(&self.config.listener_id)
            .await?
            .map(|cp| cp.position);
        let mut processed = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(SwapError::Cancelled);
            }

            let window = self.config.window;
            let cursor_arg = cursor.clone();
            let logs = retry_with_backoff("fetch_logs", backoff, cancel, || {
                self.source.fetch_logs(cursor_arg.clone(), window)
            })
            .await?;

            if logs.is_empty() {
                break;
            }
            let batch_len = logs.len();

            for log in &logs {
                match decode_event(log) {
                    Ok(Some(event)) => self.dispatch(&event).await,
                    Ok(None) => {}
                    Err(err) => {
                        // A malformed log is skipped, not fatal for the loop
                        warn!(
                            target: "satswap::events",
                            position = %log.position, error = %err, "skipping undecodable log"
                        );
                    }
                }
            }

            processed += batch_len;
            cursor = logs.last().map(|l| l.position.clone());
            if let Some(position) = &cursor {
                self.checkpoints
                    .put(&SyncCheckpoint::new(
                        self.config.listener_id.clone(),
                        position.clone(),
                    ))
                    .await?;
            }

            if batch_len < window {
                break;
            }
        }

        Ok(processed)
    }

    /// Continuous polling loop. Errors are logged and the loop continues
    /// on the next tick; they never terminate the process.
    pub async fn run(&self, cancel: CancelToken) {
        let mut ticker = Ticker::new(self.config.poll_interval, cancel.clone());
        while ticker.tick().await {
            match self.drain_backlog(&cancel).await {
                Ok(n) if n > 0 => {
                    debug!(target: "satswap::events", processed = n, "reconciled events");
                }
                Ok(_) => {}
                Err(SwapError::Cancelled) => break,
                Err(err) => {
                    error!(target: "satswap::events", error = %err, "reconciliation pass failed");
                }
            }
        }
    }

    async fn dispatch(&self, event: &SwapEvent) {
        let snapshot: Vec<Arc<dyn EventListener>> =
            self.listeners.read().unwrap().clone();
        for listener in snapshot {
            if let Err(err) = listener.on_event(event).await {
                warn!(
                    target: "satswap::events",
                    kind = event.kind_name(),
                    payment_hash = %hex::encode(event.payment_hash()),
                    error = %err,
                    "listener rejected event"
                );
            }
        }
    }
}
