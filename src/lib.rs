//! satswap - Trustless Bitcoin <-> Smart-Chain Atomic Swap Core
//!
//! One party escrows value in an on-chain contract; the other proves a
//! Bitcoin payment (Lightning preimage or on-chain SPV proof) to claim it.
//! No single party is trusted: the escrow contract verifies claims against
//! a Bitcoin header relay this crate keeps synchronized.
//!
//! ## Components
//!
//! 1. **Swap state machine** ([`swap::SwapService`]) - per-swap lifecycle
//!    with guard-checked transitions and watchdog-reconciled waits
//! 2. **Relay synchronizer** ([`relay::RelaySynchronizer`]) - feeds Bitcoin
//!    headers into the on-chain light client, handling forks
//! 3. **SPV verifier** ([`spv`]) - merkle inclusion proofs against
//!    relay-committed headers
//! 4. **Signed authorizations** ([`auth`]) - time-bounded, replay-resistant
//!    counterparty signatures over canonical swap bytes
//! 5. **Event reconciler** ([`reconciler::EventReconciler`]) - idempotent,
//!    checkpointed application of on-chain logs
//!
//! Chain transaction mechanics (fees, accounts) live behind
//! [`chain::ChainContract`]; Bitcoin indexing behind
//! [`btc::BitcoinDataSource`] (Esplora implementation bundled).

pub mod auth;
pub mod btc;
pub mod chain;
pub mod common;
pub mod config;
pub mod esplora;
pub mod logging;
pub mod reconciler;
pub mod relay;
pub mod spv;
pub mod storage;
pub mod swap;
pub mod types;

// Re-exports: error handling
pub use common::{cancel_pair, Backoff, CancelHandle, CancelToken, SwapError};

// Re-exports: data model
pub use types::{
    BlockHeader, ForkId, LogPosition, PaymentHash, StoredHeader, SwapEvent, SwapKind,
    SwapParams, SwapRecord, SwapState, SyncCheckpoint,
};

// Re-exports: authorizations
pub use auth::{AuthBody, AuthContext, FreshnessAnchor, SignedAuthorization};

// Re-exports: collaborator interfaces
pub use btc::BitcoinDataSource;
pub use chain::{ChainContract, ClaimProof, CommitStatus, SubmitMode, SubmitResult, TipData};

// Re-exports: components
pub use esplora::EsploraClient;
pub use reconciler::{EventListener, EventReconciler, EventSource, ReconcilerConfig};
pub use relay::{RelayConfig, RelaySynchronizer, SyncReport};
pub use spv::MerkleProof;
pub use storage::{MemoryCheckpointStore, MemorySwapStore, SqliteStore};
pub use swap::{SwapService, SwapServiceConfig, WaitResult};

// Re-exports: configuration
pub use config::{CoreConfig, Network};
