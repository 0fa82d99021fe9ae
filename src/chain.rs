//! Chain Contract Interface
//!
//! Narrow capability set the core needs from the on-chain escrow + relay
//! programs. Concrete chains (EVM, Solana) implement this with their own
//! transaction and fee mechanics, entirely outside this crate.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::auth::SignedAuthorization;
use crate::common::SwapError;
use crate::spv::MerkleProof;
use crate::types::{BlockHeader, ForkId, PaymentHash, StoredHeader, SwapRecord};

/// Authoritative escrow status as reported by the contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    NotCommitted,
    Committed,
    /// Claimed, possibly by a third-party watchtower
    Paid,
    Expired,
}

impl std::fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommitStatus::NotCommitted => "not_committed",
            CommitStatus::Committed => "committed",
            CommitStatus::Paid => "paid",
            CommitStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// Relay tip summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipData {
    pub height: u64,
    /// Cumulative chain-work at the tip, big-endian
    pub chain_work: [u8; 32],
}

/// Which relay entry point a header batch goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Append to the main chain
    ExtendMain,
    /// First submission of a new fork; proves against accumulated
    /// chain-work, and the relay assigns the fork id
    NewFork,
    /// Subsequent submissions onto an existing fork
    ExtendFork(u32),
}

impl SubmitMode {
    pub fn is_fork(self) -> bool {
        !matches!(self, SubmitMode::ExtendMain)
    }
}

/// Result of one header-batch submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    /// Fork the batch landed on; a `NewFork` submission reports the
    /// assigned concrete id here
    pub fork: ForkId,
    pub new_tip_height: u64,
    pub txid: String,
}

/// Proof material unlocking a claim
#[derive(Debug, Clone)]
pub enum ClaimProof {
    /// Lightning preimage whose SHA-256 equals the payment hash
    Secret([u8; 32]),
    /// SPV inclusion proof of a Bitcoin transaction matching the swap's
    /// txo-hash commitment
    Spv {
        raw_tx: Vec<u8>,
        vout: u32,
        proof: MerkleProof,
        block_height: u64,
    },
}

/// The on-chain escrow + relay contract, as seen by the core.
///
/// Transport failures must surface as [`SwapError::Transient`] so callers
/// can retry with backoff.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainContract: Send + Sync {
    /// Commit the escrow using a counterparty-signed authorization.
    /// Returns the commit transaction id.
    async fn init(
        &self,
        swap: &SwapRecord,
        auth: &SignedAuthorization,
    ) -> Result<String, SwapError>;

    /// Claim the escrow. Returns the claim transaction id.
    async fn claim(&self, payment_hash: &PaymentHash, proof: ClaimProof)
        -> Result<String, SwapError>;

    /// Refund the escrow, either after expiry or cooperatively with a
    /// counterparty-signed refund authorization.
    async fn refund<'a>(
        &self,
        payment_hash: &PaymentHash,
        auth: Option<&'a SignedAuthorization>,
    ) -> Result<String, SwapError>;

    /// Authoritative escrow status
    async fn get_commit_status(&self, payment_hash: &PaymentHash)
        -> Result<CommitStatus, SwapError>;

    /// Relay tip height and cumulative chain-work
    async fn get_tip_data(&self) -> Result<TipData, SwapError>;

    /// The last header the relay has committed, if initialized
    async fn retrieve_latest_known_header(&self) -> Result<Option<StoredHeader>, SwapError>;

    /// The canonical committed header at `height`, if any
    async fn get_committed_header(&self, height: u64)
        -> Result<Option<StoredHeader>, SwapError>;

    /// Submit a header batch through the entry point selected by `mode`
    async fn submit_headers(
        &self,
        batch: &[BlockHeader],
        mode: SubmitMode,
    ) -> Result<SubmitResult, SwapError>;

    /// Fee rate for a submission mode. Fetched lazily and cached once per
    /// sync run by the synchronizer.
    async fn get_fee_rate(&self, mode: SubmitMode) -> Result<u64, SwapError>;
}
