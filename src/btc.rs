//! Bitcoin Data Source Interface
//!
//! What the core needs from a Bitcoin indexer: tip height, headers, and
//! per-transaction confirmation/merkle data. Treated as an untrusted,
//! retryable HTTP-style collaborator; [`crate::esplora::EsploraClient`] is
//! the bundled implementation.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::common::SwapError;
use crate::types::BlockHeader;

/// Confirmation status of a Bitcoin transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
}

/// One transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutInfo {
    pub value: u64,
    /// Raw scriptPubKey bytes
    pub script_pubkey: Vec<u8>,
}

/// Transaction details needed for claim verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub txid: String,
    pub status: TxStatus,
    pub outputs: Vec<TxOutInfo>,
    pub locktime: u32,
    /// nSequence of the first input (nonce binding for nonced swaps)
    pub first_input_sequence: u32,
}

/// Merkle inclusion data for a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProofData {
    pub block_height: u64,
    /// Transaction index within the block
    pub pos: u32,
    /// Sibling hashes leaf-to-root, internal byte order
    pub siblings: Vec<[u8; 32]>,
}

/// Read-only Bitcoin chain view
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BitcoinDataSource: Send + Sync {
    async fn get_tip_height(&self) -> Result<u64, SwapError>;

    async fn get_block_header(&self, height: u64) -> Result<BlockHeader, SwapError>;

    /// Ascending run of headers starting at `start_height`
    async fn get_header_batch(
        &self,
        start_height: u64,
        count: u32,
    ) -> Result<Vec<BlockHeader>, SwapError>;

    async fn get_transaction(&self, txid: &str) -> Result<TxInfo, SwapError>;

    async fn get_raw_transaction(&self, txid: &str) -> Result<Vec<u8>, SwapError>;

    async fn get_merkle_proof(&self, txid: &str) -> Result<MerkleProofData, SwapError>;
}
