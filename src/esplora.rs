//! Esplora API Client
//!
//! Bundled [`BitcoinDataSource`] implementation backed by an Esplora-style
//! HTTP indexer. Every failure is reported as transient: the indexer is an
//! untrusted collaborator and callers retry with backoff.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::btc::{BitcoinDataSource, MerkleProofData, TxInfo, TxOutInfo, TxStatus};
use crate::common::SwapError;
use crate::types::BlockHeader;

/// Esplora API endpoints
pub const MAINNET_URL: &str = "https://blockstream.info/api";
pub const TESTNET_URL: &str = "https://blockstream.info/testnet/api";

/// Esplora HTTP client
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    base_url: String,
}

impl EsploraClient {
    /// Create a new client with custom URL
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a client for Bitcoin mainnet
    pub fn new_mainnet() -> Self {
        Self::new(MAINNET_URL)
    }

    /// Create a client for Bitcoin testnet
    pub fn new_testnet() -> Self {
        Self::new(TESTNET_URL)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(&self, path: &str) -> Result<String, SwapError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SwapError::transient(format!("esplora request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(SwapError::transient(format!(
                "esplora {} returned {}",
                path,
                resp.status()
            )));
        }

        resp.text()
            .await
            .map_err(|e| SwapError::transient(format!("esplora response read failed: {}", e)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SwapError> {
        let text = self.get_text(path).await?;
        serde_json::from_str(&text)
            .map_err(|e| SwapError::validation(format!("esplora {} malformed: {}", path, e)))
    }
}

#[async_trait]
impl BitcoinDataSource for EsploraClient {
    async fn get_tip_height(&self) -> Result<u64, SwapError> {
        self.get_text("/blocks/tip/height")
            .await?
            .trim()
            .parse()
            .map_err(|e| SwapError::validation(format!("invalid tip height: {}", e)))
    }

    async fn get_block_header(&self, height: u64) -> Result<BlockHeader, SwapError> {
        let block_hash = self.get_text(&format!("/block-height/{}", height)).await?;
        let header_hex = self
            .get_text(&format!("/block/{}/header", block_hash.trim()))
            .await?;

        let bytes = hex::decode(header_hex.trim())
            .map_err(|e| SwapError::validation(format!("invalid header hex: {}", e)))?;
        let raw: [u8; 80] = bytes
            .try_into()
            .map_err(|_| SwapError::validation("block header must be 80 bytes"))?;

        Ok(BlockHeader::from_raw(&raw, height))
    }

    async fn get_header_batch(
        &self,
        start_height: u64,
        count: u32,
    ) -> Result<Vec<BlockHeader>, SwapError> {
        let mut headers = Vec::with_capacity(count as usize);
        for i in 0..count {
            headers.push(self.get_block_header(start_height + i as u64).await?);
        }
        Ok(headers)
    }

    async fn get_transaction(&self, txid: &str) -> Result<TxInfo, SwapError> {
        let tx: EsploraTx = self.get_json(&format!("/tx/{}", txid)).await?;

        let outputs = tx
            .vout
            .iter()
            .map(|out| {
                Ok(TxOutInfo {
                    value: out.value,
                    script_pubkey: hex::decode(&out.scriptpubkey).map_err(|e| {
                        SwapError::validation(format!("invalid scriptpubkey hex: {}", e))
                    })?,
                })
            })
            .collect::<Result<Vec<_>, SwapError>>()?;

        Ok(TxInfo {
            txid: tx.txid,
            status: TxStatus {
                confirmed: tx.status.confirmed,
                block_height: tx.status.block_height,
                block_hash: tx.status.block_hash,
            },
            outputs,
            locktime: tx.locktime,
            first_input_sequence: tx.vin.first().map(|v| v.sequence).unwrap_or(0),
        })
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Vec<u8>, SwapError> {
        let tx_hex = self.get_text(&format!("/tx/{}/hex", txid)).await?;
        hex::decode(tx_hex.trim())
            .map_err(|e| SwapError::validation(format!("invalid raw tx hex: {}", e)))
    }

    async fn get_merkle_proof(&self, txid: &str) -> Result<MerkleProofData, SwapError> {
        let proof: EsploraMerkleProof = self.get_json(&format!("/tx/{}/merkle-proof", txid)).await?;

        // Esplora reports siblings in display order; flip to internal
        let mut siblings = Vec::with_capacity(proof.merkle.len());
        for sibling_hex in &proof.merkle {
            let raw = hex::decode(sibling_hex)
                .map_err(|e| SwapError::validation(format!("invalid merkle sibling: {}", e)))?;
            let mut sibling: [u8; 32] = raw
                .try_into()
                .map_err(|_| SwapError::validation("merkle sibling must be 32 bytes"))?;
            sibling.reverse();
            siblings.push(sibling);
        }

        Ok(MerkleProofData {
            block_height: proof.block_height,
            pos: proof.pos,
            siblings,
        })
    }
}

// =============================================================================
// Esplora API Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    locktime: u32,
    vin: Vec<EsploraTxInput>,
    vout: Vec<EsploraTxOutput>,
    status: EsploraTxStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraTxInput {
    sequence: u32,
}

#[derive(Debug, Deserialize)]
struct EsploraTxOutput {
    scriptpubkey: String,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraTxStatus {
    confirmed: bool,
    block_height: Option<u64>,
    block_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EsploraMerkleProof {
    block_height: u64,
    merkle: Vec<String>,
    pos: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_response_parsing() {
        let json = r#"{
            "txid": "abc123",
            "version": 2,
            "locktime": 500000001,
            "vin": [{"sequence": 4294967293}],
            "vout": [{"scriptpubkey": "0014aabb", "value": 100000}],
            "status": {"confirmed": true, "block_height": 103, "block_hash": "00ff"}
        }"#;

        let tx: EsploraTx = serde_json::from_str(json).unwrap();
        assert_eq!(tx.locktime, 500_000_001);
        assert_eq!(tx.vin[0].sequence, 4_294_967_293);
        assert_eq!(tx.vout[0].value, 100_000);
        assert!(tx.status.confirmed);
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = EsploraClient::new("https://example.com/api/");
        assert_eq!(client.base_url(), "https://example.com/api");
    }
}
