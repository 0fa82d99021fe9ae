//! SPV Proof Verification
//!
//! Proves a Bitcoin transaction's inclusion in a block the on-chain relay
//! has committed, without trusting any single party. The merkle root is
//! recomputed from the transaction id and sibling path, then compared
//! against the committed header at the proof height.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::btc::BitcoinDataSource;
use crate::chain::ChainContract;
use crate::common::{hex_bytes, retry_with_backoff, Backoff, CancelToken, SwapError, Ticker};

/// Merkle inclusion proof for one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Transaction id, internal byte order
    #[serde(with = "hex_bytes")]
    pub txid: [u8; 32],
    /// Transaction index within the block
    pub pos: u32,
    /// Sibling hashes leaf-to-root, internal byte order
    pub siblings: Vec<[u8; 32]>,
}

impl MerkleProof {
    /// Recompute the merkle root by folding the txid with each sibling
    /// according to the position parity at that level.
    pub fn compute_root(&self) -> [u8; 32] {
        let mut node = self.txid;
        let mut idx = self.pos;

        for sibling in &self.siblings {
            node = if idx & 1 == 1 {
                double_sha256_pair(sibling, &node)
            } else {
                double_sha256_pair(&node, sibling)
            };
            idx >>= 1;
        }

        node
    }

    /// Verify against a committed merkle root
    pub fn verify(&self, merkle_root: &[u8; 32]) -> bool {
        self.compute_root() == *merkle_root
    }
}

/// Result of checking a proof against the relay's committed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofCheck {
    /// Proof matches the committed header; depth at the current tip
    Confirmed { confirmations: u64 },
    /// The relay has not committed the target height yet; retry later
    NotReady,
}

/// Check a proof against the committed header at `proof_height`.
///
/// A recomputed-root mismatch is fatal ([`SwapError::ProofMismatch`]); a
/// missing header is merely not-ready.
pub fn check_inclusion(
    proof: &MerkleProof,
    committed: Option<&crate::types::StoredHeader>,
    tip_height: u64,
    proof_height: u64,
) -> Result<ProofCheck, SwapError> {
    let header = match committed {
        Some(h) => h,
        None => return Ok(ProofCheck::NotReady),
    };

    if !proof.verify(&header.merkle_root) {
        return Err(SwapError::proof_mismatch(format!(
            "recomputed merkle root does not match committed header at height {}",
            proof_height
        )));
    }

    Ok(ProofCheck::Confirmed {
        confirmations: tip_height.saturating_sub(proof_height) + 1,
    })
}

/// Content commitment to an expected Bitcoin output:
/// `sha256(nonce u64 LE ‖ value u64 LE ‖ script_pubkey)`.
pub fn txo_commitment(nonce: u64, value: u64, script_pubkey: &[u8]) -> [u8; 32] {
    let mut data = Vec::with_capacity(8 + 8 + script_pubkey.len());
    data.extend_from_slice(&nonce.to_le_bytes());
    data.extend_from_slice(&value.to_le_bytes());
    data.extend_from_slice(script_pubkey);
    Sha256::digest(&data).into()
}

/// Transaction nonce reconstructed from timelock fields. Uniquely
/// identifies the output even across address re-use.
pub fn tx_nonce(locktime: u32, n_sequence: u32) -> u64 {
    let sequence_part = (n_sequence as u64) & 0x00FF_FFFF;
    let locktime_part = (locktime as u64).saturating_sub(500_000_000);
    (locktime_part << 24) | sequence_part
}

/// Convert a display-order txid hex string to internal byte order
pub fn txid_to_internal(txid: &str) -> Result<[u8; 32], SwapError> {
    let raw = hex::decode(txid)
        .map_err(|e| SwapError::validation(format!("invalid txid hex: {}", e)))?;
    let mut bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| SwapError::validation("txid must be 32 bytes"))?;
    bytes.reverse();
    Ok(bytes)
}

/// Double SHA-256 (Bitcoin standard)
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

fn double_sha256_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut combined = [0u8; 64];
    combined[0..32].copy_from_slice(left);
    combined[32..64].copy_from_slice(right);
    double_sha256(&combined)
}

/// Wait until `txid` is provably included under a relay-committed header
/// with at least `required_confirmations` of depth.
///
/// If a reorganization moves the transaction (or invalidates the header it
/// was proven under), acquisition restarts from scratch rather than
/// returning a stale success. A root mismatch with the transaction still in
/// the same block is fatal.
pub async fn wait_for_inclusion(
    btc: &Arc<dyn BitcoinDataSource>,
    contract: &Arc<dyn ChainContract>,
    txid: &str,
    required_confirmations: u16,
    poll_interval: Duration,
    cancel: &CancelToken,
) -> Result<(MerkleProof, u64), SwapError> {
    let backoff = Backoff::default();
    let txid_internal = txid_to_internal(txid)?;

    'acquire: loop {
        let mut ticker = Ticker::new(poll_interval, cancel.clone());

        // Wait for the transaction to confirm somewhere
        let (proof, proof_height, block_hash) = loop {
            if !ticker.tick().await {
                return Err(SwapError::Cancelled);
            }

            let tx = retry_with_backoff("get_transaction", backoff, cancel, || {
                btc.get_transaction(txid)
            })
            .await?;

            if !tx.status.confirmed {
                debug!(target: "satswap::spv", %txid, "transaction not yet confirmed");
                continue;
            }

            let data = retry_with_backoff("get_merkle_proof", backoff, cancel, || {
                btc.get_merkle_proof(txid)
            })
            .await?;

            break (
                MerkleProof {
                    txid: txid_internal,
                    pos: data.pos,
                    siblings: data.siblings,
                },
                data.block_height,
                tx.status.block_hash,
            );
        };

        // Wait for the relay to commit that height, then for depth
        loop {
            if !ticker.tick().await {
                return Err(SwapError::Cancelled);
            }

            // Reorg watch: if the indexer moved the tx, restart acquisition
            let tx = retry_with_backoff("get_transaction", backoff, cancel, || {
                btc.get_transaction(txid)
            })
            .await?;
            if !tx.status.confirmed || tx.status.block_hash != block_hash {
                info!(
                    target: "satswap::spv",
                    %txid, "transaction moved by reorg, restarting proof acquisition"
                );
                continue 'acquire;
            }

            let tip = retry_with_backoff("get_tip_data", backoff, cancel, || {
                contract.get_tip_data()
            })
            .await?;
            let committed = retry_with_backoff("get_committed_header", backoff, cancel, || {
                contract.get_committed_header(proof_height)
            })
            .await?;

            match check_inclusion(&proof, committed.as_ref(), tip.height, proof_height) {
                Ok(ProofCheck::Confirmed { confirmations })
                    if confirmations >= required_confirmations as u64 =>
                {
                    return Ok((proof, proof_height));
                }
                Ok(ProofCheck::Confirmed { confirmations }) => {
                    debug!(
                        target: "satswap::spv",
                        %txid, confirmations, required = required_confirmations,
                        "proof committed, waiting for depth"
                    );
                }
                Ok(ProofCheck::NotReady) => {
                    debug!(
                        target: "satswap::spv",
                        %txid, height = proof_height, "relay has not committed proof height yet"
                    );
                }
                Err(err) => {
                    // The committed header disagrees with our proof while the
                    // indexer still reports the same block: fraud or relay
                    // corruption, not a race.
                    warn!(target: "satswap::spv", %txid, error = %err, "proof rejected");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ForkId, StoredHeader};

    /// Build a tiny block of `n` leaves and return (leaves, root, proofs)
    fn build_tree(n: usize) -> (Vec<[u8; 32]>, [u8; 32], Vec<MerkleProof>) {
        let leaves: Vec<[u8; 32]> = (0..n).map(|i| [(i + 1) as u8; 32]).collect();

        let mut levels = vec![leaves.clone()];
        while levels.last().unwrap().len() > 1 {
            let prev = levels.last().unwrap();
            let mut next = Vec::with_capacity(prev.len().div_ceil(2));
            for pair in prev.chunks(2) {
                let right = if pair.len() == 2 { &pair[1] } else { &pair[0] };
                next.push(double_sha256_pair(&pair[0], right));
            }
            levels.push(next);
        }
        let root = levels.last().unwrap()[0];

        let proofs = (0..n)
            .map(|i| {
                let mut siblings = Vec::new();
                let mut idx = i;
                for level in &levels[..levels.len() - 1] {
                    let sib_idx = if idx % 2 == 0 {
                        (idx + 1).min(level.len() - 1)
                    } else {
                        idx - 1
                    };
                    siblings.push(level[sib_idx]);
                    idx /= 2;
                }
                MerkleProof {
                    txid: leaves[i],
                    pos: i as u32,
                    siblings,
                }
            })
            .collect();

        (leaves, root, proofs)
    }

    #[test]
    fn test_merkle_proofs_verify() {
        for n in [1usize, 2, 3, 5, 8, 13] {
            let (_, root, proofs) = build_tree(n);
            for proof in &proofs {
                assert!(proof.verify(&root), "n={} pos={}", n, proof.pos);
            }
        }
    }

    #[test]
    fn test_single_bit_flip_breaks_proof() {
        let (_, root, proofs) = build_tree(8);
        let proof = &proofs[3];

        for sib_idx in 0..proof.siblings.len() {
            for bit in [0u8, 7] {
                let mut bad = proof.clone();
                bad.siblings[sib_idx][0] ^= 1 << bit;
                assert!(!bad.verify(&root));
            }
        }
    }

    #[test]
    fn test_position_off_by_one_breaks_proof() {
        let (_, root, proofs) = build_tree(8);
        for proof in &proofs {
            let mut shifted = proof.clone();
            shifted.pos = proof.pos.wrapping_add(1);
            assert!(!shifted.verify(&root), "pos={}", proof.pos);
        }
    }

    #[test]
    fn test_check_inclusion_confirmations() {
        let (_, root, proofs) = build_tree(4);
        let header = StoredHeader {
            height: 103,
            chain_work: [0u8; 32],
            block_hash: [1u8; 32],
            prev_block_hash: [0u8; 32],
            merkle_root: root,
            fork: ForkId::Main,
        };

        // tip 105, proof height 103 -> 3 confirmations
        let check = check_inclusion(&proofs[0], Some(&header), 105, 103).unwrap();
        assert_eq!(check, ProofCheck::Confirmed { confirmations: 3 });
    }

    #[test]
    fn test_check_inclusion_not_ready_without_header() {
        let (_, _, proofs) = build_tree(4);
        let check = check_inclusion(&proofs[0], None, 105, 103).unwrap();
        assert_eq!(check, ProofCheck::NotReady);
    }

    #[test]
    fn test_check_inclusion_mismatch_is_fatal() {
        let (_, _, proofs) = build_tree(4);
        let header = StoredHeader {
            height: 103,
            chain_work: [0u8; 32],
            block_hash: [1u8; 32],
            prev_block_hash: [0u8; 32],
            merkle_root: [0xee; 32],
            fork: ForkId::Main,
        };

        let err = check_inclusion(&proofs[0], Some(&header), 105, 103).unwrap_err();
        assert!(matches!(err, SwapError::ProofMismatch(_)));
    }

    #[test]
    fn test_txo_commitment_layout() {
        let script = [0x00u8, 0x14, 0xaa, 0xbb];
        let commitment = txo_commitment(7, 100_000, &script);

        let mut expected = Vec::new();
        expected.extend_from_slice(&7u64.to_le_bytes());
        expected.extend_from_slice(&100_000u64.to_le_bytes());
        expected.extend_from_slice(&script);
        let expected: [u8; 32] = Sha256::digest(&expected).into();

        assert_eq!(commitment, expected);
    }

    #[test]
    fn test_tx_nonce_packing() {
        // locktime 500000001, nSequence low 24 bits 0x00ABCDEF
        let nonce = tx_nonce(500_000_001, 0xFFAB_CDEF);
        assert_eq!(nonce, (1u64 << 24) | 0x00AB_CDEF);
    }

    #[test]
    fn test_txid_internal_order() {
        let display = "00".repeat(31) + "ff";
        let internal = txid_to_internal(&display).unwrap();
        assert_eq!(internal[0], 0xff);
        assert_eq!(internal[31], 0x00);

        assert!(txid_to_internal("zz").is_err());
        assert!(txid_to_internal("aabb").is_err());
    }
}
