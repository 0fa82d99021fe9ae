//! Bitcoin Header Types for the Relay
//!
//! [`BlockHeader`] is the raw 80-byte Bitcoin header as fetched from an
//! indexer; [`StoredHeader`] is a header the on-chain relay has accepted,
//! annotated with height, cumulative chain-work and the fork it lives on.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::hex_bytes;

/// Bitcoin block header (80 bytes on the wire, little-endian fields)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    #[serde(with = "hex_bytes")]
    pub prev_block_hash: [u8; 32],
    #[serde(with = "hex_bytes")]
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub height: u64,
}

impl BlockHeader {
    /// Serialize to raw 80-byte wire format
    pub fn to_raw(&self) -> [u8; 80] {
        let mut raw = [0u8; 80];

        raw[0..4].copy_from_slice(&self.version.to_le_bytes());
        raw[4..36].copy_from_slice(&self.prev_block_hash);
        raw[36..68].copy_from_slice(&self.merkle_root);
        raw[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        raw[72..76].copy_from_slice(&self.bits.to_le_bytes());
        raw[76..80].copy_from_slice(&self.nonce.to_le_bytes());

        raw
    }

    /// Parse from raw 80-byte wire format
    pub fn from_raw(raw: &[u8; 80], height: u64) -> Self {
        Self {
            version: i32::from_le_bytes(raw[0..4].try_into().unwrap()),
            prev_block_hash: raw[4..36].try_into().unwrap(),
            merkle_root: raw[36..68].try_into().unwrap(),
            timestamp: u32::from_le_bytes(raw[68..72].try_into().unwrap()),
            bits: u32::from_le_bytes(raw[72..76].try_into().unwrap()),
            nonce: u32::from_le_bytes(raw[76..80].try_into().unwrap()),
            height,
        }
    }

    /// Block hash (double SHA-256 of the raw header, internal byte order)
    pub fn block_hash(&self) -> [u8; 32] {
        let first = Sha256::digest(self.to_raw());
        Sha256::digest(first).into()
    }
}

/// Identity of the chain branch a relay header lives on.
///
/// The relay wire format encodes this as a single integer: `0` for the main
/// chain, `-1` for "fork about to be created, id not yet assigned", and any
/// positive value for a concrete existing fork. The enum keeps those three
/// meanings apart; `to_raw`/`from_raw` preserve the wire encoding bit-exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkId {
    /// The canonical main chain
    Main,
    /// Sentinel: the next submission will create a fork whose id is unknown
    Pending,
    /// An existing fork tracked by the relay
    Fork(u32),
}

impl ForkId {
    pub fn to_raw(self) -> i64 {
        match self {
            ForkId::Main => 0,
            ForkId::Pending => -1,
            ForkId::Fork(id) => id as i64,
        }
    }

    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(ForkId::Main),
            -1 => Some(ForkId::Pending),
            id if id > 0 && id <= u32::MAX as i64 => Some(ForkId::Fork(id as u32)),
            _ => None,
        }
    }

    pub fn is_main(self) -> bool {
        matches!(self, ForkId::Main)
    }
}

impl std::fmt::Display for ForkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForkId::Main => write!(f, "main"),
            ForkId::Pending => write!(f, "pending-fork"),
            ForkId::Fork(id) => write!(f, "fork-{}", id),
        }
    }
}

/// A header the on-chain relay has committed.
///
/// Along one fork id, height is strictly increasing and chain-work is
/// monotonically non-decreasing; the back-link at height `h` must match the
/// committed header at `h - 1`. Forks are superseded, never erased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub height: u64,
    /// Cumulative chain-work up to and including this header, big-endian
    #[serde(with = "hex_bytes")]
    pub chain_work: [u8; 32],
    #[serde(with = "hex_bytes")]
    pub block_hash: [u8; 32],
    #[serde(with = "hex_bytes")]
    pub prev_block_hash: [u8; 32],
    #[serde(with = "hex_bytes")]
    pub merkle_root: [u8; 32],
    pub fork: ForkId,
}

impl StoredHeader {
    /// Whether `next` is a valid direct successor of this header on the
    /// same (or a newly created) fork.
    pub fn is_extended_by(&self, next: &StoredHeader) -> bool {
        next.height == self.height + 1
            && next.prev_block_hash == self.block_hash
            && cmp_work(&next.chain_work, &self.chain_work) != std::cmp::Ordering::Less
    }
}

/// Compare two big-endian 256-bit work values.
pub fn cmp_work(a: &[u8; 32], b: &[u8; 32]) -> std::cmp::Ordering {
    a.cmp(b)
}

/// Add two big-endian 256-bit work values, saturating on overflow.
pub fn add_work(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut carry = 0u16;
    for i in (0..32).rev() {
        let sum = a[i] as u16 + b[i] as u16 + carry;
        out[i] = (sum & 0xff) as u8;
        carry = sum >> 8;
    }
    if carry != 0 {
        out = [0xff; 32];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work(n: u64) -> [u8; 32] {
        let mut w = [0u8; 32];
        w[24..32].copy_from_slice(&n.to_be_bytes());
        w
    }

    fn stored(height: u64, total_work: u64, prev: [u8; 32], hash: [u8; 32]) -> StoredHeader {
        StoredHeader {
            height,
            chain_work: work(total_work),
            block_hash: hash,
            prev_block_hash: prev,
            merkle_root: [0u8; 32],
            fork: ForkId::Main,
        }
    }

    #[test]
    fn test_header_raw_round_trip() {
        let header = BlockHeader {
            version: 0x2000_0000,
            prev_block_hash: [7u8; 32],
            merkle_root: [9u8; 32],
            timestamp: 1_700_000_000,
            bits: 0x1d00ffff,
            nonce: 42,
            height: 800_000,
        };

        let raw = header.to_raw();
        assert_eq!(BlockHeader::from_raw(&raw, 800_000), header);
    }

    #[test]
    fn test_fork_id_raw_encoding() {
        assert_eq!(ForkId::Main.to_raw(), 0);
        assert_eq!(ForkId::Pending.to_raw(), -1);
        assert_eq!(ForkId::Fork(7).to_raw(), 7);

        assert_eq!(ForkId::from_raw(0), Some(ForkId::Main));
        assert_eq!(ForkId::from_raw(-1), Some(ForkId::Pending));
        assert_eq!(ForkId::from_raw(3), Some(ForkId::Fork(3)));
        assert_eq!(ForkId::from_raw(-2), None);
    }

    #[test]
    fn test_chain_work_monotonic_on_extension() {
        let a = stored(100, 500, [0u8; 32], [1u8; 32]);
        let b = stored(101, 510, [1u8; 32], [2u8; 32]);
        assert!(a.is_extended_by(&b));

        // Work regression is rejected even with valid links
        let regressed = stored(101, 499, [1u8; 32], [2u8; 32]);
        assert!(!a.is_extended_by(&regressed));

        // Broken back-link
        let unlinked = stored(101, 510, [9u8; 32], [2u8; 32]);
        assert!(!a.is_extended_by(&unlinked));

        // Height gap
        let gapped = stored(103, 510, [1u8; 32], [2u8; 32]);
        assert!(!a.is_extended_by(&gapped));
    }

    #[test]
    fn test_add_work_carries() {
        let mut a = [0u8; 32];
        a[31] = 0xff;
        let mut b = [0u8; 32];
        b[31] = 0x01;

        let sum = add_work(&a, &b);
        assert_eq!(sum[30], 0x01);
        assert_eq!(sum[31], 0x00);
    }

    #[test]
    fn test_accepted_sequence_is_monotonic() {
        // Property from the relay invariant: work never decreases along a fork
        let mut prev = stored(0, 10, [0u8; 32], [1u8; 32]);
        let mut total = 10u64;
        for h in 1..50u64 {
            total += h % 3; // occasionally flat, never decreasing
            let next = stored(h, total, prev.block_hash, [(h % 251) as u8 + 1; 32]);
            assert!(
                cmp_work(&next.chain_work, &prev.chain_work) != std::cmp::Ordering::Less
            );
            prev = next;
        }
    }
}
