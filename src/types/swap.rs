//! Swap Records and Lifecycle States
//!
//! A [`SwapRecord`] tracks one atomic swap through its lifecycle:
//! created → committed → claimable → claimed on the success path, with
//! expiry/refund/failure exits. Records are mutated only by the swap state
//! machine; observed on-chain events are *proposed* through
//! [`SwapRecord::apply_event`], which admits or rejects them against the
//! current state.

use serde::{Deserialize, Serialize};

use crate::auth::SignedAuthorization;
use crate::common::{hex_bytes, now_ts, opt_hex_bytes, SwapError};

/// Unique swap key: SHA-256 payment hash (Lightning) or the hash locking
/// the escrow (on-chain kinds).
pub type PaymentHash = [u8; 32];

/// Kind of swap, determining which claim proof unlocks the escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapKind {
    /// Lightning HTLC, claimed by revealing the payment preimage
    Htlc,
    /// Bitcoin on-chain payment, claimed via SPV proof of a txo-hash match
    Chain,
    /// Like `Chain`, with a nonce bound into nSequence/locktime to survive
    /// address re-use
    ChainNonced,
    /// Bitcoin on-chain payment matched by exact transaction id
    ChainTxhash,
}

impl SwapKind {
    pub fn to_raw(self) -> u8 {
        match self {
            SwapKind::Htlc => 0,
            SwapKind::Chain => 1,
            SwapKind::ChainNonced => 2,
            SwapKind::ChainTxhash => 3,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SwapKind::Htlc),
            1 => Some(SwapKind::Chain),
            2 => Some(SwapKind::ChainNonced),
            3 => Some(SwapKind::ChainTxhash),
            _ => None,
        }
    }

    /// Whether the claim path goes through the Bitcoin relay
    pub fn is_onchain(self) -> bool {
        !matches!(self, SwapKind::Htlc)
    }
}

impl std::fmt::Display for SwapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SwapKind::Htlc => "htlc",
            SwapKind::Chain => "chain",
            SwapKind::ChainNonced => "chain_nonced",
            SwapKind::ChainTxhash => "chain_txhash",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SwapKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "htlc" => Ok(SwapKind::Htlc),
            "chain" => Ok(SwapKind::Chain),
            "chain_nonced" => Ok(SwapKind::ChainNonced),
            "chain_txhash" => Ok(SwapKind::ChainTxhash),
            other => Err(format!("unknown swap kind: {}", other)),
        }
    }
}

/// Lifecycle state of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    /// Quote created, escrow not yet on chain
    Created,
    /// Escrow committed on chain
    Committed,
    /// Claim condition satisfiable (secret known or payment observed)
    Claimable,
    /// Escrow paid out to the claimer (possibly by a watchtower)
    Claimed,
    /// Escrow returned to the offerer
    Refunded,
    /// Quote lapsed before the escrow was committed
    Expired,
    /// Unrecoverable failure
    Failed,
}

impl SwapState {
    /// Terminal states never regress
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapState::Claimed | SwapState::Refunded | SwapState::Expired | SwapState::Failed
        )
    }
}

impl std::fmt::Display for SwapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SwapState::Created => "created",
            SwapState::Committed => "committed",
            SwapState::Claimable => "claimable",
            SwapState::Claimed => "claimed",
            SwapState::Refunded => "refunded",
            SwapState::Expired => "expired",
            SwapState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SwapState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(SwapState::Created),
            "committed" => Ok(SwapState::Committed),
            "claimable" => Ok(SwapState::Claimable),
            "claimed" => Ok(SwapState::Claimed),
            "refunded" => Ok(SwapState::Refunded),
            "expired" => Ok(SwapState::Expired),
            "failed" => Ok(SwapState::Failed),
            other => Err(format!("unknown swap state: {}", other)),
        }
    }
}

/// Observed on-chain swap event, keyed by payment hash.
///
/// Closed set: decoding produces exactly these kinds, and handlers match
/// them exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapEvent {
    /// Escrow was committed on chain
    Initialized {
        payment_hash: PaymentHash,
        txo_hash: [u8; 32],
        kind: SwapKind,
        nonce: u64,
        sequence: u64,
        txid: String,
    },
    /// Escrow was claimed (by the claimer or a watchtower)
    Claimed {
        payment_hash: PaymentHash,
        secret: [u8; 32],
        sequence: u64,
        txid: String,
    },
    /// Escrow was refunded to the offerer
    Refunded {
        payment_hash: PaymentHash,
        sequence: u64,
        txid: String,
    },
}

impl SwapEvent {
    pub fn payment_hash(&self) -> &PaymentHash {
        match self {
            SwapEvent::Initialized { payment_hash, .. } => payment_hash,
            SwapEvent::Claimed { payment_hash, .. } => payment_hash,
            SwapEvent::Refunded { payment_hash, .. } => payment_hash,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SwapEvent::Initialized { .. } => "initialized",
            SwapEvent::Claimed { .. } => "claimed",
            SwapEvent::Refunded { .. } => "refunded",
        }
    }
}

/// Outcome of proposing an observed event to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event advanced the record
    Applied,
    /// The record had already progressed past this event (at-least-once
    /// delivery), nothing changed
    Ignored,
}

/// Parameters for creating a new swap record
#[derive(Debug, Clone)]
pub struct SwapParams {
    pub payment_hash: PaymentHash,
    pub kind: SwapKind,
    pub offerer: String,
    pub claimer: String,
    pub token: String,
    pub amount: u64,
    pub security_deposit: u64,
    pub claimer_bounty: u64,
    /// Unix-seconds escrow expiry; the offerer can refund after this
    pub expiry: u64,
    pub required_confirmations: u16,
    pub nonce: u64,
    pub pay_in: bool,
    pub pay_out: bool,
    pub txo_hash: Option<[u8; 32]>,
}

/// One swap, keyed by payment hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    #[serde(with = "hex_bytes")]
    pub payment_hash: PaymentHash,
    pub kind: SwapKind,

    /// Offerer address, depositing funds into the escrow
    pub offerer: String,
    /// Claimer address, able to claim once the spend condition is met
    pub claimer: String,
    /// Token identifier (mint / contract address)
    pub token: String,

    pub amount: u64,
    pub security_deposit: u64,
    pub claimer_bounty: u64,
    /// Uniquely identifies this swap instance on chain
    pub sequence: u64,
    pub expiry: u64,
    pub required_confirmations: u16,
    /// Transaction nonce for `ChainNonced` swaps, 0 otherwise
    pub nonce: u64,

    pub pay_in: bool,
    pub pay_out: bool,

    /// Commitment to the expected Bitcoin output:
    /// `sha256(nonce ‖ value ‖ script_pubkey)`
    #[serde(with = "opt_hex_bytes")]
    pub txo_hash: Option<[u8; 32]>,

    pub state: SwapState,
    pub commit_txid: Option<String>,
    pub claim_txid: Option<String>,
    pub authorization: Option<SignedAuthorization>,

    /// Height the matching Bitcoin payment confirmed at, once observed
    pub observed_payment_height: Option<u64>,
    pub observed_payment_txid: Option<String>,

    pub created_at: u64,
    pub updated_at: u64,
    pub error: Option<String>,
}

impl SwapRecord {
    pub fn new(params: SwapParams) -> Self {
        let now = now_ts();
        Self {
            payment_hash: params.payment_hash,
            kind: params.kind,
            offerer: params.offerer,
            claimer: params.claimer,
            token: params.token,
            amount: params.amount,
            security_deposit: params.security_deposit,
            claimer_bounty: params.claimer_bounty,
            sequence: rand::random::<u64>(),
            expiry: params.expiry,
            required_confirmations: params.required_confirmations,
            nonce: params.nonce,
            pay_in: params.pay_in,
            pay_out: params.pay_out,
            txo_hash: params.txo_hash,
            state: SwapState::Created,
            commit_txid: None,
            claim_txid: None,
            authorization: None,
            observed_payment_height: None,
            observed_payment_txid: None,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn payment_hash_hex(&self) -> String {
        hex::encode(self.payment_hash)
    }

    // ------------------------------------------------------------------
    // Guards
    // ------------------------------------------------------------------

    /// Commit is allowed while the quote is fresh: state is `Created` and
    /// there is at least `safety_window` seconds left before expiry to get
    /// the escrow confirmed.
    pub fn can_commit(&self, now: u64, safety_window: u64) -> bool {
        self.state == SwapState::Created && self.expiry.saturating_sub(now) >= safety_window
    }

    /// Claim is allowed once the record is `Claimable`, the escrow has not
    /// expired, and (for on-chain kinds) the observed payment has reached
    /// the required confirmation depth at `tip_height`.
    pub fn can_claim(&self, now: u64, tip_height: u64) -> bool {
        if self.state != SwapState::Claimable || now >= self.expiry {
            return false;
        }
        match self.observed_payment_height {
            // confirmations = tip - payment height + 1
            Some(height) => {
                tip_height + 1 >= height + self.required_confirmations as u64
            }
            // Lightning path: the known preimage is the whole condition
            None => true,
        }
    }

    /// Timeout refund is allowed once the committed escrow has expired.
    /// (Cooperative early refund additionally requires a counterparty
    /// `refund` authorization, checked by the service.)
    pub fn can_refund(&self, now: u64) -> bool {
        matches!(self.state, SwapState::Committed | SwapState::Claimable) && now >= self.expiry
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    pub fn mark_committed(&mut self, txid: String) {
        self.commit_txid = Some(txid);
        self.state = SwapState::Committed;
        self.touch();
    }

    /// Commit observed through authoritative polling rather than our own
    /// submission; the commit transaction id is unknown.
    pub fn mark_committed_external(&mut self) {
        self.state = SwapState::Committed;
        self.touch();
    }

    pub fn mark_claimable(&mut self) {
        self.state = SwapState::Claimable;
        self.touch();
    }

    /// Record the confirmed Bitcoin payment backing an on-chain claim
    pub fn mark_payment_observed(&mut self, txid: String, height: u64) {
        self.observed_payment_txid = Some(txid);
        self.observed_payment_height = Some(height);
        self.state = SwapState::Claimable;
        self.touch();
    }

    pub fn mark_claimed(&mut self, txid: Option<String>) {
        if txid.is_some() {
            self.claim_txid = txid;
        }
        self.state = SwapState::Claimed;
        self.touch();
    }

    pub fn mark_refunded(&mut self, txid: Option<String>) {
        if txid.is_some() {
            self.claim_txid = txid;
        }
        self.state = SwapState::Refunded;
        self.touch();
    }

    pub fn mark_expired(&mut self) {
        self.state = SwapState::Expired;
        self.touch();
    }

    pub fn mark_failed(&mut self, error: String) {
        self.error = Some(error);
        self.state = SwapState::Failed;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now_ts();
    }

    // ------------------------------------------------------------------
    // Event reconciliation
    // ------------------------------------------------------------------

    /// Propose an observed on-chain event.
    ///
    /// Dispatch is at-least-once, so the same event may arrive repeatedly:
    /// an event the record has already progressed past is an idempotent
    /// no-op. An event that is impossible from the current state (a claim
    /// observed while still `Created`, or a conflicting terminal state)
    /// signals an upstream ordering bug and is rejected.
    pub fn apply_event(&mut self, event: &SwapEvent) -> Result<EventOutcome, SwapError> {
        if event.payment_hash() != &self.payment_hash {
            return Err(SwapError::validation("event payment hash does not match record"));
        }

        match event {
            SwapEvent::Initialized { txid, .. } => match self.state {
                SwapState::Created => {
                    self.mark_committed(txid.clone());
                    Ok(EventOutcome::Applied)
                }
                // Already at or past COMMITTED; re-delivery is inert
                _ => Ok(EventOutcome::Ignored),
            },
            SwapEvent::Claimed { txid, .. } => match self.state {
                SwapState::Committed | SwapState::Claimable => {
                    self.mark_claimed(Some(txid.clone()));
                    Ok(EventOutcome::Applied)
                }
                SwapState::Claimed => Ok(EventOutcome::Ignored),
                SwapState::Created => Err(SwapError::precondition(
                    "event_order",
                    "claimed event observed while swap is still CREATED",
                )),
                other => Err(SwapError::precondition(
                    "event_order",
                    format!("claimed event conflicts with terminal state {}", other),
                )),
            },
            SwapEvent::Refunded { txid, .. } => match self.state {
                SwapState::Committed | SwapState::Claimable => {
                    self.mark_refunded(Some(txid.clone()));
                    Ok(EventOutcome::Applied)
                }
                SwapState::Refunded => Ok(EventOutcome::Ignored),
                SwapState::Created => Err(SwapError::precondition(
                    "event_order",
                    "refunded event observed while swap is still CREATED",
                )),
                other => Err(SwapError::precondition(
                    "event_order",
                    format!("refunded event conflicts with terminal state {}", other),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SwapParams {
        SwapParams {
            payment_hash: [0x11; 32],
            kind: SwapKind::Chain,
            offerer: "offerer-address".into(),
            claimer: "claimer-address".into(),
            token: "token-mint".into(),
            amount: 100_000,
            security_deposit: 5_000,
            claimer_bounty: 1_000,
            expiry: 2_000_000_000,
            required_confirmations: 3,
            nonce: 0,
            pay_in: true,
            pay_out: false,
            txo_hash: Some([0x22; 32]),
        }
    }

    fn claimed_event(hash: PaymentHash) -> SwapEvent {
        SwapEvent::Claimed {
            payment_hash: hash,
            secret: [0x33; 32],
            sequence: 1,
            txid: "claim-tx".into(),
        }
    }

    #[test]
    fn test_lifecycle_success_path() {
        let mut rec = SwapRecord::new(params());
        assert_eq!(rec.state, SwapState::Created);
        assert!(rec.can_commit(1_900_000_000, 600));

        rec.mark_committed("commit-tx".into());
        assert_eq!(rec.state, SwapState::Committed);
        assert!(!rec.can_commit(1_900_000_000, 600));

        rec.mark_payment_observed("btc-tx".into(), 103);
        assert_eq!(rec.state, SwapState::Claimable);

        rec.mark_claimed(Some("claim-tx".into()));
        assert_eq!(rec.state, SwapState::Claimed);
        assert!(rec.state.is_terminal());
    }

    #[test]
    fn test_can_commit_rejects_near_expiry() {
        let rec = SwapRecord::new(params());
        let expiry = rec.expiry;
        // 600s safety window: 599s of margin is not enough, 600 is
        assert!(!rec.can_commit(expiry - 599, 600));
        assert!(rec.can_commit(expiry - 600, 600));
    }

    #[test]
    fn test_can_claim_confirmation_depth() {
        // Payment confirmed at height 103 with 3 required confirmations:
        // claimable exactly from tip 105 onward.
        let mut rec = SwapRecord::new(params());
        rec.mark_committed("commit-tx".into());
        rec.mark_payment_observed("btc-tx".into(), 103);

        let now = 1_900_000_000;
        assert!(!rec.can_claim(now, 103));
        assert!(!rec.can_claim(now, 104));
        assert!(rec.can_claim(now, 105));
        assert!(rec.can_claim(now, 106));
    }

    #[test]
    fn test_can_claim_rejects_expired_escrow() {
        let mut rec = SwapRecord::new(params());
        rec.mark_committed("commit-tx".into());
        rec.mark_payment_observed("btc-tx".into(), 103);
        assert!(!rec.can_claim(rec.expiry, 200));
    }

    #[test]
    fn test_can_refund_only_after_expiry() {
        let mut rec = SwapRecord::new(params());
        rec.mark_committed("commit-tx".into());
        assert!(!rec.can_refund(rec.expiry - 1));
        assert!(rec.can_refund(rec.expiry));
    }

    #[test]
    fn test_apply_event_idempotent() {
        let mut rec = SwapRecord::new(params());
        rec.mark_committed("commit-tx".into());

        let event = claimed_event(rec.payment_hash);
        assert_eq!(rec.apply_event(&event).unwrap(), EventOutcome::Applied);
        let snapshot = rec.clone();

        // Second delivery of the same event: no state change, no error
        assert_eq!(rec.apply_event(&event).unwrap(), EventOutcome::Ignored);
        assert_eq!(rec.state, snapshot.state);
        assert_eq!(rec.claim_txid, snapshot.claim_txid);
    }

    #[test]
    fn test_apply_event_rejects_causal_violation() {
        let mut rec = SwapRecord::new(params());
        // Claimed while still CREATED - no COMMITTED in between
        let err = rec.apply_event(&claimed_event(rec.payment_hash)).unwrap_err();
        assert!(matches!(
            err,
            SwapError::PreconditionViolated { guard: "event_order", .. }
        ));
        assert_eq!(rec.state, SwapState::Created);
    }

    #[test]
    fn test_terminal_state_never_regresses() {
        let mut rec = SwapRecord::new(params());
        rec.mark_committed("commit-tx".into());
        rec.mark_refunded(Some("refund-tx".into()));

        // A conflicting claim on a refunded swap is rejected, not applied
        let err = rec.apply_event(&claimed_event(rec.payment_hash)).unwrap_err();
        assert!(matches!(err, SwapError::PreconditionViolated { .. }));
        assert_eq!(rec.state, SwapState::Refunded);

        // Re-delivered initialize on a terminal record is inert
        let init = SwapEvent::Initialized {
            payment_hash: rec.payment_hash,
            txo_hash: [0x22; 32],
            kind: SwapKind::Chain,
            nonce: 0,
            sequence: 1,
            txid: "commit-tx".into(),
        };
        assert_eq!(rec.apply_event(&init).unwrap(), EventOutcome::Ignored);
        assert_eq!(rec.state, SwapState::Refunded);
    }

    #[test]
    fn test_serde_round_trip() {
        use crate::auth::{AuthBody, AuthContext, SignedAuthorization};
        use solana_sdk::signer::keypair::Keypair;

        let mut rec = SwapRecord::new(params());
        rec.authorization = Some(SignedAuthorization::sign_ed25519(
            &Keypair::new(),
            AuthContext::Initialize,
            &AuthBody {
                amount: rec.amount,
                expiry: rec.expiry,
                sequence: rec.sequence,
                payment_hash: rec.payment_hash,
            },
            1_950_000_000,
            None,
        ));
        rec.mark_committed("commit-tx".into());

        let json = serde_json::to_string(&rec).unwrap();
        let back: SwapRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }
}
