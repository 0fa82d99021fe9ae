//! Signed Swap Authorizations
//!
//! Time-bounded, replay-resistant off-chain signatures binding swap
//! parameters. The counterparty signs the canonical message
//! `prefix ‖ amount ‖ expiry ‖ sequence ‖ payment_hash ‖ timeout`
//! (integers little-endian, SHA-256 hashed before signing); the context
//! prefix separates `initialize` / `claim_initialize` / `refund`
//! authorizations so a signature for one operation can never be replayed
//! for another.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::signature::Signature as Ed25519Signature;
use solana_sdk::signer::{keypair::Keypair, Signer};
use thiserror::Error;

use crate::common::{hex_bytes, SwapError};

/// Authorization verification errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Context prefix mismatch. A hard rejection, never treated as expiry:
    /// this is the cross-context replay guard.
    #[error("context mismatch: expected {expected}, got {found}")]
    ContextMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("authorization expires at {timeout}, now {now} (grace {grace}s)")]
    Expired { timeout: u64, now: u64, grace: u64 },

    #[error("freshness anchor is stale")]
    StaleAnchor,

    #[error("signer does not match expected counterparty key")]
    WrongSigner,

    #[error("signature verification failed")]
    BadSignature,

    #[error("malformed key material: {0}")]
    MalformedKey(String),
}

impl From<AuthError> for SwapError {
    fn from(err: AuthError) -> Self {
        SwapError::SignatureInvalid(err.to_string())
    }
}

/// Operation an authorization is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthContext {
    /// Offerer-funded escrow initialization
    Initialize,
    /// Claimer-funded escrow initialization
    ClaimInitialize,
    /// Cooperative early refund
    Refund,
}

impl AuthContext {
    /// ASCII context tag prepended to the canonical message
    pub fn prefix(self) -> &'static [u8] {
        match self {
            AuthContext::Initialize => b"initialize",
            AuthContext::ClaimInitialize => b"claim_initialize",
            AuthContext::Refund => b"refund",
        }
    }

    fn name(self) -> &'static str {
        match self {
            AuthContext::Initialize => "initialize",
            AuthContext::ClaimInitialize => "claim_initialize",
            AuthContext::Refund => "refund",
        }
    }
}

/// Swap fields bound into the canonical authorization message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthBody {
    pub amount: u64,
    pub expiry: u64,
    pub sequence: u64,
    pub payment_hash: [u8; 32],
}

/// Canonical message bytes. The exact byte order and field sizes are part
/// of the compatibility contract with the on-chain verifier.
pub fn canonical_message(context: AuthContext, body: &AuthBody, timeout: u64) -> Vec<u8> {
    let prefix = context.prefix();
    let mut msg = Vec::with_capacity(prefix.len() + 8 + 8 + 8 + 32 + 8);
    msg.extend_from_slice(prefix);
    msg.extend_from_slice(&body.amount.to_le_bytes());
    msg.extend_from_slice(&body.expiry.to_le_bytes());
    msg.extend_from_slice(&body.sequence.to_le_bytes());
    msg.extend_from_slice(&body.payment_hash);
    msg.extend_from_slice(&timeout.to_le_bytes());
    msg
}

/// SHA-256 digest of the canonical message; this is what gets signed.
pub fn message_digest(context: AuthContext, body: &AuthBody, timeout: u64) -> [u8; 32] {
    Sha256::digest(canonical_message(context, body, timeout)).into()
}

/// Signature material, tagged by scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum AuthSignature {
    /// ed25519 (Solana-style keys)
    Ed25519 {
        #[serde(with = "hex_bytes")]
        signer: [u8; 32],
        #[serde(with = "hex_bytes")]
        signature: [u8; 64],
    },
    /// secp256k1 ECDSA (EVM-style keys), compact encoding
    Secp256k1 {
        #[serde(with = "hex_bytes")]
        signer: [u8; 33],
        #[serde(with = "hex_bytes")]
        signature: [u8; 64],
    },
}

impl AuthSignature {
    /// Raw public key bytes of the signer
    pub fn signer_bytes(&self) -> &[u8] {
        match self {
            AuthSignature::Ed25519 { signer, .. } => signer,
            AuthSignature::Secp256k1 { signer, .. } => signer,
        }
    }

    fn verify_digest(&self, digest: &[u8; 32]) -> Result<(), AuthError> {
        match self {
            AuthSignature::Ed25519 { signer, signature } => {
                let sig = Ed25519Signature::from(*signature);
                if sig.verify(signer, digest) {
                    Ok(())
                } else {
                    Err(AuthError::BadSignature)
                }
            }
            AuthSignature::Secp256k1 { signer, signature } => {
                let pubkey = secp256k1::PublicKey::from_slice(signer)
                    .map_err(|e| AuthError::MalformedKey(e.to_string()))?;
                let sig = secp256k1::ecdsa::Signature::from_compact(signature)
                    .map_err(|_| AuthError::BadSignature)?;
                let msg = secp256k1::Message::from_digest(*digest);
                secp256k1::SECP256K1
                    .verify_ecdsa(&msg, &sig, &pubkey)
                    .map_err(|_| AuthError::BadSignature)
            }
        }
    }
}

/// Chain-specific freshness reference (e.g. a recent blockhash) with its
/// own validity window, independent of and tighter than the signed
/// `timeout`. Bounds how long a signed-but-unsubmitted transaction can be
/// replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessAnchor {
    #[serde(with = "hex_bytes")]
    pub anchor: [u8; 32],
    pub observed_at: u64,
    pub max_age_secs: u64,
}

impl FreshnessAnchor {
    pub fn new(anchor: [u8; 32], observed_at: u64, max_age_secs: u64) -> Self {
        Self {
            anchor,
            observed_at,
            max_age_secs,
        }
    }

    pub fn is_fresh(&self, now: u64) -> bool {
        now.saturating_sub(self.observed_at) <= self.max_age_secs
    }
}

/// A complete signed authorization for one swap operation.
///
/// Immutable once created; considered usable until `timeout - grace_period`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAuthorization {
    pub context: AuthContext,
    /// Unix-seconds deadline after which the authorization is void
    pub timeout: u64,
    pub signature: AuthSignature,
    pub anchor: Option<FreshnessAnchor>,
}

impl SignedAuthorization {
    /// Sign with an ed25519 keypair (Solana-style counterparty)
    pub fn sign_ed25519(
        keypair: &Keypair,
        context: AuthContext,
        body: &AuthBody,
        timeout: u64,
        anchor: Option<FreshnessAnchor>,
    ) -> Self {
        let digest = message_digest(context, body, timeout);
        let signature = keypair.sign_message(&digest);
        Self {
            context,
            timeout,
            signature: AuthSignature::Ed25519 {
                signer: keypair.pubkey().to_bytes(),
                signature: signature.into(),
            },
            anchor,
        }
    }

    /// Sign with a secp256k1 secret key (EVM-style counterparty)
    pub fn sign_secp256k1(
        secret: &secp256k1::SecretKey,
        context: AuthContext,
        body: &AuthBody,
        timeout: u64,
        anchor: Option<FreshnessAnchor>,
    ) -> Self {
        let digest = message_digest(context, body, timeout);
        let msg = secp256k1::Message::from_digest(digest);
        let sig = secp256k1::SECP256K1.sign_ecdsa(&msg, secret);
        Self {
            context,
            timeout,
            signature: AuthSignature::Secp256k1 {
                signer: secret.public_key(secp256k1::SECP256K1).serialize(),
                signature: sig.serialize_compact(),
            },
            anchor,
        }
    }

    /// Last instant at which the authorization is still usable
    pub fn usable_until(&self, grace_period: u64) -> u64 {
        self.timeout.saturating_sub(grace_period)
    }

    /// Full verification for one operation.
    ///
    /// Order matters: the context check comes first and rejects hard, so a
    /// replayed cross-context signature is never reported as merely expired.
    pub fn verify(
        &self,
        expected: AuthContext,
        expected_signer: &[u8],
        body: &AuthBody,
        now: u64,
        grace_period: u64,
    ) -> Result<(), AuthError> {
        if self.context != expected {
            return Err(AuthError::ContextMismatch {
                expected: expected.name(),
                found: self.context.name(),
            });
        }

        if self.timeout.saturating_sub(now) < grace_period {
            return Err(AuthError::Expired {
                timeout: self.timeout,
                now,
                grace: grace_period,
            });
        }

        if let Some(anchor) = &self.anchor {
            if !anchor.is_fresh(now) {
                return Err(AuthError::StaleAnchor);
            }
        }

        if self.signature.signer_bytes() != expected_signer {
            return Err(AuthError::WrongSigner);
        }

        let digest = message_digest(self.context, body, self.timeout);
        self.signature.verify_digest(&digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> AuthBody {
        AuthBody {
            amount: 100_000,
            expiry: 1_900_000_000,
            sequence: 42,
            payment_hash: [0xab; 32],
        }
    }

    const NOW: u64 = 1_800_000_000;
    const GRACE: u64 = 60;

    #[test]
    fn test_canonical_message_layout() {
        let msg = canonical_message(AuthContext::Refund, &body(), NOW + 600);

        // prefix ‖ amount ‖ expiry ‖ sequence ‖ hash ‖ timeout
        assert_eq!(&msg[..6], b"refund");
        assert_eq!(&msg[6..14], &100_000u64.to_le_bytes());
        assert_eq!(&msg[14..22], &1_900_000_000u64.to_le_bytes());
        assert_eq!(&msg[22..30], &42u64.to_le_bytes());
        assert_eq!(&msg[30..62], &[0xab; 32]);
        assert_eq!(&msg[62..70], &(NOW + 600).to_le_bytes());
        assert_eq!(msg.len(), 70);
    }

    #[test]
    fn test_ed25519_sign_verify() {
        let keypair = Keypair::new();
        let auth = SignedAuthorization::sign_ed25519(
            &keypair,
            AuthContext::Initialize,
            &body(),
            NOW + 600,
            None,
        );

        auth.verify(
            AuthContext::Initialize,
            &keypair.pubkey().to_bytes(),
            &body(),
            NOW,
            GRACE,
        )
        .unwrap();
    }

    #[test]
    fn test_secp256k1_sign_verify() {
        let secret = secp256k1::SecretKey::new(&mut secp256k1::rand::thread_rng());
        let auth = SignedAuthorization::sign_secp256k1(
            &secret,
            AuthContext::Refund,
            &body(),
            NOW + 600,
            None,
        );
        let signer = secret.public_key(secp256k1::SECP256K1).serialize();

        auth.verify(AuthContext::Refund, &signer, &body(), NOW, GRACE)
            .unwrap();
    }

    #[test]
    fn test_context_mismatch_is_hard_rejection() {
        let keypair = Keypair::new();
        // Signed for refund, presented for initialize - and also expired.
        // The context check must win over the expiry check.
        let auth = SignedAuthorization::sign_ed25519(
            &keypair,
            AuthContext::Refund,
            &body(),
            NOW - 1000,
            None,
        );

        let err = auth
            .verify(
                AuthContext::Initialize,
                &keypair.pubkey().to_bytes(),
                &body(),
                NOW,
                GRACE,
            )
            .unwrap_err();
        assert!(matches!(err, AuthError::ContextMismatch { .. }));
    }

    #[test]
    fn test_expiry_rejected_regardless_of_signature_validity() {
        let keypair = Keypair::new();
        // timeout < now + grace: a perfectly valid signature must still fail
        let auth = SignedAuthorization::sign_ed25519(
            &keypair,
            AuthContext::Initialize,
            &body(),
            NOW + GRACE - 1,
            None,
        );

        let err = auth
            .verify(
                AuthContext::Initialize,
                &keypair.pubkey().to_bytes(),
                &body(),
                NOW,
                GRACE,
            )
            .unwrap_err();
        assert!(matches!(err, AuthError::Expired { .. }));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let keypair = Keypair::new();
        let auth = SignedAuthorization::sign_ed25519(
            &keypair,
            AuthContext::Initialize,
            &body(),
            NOW + 600,
            None,
        );

        let mut tampered = body();
        tampered.amount += 1;

        let err = auth
            .verify(
                AuthContext::Initialize,
                &keypair.pubkey().to_bytes(),
                &tampered,
                NOW,
                GRACE,
            )
            .unwrap_err();
        assert!(matches!(err, AuthError::BadSignature));
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let keypair = Keypair::new();
        let other = Keypair::new();
        let auth = SignedAuthorization::sign_ed25519(
            &keypair,
            AuthContext::Initialize,
            &body(),
            NOW + 600,
            None,
        );

        let err = auth
            .verify(
                AuthContext::Initialize,
                &other.pubkey().to_bytes(),
                &body(),
                NOW,
                GRACE,
            )
            .unwrap_err();
        assert!(matches!(err, AuthError::WrongSigner));
    }

    #[test]
    fn test_stale_anchor_rejected_independently_of_timeout() {
        let keypair = Keypair::new();
        // Signed timeout is far out, but the anchor window has lapsed.
        let anchor = FreshnessAnchor::new([5u8; 32], NOW - 301, 300);
        let auth = SignedAuthorization::sign_ed25519(
            &keypair,
            AuthContext::Initialize,
            &body(),
            NOW + 86_400,
            Some(anchor),
        );

        let err = auth
            .verify(
                AuthContext::Initialize,
                &keypair.pubkey().to_bytes(),
                &body(),
                NOW,
                GRACE,
            )
            .unwrap_err();
        assert!(matches!(err, AuthError::StaleAnchor));
    }

    #[test]
    fn test_serde_round_trip() {
        let keypair = Keypair::new();
        let auth = SignedAuthorization::sign_ed25519(
            &keypair,
            AuthContext::ClaimInitialize,
            &body(),
            NOW + 600,
            Some(FreshnessAnchor::new([5u8; 32], NOW, 120)),
        );

        let json = serde_json::to_string(&auth).unwrap();
        let back: SignedAuthorization = serde_json::from_str(&json).unwrap();
        assert_eq!(auth, back);
    }
}
