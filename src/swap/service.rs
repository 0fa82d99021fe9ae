//! Swap Service
//!
//! Owns the in-memory swap table (the only shared mutable state in the
//! core) and drives every lifecycle transition: commit with a
//! counterparty-signed authorization, claim by secret or SPV proof, refund
//! by timeout or cooperatively, and blocking waits that race local event
//! notifications against an authoritative watchdog poll.
//!
//! Records are mutated only here. The event reconciler proposes
//! transitions through the [`EventListener`] hook; the record's own guards
//! admit or reject them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::{watch, RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::auth::{AuthBody, AuthContext, SignedAuthorization};
use crate::btc::BitcoinDataSource;
use crate::chain::{ChainContract, ClaimProof, CommitStatus};
use crate::common::{retry_with_backoff, Backoff, CancelToken, SwapError, Ticker};
use crate::reconciler::EventListener;
use crate::spv;
use crate::storage::SwapStore;
use crate::types::{
    EventOutcome, PaymentHash, SwapEvent, SwapKind, SwapParams, SwapRecord, SwapState,
};

/// Swap service tuning
#[derive(Debug, Clone)]
pub struct SwapServiceConfig {
    /// Minimum remaining authorization lifetime at verification time
    pub grace_period_secs: u64,
    /// Minimum seconds between commit and escrow expiry; commits closer to
    /// the deadline are rejected as unsafe to confirm
    pub commit_safety_window_secs: u64,
    /// Authoritative status poll cadence for blocked waits
    pub watchdog_interval: Duration,
    /// SPV proof acquisition poll cadence
    pub proof_poll_interval: Duration,
    /// In-flight status look-ups during startup reconciliation
    pub startup_concurrency: usize,
}

impl Default for SwapServiceConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 60,
            commit_safety_window_secs: 600,
            watchdog_interval: Duration::from_secs(15),
            proof_poll_interval: Duration::from_secs(30),
            startup_concurrency: 8,
        }
    }
}

/// How a blocking wait resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Committed,
    Claimed,
    Refunded,
    Expired,
    Failed,
}

/// Drives swap lifecycles against the chain contract and Bitcoin source
pub struct SwapService {
    contract: Arc<dyn ChainContract>,
    btc: Arc<dyn BitcoinDataSource>,
    store: Arc<dyn SwapStore>,
    /// In-memory swap table keyed by payment hash
    table: RwLock<HashMap<PaymentHash, SwapRecord>>,
    /// Per-swap state-change broadcast for blocked waiters
    notifiers: std::sync::Mutex<HashMap<PaymentHash, watch::Sender<SwapState>>>,
    config: SwapServiceConfig,
}

impl SwapService {
    pub fn new(
        contract: Arc<dyn ChainContract>,
        btc: Arc<dyn BitcoinDataSource>,
        store: Arc<dyn SwapStore>,
        config: SwapServiceConfig,
    ) -> Self {
        Self {
            contract,
            btc,
            store,
            table: RwLock::new(HashMap::new()),
            notifiers: std::sync::Mutex::new(HashMap::new()),
            config,
        }
    }

    // ------------------------------------------------------------------
    // Record access
    // ------------------------------------------------------------------

    /// Create a swap from a quote. The record starts in `Created`.
    pub async fn create(&self, params: SwapParams) -> Result<PaymentHash, SwapError> {
        let record = SwapRecord::new(params);
        let hash = record.payment_hash;

        let mut table = self.table.write().await;
        if table.contains_key(&hash) {
            return Err(SwapError::validation(format!(
                "swap {} already exists",
                hex::encode(hash)
            )));
        }
        table.insert(hash, record.clone());
        drop(table);

        self.store.put(&record).await?;
        info!(
            target: "satswap::swap",
            payment_hash = %hex::encode(hash), kind = %record.kind, "swap created"
        );
        Ok(hash)
    }

    pub async fn get(&self, payment_hash: &PaymentHash) -> Option<SwapRecord> {
        self.table.read().await.get(payment_hash).cloned()
    }

    async fn snapshot(&self, payment_hash: &PaymentHash) -> Result<SwapRecord, SwapError> {
        self.table
            .read()
            .await
            .get(payment_hash)
            .cloned()
            .ok_or_else(|| SwapError::NotFound(hex::encode(payment_hash)))
    }

    /// Mutate a record under the table lock, then persist and notify.
    async fn update<F>(&self, payment_hash: &PaymentHash, mutate: F) -> Result<SwapRecord, SwapError>
    where
        F: FnOnce(&mut SwapRecord),
    {
        let updated = {
            let mut table = self.table.write().await;
            let record = table
                .get_mut(payment_hash)
                .ok_or_else(|| SwapError::NotFound(hex::encode(payment_hash)))?;
            mutate(record);
            record.clone()
        };

        self.store.put(&updated).await?;
        self.notify(payment_hash, updated.state);
        Ok(updated)
    }

    fn notify(&self, payment_hash: &PaymentHash, state: SwapState) {
        if let Some(tx) = self.notifiers.lock().unwrap().get(payment_hash) {
            let _ = tx.send(state);
        }
    }

    fn subscribe(&self, payment_hash: &PaymentHash, current: SwapState) -> watch::Receiver<SwapState> {
        let mut notifiers = self.notifiers.lock().unwrap();
        notifiers
            .entry(*payment_hash)
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }

    fn auth_body(record: &SwapRecord) -> AuthBody {
        AuthBody {
            amount: record.amount,
            expiry: record.expiry,
            sequence: record.sequence,
            payment_hash: record.payment_hash,
        }
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Commit the escrow on chain using the counterparty's authorization.
    ///
    /// A rejected authorization on this path is fatal for the swap: the
    /// escrow can never be funded under this quote, so the record moves to
    /// `Failed` and the caller must start over with a fresh quote.
    pub async fn commit(
        &self,
        payment_hash: &PaymentHash,
        auth: SignedAuthorization,
        counterparty_key: &[u8],
    ) -> Result<String, SwapError> {
        let record = self.snapshot(payment_hash).await?;
        let now = crate::common::now_ts();

        if record.state != SwapState::Created {
            return Err(SwapError::precondition(
                "commit",
                format!("swap is {}, expected created", record.state),
            ));
        }
        if !record.can_commit(now, self.config.commit_safety_window_secs) {
            return Err(SwapError::precondition(
                "commit",
                format!(
                    "only {}s left until expiry, safety window is {}s",
                    record.expiry.saturating_sub(now),
                    self.config.commit_safety_window_secs
                ),
            ));
        }

        let context = if record.pay_in {
            AuthContext::Initialize
        } else {
            AuthContext::ClaimInitialize
        };
        if let Err(err) = auth.verify(
            context,
            counterparty_key,
            &Self::auth_body(&record),
            now,
            self.config.grace_period_secs,
        ) {
            let reason = format!("commit authorization rejected: {}", err);
            self.update(payment_hash, |rec| rec.mark_failed(reason.clone()))
                .await?;
            return Err(err.into());
        }

        let txid = self.contract.init(&record, &auth).await?;

        self.update(payment_hash, |rec| {
            rec.authorization = Some(auth);
            rec.mark_committed(txid.clone());
        })
        .await?;

        info!(
            target: "satswap::swap",
            payment_hash = %hex::encode(payment_hash), %txid, "escrow committed"
        );
        Ok(txid)
    }

    // ------------------------------------------------------------------
    // Claim
    // ------------------------------------------------------------------

    /// Claim with a Lightning preimage whose SHA-256 equals the payment
    /// hash.
    pub async fn claim_with_secret(
        &self,
        payment_hash: &PaymentHash,
        preimage: [u8; 32],
    ) -> Result<String, SwapError> {
        let record = self.snapshot(payment_hash).await?;
        let now = crate::common::now_ts();

        let digest: [u8; 32] = Sha256::digest(preimage).into();
        if &digest != payment_hash {
            return Err(SwapError::proof_mismatch(
                "preimage does not hash to the payment hash",
            ));
        }

        if !matches!(record.state, SwapState::Committed | SwapState::Claimable) {
            return Err(SwapError::precondition(
                "claim",
                format!("swap is {}, expected committed or claimable", record.state),
            ));
        }
        if now >= record.expiry {
            return Err(SwapError::precondition("claim", "escrow has expired"));
        }

        self.update(payment_hash, |rec| rec.mark_claimable()).await?;

        let txid = self
            .contract
            .claim(payment_hash, ClaimProof::Secret(preimage))
            .await?;

        self.update(payment_hash, |rec| rec.mark_claimed(Some(txid.clone())))
            .await?;

        info!(
            target: "satswap::swap",
            payment_hash = %hex::encode(payment_hash), %txid, "claimed with secret"
        );
        Ok(txid)
    }

    /// Claim with an SPV inclusion proof of the Bitcoin transaction paying
    /// the swap's expected output.
    ///
    /// Blocks until the payment reaches the required confirmation depth
    /// under a relay-committed header; a reorg restarts proof acquisition.
    pub async fn claim_with_proof(
        &self,
        payment_hash: &PaymentHash,
        btc_txid: &str,
        vout: u32,
        cancel: &CancelToken,
    ) -> Result<String, SwapError> {
        let record = self.snapshot(payment_hash).await?;
        let backoff = Backoff::default();

        if !record.kind.is_onchain() {
            return Err(SwapError::precondition(
                "claim_proof",
                format!("{} swaps are claimed with a secret", record.kind),
            ));
        }
        if !matches!(record.state, SwapState::Committed | SwapState::Claimable) {
            return Err(SwapError::precondition(
                "claim_proof",
                format!("swap is {}, expected committed or claimable", record.state),
            ));
        }
        let expected = record.txo_hash.ok_or_else(|| {
            SwapError::precondition("claim_proof", "swap has no output commitment")
        })?;

        let tx = retry_with_backoff("get_transaction", backoff, cancel, || {
            self.btc.get_transaction(btc_txid)
        })
        .await?;

        // Bind the observed transaction to the swap's commitment
        match record.kind {
            SwapKind::ChainTxhash => {
                // The commitment is the expected transaction id itself
                if spv::txid_to_internal(btc_txid)? != expected {
                    return Err(SwapError::proof_mismatch(
                        "transaction id does not match the swap commitment",
                    ));
                }
            }
            _ => {
                let output = tx.outputs.get(vout as usize).ok_or_else(|| {
                    SwapError::validation(format!("transaction has no output {}", vout))
                })?;
                let commitment =
                    spv::txo_commitment(record.nonce, output.value, &output.script_pubkey);
                if commitment != expected {
                    return Err(SwapError::proof_mismatch(
                        "transaction output does not match the swap's txo hash",
                    ));
                }
                if record.kind == SwapKind::ChainNonced {
                    let nonce = spv::tx_nonce(tx.locktime, tx.first_input_sequence);
                    if nonce != record.nonce {
                        return Err(SwapError::proof_mismatch(
                            "transaction nonce does not match the swap nonce",
                        ));
                    }
                }
            }
        }

        let (proof, height) = spv::wait_for_inclusion(
            &self.btc,
            &self.contract,
            btc_txid,
            record.required_confirmations,
            self.config.proof_poll_interval,
            cancel,
        )
        .await?;

        self.update(payment_hash, |rec| {
            rec.mark_payment_observed(btc_txid.to_string(), height)
        })
        .await?;

        // The escrow may have expired while we waited for depth
        if crate::common::now_ts() >= record.expiry {
            return Err(SwapError::precondition(
                "claim_proof",
                "escrow expired while waiting for confirmations",
            ));
        }

        let raw_tx = retry_with_backoff("get_raw_transaction", backoff, cancel, || {
            self.btc.get_raw_transaction(btc_txid)
        })
        .await?;

        // The indexer is untrusted: the raw bytes must decode to the
        // transaction we proved.
        let parsed: bitcoin::Transaction = bitcoin::consensus::deserialize(&raw_tx)
            .map_err(|e| SwapError::validation(format!("raw transaction undecodable: {}", e)))?;
        if parsed.compute_txid().to_string() != btc_txid {
            return Err(SwapError::proof_mismatch(
                "raw transaction bytes do not match the proven txid",
            ));
        }

        let txid = self
            .contract
            .claim(
                payment_hash,
                ClaimProof::Spv {
                    raw_tx,
                    vout,
                    proof,
                    block_height: height,
                },
            )
            .await?;

        self.update(payment_hash, |rec| rec.mark_claimed(Some(txid.clone())))
            .await?;

        info!(
            target: "satswap::swap",
            payment_hash = %hex::encode(payment_hash), %txid, btc_txid, "claimed with SPV proof"
        );
        Ok(txid)
    }

    // ------------------------------------------------------------------
    // Refund
    // ------------------------------------------------------------------

    /// Refund the escrow, either after its expiry or early with a
    /// counterparty-signed `refund` authorization.
    ///
    /// A rejected refund authorization harms nothing: the record is left
    /// untouched and the caller can obtain a fresh signature or wait out
    /// the timeout.
    pub async fn refund(
        &self,
        payment_hash: &PaymentHash,
        auth: Option<SignedAuthorization>,
        counterparty_key: &[u8],
    ) -> Result<String, SwapError> {
        let record = self.snapshot(payment_hash).await?;
        let now = crate::common::now_ts();

        if !matches!(record.state, SwapState::Committed | SwapState::Claimable) {
            return Err(SwapError::precondition(
                "refund",
                format!("swap is {}, expected committed or claimable", record.state),
            ));
        }

        match &auth {
            Some(authorization) => {
                authorization.verify(
                    AuthContext::Refund,
                    counterparty_key,
                    &Self::auth_body(&record),
                    now,
                    self.config.grace_period_secs,
                )?;
            }
            None => {
                if !record.can_refund(now) {
                    return Err(SwapError::precondition(
                        "refund",
                        format!("escrow expires at {}, now {}", record.expiry, now),
                    ));
                }
            }
        }

        let txid = self.contract.refund(payment_hash, auth.as_ref()).await?;

        self.update(payment_hash, |rec| rec.mark_refunded(Some(txid.clone())))
            .await?;

        info!(
            target: "satswap::swap",
            payment_hash = %hex::encode(payment_hash), %txid,
            cooperative = auth.is_some(), "escrow refunded"
        );
        Ok(txid)
    }

    // ------------------------------------------------------------------
    // Blocking waits with watchdog reconciliation
    // ------------------------------------------------------------------

    /// Wait until the escrow is committed (locally observed or confirmed by
    /// the authoritative watchdog).
    pub async fn wait_till_committed(
        &self,
        payment_hash: &PaymentHash,
        cancel: &CancelToken,
    ) -> Result<WaitResult, SwapError> {
        self.wait_for(
            payment_hash,
            |state| match state {
                SwapState::Committed | SwapState::Claimable => Some(WaitResult::Committed),
                SwapState::Claimed => Some(WaitResult::Claimed),
                SwapState::Refunded => Some(WaitResult::Refunded),
                SwapState::Expired => Some(WaitResult::Expired),
                SwapState::Failed => Some(WaitResult::Failed),
                SwapState::Created => None,
            },
            &[
                CommitStatus::Committed,
                CommitStatus::Paid,
                CommitStatus::Expired,
            ],
            cancel,
        )
        .await
    }

    /// Wait until the swap settles: claimed (by us or a watchtower),
    /// refunded, or expired.
    pub async fn wait_till_claimed(
        &self,
        payment_hash: &PaymentHash,
        cancel: &CancelToken,
    ) -> Result<WaitResult, SwapError> {
        self.wait_for(
            payment_hash,
            |state| match state {
                SwapState::Claimed => Some(WaitResult::Claimed),
                SwapState::Refunded => Some(WaitResult::Refunded),
                SwapState::Expired => Some(WaitResult::Expired),
                SwapState::Failed => Some(WaitResult::Failed),
                _ => None,
            },
            &[CommitStatus::Paid, CommitStatus::Expired],
            cancel,
        )
        .await
    }

    /// Race a local state-change notification against the authoritative
    /// watchdog poll; whichever resolves first wins and the losing branch
    /// is dropped with it. A watchtower claiming the swap shows up as
    /// `Paid` here and is accepted as success.
    async fn wait_for(
        &self,
        payment_hash: &PaymentHash,
        map_state: impl Fn(SwapState) -> Option<WaitResult>,
        decisive: &[CommitStatus],
        cancel: &CancelToken,
    ) -> Result<WaitResult, SwapError> {
        let record = self.snapshot(payment_hash).await?;
        let mut rx = self.subscribe(payment_hash, record.state);

        // A transition may have landed between the snapshot and the
        // subscription; re-read so it cannot be lost.
        if let Some(result) = map_state(self.snapshot(payment_hash).await?.state) {
            return Ok(result);
        }

        let watchdog = self.watch_authoritative(payment_hash, decisive, cancel);
        tokio::pin!(watchdog);

        loop {
            // Latest value first: transitions between subscribe and select
            // must not be lost.
            if let Some(result) = map_state(*rx.borrow_and_update()) {
                return Ok(result);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(SwapError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(SwapError::validation("swap notifier closed"));
                    }
                }
                status = &mut watchdog => {
                    return self.resolve_watchdog(payment_hash, status?).await;
                }
            }
        }
    }

    async fn resolve_watchdog(
        &self,
        payment_hash: &PaymentHash,
        status: CommitStatus,
    ) -> Result<WaitResult, SwapError> {
        match status {
            CommitStatus::Paid => {
                // Possibly a watchtower racing us; their claim is our success
                self.update(payment_hash, |rec| {
                    if !rec.state.is_terminal() {
                        rec.mark_claimed(None);
                    }
                })
                .await?;
                Ok(WaitResult::Claimed)
            }
            CommitStatus::Committed => {
                self.update(payment_hash, |rec| {
                    if rec.state == SwapState::Created {
                        rec.mark_committed_external();
                    }
                })
                .await?;
                Ok(WaitResult::Committed)
            }
            CommitStatus::Expired => {
                self.update(payment_hash, |rec| {
                    if rec.state == SwapState::Created {
                        rec.mark_expired();
                    }
                    // A committed escrow stays committed; the refund guard
                    // opens by the clock.
                })
                .await?;
                Ok(WaitResult::Expired)
            }
            CommitStatus::NotCommitted => Err(SwapError::validation(
                "watchdog resolved with non-decisive status",
            )),
        }
    }

    /// Poll the authoritative commit status until it reaches one of the
    /// decisive values. Transient poll failures are retried and otherwise
    /// ignored; an ambiguous result never pushes a transition.
    async fn watch_authoritative(
        &self,
        payment_hash: &PaymentHash,
        decisive: &[CommitStatus],
        cancel: &CancelToken,
    ) -> Result<CommitStatus, SwapError> {
        let mut ticker = Ticker::new(self.config.watchdog_interval, cancel.clone());
        let backoff = Backoff::default();

        while ticker.tick().await {
            match retry_with_backoff("get_commit_status", backoff, cancel, || {
                self.contract.get_commit_status(payment_hash)
            })
            .await
            {
                Ok(status) if decisive.contains(&status) => return Ok(status),
                Ok(status) => {
                    debug!(
                        target: "satswap::swap",
                        payment_hash = %hex::encode(payment_hash), %status,
                        "watchdog poll, not decisive yet"
                    );
                }
                Err(SwapError::Cancelled) => return Err(SwapError::Cancelled),
                Err(err) => {
                    warn!(
                        target: "satswap::swap",
                        payment_hash = %hex::encode(payment_hash), error = %err,
                        "watchdog poll failed, will retry next tick"
                    );
                }
            }
        }

        Err(SwapError::Cancelled)
    }

    // ------------------------------------------------------------------
    // Startup reconciliation
    // ------------------------------------------------------------------

    /// Load every non-terminal swap from storage and re-check each against
    /// the authoritative on-chain status. Look-ups run concurrently,
    /// bounded by a fixed-size semaphore so RPC endpoints are not
    /// overwhelmed.
    pub async fn reconcile_on_startup(
        self: &Arc<Self>,
        cancel: &CancelToken,
    ) -> Result<usize, SwapError> {
        let records = self.store.get_active().await?;
        let count = records.len();

        {
            let mut table = self.table.write().await;
            for record in records.iter() {
                table.entry(record.payment_hash).or_insert_with(|| record.clone());
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.startup_concurrency.max(1)));
        let mut handles = Vec::with_capacity(count);

        for record in records {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| SwapError::Cancelled)?;
            let service = Arc::clone(self);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                service.refresh_from_chain(&record.payment_hash, &cancel).await
            }));
        }

        let mut refreshed = 0usize;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => refreshed += 1,
                Ok(Err(SwapError::Cancelled)) => return Err(SwapError::Cancelled),
                Ok(Err(err)) => {
                    warn!(target: "satswap::swap", error = %err, "startup refresh failed");
                }
                Err(err) => {
                    warn!(target: "satswap::swap", error = %err, "startup refresh panicked");
                }
            }
        }

        info!(
            target: "satswap::swap",
            total = count, refreshed, "startup reconciliation complete"
        );
        Ok(refreshed)
    }

    async fn refresh_from_chain(
        &self,
        payment_hash: &PaymentHash,
        cancel: &CancelToken,
    ) -> Result<(), SwapError> {
        let status = retry_with_backoff("get_commit_status", Backoff::default(), cancel, || {
            self.contract.get_commit_status(payment_hash)
        })
        .await?;

        self.update(payment_hash, |rec| match status {
            CommitStatus::Committed if rec.state == SwapState::Created => {
                rec.mark_committed_external();
            }
            CommitStatus::Paid if !rec.state.is_terminal() => {
                rec.mark_claimed(None);
            }
            CommitStatus::Expired if rec.state == SwapState::Created => {
                rec.mark_expired();
            }
            // NotCommitted while we believe the escrow exists is ambiguous
            // (the account may have been closed by claim or refund); leave
            // the record alone and let events resolve it.
            _ => {}
        })
        .await?;

        Ok(())
    }
}

#[async_trait]
impl EventListener for SwapService {
    async fn on_event(&self, event: &SwapEvent) -> Result<(), SwapError> {
        let payment_hash = *event.payment_hash();

        let outcome = {
            let mut table = self.table.write().await;
            match table.get_mut(&payment_hash) {
                // Not one of ours (other parties share the contract)
                None => return Ok(()),
                Some(record) => record.apply_event(event)?,
            }
        };

        match outcome {
            EventOutcome::Applied => {
                let record = self.snapshot(&payment_hash).await?;
                self.store.put(&record).await?;
                self.notify(&payment_hash, record.state);
                debug!(
                    target: "satswap::swap",
                    payment_hash = %hex::encode(payment_hash),
                    kind = event.kind_name(), state = %record.state, "event applied"
                );
            }
            EventOutcome::Ignored => {
                debug!(
                    target: "satswap::swap",
                    payment_hash = %hex::encode(payment_hash),
                    kind = event.kind_name(), "event already applied, ignoring"
                );
            }
        }

        Ok(())
    }
}
