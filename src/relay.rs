//! BTC Relay Synchronizer
//!
//! Brings the on-chain Bitcoin header light client from its last committed
//! tip to the current real chain tip as a sequence of header-submission
//! transactions. Discovery (which headers are missing), batching (how many
//! fit one transaction) and submission (which relay entry point) are kept
//! separate, so a reorg mid-sync only affects classification.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::btc::BitcoinDataSource;
use crate::chain::{ChainContract, SubmitMode, SubmitResult};
use crate::common::{retry_with_backoff, Backoff, CancelToken, SwapError, Ticker};
use crate::types::{BlockHeader, ForkId};

/// Synchronizer tuning
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Headers fetched from the indexer per request
    pub headers_per_fetch: u32,
    /// Max headers per submission transaction on the main chain
    pub max_headers_per_tx_main: usize,
    /// Max headers per submission transaction on a fork (smaller: fork
    /// submissions carry chain-work proofs)
    pub max_headers_per_tx_fork: usize,
    /// How far below the relay tip to search for a common ancestor
    pub max_reorg_depth: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            headers_per_fetch: 15,
            max_headers_per_tx_main: 50,
            max_headers_per_tx_fork: 20,
            max_reorg_depth: 500,
        }
    }
}

/// Summary of one synchronizer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub submissions: usize,
    pub headers_submitted: usize,
    /// Fork the headers landed on (`Main` for plain extensions)
    pub fork: ForkId,
    /// Relay tip after the run
    pub relay_tip: u64,
}

/// Keeps the on-chain relay converged with the real Bitcoin chain
pub struct RelaySynchronizer {
    contract: Arc<dyn ChainContract>,
    btc: Arc<dyn BitcoinDataSource>,
    config: RelayConfig,
}

impl RelaySynchronizer {
    pub fn new(
        contract: Arc<dyn ChainContract>,
        btc: Arc<dyn BitcoinDataSource>,
        config: RelayConfig,
    ) -> Self {
        Self {
            contract,
            btc,
            config,
        }
    }

    /// One full synchronization pass: classify, batch, submit until the
    /// relay tip matches the real tip.
    pub async fn run_once(&self, cancel: &CancelToken) -> Result<SyncReport, SwapError> {
        let backoff = Backoff::default();

        let tip_data = retry_with_backoff("get_tip_data", backoff, cancel, || {
            self.contract.get_tip_data()
        })
        .await?;
        let relay_head = retry_with_backoff("latest_known_header", backoff, cancel, || {
            self.contract.retrieve_latest_known_header()
        })
        .await?
        .ok_or_else(|| SwapError::validation("relay has no committed headers"))?;
        let real_tip = retry_with_backoff("btc_tip_height", backoff, cancel, || {
            self.btc.get_tip_height()
        })
        .await?;

        debug!(
            target: "satswap::relay",
            relay_height = relay_head.height, relay_work = %hex::encode(tip_data.chain_work),
            real_tip, "starting sync pass"
        );

        // Classification: does the real chain still contain the relay tip?
        let relay_on_main = if relay_head.height <= real_tip {
            let real_at = retry_with_backoff("btc_header", backoff, cancel, || {
                self.btc.get_block_header(relay_head.height)
            })
            .await?;
            real_at.block_hash() == relay_head.block_hash
        } else {
            false
        };

        if relay_on_main && relay_head.height == real_tip {
            return Ok(SyncReport {
                submissions: 0,
                headers_submitted: 0,
                fork: ForkId::Main,
                relay_tip: relay_head.height,
            });
        }

        // Until the first fork submission assigns a concrete id, fork mode
        // stays on the pending sentinel.
        let (ancestor, mut mode) = if relay_on_main {
            (relay_head.height, SubmitMode::ExtendMain)
        } else {
            info!(
                target: "satswap::relay",
                relay_height = relay_head.height,
                "relay tip not on the real chain, searching for fork point"
            );
            let from = relay_head.height.min(real_tip);
            (self.find_fork_point(from, cancel).await?, SubmitMode::NewFork)
        };

        // Fee rates are looked up at most once per run per mode
        let mut fee_main: Option<u64> = None;
        let mut fee_fork: Option<u64> = None;

        let mut submissions: Vec<SubmitResult> = Vec::new();
        let mut headers_submitted = 0usize;
        let mut pending: Vec<BlockHeader> = Vec::new();
        let mut height = ancestor + 1;

        while height <= real_tip {
            if cancel.is_cancelled() {
                return Err(SwapError::Cancelled);
            }

            let count = (self.config.headers_per_fetch as u64).min(real_tip - height + 1) as u32;
            let batch = retry_with_backoff("btc_header_batch", backoff, cancel, || {
                self.btc.get_header_batch(height, count)
            })
            .await?;
            if batch.len() != count as usize {
                return Err(SwapError::transient(format!(
                    "indexer returned {} headers, expected {}",
                    batch.len(),
                    count
                )));
            }
            pending.extend(batch);
            height += count as u64;

            while pending.len() >= self.cap_for(mode) {
                let chunk: Vec<BlockHeader> = pending.drain(..self.cap_for(mode)).collect();
                headers_submitted += chunk.len();
                let result = self
                    .submit(&chunk, &mut mode, &mut fee_main, &mut fee_fork)
                    .await?;
                submissions.push(result);
            }
        }

        // Flush the final partial batch
        if !pending.is_empty() {
            headers_submitted += pending.len();
            let result = self
                .submit(&pending, &mut mode, &mut fee_main, &mut fee_fork)
                .await?;
            submissions.push(result);
        }

        let fork = match mode {
            SubmitMode::ExtendMain => ForkId::Main,
            SubmitMode::ExtendFork(id) => ForkId::Fork(id),
            // No headers were submitted on a detected fork; keep the sentinel
            SubmitMode::NewFork => ForkId::Pending,
        };

        info!(
            target: "satswap::relay",
            submissions = submissions.len(), headers_submitted, %fork, real_tip,
            "sync pass complete"
        );

        Ok(SyncReport {
            submissions: submissions.len(),
            headers_submitted,
            fork,
            relay_tip: submissions.last().map(|s| s.new_tip_height).unwrap_or(real_tip),
        })
    }

    /// Continuous sync loop. Errors are logged and the loop continues on
    /// the next tick; they never terminate the process.
    pub async fn run(&self, period: Duration, cancel: CancelToken) {
        let mut ticker = Ticker::new(period, cancel.clone());
        while ticker.tick().await {
            match self.run_once(&cancel).await {
                Ok(report) if report.submissions > 0 => {
                    info!(
                        target: "satswap::relay",
                        submissions = report.submissions, tip = report.relay_tip,
                        "relay advanced"
                    );
                }
                Ok(_) => {}
                Err(SwapError::Cancelled) => break,
                Err(err) => {
                    error!(target: "satswap::relay", error = %err, "sync pass failed");
                }
            }
        }
    }

    fn cap_for(&self, mode: SubmitMode) -> usize {
        if mode.is_fork() {
            self.config.max_headers_per_tx_fork
        } else {
            self.config.max_headers_per_tx_main
        }
        .max(1)
    }

    /// Submit one batch through the entry point selected by `mode`. After a
    /// fork-creating submission the assigned id becomes fixed for the rest
    /// of the run.
    async fn submit(
        &self,
        chunk: &[BlockHeader],
        mode: &mut SubmitMode,
        fee_main: &mut Option<u64>,
        fee_fork: &mut Option<u64>,
    ) -> Result<SubmitResult, SwapError> {
        let fee_slot = if mode.is_fork() { fee_fork } else { fee_main };
        let fee_rate = match *fee_slot {
            Some(rate) => rate,
            None => {
                let rate = self.contract.get_fee_rate(*mode).await?;
                *fee_slot = Some(rate);
                rate
            }
        };

        // Submission is deliberately single-shot: an ambiguous transport
        // failure must not double-submit; the next pass resumes cleanly.
        let result = self.contract.submit_headers(chunk, *mode).await?;

        debug!(
            target: "satswap::relay",
            headers = chunk.len(), fork = %result.fork, tip = result.new_tip_height,
            fee_rate, txid = %result.txid, "submitted header batch"
        );

        if matches!(mode, SubmitMode::NewFork) {
            match result.fork {
                ForkId::Fork(id) => *mode = SubmitMode::ExtendFork(id),
                other => {
                    return Err(SwapError::validation(format!(
                        "fork-creating submission reported fork id {}",
                        other
                    )))
                }
            }
        }

        Ok(result)
    }

    /// Walk backward from `from` until the real chain and the relay's
    /// committed headers agree on a block hash.
    async fn find_fork_point(&self, from: u64, cancel: &CancelToken) -> Result<u64, SwapError> {
        let backoff = Backoff::default();
        let floor = from.saturating_sub(self.config.max_reorg_depth);

        let mut height = from;
        loop {
            if cancel.is_cancelled() {
                return Err(SwapError::Cancelled);
            }

            let real = retry_with_backoff("btc_header", backoff, cancel, || {
                self.btc.get_block_header(height)
            })
            .await?;
            let committed = retry_with_backoff("relay_header", backoff, cancel, || {
                self.contract.get_committed_header(height)
            })
            .await?;

            if let Some(stored) = committed {
                if stored.block_hash == real.block_hash() {
                    return Ok(height);
                }
            }

            if height == floor {
                return Err(SwapError::validation(format!(
                    "no common ancestor within {} blocks of height {}",
                    self.config.max_reorg_depth, from
                )));
            }
            height -= 1;
        }
    }
}
