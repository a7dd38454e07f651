//! Faucet service core logic
//!
//! [`FaucetService::dispense`] sequences one request:
//! 1. record the attempt in the burst history (blocking the IP on a burst)
//!    and persist it, whatever happens next
//! 2. run the admission policy on the freshly cleaned state
//! 3. if admitted, transfer through the ledger client
//! 4. only on confirmed success, commit cooldowns and the daily counter
//!
//! Every store read-modify-write runs under one service-wide lock, so
//! snapshot updates from concurrent requests never overwrite each other.
//! The lock is not held across the ledger call: two concurrent requests for
//! the same address can both be admitted before either commits.

use crate::clock::{Clock, SystemClock};
use crate::config::{FaucetConfig, PolicyConfig};
use crate::error::{FaucetError, FaucetResult, LedgerError};
use crate::ledger::LedgerClient;
use crate::metrics::{FaucetMetrics, OUTCOME_LEDGER_FAILURE, OUTCOME_SUCCESS};
use crate::policy::{evaluate, Decision, DenyReason, Denial};
use crate::store::{self, cleanup, RateLimitState, RateLimitStore};
use drip_common::utils::units::{format_ether, parse_ether};
use drip_common::Address;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const LEDGER_FAILURE_MESSAGE: &str = "Transaction failed. Please try again later.";

/// Faucet service
pub struct FaucetService {
    inner: Arc<Inner>,
}

struct Inner {
    config: FaucetConfig,
    amount_wei: u128,
    store: Arc<dyn RateLimitStore>,
    ledger: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
    state_lock: Mutex<()>,
    metrics: FaucetMetrics,
}

impl FaucetService {
    /// Create new faucet service
    pub fn new(
        config: FaucetConfig,
        store: Arc<dyn RateLimitStore>,
        ledger: Arc<dyn LedgerClient>,
    ) -> FaucetResult<Self> {
        Self::with_clock(config, store, ledger, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: FaucetConfig,
        store: Arc<dyn RateLimitStore>,
        ledger: Arc<dyn LedgerClient>,
        clock: Arc<dyn Clock>,
    ) -> FaucetResult<Self> {
        let amount_wei = config.amount_wei()?;
        let metrics = FaucetMetrics::new().map_err(|e| FaucetError::Internal(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                amount_wei,
                store,
                ledger,
                clock,
                state_lock: Mutex::new(()),
                metrics,
            }),
        })
    }

    /// Dispense tokens to an address
    ///
    /// Never fails: denials, ledger failures and store outages all come back
    /// as an unsuccessful [`DispenseResult`].
    pub async fn dispense(&self, address: &Address, ip: &str) -> DispenseResult {
        let inner = &self.inner;
        let address_key = address.to_string();

        match inner.admit(&address_key, ip).await {
            Decision::Admit => {}
            Decision::Deny(denial) => {
                let message = denial.message(&inner.config.policy);
                warn!(
                    address = %address_key,
                    ip,
                    reason = %denial.reason,
                    time_left = denial.retry_after_minutes,
                    "Rate limit exceeded"
                );
                inner.metrics.record_outcome(denial.reason.as_str());
                return DispenseResult::denied(denial, message);
            }
        }

        // Once submitted, a transfer runs to completion and gets committed
        // even if the caller goes away.
        let task = Arc::clone(inner);
        let to = *address;
        let ip = ip.to_string();
        let handle = tokio::spawn(async move { task.disburse(to, address_key, ip).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Disbursement task failed: {}", e);
                inner.metrics.record_outcome(OUTCOME_LEDGER_FAILURE);
                DispenseResult::failed(LEDGER_FAILURE_MESSAGE)
            }
        }
    }

    /// Get faucet status; configuration only, no store access
    pub fn status(&self) -> FaucetStatus {
        let config = &self.inner.config;
        FaucetStatus {
            faucet_address: self.inner.ledger.address().to_string(),
            network: config.network_name.clone(),
            faucet_amount: format_ether(self.inner.amount_wei),
            asset_symbol: config.asset_symbol.clone(),
            cooldown_period: config.policy.cooldown_period_ms,
            daily_limit: config.policy.daily_cap,
            short_term_limit: config.policy.burst_limit_description(),
            block_duration: config.policy.block_duration_description(),
        }
    }

    /// Logs the faucet balance, warning when it runs low
    pub async fn check_balance(&self) -> FaucetResult<u128> {
        let inner = &self.inner;
        let balance = inner.ledger.balance().await.map_err(|e| {
            error!("Failed to check faucet balance: {}", e);
            FaucetError::from(e)
        })?;

        let shown = format!("{} {}", format_ether(balance), inner.config.asset_symbol);
        info!(balance = %shown, faucet_address = %inner.ledger.address(), "Faucet balance checked");

        let threshold = parse_ether(&inner.config.low_balance_warning)
            .map_err(|e| FaucetError::Configuration(e.to_string()))?;
        if balance < threshold {
            warn!(balance = %shown, "Faucet balance is low");
        }
        Ok(balance)
    }

    /// Drops expired entries from the persisted snapshot. Returns how many
    /// entries were removed.
    pub async fn compact(&self) -> usize {
        let inner = &self.inner;
        let _guard = inner.state_lock.lock().await;

        let state = inner.load().await;
        let before = state.entry_count();
        let cleaned = cleanup(state, inner.clock.now_ms(), &inner.config.policy);
        let removed = before - cleaned.entry_count();

        if removed > 0 {
            inner.save(&cleaned).await;
        }
        debug!(removed, "Rate-limit store compacted");
        removed
    }

    pub fn faucet_address(&self) -> Address {
        self.inner.ledger.address()
    }

    pub fn config(&self) -> &FaucetConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.inner.config.policy
    }

    pub fn metrics(&self) -> &FaucetMetrics {
        &self.inner.metrics
    }
}

impl Inner {
    async fn load(&self) -> RateLimitState {
        let (state, failure) = store::load_or_empty(self.store.as_ref()).await;
        if failure.is_some() {
            self.metrics.store_errors_total.inc();
        }
        state
    }

    async fn save(&self, state: &RateLimitState) {
        if store::save_or_log(self.store.as_ref(), state).await.is_some() {
            self.metrics.store_errors_total.inc();
        }
    }

    /// Records the attempt, persists it, then evaluates the policy.
    async fn admit(&self, address_key: &str, ip: &str) -> Decision {
        let policy = &self.config.policy;
        let _guard = self.state_lock.lock().await;
        let now = self.clock.now_ms();

        let mut state = cleanup(self.load().await, now, policy);

        if let Some(attempts) = state.record_attempt(ip, now, policy) {
            warn!(
                ip,
                request_count = attempts,
                time_window = %policy.burst_limit_description(),
                "IP blocked for excessive requests"
            );
            self.metrics.ip_blocks_total.inc();
        }
        self.save(&state).await;

        evaluate(&state, address_key, ip, now, policy)
    }

    /// Transfers and, on confirmation only, commits the cooldowns.
    async fn disburse(&self, to: Address, address_key: String, ip: String) -> DispenseResult {
        let timeout = self.config.ledger.timeout();
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.ledger.transfer(&to, self.amount_wei)).await;
        self.metrics.ledger_duration.observe(started.elapsed().as_secs_f64());

        let receipt = match outcome {
            Ok(Ok(receipt)) if receipt.is_confirmed() => receipt,
            Ok(Ok(receipt)) => {
                error!(
                    address = %address_key,
                    tx_hash = %receipt.reference,
                    detail = ?receipt.error_detail,
                    "Transaction failed"
                );
                return self.ledger_failure();
            }
            Ok(Err(e)) => {
                error!(address = %address_key, error = %e, "Error sending tokens");
                return self.ledger_failure();
            }
            Err(_) => {
                let e = LedgerError::Timeout(timeout.as_secs());
                error!(address = %address_key, error = %e, "Error sending tokens");
                return self.ledger_failure();
            }
        };

        {
            let _guard = self.state_lock.lock().await;
            let now = self.clock.now_ms();
            let mut state = cleanup(self.load().await, now, &self.config.policy);
            state.record_success(&address_key, &ip, now);
            self.save(&state).await;
        }

        let amount = format!("{} {}", format_ether(self.amount_wei), self.config.asset_symbol);
        info!(
            address = %address_key,
            tx_hash = %receipt.reference,
            amount = %amount,
            ip = %ip,
            "Faucet transaction successful"
        );
        self.metrics.record_outcome(OUTCOME_SUCCESS);

        DispenseResult::succeeded(receipt.reference, amount)
    }

    fn ledger_failure(&self) -> DispenseResult {
        self.metrics.record_outcome(OUTCOME_LEDGER_FAILURE);
        DispenseResult::failed(LEDGER_FAILURE_MESSAGE)
    }
}

/// Dispense response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispenseResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Minutes until a retry can succeed, for time-bound denials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl DispenseResult {
    fn succeeded(tx_hash: String, amount: String) -> Self {
        Self {
            success: true,
            tx_hash: Some(tx_hash),
            amount: Some(amount),
            error: None,
            retry_after: None,
            reason: None,
        }
    }

    fn denied(denial: Denial, message: String) -> Self {
        Self {
            success: false,
            tx_hash: None,
            amount: None,
            error: Some(message),
            retry_after: Some(denial.retry_after_minutes),
            reason: Some(denial.reason),
        }
    }

    fn failed(message: &str) -> Self {
        Self {
            success: false,
            tx_hash: None,
            amount: None,
            error: Some(message.to_string()),
            retry_after: None,
            reason: None,
        }
    }

    /// Denied by the admission policy (as opposed to a ledger failure)
    pub fn is_rate_limited(&self) -> bool {
        self.reason.is_some()
    }
}

/// Faucet status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetStatus {
    pub faucet_address: String,
    pub network: String,
    pub faucet_amount: String,
    pub asset_symbol: String,
    /// Milliseconds
    pub cooldown_period: u64,
    pub daily_limit: u32,
    pub short_term_limit: String,
    pub block_duration: String,
}
