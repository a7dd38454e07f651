//! Shared fixtures for the faucet integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use drip_common::utils::logging::init_test_logging;
use drip_common::Address;
use drip_faucet::store::MemoryStore;
use drip_faucet::{
    FaucetConfig, FaucetService, LedgerClient, LedgerError, ManualClock, RateLimitState,
    RateLimitStore, StoreError, TransferReceipt,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const START_MS: i64 = 1_700_000_000_000;
pub const FAUCET_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    Confirm,
    /// Transfer mined but reverted
    Revert,
    /// Submission error
    Error,
    /// Confirms after a short delay
    Slow,
    /// Never resolves within any sane timeout
    Hang,
}

/// Scriptable ledger that counts every transfer it sees.
pub struct StubLedger {
    mode: LedgerMode,
    calls: AtomicUsize,
}

impl StubLedger {
    pub fn new(mode: LedgerMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for StubLedger {
    fn address(&self) -> Address {
        FAUCET_ADDRESS.parse().unwrap()
    }

    async fn balance(&self) -> Result<u128, LedgerError> {
        Ok(1_000 * 10u128.pow(18))
    }

    async fn transfer(&self, _to: &Address, _amount: u128) -> Result<TransferReceipt, LedgerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = format!("0x{:064x}", n);
        match self.mode {
            LedgerMode::Confirm => Ok(TransferReceipt::confirmed(reference)),
            LedgerMode::Revert => Ok(TransferReceipt::failed(reference, "transaction reverted")),
            LedgerMode::Error => Err(LedgerError::Rpc("connection refused".to_string())),
            LedgerMode::Slow => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(TransferReceipt::confirmed(reference))
            }
            LedgerMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(TransferReceipt::confirmed(reference))
            }
        }
    }
}

/// Store whose every operation fails.
pub struct BrokenStore;

#[async_trait]
impl RateLimitStore for BrokenStore {
    async fn load(&self) -> Result<RateLimitState, StoreError> {
        Err(StoreError::Unavailable("disk on fire".to_string()))
    }

    async fn save(&self, _state: &RateLimitState) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk on fire".to_string()))
    }

    fn backend(&self) -> &'static str {
        "broken"
    }
}

pub fn test_config() -> FaucetConfig {
    FaucetConfig {
        private_key: Some(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string(),
        ),
        ..Default::default()
    }
}

pub struct Harness {
    pub service: Arc<FaucetService>,
    pub ledger: Arc<StubLedger>,
    pub store: Arc<dyn RateLimitStore>,
    pub clock: ManualClock,
}

pub fn harness(mode: LedgerMode) -> Harness {
    harness_with(test_config(), mode, Arc::new(MemoryStore::new()))
}

pub fn harness_with(
    config: FaucetConfig,
    mode: LedgerMode,
    store: Arc<dyn RateLimitStore>,
) -> Harness {
    init_test_logging();
    let ledger = Arc::new(StubLedger::new(mode));
    let clock = ManualClock::new(START_MS);
    let service = FaucetService::with_clock(
        config,
        store.clone(),
        ledger.clone(),
        Arc::new(clock.clone()),
    )
    .unwrap();

    Harness {
        service: Arc::new(service),
        ledger,
        store,
        clock,
    }
}

/// Deterministic distinct recipient
pub fn address(n: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0xaa;
    bytes[19] = n;
    Address::from_slice(&bytes).unwrap()
}
