//! Ledger client seam: submits a value transfer and reports the outcome.

mod rpc;

pub use rpc::JsonRpcLedgerClient;

use crate::error::LedgerError;
use async_trait::async_trait;
use drip_common::Address;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Confirmed,
    Failed,
}

/// Outcome of a transfer that reached the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub status: TransferStatus,
    /// Transaction hash
    pub reference: String,
    pub error_detail: Option<String>,
}

impl TransferReceipt {
    pub fn confirmed(reference: impl Into<String>) -> Self {
        Self {
            status: TransferStatus::Confirmed,
            reference: reference.into(),
            error_detail: None,
        }
    }

    pub fn failed(reference: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status: TransferStatus::Failed,
            reference: reference.into(),
            error_detail: Some(detail.into()),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TransferStatus::Confirmed
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Account the faucet pays from
    fn address(&self) -> Address;

    /// Spendable balance in wei
    async fn balance(&self) -> Result<u128, LedgerError>;

    /// Sends `amount` wei to `to` and waits until the transfer is confirmed
    /// or known to have failed. `Err` means the outcome could not be
    /// established (submission or RPC failure).
    async fn transfer(&self, to: &Address, amount: u128) -> Result<TransferReceipt, LedgerError>;
}
