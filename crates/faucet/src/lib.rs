//! Abuse-resistant testnet faucet
//!
//! Dispenses a fixed amount of the native asset to a caller-supplied address,
//! gated by layered rate limits keyed on destination address and client IP:
//! - Temporary IP blocks after request bursts
//! - Address and IP cooldowns after each successful dispense
//! - A per-IP daily cap
//!
//! Tracking state is a single snapshot document persisted through a
//! [`store::RateLimitStore`]; the transfer itself goes through a
//! [`ledger::LedgerClient`].

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod policy;
pub mod service;
pub mod store;
pub mod throttle;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FaucetConfig, PolicyConfig, StoreBackend};
pub use error::{FaucetError, FaucetResult, LedgerError, StoreError};
pub use ledger::{JsonRpcLedgerClient, LedgerClient, TransferReceipt, TransferStatus};
pub use policy::{evaluate, Decision, DenyReason, Denial};
pub use service::{DispenseResult, FaucetService, FaucetStatus};
pub use store::{RateLimitState, RateLimitStore};
