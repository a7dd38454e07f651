//! Shared building blocks for the Drip faucet workspace.

pub mod error;
pub mod types;
pub mod utils;

pub use error::{CommonError, Result};
pub use types::{Address, ADDRESS_LENGTH};
