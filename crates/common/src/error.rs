use thiserror::Error;

/// Errors raised by the shared primitives
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Address did not match `0x` followed by 40 hex digits
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Decimal amount could not be converted to base units
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CommonError>;
