use thiserror::Error;

use crate::asset::AssetType;

/// Engine-wide error taxonomy.
///
/// Every fallible engine operation returns one of these. Failures on the
/// asynchronous payment path are additionally mirrored to the event sink
/// with asset and operation context so callers can decide on retry; the
/// engine itself never retries signing or broadcast.
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Output below dust threshold: {amount} < {dust_threshold}")]
    Dust { amount: u64, dust_threshold: u64 },

    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Conflicting operation in flight for {asset}: {reason}")]
    Conflict { asset: AssetType, reason: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Cannot cancel: {0}")]
    Irreversible(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Broadcast rejected: {0}")]
    Broadcast(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
