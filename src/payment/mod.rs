//! Payment construction and signing workflow.
//!
//! A payment lives in its asset's `AssetCell` as the single pending payment
//! for that asset; the engine serializes every mutation behind the asset
//! lock. The types here are pure state-machine bookkeeping; derivation,
//! signing, and broadcast are performed by the engine through the
//! `CryptoCore` and `Broadcaster` seams.

mod broadcaster;
mod builder;
mod fees;

pub use broadcaster::Broadcaster;
pub use builder::{PaymentState, PendingPayment};
pub use fees::{FeeEstimator, FeeType};
