//! Multi-asset HD wallet engine.
//!
//! The engine owns the wallet's in-memory account and address state, drives
//! asynchronous payment construction (regular send, priority send, sweep),
//! bridges to a pluggable deterministic crypto core for derivation and
//! signing, and keeps balances live through persistent per-asset channels.
//! Presentation layers, credential storage, and wallet-metadata persistence
//! sit outside this crate.
//!
//! Entry point is [`WalletEngine`]; asynchronous outcomes are reported
//! through [`events::WalletEvent`] listeners registered with
//! [`WalletEngine::subscribe_events`].

pub mod asset;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod events;
pub mod payment;
pub mod store;
pub mod sweep;

pub use asset::AssetType;
pub use config::EngineConfig;
pub use engine::WalletEngine;
pub use error::WalletError;
pub use events::{EventSink, WalletEvent};
pub use payment::{FeeType, PaymentState};
pub use store::{Account, Balance, LegacyAddress, StoreTarget};
pub use sweep::SweepReport;
