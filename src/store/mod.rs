//! In-memory wallet state: HD accounts, imported legacy addresses, cached
//! balances, and the bookkeeping invariants between them.
//!
//! The store performs no I/O. Balances are cached values refreshed by the
//! live balance channel or an explicit fetch; every mutation bumps the
//! store-wide revision counter so outer layers can detect staleness.

mod book;
mod state;

pub use book::{validate_label, AssetBook, Balance};
pub use state::{AssetCell, WalletState};

use serde::{Deserialize, Serialize};

use crate::asset::AssetType;

/// Identifies a balance-holding entry in one asset's book.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreTarget {
    /// HD account by stable index.
    Account(u32),
    /// Imported address by its address string.
    Legacy(String),
}

impl std::fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreTarget::Account(index) => write!(f, "account #{}", index),
            StoreTarget::Legacy(address) => write!(f, "address {}", address),
        }
    }
}

/// HD account. The index is assigned at creation and never reused; the
/// derivation path is fixed once minted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub index: u32,
    pub asset: AssetType,
    pub label: String,
    pub archived: bool,
    pub is_default: bool,
    pub derivation_path: String,
    pub receive_address: String,
    pub balance: u64,
}

/// Imported (non-HD) address. The address string is its identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyAddress {
    pub address: String,
    pub asset: AssetType,
    pub label: String,
    pub archived: bool,
    pub watch_only: bool,
    pub balance: u64,
}
