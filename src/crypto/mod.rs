//! Deterministic cryptographic subsystem contract.
//!
//! The engine never touches key material directly; it asks a `CryptoCore`
//! for derivation handles and signatures. The trait is object-safe so tests
//! can substitute doubles, and all methods are async because a real core may
//! live behind an IPC or hardware boundary.

mod software;

pub use software::SoftwareCore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::asset::AssetType;
use crate::error::WalletError;

/// Opaque reference to derived key material. Holds no secrets itself; the
/// core resolves it back to a key when signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterialHandle {
    pub asset: AssetType,
    pub account_index: u32,
    /// Derivation path the handle was minted for, e.g. `m/44'/0'/3'`.
    pub derivation_path: String,
    /// Receive address for the derived account.
    pub receive_address: String,
}

impl KeyMaterialHandle {
    /// Handle for an imported (non-HD) address. The core resolves these
    /// against its imported-key store rather than the seed.
    pub fn imported(asset: AssetType, address: &str) -> Self {
        Self {
            asset,
            account_index: 0,
            derivation_path: "imported".to_string(),
            receive_address: address.to_string(),
        }
    }

    pub fn is_imported(&self) -> bool {
        self.derivation_path == "imported"
    }
}

/// Transaction payload handed to the core for signing. The engine treats the
/// serialized form as opaque; per-asset encoding is the core's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedTx {
    pub asset: AssetType,
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub fee: u64,
}

/// Signed transaction blob plus its hash, ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub raw_hex: String,
    pub tx_hash: String,
}

#[async_trait]
pub trait CryptoCore: Send + Sync {
    /// Derive (or re-derive) key material for an account index. Fails with
    /// `DerivationError` when the wallet seed is unavailable.
    async fn derive_account(
        &self,
        asset: AssetType,
        index: u32,
    ) -> Result<KeyMaterialHandle, WalletError>;

    /// Sign a transaction. When the wallet is second-password protected, a
    /// missing or wrong password fails with `AuthenticationError` and must
    /// leave no trace; the caller may retry with a corrected credential.
    async fn sign(
        &self,
        tx: &UnsignedTx,
        key: &KeyMaterialHandle,
        second_password: Option<&str>,
    ) -> Result<SignedTx, WalletError>;

    /// Reveal the mnemonic backup phrase, gated by the second password when
    /// one is set. Returns `None` for watch-only or externally held seeds.
    async fn mnemonic(&self, second_password: Option<&str>) -> Result<Option<String>, WalletError>;

    /// Check a supplied second password without touching key material.
    /// Always succeeds when the wallet carries no second password.
    async fn verify_second_password(
        &self,
        second_password: Option<&str>,
    ) -> Result<(), WalletError>;

    /// Whether a second password is required for signing and phrase access.
    fn requires_second_password(&self) -> bool;
}
