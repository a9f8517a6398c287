//! In-process `CryptoCore` backed by a BIP39 mnemonic.
//!
//! Derives per-asset account keys along BIP44 paths (`m/44'/coin'/index'`)
//! with `bitcoin::bip32`, and signs ECDSA over a SHA-256 digest of the
//! serialized transaction payload. The optional second password gates every
//! operation that touches key material.

use async_trait::async_trait;
use bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::{CompressedPublicKey, Network, PublicKey};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use crate::asset::AssetType;
use crate::crypto::{CryptoCore, KeyMaterialHandle, SignedTx, UnsignedTx};
use crate::error::WalletError;

pub struct SoftwareCore {
    mnemonic: Mnemonic,
    network: Network,
    second_password: Option<String>,
    /// Private keys for imported (non-HD) addresses, keyed by address.
    imported: Mutex<HashMap<String, SecretKey>>,
}

impl SoftwareCore {
    pub fn new(mnemonic: Mnemonic, network: Network, second_password: Option<String>) -> Self {
        Self {
            mnemonic,
            network,
            second_password,
            imported: Mutex::new(HashMap::new()),
        }
    }

    /// Register the private key backing an imported address. Signing for an
    /// imported address without a registered key fails; imported addresses
    /// are outside the seed and cannot be re-derived.
    pub fn register_imported_key(&self, address: &str, key: SecretKey) {
        self.imported.lock().unwrap().insert(address.to_string(), key);
    }

    /// Create a brand-new wallet with a random 12-word recovery phrase.
    pub fn generate(
        network: Network,
        second_password: Option<String>,
    ) -> Result<Self, WalletError> {
        let mnemonic = Mnemonic::generate(12)
            .map_err(|e| WalletError::Derivation(format!("Could not generate mnemonic: {}", e)))?;
        Ok(Self::new(mnemonic, network, second_password))
    }

    /// Restore from an existing recovery phrase.
    pub fn restore(
        phrase: &str,
        network: Network,
        second_password: Option<String>,
    ) -> Result<Self, WalletError> {
        let mnemonic = Mnemonic::parse(phrase)
            .map_err(|e| WalletError::Validation(format!("Invalid recovery phrase: {}", e)))?;
        Ok(Self::new(mnemonic, network, second_password))
    }

    fn check_second_password(
        &self,
        supplied: Option<&str>,
        operation: &str,
    ) -> Result<(), WalletError> {
        match (&self.second_password, supplied) {
            (None, _) => Ok(()),
            (Some(expected), Some(got)) if expected == got => Ok(()),
            (Some(_), Some(_)) => Err(WalletError::Authentication(format!(
                "Wrong second password for {}",
                operation
            ))),
            (Some(_), None) => Err(WalletError::Authentication(format!(
                "Second password required for {}",
                operation
            ))),
        }
    }

    fn derive_key(&self, asset: AssetType, index: u32) -> Result<(SecretKey, String), WalletError> {
        let seed = self.mnemonic.to_seed("");
        let secp = Secp256k1::new();

        let master = Xpriv::new_master(self.network, &seed)
            .map_err(|e| WalletError::Derivation(format!("Master key derivation: {}", e)))?;

        let path_str = format!("m/44'/{}'/{}'", asset.coin_type(), index);
        let path = DerivationPath::from_str(&path_str)
            .map_err(|e| WalletError::Derivation(format!("Bad derivation path: {}", e)))?;
        let derived = master
            .derive_priv(&secp, &path)
            .map_err(|e| WalletError::Derivation(format!("Path {}: {}", path_str, e)))?;

        Ok((derived.private_key, path_str))
    }

    fn receive_address(&self, asset: AssetType, key: &SecretKey) -> Result<String, WalletError> {
        let secp = Secp256k1::new();
        let pubkey = key.public_key(&secp);

        match asset {
            AssetType::Bitcoin => {
                let compressed = CompressedPublicKey(pubkey);
                Ok(bitcoin::Address::p2wpkh(&compressed, self.network).to_string())
            }
            AssetType::BitcoinCash => {
                // Legacy base58 form; CashAddr re-encoding is the UI's concern.
                let btc_pubkey = PublicKey::new(pubkey);
                Ok(bitcoin::Address::p2pkh(btc_pubkey.pubkey_hash(), Network::Bitcoin).to_string())
            }
            AssetType::Ethereum => {
                let uncompressed = pubkey.serialize_uncompressed();
                let digest = Keccak256::digest(&uncompressed[1..]);
                Ok(format!("0x{}", hex::encode(&digest[12..])))
            }
        }
    }
}

#[async_trait]
impl CryptoCore for SoftwareCore {
    async fn derive_account(
        &self,
        asset: AssetType,
        index: u32,
    ) -> Result<KeyMaterialHandle, WalletError> {
        let (key, derivation_path) = self.derive_key(asset, index)?;
        let receive_address = self.receive_address(asset, &key)?;

        log::debug!(
            "Derived {} account {} at {}",
            asset,
            index,
            derivation_path
        );

        Ok(KeyMaterialHandle {
            asset,
            account_index: index,
            derivation_path,
            receive_address,
        })
    }

    async fn sign(
        &self,
        tx: &UnsignedTx,
        key: &KeyMaterialHandle,
        second_password: Option<&str>,
    ) -> Result<SignedTx, WalletError> {
        self.check_second_password(second_password, "sign")?;

        let secret = if key.is_imported() {
            self.imported
                .lock()
                .unwrap()
                .get(&key.receive_address)
                .copied()
                .ok_or_else(|| {
                    WalletError::Derivation(format!(
                        "No imported key registered for {}",
                        key.receive_address
                    ))
                })?
        } else {
            self.derive_key(key.asset, key.account_index)?.0
        };
        let secp = Secp256k1::new();

        let payload = serde_json::to_vec(tx)
            .map_err(|e| WalletError::Internal(format!("Tx serialization: {}", e)))?;
        let digest: [u8; 32] = Sha256::digest(&payload).into();

        let message = Message::from_digest(digest);
        let signature = secp.sign_ecdsa(&message, &secret);

        let mut raw = payload;
        raw.extend_from_slice(&signature.serialize_compact());
        let tx_hash = hex::encode(bitcoin::hashes::sha256d::Hash::hash(&raw).to_byte_array());

        Ok(SignedTx {
            raw_hex: hex::encode(raw),
            tx_hash,
        })
    }

    async fn mnemonic(&self, second_password: Option<&str>) -> Result<Option<String>, WalletError> {
        self.check_second_password(second_password, "mnemonic")?;
        Ok(Some(self.mnemonic.to_string()))
    }

    async fn verify_second_password(
        &self,
        second_password: Option<&str>,
    ) -> Result<(), WalletError> {
        self.check_second_password(second_password, "verify")
    }

    fn requires_second_password(&self) -> bool {
        self.second_password.is_some()
    }
}
