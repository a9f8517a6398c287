//! Supported asset types and per-asset validation rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// Assets the engine tracks. Each asset keeps fully independent state and
/// its own live balance channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Bitcoin,
    BitcoinCash,
    Ethereum,
}

impl AssetType {
    pub const ALL: [AssetType; 3] = [
        AssetType::Bitcoin,
        AssetType::BitcoinCash,
        AssetType::Ethereum,
    ];

    /// BIP44 coin type used for HD derivation paths.
    pub fn coin_type(&self) -> u32 {
        match self {
            AssetType::Bitcoin => 0,
            AssetType::BitcoinCash => 145,
            AssetType::Ethereum => 60,
        }
    }

    /// Smallest unit name, for log and error messages.
    pub fn unit(&self) -> &'static str {
        match self {
            AssetType::Bitcoin | AssetType::BitcoinCash => "sats",
            AssetType::Ethereum => "wei",
        }
    }

    /// Largest representable amount in base units. Bitcoin-family assets are
    /// capped at total issuance; Ethereum amounts use the full u64 range.
    pub fn max_amount(&self) -> u64 {
        match self {
            AssetType::Bitcoin | AssetType::BitcoinCash => 21_000_000 * 100_000_000,
            AssetType::Ethereum => u64::MAX,
        }
    }

    /// Protocol dust threshold in base units. Outputs below this are never
    /// economically spendable and are rejected rather than silently dropped.
    pub fn dust_threshold(&self) -> u64 {
        match self {
            AssetType::Bitcoin | AssetType::BitcoinCash => 546,
            // Ethereum has no protocol dust rule; any positive amount is valid.
            AssetType::Ethereum => 0,
        }
    }

    /// Estimated transaction size in fee units (vbytes for UTXO chains, a
    /// fixed gas figure for Ethereum) for a typical 1-in/2-out spend.
    pub fn estimated_tx_size(&self) -> u64 {
        match self {
            AssetType::Bitcoin | AssetType::BitcoinCash => 250,
            AssetType::Ethereum => 21_000,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetType::Bitcoin => write!(f, "bitcoin"),
            AssetType::BitcoinCash => write!(f, "bitcoin-cash"),
            AssetType::Ethereum => write!(f, "ethereum"),
        }
    }
}

impl FromStr for AssetType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(AssetType::Bitcoin),
            "bitcoin-cash" | "bch" => Ok(AssetType::BitcoinCash),
            "ethereum" | "eth" => Ok(AssetType::Ethereum),
            other => Err(WalletError::Validation(format!(
                "Unknown asset type: {}",
                other
            ))),
        }
    }
}

/// Validate a destination address for the given asset.
///
/// Bitcoin addresses are parsed with the `bitcoin` crate against the
/// configured network. Bitcoin Cash accepts CashAddr strings (optionally
/// `bitcoincash:`-prefixed) or base58 legacy addresses. Ethereum addresses
/// are `0x` + 40 hex characters.
pub fn validate_address(
    asset: AssetType,
    address: &str,
    network: bitcoin::Network,
) -> Result<(), WalletError> {
    if address.is_empty() {
        return Err(WalletError::Validation("Empty destination address".into()));
    }
    match asset {
        AssetType::Bitcoin => {
            bitcoin::Address::from_str(address)
                .map_err(|e| WalletError::Validation(format!("Invalid address: {}", e)))?
                .require_network(network)
                .map_err(|e| {
                    WalletError::Validation(format!("Address network mismatch: {}", e))
                })?;
            Ok(())
        }
        AssetType::BitcoinCash => validate_cashaddr(address),
        AssetType::Ethereum => validate_eth_address(address),
    }
}

// CashAddr charset per the Bitcoin Cash address spec.
const CASHADDR_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

fn validate_cashaddr(address: &str) -> Result<(), WalletError> {
    let body = address.strip_prefix("bitcoincash:").unwrap_or(address);

    // Legacy base58 addresses are still accepted for Bitcoin Cash.
    if body.starts_with('1') || body.starts_with('3') {
        return match bitcoin::Address::from_str(body) {
            Ok(_) => Ok(()),
            Err(e) => Err(WalletError::Validation(format!(
                "Invalid legacy address: {}",
                e
            ))),
        };
    }

    if body.len() != 42 {
        return Err(WalletError::Validation(format!(
            "Invalid CashAddr length: {}",
            body.len()
        )));
    }
    if let Some(bad) = body.chars().find(|c| !CASHADDR_CHARSET.contains(*c)) {
        return Err(WalletError::Validation(format!(
            "Invalid CashAddr character: {}",
            bad
        )));
    }
    Ok(())
}

fn validate_eth_address(address: &str) -> Result<(), WalletError> {
    let hex_part = address
        .strip_prefix("0x")
        .ok_or_else(|| WalletError::Validation("Ethereum address must start with 0x".into()))?;
    if hex_part.len() != 40 {
        return Err(WalletError::Validation(format!(
            "Ethereum address must be 40 hex chars, got {}",
            hex_part.len()
        )));
    }
    hex::decode(hex_part)
        .map_err(|e| WalletError::Validation(format!("Invalid Ethereum address hex: {}", e)))?;
    Ok(())
}
