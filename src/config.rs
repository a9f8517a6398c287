//! Engine configuration from environment variables.
//!
//! Controls Bitcoin network type, fee rate defaults, channel reconnect
//! backoff bounds, and validation limits. Defaults are suitable for tests
//! and for mainnet-shaped unit accounting.

use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Bitcoin network used for address validation.
    pub bitcoin_network: bitcoin::Network,
    /// Default fee rate for `FeeType::Regular`, in fee units per size unit.
    pub regular_fee_rate: u64,
    /// Default fee rate for `FeeType::Priority`.
    pub priority_fee_rate: u64,
    /// Initial delay before a channel reconnect attempt.
    pub reconnect_initial: Duration,
    /// Upper bound on the reconnect delay; backoff doubles up to this cap.
    pub reconnect_cap: Duration,
    /// Timeout applied to Crypto Core and broadcast calls.
    pub operation_timeout: Duration,
    /// Maximum account / address label length.
    pub max_label_len: usize,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// - `BITCOIN_NETWORK`: "bitcoin" (default), "testnet", "signet" or "regtest"
    /// - `FEE_RATE_REGULAR` / `FEE_RATE_PRIORITY`: fee units per size unit
    /// - `RECONNECT_INITIAL_MS` / `RECONNECT_CAP_MS`: backoff bounds
    /// - `OPERATION_TIMEOUT_MS`: crypto/broadcast timeout
    pub fn from_env() -> Self {
        let network_str = env::var("BITCOIN_NETWORK")
            .unwrap_or_else(|_| "bitcoin".to_string())
            .to_lowercase();

        let bitcoin_network = match network_str.as_str() {
            "testnet" => bitcoin::Network::Testnet,
            "signet" => bitcoin::Network::Signet,
            "regtest" => bitcoin::Network::Regtest,
            "bitcoin" | "mainnet" | "" => bitcoin::Network::Bitcoin,
            other => {
                log::warn!("Unknown network '{}', defaulting to mainnet", other);
                bitcoin::Network::Bitcoin
            }
        };

        let defaults = EngineConfig::default();

        Self {
            bitcoin_network,
            regular_fee_rate: env_u64("FEE_RATE_REGULAR", defaults.regular_fee_rate),
            priority_fee_rate: env_u64("FEE_RATE_PRIORITY", defaults.priority_fee_rate),
            reconnect_initial: Duration::from_millis(env_u64(
                "RECONNECT_INITIAL_MS",
                defaults.reconnect_initial.as_millis() as u64,
            )),
            reconnect_cap: Duration::from_millis(env_u64(
                "RECONNECT_CAP_MS",
                defaults.reconnect_cap.as_millis() as u64,
            )),
            operation_timeout: Duration::from_millis(env_u64(
                "OPERATION_TIMEOUT_MS",
                defaults.operation_timeout.as_millis() as u64,
            )),
            max_label_len: defaults.max_label_len,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            log::warn!("Invalid value for {}: '{}', using {}", key, v, default);
            default
        }),
        Err(_) => default,
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bitcoin_network: bitcoin::Network::Bitcoin,
            regular_fee_rate: 5,
            priority_fee_rate: 20,
            reconnect_initial: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(30),
            max_label_len: 64,
        }
    }
}
