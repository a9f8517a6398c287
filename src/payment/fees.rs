use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::asset::AssetType;
use crate::config::EngineConfig;
use crate::error::WalletError;

/// Fee priority selected by the caller. `Custom` carries an explicit rate in
/// fee units per size unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeType {
    Regular,
    Priority,
    Custom(u64),
}

/// Current network fee rates, seeded from config and refreshed at runtime
/// (the fee service feeding this is external to the engine).
pub struct FeeEstimator {
    default_regular: u64,
    default_priority: u64,
    per_asset: Mutex<HashMap<AssetType, (u64, u64)>>,
}

impl FeeEstimator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            default_regular: config.regular_fee_rate,
            default_priority: config.priority_fee_rate,
            per_asset: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the live (regular, priority) rates for one asset.
    pub fn update_rates(
        &self,
        asset: AssetType,
        regular: u64,
        priority: u64,
    ) -> Result<(), WalletError> {
        if regular == 0 || priority == 0 {
            return Err(WalletError::Validation("Fee rates must be positive".into()));
        }
        log::debug!(
            "Fee rates for {} updated: regular={} priority={}",
            asset,
            regular,
            priority
        );
        self.per_asset.lock().unwrap().insert(asset, (regular, priority));
        Ok(())
    }

    pub fn rate(&self, asset: AssetType, fee_type: FeeType) -> u64 {
        let (regular, priority) = self
            .per_asset
            .lock()
            .unwrap()
            .get(&asset)
            .copied()
            .unwrap_or((self.default_regular, self.default_priority));
        match fee_type {
            FeeType::Regular => regular,
            FeeType::Priority => priority,
            FeeType::Custom(rate) => rate,
        }
    }

    /// Fee for a typical single-destination spend: current rate times the
    /// asset's estimated transaction size.
    pub fn estimate(&self, asset: AssetType, fee_type: FeeType) -> Result<u64, WalletError> {
        let rate = self.rate(asset, fee_type);
        if rate == 0 {
            return Err(WalletError::Validation(
                "Custom fee rate must be positive".into(),
            ));
        }
        rate.checked_mul(asset.estimated_tx_size())
            .ok_or_else(|| WalletError::Validation("Fee computation overflow".into()))
    }
}
