use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;

use crate::asset::AssetType;
use crate::payment::PendingPayment;
use crate::store::AssetBook;

/// Per-asset mutable cell. Everything that must be serialized per asset
/// (the book and the single pending payment slot) lives behind one lock, so
/// a balance push can never interleave with a payment mutation for the same
/// asset. Different assets lock independently.
#[derive(Debug)]
pub struct AssetCell {
    pub book: AssetBook,
    pub pending: Option<PendingPayment>,
}

/// Process-wide wallet state. Constructed on successful decrypt, torn down
/// on logout. Holds no persistence; hydration and save paths are external.
pub struct WalletState {
    cells: HashMap<AssetType, Mutex<AssetCell>>,
    revision: AtomicU64,
    /// Last-known fiat exchange rates per asset.
    rates: StdMutex<HashMap<AssetType, f64>>,
}

impl WalletState {
    pub fn new() -> Self {
        let cells = AssetType::ALL
            .iter()
            .map(|asset| {
                (
                    *asset,
                    Mutex::new(AssetCell {
                        book: AssetBook::new(*asset),
                        pending: None,
                    }),
                )
            })
            .collect();
        Self {
            cells,
            revision: AtomicU64::new(0),
            rates: StdMutex::new(HashMap::new()),
        }
    }

    /// The per-asset lock. Asset types are fixed at construction, so lookup
    /// cannot fail.
    pub fn cell(&self, asset: AssetType) -> &Mutex<AssetCell> {
        &self.cells[&asset]
    }

    /// Bump and return the store-wide revision. Called on every mutation;
    /// consumed only by outer layers for staleness detection.
    pub fn bump_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn set_rate(&self, asset: AssetType, rate: f64) {
        self.rates.lock().unwrap().insert(asset, rate);
    }

    pub fn rate(&self, asset: AssetType) -> Option<f64> {
        self.rates.lock().unwrap().get(&asset).copied()
    }
}

impl Default for WalletState {
    fn default() -> Self {
        Self::new()
    }
}
