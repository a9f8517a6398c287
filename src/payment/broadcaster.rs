use async_trait::async_trait;

use crate::asset::AssetType;
use crate::crypto::SignedTx;
use crate::error::WalletError;

/// Network layer that pushes signed transactions out. The engine treats it
/// as an external collaborator: acceptance returns the network-assigned
/// transaction id, rejection surfaces as `Broadcast`.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, asset: AssetType, tx: &SignedTx) -> Result<String, WalletError>;
}
