use async_trait::async_trait;

use crate::asset::AssetType;
use crate::channel::{ClientMessage, PushMessage};
use crate::error::WalletError;

/// One live connection to a balance server. Implementations frame and ship
/// the serde wire messages however their transport requires; the channel
/// state machine only sees send/recv.
#[async_trait]
pub trait ChannelTransport: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), WalletError>;

    /// Next push from the server. An error means the connection is dead and
    /// the channel should reconnect.
    async fn recv(&mut self) -> Result<PushMessage, WalletError>;
}

/// Dials a fresh connection for an asset. Called on every reconnect attempt.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, asset: AssetType) -> Result<Box<dyn ChannelTransport>, WalletError>;
}
