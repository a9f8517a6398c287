use serde::{Deserialize, Serialize};

use crate::asset::AssetType;

/// Messages the channel sends to the balance server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { address: String, asset: AssetType },
    Unsubscribe { address: String, asset: AssetType },
}

/// Push notification for one subscribed address. `seq` is the server's
/// monotonic per-address sequence number; stale writes lose at the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub address: String,
    pub balance_delta: i64,
    pub tx_hash: String,
    pub seq: u64,
}

/// Connection lifecycle, observable through the channel's watch handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Subscribed,
    Receiving,
}
