//! Live balance channel: one persistent connection per asset pushing
//! balance deltas for subscribed addresses.
//!
//! The connection itself is behind the `ChannelTransport` trait; this module
//! owns the generic reconnecting state machine: subscription bookkeeping,
//! bounded exponential backoff, and resubscription after reconnect, which
//! the server does not persist.

mod balance_channel;
mod transport;
mod wire;

pub use balance_channel::{BalanceChannel, PushSink};
pub use transport::{ChannelTransport, TransportFactory};
pub use wire::{ChannelState, ClientMessage, PushMessage};
