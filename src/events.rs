//! Engine notification surface.
//!
//! Every asynchronous outcome the engine produces is reported as a tagged
//! `WalletEvent` fanned out to all registered listeners. Listeners receive
//! events through unbounded channels so emission never blocks the engine's
//! state-mutation path; a listener that drops its receiver is pruned on the
//! next emit.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::asset::AssetType;
use crate::channel::ChannelState;
use crate::store::StoreTarget;

/// Outcome of a single swept address, carried in the sweep report.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub address: String,
    pub swept: u64,
    pub fee: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum WalletEvent {
    /// An account or legacy address balance changed (push, fetch, or
    /// optimistic decrement after broadcast).
    BalanceChanged {
        asset: AssetType,
        target: StoreTarget,
        balance: u64,
    },
    /// Account created, relabeled, archived, or default flag moved.
    AccountsChanged { asset: AssetType },
    /// A live balance channel moved to a new connection state.
    ChannelStateChanged {
        asset: AssetType,
        state: ChannelState,
    },
    /// A payment reached a terminal success state.
    PaymentSucceeded {
        asset: AssetType,
        tx_hash: String,
        amount: u64,
        fee: u64,
    },
    /// A payment failed; `reason` carries the rendered error.
    PaymentFailed {
        asset: AssetType,
        operation: &'static str,
        reason: String,
    },
    /// Sweep progress: one address finished (either way).
    SweepProgress {
        asset: AssetType,
        outcome: SweepOutcome,
        remaining: usize,
    },
    /// Sweep session finished, possibly with partial failures.
    SweepCompleted {
        asset: AssetType,
        total_swept: u64,
        total_fees: u64,
        outcomes: Vec<SweepOutcome>,
    },
    /// An operation needs a second password (or got a wrong one).
    AuthenticationRequired {
        asset: AssetType,
        operation: &'static str,
    },
    /// Push received for an address the store does not know. Non-fatal.
    UnknownAddressPush { asset: AssetType, address: String },
    /// The recovery-phrase backup verification state changed.
    RecoveryPhraseVerified { verified: bool, at: DateTime<Utc> },
}

/// Fan-out sink for `WalletEvent`s.
#[derive(Default)]
pub struct EventSink {
    listeners: Mutex<Vec<mpsc::UnboundedSender<WalletEvent>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. The receiver gets every event emitted after this
    /// call; dropping it unregisters the listener.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<WalletEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().unwrap().push(tx);
        rx
    }

    pub fn emit(&self, event: WalletEvent) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}
