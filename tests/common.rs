//! Shared test infrastructure: an engine wired to the software crypto core
//! and controllable doubles for the broadcaster and the balance transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use wallet_engine::channel::{ChannelTransport, ClientMessage, PushMessage, TransportFactory};
use wallet_engine::crypto::{SignedTx, SoftwareCore};
use wallet_engine::payment::Broadcaster;
use wallet_engine::{AssetType, EngineConfig, WalletEngine, WalletError, WalletEvent};

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        reconnect_initial: Duration::from_millis(20),
        reconnect_cap: Duration::from_millis(100),
        operation_timeout: Duration::from_millis(500),
        ..EngineConfig::default()
    }
}

pub struct TestHarness {
    pub engine: WalletEngine,
    pub broadcaster: Arc<MockBroadcaster>,
    pub crypto: Arc<SoftwareCore>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_second_password(None)
    }

    pub fn with_second_password(second_password: Option<&str>) -> Self {
        init_logging();
        let mnemonic = bip39::Mnemonic::parse(TEST_MNEMONIC).unwrap();
        let crypto = Arc::new(SoftwareCore::new(
            mnemonic,
            bitcoin::Network::Bitcoin,
            second_password.map(String::from),
        ));
        let broadcaster = Arc::new(MockBroadcaster::new());
        let engine = WalletEngine::new(test_config(), crypto.clone(), broadcaster.clone());
        Self {
            engine,
            broadcaster,
            crypto,
        }
    }

    /// Create an account and seed its cached balance.
    pub async fn funded_account(
        &self,
        asset: AssetType,
        label: &str,
        balance: u64,
    ) -> wallet_engine::Account {
        let account = self.engine.create_account(asset, label).await.unwrap();
        self.engine
            .apply_balance_fetch(asset, &account.receive_address, balance, 1)
            .await
            .unwrap();
        account
    }

    /// Import a spendable legacy address backed by a throwaway signing key
    /// and seed its cached balance.
    pub async fn import_funded(&self, asset: AssetType, address: &str, balance: u64, seq: u64) {
        self.engine
            .import_legacy_address(asset, address, "imported", false)
            .await
            .unwrap();
        self.crypto.register_imported_key(
            address,
            bitcoin::secp256k1::SecretKey::from_slice(&[0x42; 32]).unwrap(),
        );
        self.engine
            .apply_balance_fetch(asset, address, balance, seq)
            .await
            .unwrap();
    }
}

/// Wait for the next event accepted by `pred`, discarding others.
pub async fn expect_event<F>(
    rx: &mut mpsc::UnboundedReceiver<WalletEvent>,
    mut pred: F,
) -> WalletEvent
where
    F: FnMut(&WalletEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ============================================================================
// Broadcaster double
// ============================================================================

pub enum BroadcastBehavior {
    Accept,
    Reject(String),
    Delay(Duration),
}

pub struct MockBroadcaster {
    queued: Mutex<VecDeque<BroadcastBehavior>>,
    calls: AtomicUsize,
    pub accepted: Mutex<Vec<(AssetType, String)>>,
}

impl MockBroadcaster {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// Queue a behavior for an upcoming call; unqueued calls accept.
    pub fn queue(&self, behavior: BroadcastBehavior) {
        self.queued.lock().unwrap().push_back(behavior);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broadcaster for MockBroadcaster {
    async fn broadcast(&self, asset: AssetType, tx: &SignedTx) -> Result<String, WalletError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(BroadcastBehavior::Accept);
        match behavior {
            BroadcastBehavior::Accept => {
                let txid = format!("{}-{}", tx.tx_hash, call);
                self.accepted.lock().unwrap().push((asset, txid.clone()));
                Ok(txid)
            }
            BroadcastBehavior::Reject(reason) => Err(WalletError::Broadcast(reason)),
            BroadcastBehavior::Delay(duration) => {
                tokio::time::sleep(duration).await;
                let txid = format!("{}-{}", tx.tx_hash, call);
                self.accepted.lock().unwrap().push((asset, txid.clone()));
                Ok(txid)
            }
        }
    }
}

// ============================================================================
// Balance transport double
// ============================================================================

struct MockNetInner {
    sent: Mutex<Vec<ClientMessage>>,
    push_tx: Mutex<Option<mpsc::UnboundedSender<PushMessage>>>,
    connects: AtomicUsize,
    fail_connects: AtomicUsize,
}

/// Server side of a mock balance connection. Lets tests feed pushes,
/// inspect what the channel sent, and kill the connection to force a
/// reconnect.
#[derive(Clone)]
pub struct MockNet {
    inner: Arc<MockNetInner>,
}

impl MockNet {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockNetInner {
                sent: Mutex::new(Vec::new()),
                push_tx: Mutex::new(None),
                connects: AtomicUsize::new(0),
                fail_connects: AtomicUsize::new(0),
            }),
        }
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> Vec<ClientMessage> {
        self.inner.sent.lock().unwrap().clone()
    }

    pub fn clear_sent(&self) {
        self.inner.sent.lock().unwrap().clear();
    }

    /// Deliver a push on the current connection. Panics when disconnected.
    pub fn push(&self, push: PushMessage) {
        self.inner
            .push_tx
            .lock()
            .unwrap()
            .as_ref()
            .expect("no live connection")
            .send(push)
            .expect("connection receiver dropped");
    }

    /// Sever the current connection; the channel sees a transport error.
    pub fn drop_connection(&self) {
        *self.inner.push_tx.lock().unwrap() = None;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.push_tx.lock().unwrap().is_some()
    }

    /// Wait until the channel has subscribed `count` addresses on the
    /// current connection.
    pub async fn wait_for_subscriptions(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let subs = self
                    .sent_messages()
                    .iter()
                    .filter(|m| matches!(m, ClientMessage::Subscribe { .. }))
                    .count();
                if subs >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for subscriptions");
    }
}

struct MockTransport {
    net: Arc<MockNetInner>,
    push_rx: mpsc::UnboundedReceiver<PushMessage>,
}

#[async_trait]
impl ChannelTransport for MockTransport {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), WalletError> {
        self.net.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn recv(&mut self) -> Result<PushMessage, WalletError> {
        self.push_rx
            .recv()
            .await
            .ok_or_else(|| WalletError::Transport("connection closed".into()))
    }
}

#[async_trait]
impl TransportFactory for MockNet {
    async fn connect(
        &self,
        _asset: AssetType,
    ) -> Result<Box<dyn ChannelTransport>, WalletError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let failures = self.inner.fail_connects.load(Ordering::SeqCst);
        if failures > 0 {
            self.inner.fail_connects.store(failures - 1, Ordering::SeqCst);
            return Err(WalletError::Transport("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.push_tx.lock().unwrap() = Some(tx);
        Ok(Box::new(MockTransport {
            net: self.inner.clone(),
            push_rx: rx,
        }))
    }
}
