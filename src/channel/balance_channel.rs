use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::asset::AssetType;
use crate::channel::{ChannelState, ChannelTransport, ClientMessage, PushMessage, TransportFactory};
use crate::config::EngineConfig;
use crate::error::WalletError;

/// Receives pushes the channel has read off the wire. Implemented by the
/// engine, which applies them to the store under the asset lock.
#[async_trait]
pub trait PushSink: Send + Sync {
    async fn apply(&self, asset: AssetType, push: PushMessage);
}

enum Command {
    Subscribe(String),
    Unsubscribe(String),
    Shutdown,
}

/// Handle to one asset's reconnecting balance channel. Subscribe and
/// unsubscribe enqueue a command and return immediately; the channel task
/// flushes them to the wire when connected.
pub struct BalanceChannel {
    asset: AssetType,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl BalanceChannel {
    pub fn spawn(
        asset: AssetType,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn PushSink>,
        config: &EngineConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);

        let runner = ChannelRunner {
            asset,
            factory,
            sink,
            commands: command_rx,
            state: state_tx,
            subscriptions: BTreeSet::new(),
            initial_backoff: config.reconnect_initial,
            backoff_cap: config.reconnect_cap,
        };
        let task = tokio::spawn(runner.run());

        Self {
            asset,
            commands: command_tx,
            state: state_rx,
            task,
        }
    }

    pub fn asset(&self) -> AssetType {
        self.asset
    }

    pub fn subscribe(&self, address: String) {
        let _ = self.commands.send(Command::Subscribe(address));
    }

    pub fn unsubscribe(&self, address: String) {
        let _ = self.commands.send(Command::Unsubscribe(address));
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch handle for state transitions, for callers that want to await
    /// `Subscribed` or observe drops.
    pub fn state_watch(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Stop the channel task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

struct ChannelRunner {
    asset: AssetType,
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn PushSink>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ChannelState>,
    subscriptions: BTreeSet<String>,
    initial_backoff: Duration,
    backoff_cap: Duration,
}

enum SessionEnd {
    Shutdown,
    TransportLost,
}

impl ChannelRunner {
    async fn run(mut self) {
        let mut backoff = self.initial_backoff;
        loop {
            self.set_state(ChannelState::Connecting);

            let transport = match self.factory.connect(self.asset).await {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("{} channel connect failed: {}", self.asset, e);
                    self.set_state(ChannelState::Disconnected);
                    if self.backoff_wait(backoff).await {
                        return;
                    }
                    backoff = (backoff * 2).min(self.backoff_cap);
                    continue;
                }
            };

            // Connected: a fresh session starts from the initial backoff.
            backoff = self.initial_backoff;

            match self.session(transport).await {
                SessionEnd::Shutdown => {
                    self.set_state(ChannelState::Disconnected);
                    return;
                }
                SessionEnd::TransportLost => {
                    self.set_state(ChannelState::Disconnected);
                    if self.backoff_wait(backoff).await {
                        return;
                    }
                    backoff = (backoff * 2).min(self.backoff_cap);
                }
            }
        }
    }

    /// One connected session: replay held subscriptions, then pump pushes
    /// and commands until the transport dies or we are told to stop.
    async fn session(&mut self, mut transport: Box<dyn ChannelTransport>) -> SessionEnd {
        // Subscriptions are not server-persisted across reconnects.
        for address in self.subscriptions.clone() {
            if let Err(e) = self.send_subscribe(&mut transport, &address).await {
                log::warn!("{} channel resubscribe failed: {}", self.asset, e);
                return SessionEnd::TransportLost;
            }
        }
        self.set_state(ChannelState::Subscribed);
        log::info!(
            "{} channel subscribed ({} addresses)",
            self.asset,
            self.subscriptions.len()
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Subscribe(address)) => {
                            if self.subscriptions.insert(address.clone()) {
                                if let Err(e) = self.send_subscribe(&mut transport, &address).await {
                                    log::warn!("{} channel subscribe failed: {}", self.asset, e);
                                    return SessionEnd::TransportLost;
                                }
                            }
                        }
                        Some(Command::Unsubscribe(address)) => {
                            if self.subscriptions.remove(&address) {
                                let message = ClientMessage::Unsubscribe {
                                    address,
                                    asset: self.asset,
                                };
                                if let Err(e) = transport.send(&message).await {
                                    log::warn!("{} channel unsubscribe failed: {}", self.asset, e);
                                    return SessionEnd::TransportLost;
                                }
                            }
                        }
                        Some(Command::Shutdown) | None => return SessionEnd::Shutdown,
                    }
                }
                push = transport.recv() => {
                    match push {
                        Ok(push) => {
                            self.set_state(ChannelState::Receiving);
                            self.sink.apply(self.asset, push).await;
                        }
                        Err(e) => {
                            log::warn!("{} channel transport lost: {}", self.asset, e);
                            return SessionEnd::TransportLost;
                        }
                    }
                }
            }
        }
    }

    async fn send_subscribe(
        &self,
        transport: &mut Box<dyn ChannelTransport>,
        address: &str,
    ) -> Result<(), WalletError> {
        transport
            .send(&ClientMessage::Subscribe {
                address: address.to_string(),
                asset: self.asset,
            })
            .await
    }

    /// Sleep out the backoff window while still accepting subscription
    /// bookkeeping and shutdown. Returns true when shutdown was requested.
    async fn backoff_wait(&mut self, backoff: Duration) -> bool {
        log::debug!("{} channel reconnecting in {:?}", self.asset, backoff);
        let sleep = tokio::time::sleep(backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Subscribe(address)) => {
                            self.subscriptions.insert(address);
                        }
                        Some(Command::Unsubscribe(address)) => {
                            self.subscriptions.remove(&address);
                        }
                        Some(Command::Shutdown) | None => return true,
                    }
                }
            }
        }
    }

    fn set_state(&self, state: ChannelState) {
        if *self.state.borrow() != state {
            log::debug!("{} channel state -> {:?}", self.asset, state);
            let _ = self.state.send(state);
        }
    }
}
