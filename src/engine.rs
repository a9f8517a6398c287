//! Engine facade: owns the wallet state and coordinates every operation.
//!
//! All mutations of one asset's book and pending payment go through that
//! asset's cell lock, including balance pushes arriving from the live
//! channels. A push and a payment mutation for the same asset can never
//! interleave. Different assets proceed fully in parallel. Crypto Core and
//! broadcast calls are raced against the configured operation timeout so no
//! caller blocks indefinitely.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::asset::{validate_address, AssetType};
use crate::channel::{BalanceChannel, ChannelState, PushMessage, PushSink, TransportFactory};
use crate::config::EngineConfig;
use crate::crypto::{CryptoCore, KeyMaterialHandle, SignedTx};
use crate::error::WalletError;
use crate::events::{EventSink, WalletEvent};
use crate::payment::{Broadcaster, FeeEstimator, FeeType, PaymentState, PendingPayment};
use crate::store::{validate_label, Account, Balance, LegacyAddress, StoreTarget, WalletState};
use crate::sweep::{self, SweepReport};

pub struct WalletEngine {
    pub(crate) shared: Arc<EngineShared>,
    channels: StdMutex<HashMap<AssetType, BalanceChannel>>,
}

pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) state: WalletState,
    pub(crate) fees: FeeEstimator,
    pub(crate) events: EventSink,
    pub(crate) crypto: Arc<dyn CryptoCore>,
    pub(crate) broadcaster: Arc<dyn Broadcaster>,
}

impl WalletEngine {
    pub fn new(
        config: EngineConfig,
        crypto: Arc<dyn CryptoCore>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let fees = FeeEstimator::new(&config);
        Self {
            shared: Arc::new(EngineShared {
                config,
                state: WalletState::new(),
                fees,
                events: EventSink::new(),
                crypto,
                broadcaster,
            }),
            channels: StdMutex::new(HashMap::new()),
        }
    }

    /// Register an event listener. See [`EventSink::subscribe`].
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<WalletEvent> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Store-wide revision counter for staleness detection by outer layers.
    pub fn revision(&self) -> u64 {
        self.shared.state.revision()
    }

    // ============================================================================
    // Accounts & addresses
    // ============================================================================

    /// Create the next HD account for an asset. The index comes from the
    /// book's monotonic counter; the Crypto Core mints the key material.
    pub async fn create_account(
        &self,
        asset: AssetType,
        label: &str,
    ) -> Result<Account, WalletError> {
        validate_label(label, self.shared.config.max_label_len)?;

        let mut cell = self.shared.state.cell(asset).lock().await;
        let index = cell.book.next_account_index();

        let handle = self
            .with_timeout("derive account", self.shared.crypto.derive_account(asset, index))
            .await?;

        let account = cell
            .book
            .add_account(
                index,
                label.to_string(),
                handle.derivation_path,
                handle.receive_address.clone(),
            )?
            .clone();
        drop(cell);

        self.shared.state.bump_revision();
        self.subscribe_if_attached(asset, handle.receive_address);
        self.shared.events.emit(WalletEvent::AccountsChanged { asset });
        log::info!("Created {} account #{} ({})", asset, index, label);
        Ok(account)
    }

    pub async fn accounts(&self, asset: AssetType) -> Vec<Account> {
        self.shared.state.cell(asset).lock().await.book.accounts().to_vec()
    }

    pub async fn legacy_addresses(&self, asset: AssetType) -> Vec<LegacyAddress> {
        self.shared
            .state
            .cell(asset)
            .lock()
            .await
            .book
            .legacy_addresses()
            .to_vec()
    }

    pub async fn set_label(
        &self,
        asset: AssetType,
        target: &StoreTarget,
        label: &str,
    ) -> Result<(), WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        cell.book
            .set_label(target, label, self.shared.config.max_label_len)?;
        drop(cell);
        self.shared.state.bump_revision();
        self.shared.events.emit(WalletEvent::AccountsChanged { asset });
        Ok(())
    }

    /// Flip the archived flag; returns the new value.
    pub async fn toggle_archive(
        &self,
        asset: AssetType,
        target: &StoreTarget,
    ) -> Result<bool, WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        let archived = cell.book.toggle_archive(target)?;
        drop(cell);
        self.shared.state.bump_revision();
        self.shared.events.emit(WalletEvent::AccountsChanged { asset });
        Ok(archived)
    }

    pub async fn set_default_account(
        &self,
        asset: AssetType,
        index: u32,
    ) -> Result<(), WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        cell.book.set_default_account(index)?;
        drop(cell);
        self.shared.state.bump_revision();
        self.shared.events.emit(WalletEvent::AccountsChanged { asset });
        Ok(())
    }

    /// Archive every active legacy address in one step, returning the
    /// addresses that were flipped.
    pub async fn archive_all_legacy(&self, asset: AssetType) -> Result<Vec<String>, WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        let flipped = cell.book.archive_all_legacy();
        drop(cell);
        if !flipped.is_empty() {
            self.shared.state.bump_revision();
            self.shared.events.emit(WalletEvent::AccountsChanged { asset });
            log::info!("Archived {} legacy {} addresses", flipped.len(), asset);
        }
        Ok(flipped)
    }

    pub async fn import_legacy_address(
        &self,
        asset: AssetType,
        address: &str,
        label: &str,
        watch_only: bool,
    ) -> Result<LegacyAddress, WalletError> {
        validate_label(label, self.shared.config.max_label_len)?;
        validate_address(asset, address, self.shared.config.bitcoin_network)?;

        let mut cell = self.shared.state.cell(asset).lock().await;
        let imported = cell
            .book
            .import_legacy(address.to_string(), label.to_string(), watch_only)?
            .clone();
        drop(cell);

        self.shared.state.bump_revision();
        self.subscribe_if_attached(asset, address.to_string());
        self.shared.events.emit(WalletEvent::AccountsChanged { asset });
        log::info!(
            "Imported {} address {}{}",
            asset,
            address,
            if watch_only { " (watch-only)" } else { "" }
        );
        Ok(imported)
    }

    /// Cached balance; performs no I/O.
    pub async fn balance_for(
        &self,
        asset: AssetType,
        target: &StoreTarget,
    ) -> Result<Balance, WalletError> {
        self.shared.state.cell(asset).lock().await.book.balance_for(target)
    }

    /// Apply the result of an explicit balance fetch. Races against pushes
    /// are settled last-writer-wins by sequence number.
    pub async fn apply_balance_fetch(
        &self,
        asset: AssetType,
        address: &str,
        amount: u64,
        seq: u64,
    ) -> Result<(), WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        let applied = cell.book.apply_fetch(address, amount, seq);
        drop(cell);
        if let Some((target, balance)) = applied {
            self.shared.state.bump_revision();
            self.shared.events.emit(WalletEvent::BalanceChanged {
                asset,
                target,
                balance,
            });
        }
        Ok(())
    }

    /// Reveal the mnemonic, gated by the second password when set.
    pub async fn mnemonic(
        &self,
        second_password: Option<&str>,
    ) -> Result<Option<String>, WalletError> {
        self.with_timeout("mnemonic", self.shared.crypto.mnemonic(second_password))
            .await
    }

    /// Record the outcome of the recovery-phrase backup verification flow.
    pub fn set_recovery_phrase_verified(&self, verified: bool) {
        self.shared.events.emit(WalletEvent::RecoveryPhraseVerified {
            verified,
            at: Utc::now(),
        });
    }

    pub fn update_fee_rates(
        &self,
        asset: AssetType,
        regular: u64,
        priority: u64,
    ) -> Result<(), WalletError> {
        self.shared.fees.update_rates(asset, regular, priority)
    }

    pub fn set_exchange_rate(&self, asset: AssetType, rate: f64) {
        self.shared.state.set_rate(asset, rate);
    }

    pub fn exchange_rate(&self, asset: AssetType) -> Option<f64> {
        self.shared.state.rate(asset)
    }

    // ============================================================================
    // Live balance channels
    // ============================================================================

    /// Spawn the reconnecting balance channel for an asset and subscribe it
    /// to every address the book currently holds.
    pub async fn attach_channel(
        &self,
        asset: AssetType,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<(), WalletError> {
        let addresses = self
            .shared
            .state
            .cell(asset)
            .lock()
            .await
            .book
            .subscribed_addresses();

        // Conflict check and insert under one lock, so two racing attaches
        // cannot both spawn a channel for the same asset.
        let mut channels = self.channels.lock().unwrap();
        if channels.contains_key(&asset) {
            return Err(WalletError::Conflict {
                asset,
                reason: "channel already attached".into(),
            });
        }

        let sink: Arc<dyn PushSink> = self.shared.clone();
        let channel = BalanceChannel::spawn(asset, factory, sink, &self.shared.config);
        for address in addresses {
            channel.subscribe(address);
        }

        // Forward state transitions to the event sink.
        let mut watch = channel.state_watch();
        let events_shared = self.shared.clone();
        tokio::spawn(async move {
            while watch.changed().await.is_ok() {
                let state = *watch.borrow();
                events_shared
                    .events
                    .emit(WalletEvent::ChannelStateChanged { asset, state });
            }
        });

        channels.insert(asset, channel);
        Ok(())
    }

    pub fn channel_state(&self, asset: AssetType) -> Option<ChannelState> {
        self.channels.lock().unwrap().get(&asset).map(|c| c.state())
    }

    pub fn subscribe_address(&self, asset: AssetType, address: String) {
        self.subscribe_if_attached(asset, address);
    }

    pub fn unsubscribe_address(&self, asset: AssetType, address: String) {
        if let Some(channel) = self.channels.lock().unwrap().get(&asset) {
            channel.unsubscribe(address);
        }
    }

    /// Tear down: stop every channel. Wallet state drops with the engine.
    pub async fn shutdown(&self) {
        let channels: Vec<BalanceChannel> = {
            let mut map = self.channels.lock().unwrap();
            map.drain().map(|(_, c)| c).collect()
        };
        for channel in channels {
            log::debug!("Shutting down {} channel", channel.asset());
            channel.shutdown().await;
        }
    }

    fn subscribe_if_attached(&self, asset: AssetType, address: String) {
        if let Some(channel) = self.channels.lock().unwrap().get(&asset) {
            channel.subscribe(address);
        }
    }

    // ============================================================================
    // Payment workflow
    // ============================================================================

    /// Start a payment flow. At most one may be in flight per asset.
    pub async fn payment_begin(&self, asset: AssetType) -> Result<(), WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        if cell.pending.is_some() {
            return Err(WalletError::Conflict {
                asset,
                reason: "a payment is already in flight".into(),
            });
        }
        cell.pending = Some(PendingPayment::new(asset));
        log::debug!("Payment flow started for {}", asset);
        Ok(())
    }

    pub async fn payment_set_source(
        &self,
        asset: AssetType,
        source: StoreTarget,
    ) -> Result<(), WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        // Source must exist and be spendable before the payment accepts it.
        cell.book.spendable_balance(&source)?;
        let pending = Self::pending_mut(&mut cell.pending, asset)?;
        pending.set_source(source)
    }

    pub async fn payment_set_destination(
        &self,
        asset: AssetType,
        destination: &str,
    ) -> Result<(), WalletError> {
        let network = self.shared.config.bitcoin_network;
        let mut cell = self.shared.state.cell(asset).lock().await;
        let pending = Self::pending_mut(&mut cell.pending, asset)?;
        pending.set_destination(destination, network)
    }

    pub async fn payment_set_amount(&self, asset: AssetType, amount: u64) -> Result<(), WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        let pending = Self::pending_mut(&mut cell.pending, asset)?;
        pending.set_amount(amount)
    }

    /// Compute and record the fee for the selected priority; returns the fee.
    pub async fn payment_estimate_fee(
        &self,
        asset: AssetType,
        fee_type: FeeType,
    ) -> Result<u64, WalletError> {
        let fee = self.shared.fees.estimate(asset, fee_type)?;
        let mut cell = self.shared.state.cell(asset).lock().await;
        let pending = Self::pending_mut(&mut cell.pending, asset)?;
        pending.apply_fee_estimate(fee_type, fee)?;
        Ok(fee)
    }

    /// Mandatory pre-sign funds check against the source's cached spendable
    /// balance. Failure leaves the pending payment unchanged.
    pub async fn payment_check_sufficiency(&self, asset: AssetType) -> Result<(), WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        let cell = &mut *cell;
        let pending = Self::pending_mut(&mut cell.pending, asset)?;
        let source = pending
            .source
            .clone()
            .ok_or_else(|| WalletError::Validation("Payment source not set".into()))?;
        let spendable = cell.book.spendable_balance(&source)?;
        pending.check_sufficiency(spendable)
    }

    /// Sign the pending payment through the Crypto Core. The asset lock is
    /// held across the call: signing requires exclusive access to wallet
    /// state. Authentication failures leave the payment retryable.
    pub async fn payment_sign(
        &self,
        asset: AssetType,
        second_password: Option<&str>,
    ) -> Result<SignedTx, WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        let cell = &mut *cell;
        let pending = Self::pending_mut(&mut cell.pending, asset)?;

        let source = pending
            .source
            .clone()
            .ok_or_else(|| WalletError::Validation("Payment source not set".into()))?;
        let (from_address, handle) = match &source {
            StoreTarget::Account(index) => {
                let account = cell.book.account(*index).ok_or_else(|| {
                    WalletError::Validation(format!("Unknown account #{}", index))
                })?;
                let address = account.receive_address.clone();
                let handle = self
                    .with_timeout(
                        "derive account",
                        self.shared.crypto.derive_account(asset, *index),
                    )
                    .await;
                match handle {
                    Ok(h) => (address, h),
                    Err(e) => return Err(self.report_payment_error(asset, "sign", e)),
                }
            }
            StoreTarget::Legacy(address) => (
                address.clone(),
                KeyMaterialHandle::imported(asset, address),
            ),
        };

        let unsigned = pending.begin_signing(from_address)?;
        let signed = self
            .with_timeout(
                "sign",
                self.shared.crypto.sign(&unsigned, &handle, second_password),
            )
            .await;

        match signed {
            Ok(signed) => {
                pending.mark_signed(signed.clone())?;
                log::info!("{} payment signed, tx hash {}", asset, signed.tx_hash);
                Ok(signed)
            }
            Err(e) => {
                pending.signing_failed();
                if matches!(e, WalletError::Authentication(_)) {
                    self.shared.events.emit(WalletEvent::AuthenticationRequired {
                        asset,
                        operation: "sign",
                    });
                }
                Err(self.report_payment_error(asset, "sign", e))
            }
        }
    }

    /// Broadcast the signed payment. On acceptance the source balance is
    /// optimistically debited by amount + fee pending channel confirmation;
    /// on rejection nothing is debited and the flow ends `Failed`. Either
    /// way the pending slot is freed.
    pub async fn payment_broadcast(&self, asset: AssetType) -> Result<String, WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        let cell_ref = &mut *cell;
        let pending = Self::pending_mut(&mut cell_ref.pending, asset)?;

        let signed = pending.begin_broadcast()?;
        let total = pending.total()?;
        let source = pending
            .source
            .clone()
            .ok_or_else(|| WalletError::Internal("Broadcasting without source".into()))?;
        let amount = pending.amount.unwrap_or_default();
        let fee = pending.fee.unwrap_or_default();

        let outcome = self
            .with_timeout(
                "broadcast",
                self.shared.broadcaster.broadcast(asset, &signed),
            )
            .await;

        match outcome {
            Ok(txid) => {
                // Free the slot before anything that can fail: the spend is
                // on the network regardless of what the cache says, and a
                // missed debit is corrected by the confirming push.
                let debit = cell_ref.book.debit_unconfirmed(&source, total);
                if let Some(mut done) = cell_ref.pending.take() {
                    done.mark_confirmed();
                }
                drop(cell);

                let balance =
                    debit.map_err(|e| self.report_payment_error(asset, "broadcast", e))?;
                self.shared.state.bump_revision();
                self.shared.events.emit(WalletEvent::BalanceChanged {
                    asset,
                    target: source,
                    balance,
                });
                self.shared.events.emit(WalletEvent::PaymentSucceeded {
                    asset,
                    tx_hash: txid.clone(),
                    amount,
                    fee,
                });
                log::info!("{} payment broadcast accepted: {}", asset, txid);
                Ok(txid)
            }
            Err(e @ WalletError::Timeout(_)) => {
                // The network may still accept the transaction; the flow
                // stays in Broadcasting and can no longer be cancelled.
                drop(cell);
                Err(self.report_payment_error(asset, "broadcast", e))
            }
            Err(e) => {
                if let Some(mut failed) = cell_ref.pending.take() {
                    failed.mark_failed();
                }
                drop(cell);
                Err(self.report_payment_error(asset, "broadcast", e))
            }
        }
    }

    /// Discard the pending payment. Valid until broadcast has started;
    /// afterwards the transaction cannot be recalled.
    pub async fn payment_cancel(&self, asset: AssetType) -> Result<(), WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        let pending = Self::pending_mut(&mut cell.pending, asset)?;
        if !pending.cancellable() {
            return Err(WalletError::Irreversible(format!(
                "{} payment already broadcast",
                asset
            )));
        }
        cell.pending = None;
        log::debug!("Payment flow for {} cancelled", asset);
        Ok(())
    }

    /// Settle a broadcast whose acknowledgement timed out, once the caller
    /// has learned the transaction's fate out of band. `confirmed` applies
    /// the debit as if the broadcast had been accepted; otherwise the flow
    /// is discarded with balances untouched. A push carrying the in-flight
    /// transaction's hash settles the flow without this call.
    pub async fn payment_resolve(
        &self,
        asset: AssetType,
        confirmed: bool,
    ) -> Result<(), WalletError> {
        let mut cell = self.shared.state.cell(asset).lock().await;
        let cell_ref = &mut *cell;
        let pending = Self::pending_mut(&mut cell_ref.pending, asset)?;
        if pending.state != PaymentState::Broadcasting {
            return Err(WalletError::Validation(format!(
                "No unresolved {} broadcast to settle",
                asset
            )));
        }

        if !confirmed {
            if let Some(mut failed) = cell_ref.pending.take() {
                failed.mark_failed();
            }
            drop(cell);
            log::info!("{} broadcast resolved as dropped by the network", asset);
            return Ok(());
        }

        let total = pending.total()?;
        let source = pending
            .source
            .clone()
            .ok_or_else(|| WalletError::Internal("Broadcasting without source".into()))?;
        let amount = pending.amount.unwrap_or_default();
        let fee = pending.fee.unwrap_or_default();
        let tx_hash = pending
            .signed
            .as_ref()
            .map(|s| s.tx_hash.clone())
            .unwrap_or_default();

        let debit = cell_ref.book.debit_unconfirmed(&source, total);
        if let Some(mut done) = cell_ref.pending.take() {
            done.mark_confirmed();
        }
        drop(cell);

        let balance = debit?;
        self.shared.state.bump_revision();
        self.shared.events.emit(WalletEvent::BalanceChanged {
            asset,
            target: source,
            balance,
        });
        self.shared.events.emit(WalletEvent::PaymentSucceeded {
            asset,
            tx_hash,
            amount,
            fee,
        });
        log::info!("{} broadcast resolved as confirmed", asset);
        Ok(())
    }

    pub async fn payment_state(&self, asset: AssetType) -> Option<PaymentState> {
        self.shared
            .state
            .cell(asset)
            .lock()
            .await
            .pending
            .as_ref()
            .map(|p| p.state)
    }

    // ============================================================================
    // Sweep
    // ============================================================================

    /// Consolidate every active, funded legacy address into the default
    /// account. Partial-failure tolerant; see the returned report.
    pub async fn sweep_all(
        &self,
        asset: AssetType,
        fee_type: FeeType,
        second_password: Option<&str>,
    ) -> Result<SweepReport, WalletError> {
        sweep::sweep_all(self, asset, fee_type, second_password).await
    }

    // ============================================================================
    // Internals
    // ============================================================================

    fn pending_mut(
        pending: &mut Option<PendingPayment>,
        asset: AssetType,
    ) -> Result<&mut PendingPayment, WalletError> {
        pending
            .as_mut()
            .ok_or_else(|| WalletError::Validation(format!("No pending {} payment", asset)))
    }

    fn report_payment_error(
        &self,
        asset: AssetType,
        operation: &'static str,
        error: WalletError,
    ) -> WalletError {
        self.shared.events.emit(WalletEvent::PaymentFailed {
            asset,
            operation,
            reason: error.to_string(),
        });
        error
    }

    pub(crate) async fn with_timeout<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, WalletError>>,
    ) -> Result<T, WalletError> {
        match tokio::time::timeout(self.shared.config.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(WalletError::Timeout(format!(
                "{} did not complete within {:?}",
                what, self.shared.config.operation_timeout
            ))),
        }
    }
}

#[async_trait]
impl PushSink for EngineShared {
    /// Merge a channel push into the store, serialized behind the asset
    /// lock. Unknown addresses are dropped with a non-fatal warning.
    async fn apply(&self, asset: AssetType, push: PushMessage) {
        let mut cell = self.state.cell(asset).lock().await;
        if !cell.book.knows_address(&push.address) {
            drop(cell);
            log::warn!(
                "{} push for unknown address {} (tx {})",
                asset,
                push.address,
                push.tx_hash
            );
            self.events.emit(WalletEvent::UnknownAddressPush {
                asset,
                address: push.address,
            });
            return;
        }
        let cell_ref = &mut *cell;

        // A push carrying the in-flight transaction's hash is its
        // confirmation; an acknowledgement lost to a broadcast timeout no
        // longer matters. Nothing was debited on that path, so the delta
        // applies in full below.
        let confirmed = match &cell_ref.pending {
            Some(p)
                if p.state == PaymentState::Broadcasting
                    && p.signed.as_ref().map_or(false, |s| s.tx_hash == push.tx_hash) =>
            {
                Some((p.amount.unwrap_or_default(), p.fee.unwrap_or_default()))
            }
            _ => None,
        };

        let applied = cell_ref
            .book
            .apply_delta(&push.address, push.balance_delta, push.seq);
        if confirmed.is_some() {
            if let Some(mut done) = cell_ref.pending.take() {
                done.mark_confirmed();
            }
        }
        drop(cell);

        if let Some((target, balance)) = applied {
            self.state.bump_revision();
            self.events.emit(WalletEvent::BalanceChanged {
                asset,
                target,
                balance,
            });
        }
        if let Some((amount, fee)) = confirmed {
            log::info!("{} broadcast confirmed by push {}", asset, push.tx_hash);
            self.events.emit(WalletEvent::PaymentSucceeded {
                asset,
                tx_hash: push.tx_hash,
                amount,
                fee,
            });
        }
    }
}
