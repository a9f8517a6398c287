//! Sweep ("transfer all") orchestration.
//!
//! Consolidates funds from active imported addresses into the default HD
//! account, one payment flow per address, strictly sequentially: signing
//! needs exclusive wallet state and the second password is verified once
//! per session. One address failing does not stop the sweep; the final
//! report accounts for every address either way.

use crate::asset::AssetType;
use crate::engine::WalletEngine;
use crate::error::WalletError;
use crate::events::{SweepOutcome, WalletEvent};
use crate::payment::FeeType;
use crate::store::StoreTarget;

/// Final accounting for one sweep session.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub asset: AssetType,
    pub total_swept: u64,
    pub total_fees: u64,
    pub outcomes: Vec<SweepOutcome>,
}

impl SweepReport {
    pub fn swept_addresses(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_none())
            .map(|o| o.address.as_str())
            .collect()
    }

    pub fn failed_addresses(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.address.as_str())
            .collect()
    }
}

struct Candidate {
    address: String,
    balance: u64,
}

pub(crate) async fn sweep_all(
    engine: &WalletEngine,
    asset: AssetType,
    fee_type: FeeType,
    second_password: Option<&str>,
) -> Result<SweepReport, WalletError> {
    // Snapshot the session: destination and candidate set are fixed up
    // front; balances are re-read per address as the sweep progresses.
    let (destination, candidates) = {
        let cell = engine.shared.state.cell(asset).lock().await;
        let destination = cell
            .book
            .default_account()
            .map(|a| a.receive_address.clone())
            .ok_or_else(|| {
                WalletError::Validation(format!("No default {} account to sweep into", asset))
            })?;
        let candidates: Vec<Candidate> = cell
            .book
            .legacy_addresses()
            .iter()
            .filter(|l| !l.archived && !l.watch_only)
            .map(|l| Candidate {
                address: l.address.clone(),
                balance: l.balance,
            })
            .collect();
        (destination, candidates)
    };

    // A sweep drives the payment builder itself, so a user payment already
    // in flight blocks the whole session up front.
    if engine.payment_state(asset).await.is_some() {
        return Err(WalletError::Conflict {
            asset,
            reason: "cannot sweep while a payment is in flight".into(),
        });
    }

    // One authentication prompt per sweep session; every per-address sign
    // reuses the verified credential.
    if let Err(e) = engine
        .with_timeout(
            "verify second password",
            engine.shared.crypto.verify_second_password(second_password),
        )
        .await
    {
        engine.shared.events.emit(WalletEvent::AuthenticationRequired {
            asset,
            operation: "sweep",
        });
        return Err(e);
    }

    log::info!(
        "Sweeping {} {} addresses into {}",
        candidates.len(),
        asset,
        destination
    );

    let dust = asset.dust_threshold();
    let mut outcomes: Vec<SweepOutcome> = Vec::with_capacity(candidates.len());
    let mut total_swept = 0u64;
    let mut total_fees = 0u64;

    let total = candidates.len();
    for (position, candidate) in candidates.into_iter().enumerate() {
        let remaining = total - position - 1;
        let outcome = sweep_one(
            engine,
            asset,
            fee_type,
            second_password,
            &destination,
            &candidate,
            dust,
        )
        .await;

        if outcome.error.is_none() {
            total_swept += outcome.swept;
            total_fees += outcome.fee;
        } else {
            log::warn!(
                "Sweep of {} failed: {}",
                candidate.address,
                outcome.error.as_deref().unwrap_or("unknown")
            );
        }

        engine.shared.events.emit(WalletEvent::SweepProgress {
            asset,
            outcome: outcome.clone(),
            remaining,
        });
        outcomes.push(outcome);
    }

    log::info!(
        "Sweep complete: {} {} swept, {} in fees, {}/{} addresses",
        total_swept,
        asset.unit(),
        total_fees,
        outcomes.iter().filter(|o| o.error.is_none()).count(),
        outcomes.len()
    );

    engine.shared.events.emit(WalletEvent::SweepCompleted {
        asset,
        total_swept,
        total_fees,
        outcomes: outcomes.clone(),
    });

    Ok(SweepReport {
        asset,
        total_swept,
        total_fees,
        outcomes,
    })
}

async fn sweep_one(
    engine: &WalletEngine,
    asset: AssetType,
    fee_type: FeeType,
    second_password: Option<&str>,
    destination: &str,
    candidate: &Candidate,
    dust: u64,
) -> SweepOutcome {
    let failure = |error: String| SweepOutcome {
        address: candidate.address.clone(),
        swept: 0,
        fee: 0,
        error: Some(error),
    };

    if candidate.balance <= dust {
        return failure(format!(
            "balance {} at or below dust threshold {}",
            candidate.balance, dust
        ));
    }

    let fee = match engine.shared.fees.estimate(asset, fee_type) {
        Ok(fee) => fee,
        Err(e) => return failure(e.to_string()),
    };
    let amount = match candidate.balance.checked_sub(fee) {
        Some(amount) if amount > dust => amount,
        _ => {
            return failure(format!(
                "balance {} cannot cover fee {} above dust",
                candidate.balance, fee
            ))
        }
    };

    match run_flow(
        engine,
        asset,
        fee_type,
        second_password,
        destination,
        &candidate.address,
        amount,
    )
    .await
    {
        Ok(()) => {
            // Swept clean: archive so it never re-enters a sweep session.
            let target = StoreTarget::Legacy(candidate.address.clone());
            if let Err(e) = engine.toggle_archive(asset, &target).await {
                log::warn!("Could not archive swept address {}: {}", candidate.address, e);
            }
            SweepOutcome {
                address: candidate.address.clone(),
                swept: amount,
                fee,
                error: None,
            }
        }
        Err(e) => {
            // Leave the address unarchived and drop any half-built flow.
            let _ = engine.payment_cancel(asset).await;
            failure(e.to_string())
        }
    }
}

async fn run_flow(
    engine: &WalletEngine,
    asset: AssetType,
    fee_type: FeeType,
    second_password: Option<&str>,
    destination: &str,
    address: &str,
    amount: u64,
) -> Result<(), WalletError> {
    engine.payment_begin(asset).await?;
    engine
        .payment_set_source(asset, StoreTarget::Legacy(address.to_string()))
        .await?;
    engine.payment_set_destination(asset, destination).await?;
    engine.payment_set_amount(asset, amount).await?;
    engine.payment_estimate_fee(asset, fee_type).await?;
    engine.payment_check_sufficiency(asset).await?;
    engine.payment_sign(asset, second_password).await?;
    engine.payment_broadcast(asset).await?;
    Ok(())
}
