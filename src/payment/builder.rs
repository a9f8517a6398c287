use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::asset::{validate_address, AssetType};
use crate::crypto::SignedTx;
use crate::error::WalletError;
use crate::payment::FeeType;
use crate::store::StoreTarget;

/// Position in the payment workflow. There is no `Idle` variant: an idle
/// asset simply has no pending payment in its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentState {
    Building,
    FeeEstimated,
    Signing,
    Signed,
    Broadcasting,
    Confirmed,
    Failed,
}

/// The single in-flight payment for one asset.
///
/// Input mutators validate before touching state, so a rejected input leaves
/// the previous valid payment intact. Changing any input after a fee
/// estimate drops the payment back to `Building`; sufficiency must be
/// re-checked before signing.
#[derive(Debug, Clone)]
pub struct PendingPayment {
    pub id: Uuid,
    pub asset: AssetType,
    pub state: PaymentState,
    pub source: Option<StoreTarget>,
    pub destination: Option<String>,
    pub amount: Option<u64>,
    pub fee_type: Option<FeeType>,
    pub fee: Option<u64>,
    pub dust_threshold: u64,
    pub sufficiency_checked: bool,
    pub signed: Option<SignedTx>,
    pub created_at: DateTime<Utc>,
}

impl PendingPayment {
    pub fn new(asset: AssetType) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset,
            state: PaymentState::Building,
            source: None,
            destination: None,
            amount: None,
            fee_type: None,
            fee: None,
            dust_threshold: asset.dust_threshold(),
            sufficiency_checked: false,
            signed: None,
            created_at: Utc::now(),
        }
    }

    pub fn set_source(&mut self, source: StoreTarget) -> Result<(), WalletError> {
        self.ensure_mutable("set source")?;
        self.source = Some(source);
        self.invalidate_estimate();
        Ok(())
    }

    pub fn set_destination(
        &mut self,
        destination: &str,
        network: bitcoin::Network,
    ) -> Result<(), WalletError> {
        self.ensure_mutable("set destination")?;
        validate_address(self.asset, destination, network)?;
        self.destination = Some(destination.to_string());
        self.invalidate_estimate();
        Ok(())
    }

    pub fn set_amount(&mut self, amount: u64) -> Result<(), WalletError> {
        self.ensure_mutable("set amount")?;
        if amount == 0 {
            return Err(WalletError::Validation("Amount must be positive".into()));
        }
        if amount > self.asset.max_amount() {
            return Err(WalletError::Validation(format!(
                "Amount exceeds maximum representable {} {}",
                self.asset.max_amount(),
                self.asset.unit()
            )));
        }
        self.amount = Some(amount);
        self.invalidate_estimate();
        Ok(())
    }

    /// Record a computed fee and move to `FeeEstimated`. Sub-dust amounts
    /// are rejected here rather than silently dropped at broadcast.
    pub fn apply_fee_estimate(&mut self, fee_type: FeeType, fee: u64) -> Result<(), WalletError> {
        self.ensure_mutable("estimate fee")?;
        let amount = self.amount.ok_or_else(|| {
            WalletError::Validation("Cannot estimate fee before amount is set".into())
        })?;
        if amount < self.dust_threshold {
            return Err(WalletError::Dust {
                amount,
                dust_threshold: self.dust_threshold,
            });
        }
        self.fee_type = Some(fee_type);
        self.fee = Some(fee);
        self.state = PaymentState::FeeEstimated;
        self.sufficiency_checked = false;
        Ok(())
    }

    /// Amount plus fee, available once a fee estimate exists.
    pub fn total(&self) -> Result<u64, WalletError> {
        let amount = self
            .amount
            .ok_or_else(|| WalletError::Validation("Amount not set".into()))?;
        let fee = self
            .fee
            .ok_or_else(|| WalletError::Validation("Fee not estimated".into()))?;
        amount
            .checked_add(fee)
            .ok_or_else(|| WalletError::Validation("Amount plus fee overflows".into()))
    }

    /// Mandatory pre-sign check against the source's spendable balance.
    /// Failure leaves the payment unchanged so the caller can adjust the
    /// amount and retry.
    pub fn check_sufficiency(&mut self, spendable: u64) -> Result<(), WalletError> {
        if self.state != PaymentState::FeeEstimated {
            return Err(WalletError::Validation(format!(
                "Sufficiency check requires an estimated fee (state: {:?})",
                self.state
            )));
        }
        let total = self.total()?;
        if total > spendable {
            return Err(WalletError::InsufficientFunds(format!(
                "Need {} {} (amount + fee), spendable balance is {}",
                total,
                self.asset.unit(),
                spendable
            )));
        }
        self.sufficiency_checked = true;
        Ok(())
    }

    /// Transition into `Signing`, returning the payload for the Crypto Core.
    pub fn begin_signing(&mut self, from_address: String) -> Result<crate::crypto::UnsignedTx, WalletError> {
        if self.state != PaymentState::FeeEstimated {
            return Err(WalletError::Validation(format!(
                "Cannot sign from state {:?}",
                self.state
            )));
        }
        if !self.sufficiency_checked {
            return Err(WalletError::Validation(
                "Sufficiency must be checked before signing".into(),
            ));
        }
        let destination = self
            .destination
            .clone()
            .ok_or_else(|| WalletError::Validation("Destination not set".into()))?;
        let amount = self.amount.unwrap_or_default();
        let fee = self.fee.unwrap_or_default();
        self.state = PaymentState::Signing;
        Ok(crate::crypto::UnsignedTx {
            asset: self.asset,
            from: from_address,
            to: destination,
            amount,
            fee,
        })
    }

    /// Signing failed (wrong password, derivation failure): drop back to
    /// `FeeEstimated` so the caller can retry with corrected credentials.
    pub fn signing_failed(&mut self) {
        if self.state == PaymentState::Signing {
            self.state = PaymentState::FeeEstimated;
        }
    }

    pub fn mark_signed(&mut self, signed: SignedTx) -> Result<(), WalletError> {
        if self.state != PaymentState::Signing {
            return Err(WalletError::Internal(format!(
                "mark_signed from state {:?}",
                self.state
            )));
        }
        self.signed = Some(signed);
        self.state = PaymentState::Signed;
        Ok(())
    }

    pub fn begin_broadcast(&mut self) -> Result<SignedTx, WalletError> {
        if self.state != PaymentState::Signed {
            return Err(WalletError::Validation(format!(
                "Cannot broadcast from state {:?}",
                self.state
            )));
        }
        let signed = self
            .signed
            .clone()
            .ok_or_else(|| WalletError::Internal("Signed state without blob".into()))?;
        self.state = PaymentState::Broadcasting;
        Ok(signed)
    }

    pub fn mark_confirmed(&mut self) {
        self.state = PaymentState::Confirmed;
    }

    pub fn mark_failed(&mut self) {
        self.state = PaymentState::Failed;
    }

    /// Whether `cancel` may still discard this payment. Once broadcast has
    /// started the transaction is on the network and cannot be recalled.
    pub fn cancellable(&self) -> bool {
        matches!(
            self.state,
            PaymentState::Building
                | PaymentState::FeeEstimated
                | PaymentState::Signing
                | PaymentState::Signed
        )
    }

    fn ensure_mutable(&self, operation: &str) -> Result<(), WalletError> {
        match self.state {
            PaymentState::Building | PaymentState::FeeEstimated => Ok(()),
            other => Err(WalletError::Validation(format!(
                "Cannot {} in state {:?}",
                operation, other
            ))),
        }
    }

    fn invalidate_estimate(&mut self) {
        self.fee = None;
        self.fee_type = None;
        self.sufficiency_checked = false;
        self.state = PaymentState::Building;
    }
}
