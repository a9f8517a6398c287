use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::asset::AssetType;
use crate::error::WalletError;
use crate::store::{Account, LegacyAddress, StoreTarget};

/// Cached balance plus the sequence number of the write that produced it.
/// Writes with a stale sequence number lose (last-writer-wins per address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub amount: u64,
    pub seq: u64,
}

/// One asset's accounts and imported addresses. All access is serialized by
/// the per-asset lock the engine holds around it.
#[derive(Debug)]
pub struct AssetBook {
    pub asset: AssetType,
    accounts: Vec<Account>,
    legacy: Vec<LegacyAddress>,
    /// Last applied balance sequence number per address.
    seqs: HashMap<String, u64>,
    /// Optimistic debits awaiting their confirming push, per source
    /// address. `apply_delta` settles against these so the wallet's own
    /// spend is not subtracted twice.
    unconfirmed: HashMap<String, u64>,
    /// Next HD account index. Monotonic; indices are never reused.
    next_index: u32,
}

impl AssetBook {
    pub fn new(asset: AssetType) -> Self {
        Self {
            asset,
            accounts: Vec::new(),
            legacy: Vec::new(),
            seqs: HashMap::new(),
            unconfirmed: HashMap::new(),
            next_index: 0,
        }
    }

    pub fn next_account_index(&self) -> u32 {
        self.next_index
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn legacy_addresses(&self) -> &[LegacyAddress] {
        &self.legacy
    }

    /// Append a freshly derived account. The first account of an asset
    /// becomes its default.
    pub fn add_account(
        &mut self,
        index: u32,
        label: String,
        derivation_path: String,
        receive_address: String,
    ) -> Result<&Account, WalletError> {
        if index != self.next_index {
            return Err(WalletError::InvariantViolation(format!(
                "Account index {} out of order, expected {}",
                index, self.next_index
            )));
        }
        let is_default = self.accounts.is_empty();
        self.accounts.push(Account {
            index,
            asset: self.asset,
            label,
            archived: false,
            is_default,
            derivation_path,
            receive_address,
            balance: 0,
        });
        self.next_index += 1;
        Ok(self.accounts.last().unwrap())
    }

    pub fn account(&self, index: u32) -> Option<&Account> {
        self.accounts.iter().find(|a| a.index == index)
    }

    fn account_mut(&mut self, index: u32) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.index == index)
    }

    pub fn legacy_address(&self, address: &str) -> Option<&LegacyAddress> {
        self.legacy.iter().find(|l| l.address == address)
    }

    fn legacy_mut(&mut self, address: &str) -> Option<&mut LegacyAddress> {
        self.legacy.iter_mut().find(|l| l.address == address)
    }

    pub fn default_account(&self) -> Option<&Account> {
        self.accounts.iter().find(|a| a.is_default)
    }

    pub fn set_label(
        &mut self,
        target: &StoreTarget,
        label: &str,
        max_len: usize,
    ) -> Result<(), WalletError> {
        validate_label(label, max_len)?;
        match target {
            StoreTarget::Account(index) => {
                let account = self.account_mut(*index).ok_or_else(|| {
                    WalletError::Validation(format!("Unknown account #{}", index))
                })?;
                account.label = label.to_string();
            }
            StoreTarget::Legacy(address) => {
                let entry = self.legacy_mut(address).ok_or_else(|| {
                    WalletError::Validation(format!("Unknown address {}", address))
                })?;
                entry.label = label.to_string();
            }
        }
        Ok(())
    }

    /// Flip the archived flag. Rejected when archiving would leave the asset
    /// holding funds with no active spend target at all.
    pub fn toggle_archive(&mut self, target: &StoreTarget) -> Result<bool, WalletError> {
        let currently_archived = match target {
            StoreTarget::Account(index) => {
                self.account(*index)
                    .ok_or_else(|| WalletError::Validation(format!("Unknown account #{}", index)))?
                    .archived
            }
            StoreTarget::Legacy(address) => {
                self.legacy_address(address)
                    .ok_or_else(|| WalletError::Validation(format!("Unknown address {}", address)))?
                    .archived
            }
        };

        if !currently_archived {
            let active_after = self.active_spend_targets() - 1;
            if active_after == 0 && self.total_balance() > 0 {
                return Err(WalletError::InvariantViolation(format!(
                    "Archiving {} would leave {} funds with no active spend target",
                    target, self.asset
                )));
            }
        }

        match target {
            StoreTarget::Account(index) => {
                let account = self.account_mut(*index).unwrap();
                account.archived = !currently_archived;
                Ok(account.archived)
            }
            StoreTarget::Legacy(address) => {
                let entry = self.legacy_mut(address).unwrap();
                entry.archived = !currently_archived;
                Ok(entry.archived)
            }
        }
    }

    /// Move the default flag to another active account.
    pub fn set_default_account(&mut self, index: u32) -> Result<(), WalletError> {
        let target = self
            .account(index)
            .ok_or_else(|| WalletError::Validation(format!("Unknown account #{}", index)))?;
        if target.archived {
            return Err(WalletError::Validation(format!(
                "Cannot make archived account #{} the default",
                index
            )));
        }
        for account in &mut self.accounts {
            account.is_default = account.index == index;
        }
        Ok(())
    }

    pub fn import_legacy(
        &mut self,
        address: String,
        label: String,
        watch_only: bool,
    ) -> Result<&LegacyAddress, WalletError> {
        if self.legacy_address(&address).is_some() {
            return Err(WalletError::Validation(format!(
                "Address {} already imported",
                address
            )));
        }
        self.legacy.push(LegacyAddress {
            address,
            asset: self.asset,
            label,
            archived: false,
            watch_only,
            balance: 0,
        });
        Ok(self.legacy.last().unwrap())
    }

    /// Archive every legacy address, returning the ones flipped.
    pub fn archive_all_legacy(&mut self) -> Vec<String> {
        let mut flipped = Vec::new();
        for entry in &mut self.legacy {
            if !entry.archived {
                entry.archived = true;
                flipped.push(entry.address.clone());
            }
        }
        flipped
    }

    pub fn balance_for(&self, target: &StoreTarget) -> Result<Balance, WalletError> {
        match target {
            StoreTarget::Account(index) => {
                let account = self.account(*index).ok_or_else(|| {
                    WalletError::Validation(format!("Unknown account #{}", index))
                })?;
                Ok(Balance {
                    amount: account.balance,
                    seq: self.seq_for(&account.receive_address),
                })
            }
            StoreTarget::Legacy(address) => {
                let entry = self.legacy_address(address).ok_or_else(|| {
                    WalletError::Validation(format!("Unknown address {}", address))
                })?;
                Ok(Balance {
                    amount: entry.balance,
                    seq: self.seq_for(address),
                })
            }
        }
    }

    /// Spendable balance of a payment source: archived entries and
    /// watch-only addresses hold nothing spendable.
    pub fn spendable_balance(&self, source: &StoreTarget) -> Result<u64, WalletError> {
        match source {
            StoreTarget::Account(index) => {
                let account = self.account(*index).ok_or_else(|| {
                    WalletError::Validation(format!("Unknown account #{}", index))
                })?;
                if account.archived {
                    return Err(WalletError::Validation(format!(
                        "Account #{} is archived",
                        index
                    )));
                }
                Ok(account.balance)
            }
            StoreTarget::Legacy(address) => {
                let entry = self.legacy_address(address).ok_or_else(|| {
                    WalletError::Validation(format!("Unknown address {}", address))
                })?;
                if entry.archived {
                    return Err(WalletError::Validation(format!(
                        "Address {} is archived",
                        address
                    )));
                }
                if entry.watch_only {
                    return Err(WalletError::Validation(format!(
                        "Address {} is watch-only",
                        address
                    )));
                }
                Ok(entry.balance)
            }
        }
    }

    /// Apply a pushed balance delta. Returns the updated target and its new
    /// balance, `None` when the address is unknown or the write is stale.
    pub fn apply_delta(&mut self, address: &str, delta: i64, seq: u64) -> Option<(StoreTarget, u64)> {
        if !self.accept_seq(address, seq) {
            log::debug!("Stale balance write for {} (seq {}), dropped", address, seq);
            return None;
        }
        let delta = self.settle_unconfirmed(address, delta);
        if let Some(account) = self
            .accounts
            .iter_mut()
            .find(|a| a.receive_address == address)
        {
            account.balance = saturating_apply(account.balance, delta);
            return Some((StoreTarget::Account(account.index), account.balance));
        }
        if let Some(entry) = self.legacy.iter_mut().find(|l| l.address == address) {
            entry.balance = saturating_apply(entry.balance, delta);
            return Some((StoreTarget::Legacy(entry.address.clone()), entry.balance));
        }
        None
    }

    /// Apply an absolute balance from an explicit fetch, under the same
    /// last-writer-wins rule as pushes.
    pub fn apply_fetch(&mut self, address: &str, amount: u64, seq: u64) -> Option<(StoreTarget, u64)> {
        if !self.accept_seq(address, seq) {
            return None;
        }
        // An absolute balance already reflects whatever the server has
        // seen of our spend; drop the pending record rather than settle it.
        self.unconfirmed.remove(address);
        if let Some(account) = self
            .accounts
            .iter_mut()
            .find(|a| a.receive_address == address)
        {
            account.balance = amount;
            return Some((StoreTarget::Account(account.index), account.balance));
        }
        if let Some(entry) = self.legacy.iter_mut().find(|l| l.address == address) {
            entry.balance = amount;
            return Some((StoreTarget::Legacy(entry.address.clone()), entry.balance));
        }
        None
    }

    /// Optimistic debit after an accepted broadcast, capped at the cached
    /// balance. The debited portion is recorded against the source address
    /// so the eventual confirming push settles it instead of subtracting
    /// the spend a second time.
    pub fn debit_unconfirmed(
        &mut self,
        target: &StoreTarget,
        amount: u64,
    ) -> Result<u64, WalletError> {
        let address = match target {
            StoreTarget::Account(index) => self
                .accounts
                .iter()
                .find(|a| a.index == *index)
                .map(|a| a.receive_address.clone())
                .ok_or_else(|| WalletError::Validation(format!("Unknown account #{}", index)))?,
            StoreTarget::Legacy(address) => address.clone(),
        };
        let balance = self.balance_mut(target)?;
        let debited = amount.min(*balance);
        if debited < amount {
            log::warn!(
                "Debit of {} exceeds cached balance of {}; capped at {}",
                amount,
                target,
                debited
            );
        }
        *balance -= debited;
        let remaining = *balance;
        if debited > 0 {
            *self.unconfirmed.entry(address).or_insert(0) += debited;
        }
        Ok(remaining)
    }

    // A negative delta first settles any optimistic debit recorded for the
    // address; only the portion beyond it still moves the cached balance.
    fn settle_unconfirmed(&mut self, address: &str, delta: i64) -> i64 {
        if delta >= 0 {
            return delta;
        }
        let Some(recorded) = self.unconfirmed.get_mut(address) else {
            return delta;
        };
        let settled = (*recorded).min(delta.unsigned_abs());
        *recorded -= settled;
        if *recorded == 0 {
            self.unconfirmed.remove(address);
        }
        delta + settled as i64
    }

    /// All addresses the live balance channel should hold subscriptions for.
    pub fn subscribed_addresses(&self) -> Vec<String> {
        self.accounts
            .iter()
            .map(|a| a.receive_address.clone())
            .chain(self.legacy.iter().map(|l| l.address.clone()))
            .collect()
    }

    pub fn knows_address(&self, address: &str) -> bool {
        self.accounts.iter().any(|a| a.receive_address == address)
            || self.legacy.iter().any(|l| l.address == address)
    }

    fn balance_mut(&mut self, target: &StoreTarget) -> Result<&mut u64, WalletError> {
        match target {
            StoreTarget::Account(index) => self
                .accounts
                .iter_mut()
                .find(|a| a.index == *index)
                .map(|a| &mut a.balance)
                .ok_or_else(|| WalletError::Validation(format!("Unknown account #{}", index))),
            StoreTarget::Legacy(address) => self
                .legacy
                .iter_mut()
                .find(|l| l.address == *address)
                .map(|l| &mut l.balance)
                .ok_or_else(|| WalletError::Validation(format!("Unknown address {}", address))),
        }
    }

    // Sequence numbers start at 1; a write at or below the last applied
    // sequence number for the address loses.
    fn accept_seq(&mut self, address: &str, seq: u64) -> bool {
        let last = self.seqs.get(address).copied().unwrap_or(0);
        if seq <= last {
            return false;
        }
        self.seqs.insert(address.to_string(), seq);
        true
    }

    fn seq_for(&self, address: &str) -> u64 {
        self.seqs.get(address).copied().unwrap_or(0)
    }

    fn active_spend_targets(&self) -> usize {
        self.accounts.iter().filter(|a| !a.archived).count()
            + self
                .legacy
                .iter()
                .filter(|l| !l.archived && !l.watch_only)
                .count()
    }

    fn total_balance(&self) -> u64 {
        self.accounts.iter().map(|a| a.balance).sum::<u64>()
            + self.legacy.iter().map(|l| l.balance).sum::<u64>()
    }
}

fn saturating_apply(balance: u64, delta: i64) -> u64 {
    if delta >= 0 {
        balance.saturating_add(delta as u64)
    } else {
        balance.saturating_sub(delta.unsigned_abs())
    }
}

pub fn validate_label(label: &str, max_len: usize) -> Result<(), WalletError> {
    if label.is_empty() {
        return Err(WalletError::Validation("Label must not be empty".into()));
    }
    if label.chars().count() > max_len {
        return Err(WalletError::Validation(format!(
            "Label exceeds {} characters",
            max_len
        )));
    }
    if label.chars().any(|c| c.is_control()) {
        return Err(WalletError::Validation(
            "Label contains control characters".into(),
        ));
    }
    Ok(())
}
