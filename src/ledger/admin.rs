//! Administrative Operations
//!
//! Every entry point re-checks the caller against the configured admin
//! list; the command layer is not trusted to have done it.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use crate::notify::{notify_quietly, Notifier};
use crate::store::models::{RequiredGroup, UserId, Withdrawal, WithdrawalId};
use crate::store::LedgerStore;

use super::error::LedgerError;
use super::referral::ConfirmationEngine;
use super::withdrawal::WithdrawalLedger;
use super::{LedgerPolicy, SweepReport};

pub struct AdminService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<LedgerPolicy>,
    confirmation: Arc<ConfirmationEngine>,
    withdrawals: Arc<WithdrawalLedger>,
}

impl AdminService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        policy: Arc<LedgerPolicy>,
        confirmation: Arc<ConfirmationEngine>,
        withdrawals: Arc<WithdrawalLedger>,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
            confirmation,
            withdrawals,
        }
    }

    fn require_admin(&self, caller: UserId) -> Result<(), LedgerError> {
        if self.policy.is_admin(caller) {
            Ok(())
        } else {
            Err(LedgerError::AdminOnly)
        }
    }

    /// Manual balance adjustment. Negative amounts debit and refuse to
    /// overdraw. Returns the new balance.
    pub async fn credit(
        &self,
        caller: UserId,
        target: UserId,
        amount: Decimal,
        note: Option<&str>,
    ) -> Result<Decimal, LedgerError> {
        self.require_admin(caller)?;
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        if self.store.get_account(target).await?.is_none() {
            return Err(LedgerError::AccountNotFound(target));
        }

        let balance = self
            .store
            .adjust_balance(target, amount)
            .await?
            .ok_or(LedgerError::InsufficientBalance)?;

        info!(
            admin = caller,
            target,
            amount = %amount,
            balance = %balance,
            note = note.unwrap_or(""),
            "manual balance adjustment"
        );
        let text = match note {
            Some(note) => format!(
                "An administrator adjusted your balance by {} ({}). New balance: {}.",
                amount, note, balance
            ),
            None => format!(
                "An administrator adjusted your balance by {}. New balance: {}.",
                amount, balance
            ),
        };
        notify_quietly(self.notifier.as_ref(), target, &text).await;
        Ok(balance)
    }

    pub async fn settle_withdrawal(
        &self,
        caller: UserId,
        id: &str,
    ) -> Result<Withdrawal, LedgerError> {
        self.require_admin(caller)?;
        let id = parse_withdrawal_id(id)?;
        self.withdrawals.settle(id, caller).await
    }

    pub async fn cancel_withdrawal(
        &self,
        caller: UserId,
        id: &str,
    ) -> Result<Withdrawal, LedgerError> {
        self.require_admin(caller)?;
        let id = parse_withdrawal_id(id)?;
        self.withdrawals.cancel(id, caller).await
    }

    pub async fn pending_withdrawals(
        &self,
        caller: UserId,
    ) -> Result<Vec<Withdrawal>, LedgerError> {
        self.require_admin(caller)?;
        self.withdrawals.list_pending().await
    }

    /// Kick a confirmation pass by hand. `force` waives the delay.
    pub async fn run_sweep(&self, caller: UserId, force: bool) -> Result<SweepReport, LedgerError> {
        self.require_admin(caller)?;
        info!(admin = caller, force, "manual confirmation pass");
        self.confirmation.run(force).await
    }

    pub async fn add_group(
        &self,
        caller: UserId,
        group_id: &str,
        title: &str,
    ) -> Result<bool, LedgerError> {
        self.require_admin(caller)?;
        let group = RequiredGroup {
            group_id: group_id.to_string(),
            title: title.to_string(),
            added_by: caller,
            added_at: chrono::Utc::now(),
        };
        let added = self.store.add_group(&group).await?;
        if added {
            info!(admin = caller, group_id, title, "required group added");
        }
        Ok(added)
    }

    pub async fn remove_group(&self, caller: UserId, group_id: &str) -> Result<bool, LedgerError> {
        self.require_admin(caller)?;
        let removed = self.store.remove_group(group_id).await?;
        if removed {
            info!(admin = caller, group_id, "required group removed");
        }
        Ok(removed)
    }

    pub async fn groups(&self, caller: UserId) -> Result<Vec<RequiredGroup>, LedgerError> {
        self.require_admin(caller)?;
        Ok(self.store.list_groups().await?)
    }
}

fn parse_withdrawal_id(raw: &str) -> Result<WithdrawalId, LedgerError> {
    raw.parse::<WithdrawalId>()
        .map_err(|_| LedgerError::InvalidWithdrawalId(raw.to_string()))
}
