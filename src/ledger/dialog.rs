//! Intent Dialogue Machine
//!
//! Interprets free text against the account's active intent. Every
//! transition is a conditional intent update, so two messages racing from
//! the same user resolve to one winner and one benign "already finished"
//! reply.
//!
//! Keyword matching ('confirm' / 'cancel') is case-insensitive and runs
//! before format validation.

use std::sync::Arc;

use tracing::{debug, info};

use crate::notify::{broadcast, Notifier};
use crate::store::models::{Account, Intent, IntentKind};
use crate::store::LedgerStore;

use super::error::LedgerError;
use super::withdrawal::WithdrawalLedger;
use super::{LedgerPolicy, DIALOG_CLOSED};

/// Payout-target shape: a local part of at least two characters, an '@',
/// and a provider token carrying at least two letters. Whitespace anywhere
/// disqualifies.
pub fn is_valid_payout_target(text: &str) -> bool {
    if text.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, provider)) = text.split_once('@') else {
        return false;
    };
    if local.chars().count() < 2 {
        return false;
    }
    provider.chars().filter(|c| c.is_ascii_alphabetic()).count() >= 2
}

pub struct DialogEngine {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<LedgerPolicy>,
    withdrawals: Arc<WithdrawalLedger>,
}

impl DialogEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        policy: Arc<LedgerPolicy>,
        withdrawals: Arc<WithdrawalLedger>,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
            withdrawals,
        }
    }

    /// Enter the payout-target dialogue. Rejected while a withdrawal draft
    /// holds locked funds; any other previous intent is abandoned.
    pub async fn begin_payout_update(&self, account: &Account) -> Result<Vec<String>, LedgerError> {
        let entered = self
            .store
            .set_intent_unless_drafting(account.user_id, &Intent::SettingPayoutTarget { draft: None })
            .await?;
        if !entered {
            return Err(LedgerError::DraftInProgress);
        }

        let mut reply = String::from("Send your new payout target (like name@provider).");
        if let Some(current) = &account.payout_target {
            reply.push_str(&format!(" Current target: {}.", current));
        }
        reply.push_str(" Send 'cancel' to keep things as they are.");
        Ok(vec![reply])
    }

    /// Enter the support dialogue: the next message goes to the team.
    pub async fn begin_support(&self, account: &Account) -> Result<Vec<String>, LedgerError> {
        let entered = self
            .store
            .set_intent_unless_drafting(account.user_id, &Intent::AwaitingSupportMessage)
            .await?;
        if !entered {
            return Err(LedgerError::DraftInProgress);
        }
        Ok(vec![
            "What would you like to tell the team? Your next message goes straight to them."
                .to_string(),
        ])
    }

    /// Interpret a non-command message against the active intent.
    pub async fn handle_text(
        &self,
        account: &Account,
        text: &str,
    ) -> Result<Vec<String>, LedgerError> {
        match &account.intent {
            // Free text outside a dialogue is ignored
            Intent::Idle => Ok(vec![]),
            Intent::SettingPayoutTarget { draft } => {
                self.payout_dialog(account, draft.as_deref(), text).await
            }
            Intent::DraftingWithdrawal {
                draft, confirmable, ..
            } => {
                self.withdrawal_dialog(account, draft.as_deref(), *confirmable, text)
                    .await
            }
            Intent::AwaitingSupportMessage => self.support_message(account, text).await,
        }
    }

    async fn payout_dialog(
        &self,
        account: &Account,
        draft: Option<&str>,
        text: &str,
    ) -> Result<Vec<String>, LedgerError> {
        let trimmed = text.trim();
        let keyword = trimmed.to_lowercase();

        if keyword == "cancel" {
            let reset = self
                .store
                .set_intent_if(account.user_id, IntentKind::SettingPayoutTarget, &Intent::Idle)
                .await?;
            let reply = if reset {
                "Payout target unchanged."
            } else {
                DIALOG_CLOSED
            };
            return Ok(vec![reply.to_string()]);
        }

        if keyword == "confirm" {
            let Some(target) = draft else {
                return Err(LedgerError::NothingToConfirm);
            };
            if self.store.commit_payout_target(account.user_id, target).await? {
                info!(user_id = account.user_id, "payout target saved");
                return Ok(vec![format!("Payout target saved: {}", target)]);
            }
            debug!(user_id = account.user_id, "payout commit lost to a concurrent event");
            return Ok(vec![DIALOG_CLOSED.to_string()]);
        }

        if is_valid_payout_target(trimmed) {
            let next = Intent::SettingPayoutTarget {
                draft: Some(trimmed.to_string()),
            };
            let updated = self
                .store
                .set_intent_if(account.user_id, IntentKind::SettingPayoutTarget, &next)
                .await?;
            if updated {
                return Ok(vec![format!(
                    "Use {} as your payout target? Send 'confirm' to save it, or 'cancel' to abort.",
                    trimmed
                )]);
            }
            return Ok(vec![DIALOG_CLOSED.to_string()]);
        }

        Err(LedgerError::InvalidPayoutTarget)
    }

    async fn withdrawal_dialog(
        &self,
        account: &Account,
        draft: Option<&str>,
        confirmable: bool,
        text: &str,
    ) -> Result<Vec<String>, LedgerError> {
        let trimmed = text.trim();
        let keyword = trimmed.to_lowercase();

        if keyword == "cancel" {
            match self.store.cancel_withdrawal_draft(account.user_id).await? {
                Some(balance) => {
                    info!(user_id = account.user_id, balance = %balance, "withdrawal draft cancelled");
                    return Ok(vec![format!(
                        "Withdrawal cancelled. {} is available on your balance again.",
                        balance
                    )]);
                }
                None => return Ok(vec![DIALOG_CLOSED.to_string()]),
            }
        }

        if keyword == "confirm" {
            let Some(target) = draft else {
                return Err(LedgerError::NothingToConfirm);
            };
            if !confirmable {
                return Err(LedgerError::NothingToConfirm);
            }
            return self.withdrawals.confirm_draft(account.user_id, target).await;
        }

        if is_valid_payout_target(trimmed) {
            let locked = account.locked_balance;
            let next = Intent::DraftingWithdrawal {
                locked_amount: locked,
                draft: Some(trimmed.to_string()),
                confirmable: true,
            };
            let updated = self
                .store
                .set_intent_if(account.user_id, IntentKind::DraftingWithdrawal, &next)
                .await?;
            if updated {
                return Ok(vec![format!(
                    "Withdraw {} to {}? Send 'confirm' to submit, or 'cancel' to abort.",
                    locked, trimmed
                )]);
            }
            return Ok(vec![DIALOG_CLOSED.to_string()]);
        }

        Err(LedgerError::InvalidPayoutTarget)
    }

    /// Single-shot: claim the intent first, then forward. A lost claim
    /// means another event already consumed the session.
    async fn support_message(
        &self,
        account: &Account,
        text: &str,
    ) -> Result<Vec<String>, LedgerError> {
        let claimed = self
            .store
            .set_intent_if(
                account.user_id,
                IntentKind::AwaitingSupportMessage,
                &Intent::Idle,
            )
            .await?;
        if !claimed {
            return Ok(vec![DIALOG_CLOSED.to_string()]);
        }

        broadcast(
            self.notifier.as_ref(),
            &self.policy.admin_ids,
            &format!("Support message from user {}: {}", account.user_id, text.trim()),
        )
        .await;
        info!(user_id = account.user_id, "support message forwarded");

        Ok(vec![
            "Thanks! Your message went to the team. We'll get back to you.".to_string(),
        ])
    }
}
