//! Withdrawal Ledger
//!
//! Locks the full balance while a draft is open, turns a confirmed draft
//! into a pending withdrawal, and applies administrator decisions. The
//! intent columns are the serialization point: every transition goes
//! through a conditional update, so a draft can be confirmed or cancelled
//! but never both.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::notify::{broadcast, notify_quietly, Notifier};
use crate::store::models::{Account, IntentKind, UserId, Withdrawal, WithdrawalId};
use crate::store::LedgerStore;

use super::error::LedgerError;
use super::{LedgerPolicy, DIALOG_CLOSED};

pub struct WithdrawalLedger {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<LedgerPolicy>,
}

impl WithdrawalLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        policy: Arc<LedgerPolicy>,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    /// Open a withdrawal draft for the account's entire balance.
    pub async fn begin_draft(&self, account: &Account) -> Result<Vec<String>, LedgerError> {
        let locked = self
            .store
            .begin_withdrawal_draft(account.user_id, self.policy.min_withdrawal)
            .await?;

        let Some(locked) = locked else {
            // Re-read to name the rejection
            let current = self
                .store
                .get_account(account.user_id)
                .await?
                .ok_or(LedgerError::AccountNotFound(account.user_id))?;
            if current.locked_balance > Decimal::ZERO {
                if current.intent.kind() == IntentKind::DraftingWithdrawal {
                    return Err(LedgerError::DraftInProgress);
                }
                return Err(LedgerError::WithdrawalInFlight);
            }
            return Err(LedgerError::BelowMinimum {
                minimum: self.policy.min_withdrawal,
                balance: current.balance,
            });
        };

        info!(user_id = account.user_id, amount = %locked, "withdrawal draft opened");

        let mut reply = format!(
            "Your full balance of {} is now reserved for this withdrawal. \
             Send the payout target to receive it.",
            locked
        );
        if let Some(saved) = &account.payout_target {
            reply.push_str(&format!(
                " Your saved target is {}; resend it to use it again.",
                saved
            ));
        }
        reply.push_str(" Send 'cancel' to abort.");
        Ok(vec![reply])
    }

    /// Turn a confirmable draft into a pending withdrawal.
    ///
    /// The intent update runs first and decides the race; the record insert
    /// and the admin fan-out follow.
    pub async fn confirm_draft(
        &self,
        user_id: UserId,
        target: &str,
    ) -> Result<Vec<String>, LedgerError> {
        let Some(amount) = self.store.finalize_withdrawal_draft(user_id, target).await? else {
            debug!(user_id, "draft confirm lost to a concurrent event");
            return Ok(vec![DIALOG_CLOSED.to_string()]);
        };

        let withdrawal = Withdrawal::new(user_id, amount, target.to_string());
        if let Err(e) = self.store.create_withdrawal(&withdrawal).await {
            // The lock is already committed; give the money back rather
            // than stranding it without a record.
            warn!(user_id, error = %e, "withdrawal insert failed, refunding the lock");
            if !self.store.refund_locked(user_id, amount).await? {
                warn!(user_id, amount = %amount, "refund after failed insert found no account");
            }
            return Err(e.into());
        }

        info!(
            withdrawal_id = %withdrawal.withdrawal_id,
            user_id,
            amount = %amount,
            target,
            "withdrawal submitted"
        );

        broadcast(
            self.notifier.as_ref(),
            &self.policy.admin_ids,
            &format!(
                "Withdrawal request {}: user {} asks {} to {}",
                withdrawal.withdrawal_id, user_id, amount, target
            ),
        )
        .await;

        Ok(vec![format!(
            "Withdrawal {} submitted: {} to {}. An administrator will process it manually.",
            withdrawal.withdrawal_id, amount, target
        )])
    }

    /// Administrator decision: pending -> paid. The locked amount leaves
    /// the ledger; the balance was already debited at draft time.
    pub async fn settle(
        &self,
        withdrawal_id: WithdrawalId,
        admin_id: UserId,
    ) -> Result<Withdrawal, LedgerError> {
        let Some(withdrawal) = self
            .store
            .mark_paid_if_pending(withdrawal_id, admin_id)
            .await?
        else {
            return Err(LedgerError::WithdrawalNotFound(withdrawal_id.to_string()));
        };

        if !self.store.clear_locked(withdrawal.user_id).await? {
            warn!(
                withdrawal_id = %withdrawal.withdrawal_id,
                user_id = withdrawal.user_id,
                "paid withdrawal found no account row to unlock"
            );
        }

        info!(
            withdrawal_id = %withdrawal.withdrawal_id,
            admin_id,
            amount = %withdrawal.amount,
            "withdrawal paid"
        );

        notify_quietly(
            self.notifier.as_ref(),
            withdrawal.user_id,
            &format!(
                "Your withdrawal of {} was sent to {}.",
                withdrawal.amount, withdrawal.payout_target
            ),
        )
        .await;

        Ok(withdrawal)
    }

    /// Administrator decision: pending -> cancelled, amount refunded.
    pub async fn cancel(
        &self,
        withdrawal_id: WithdrawalId,
        admin_id: UserId,
    ) -> Result<Withdrawal, LedgerError> {
        let Some(withdrawal) = self
            .store
            .mark_cancelled_if_pending(withdrawal_id, admin_id)
            .await?
        else {
            return Err(LedgerError::WithdrawalNotFound(withdrawal_id.to_string()));
        };

        if !self
            .store
            .refund_locked(withdrawal.user_id, withdrawal.amount)
            .await?
        {
            warn!(
                withdrawal_id = %withdrawal.withdrawal_id,
                user_id = withdrawal.user_id,
                "cancelled withdrawal found no account row to refund"
            );
        }

        info!(
            withdrawal_id = %withdrawal.withdrawal_id,
            admin_id,
            amount = %withdrawal.amount,
            "withdrawal cancelled"
        );

        notify_quietly(
            self.notifier.as_ref(),
            withdrawal.user_id,
            &format!(
                "Your withdrawal of {} was declined; the amount is back on your balance.",
                withdrawal.amount
            ),
        )
        .await;

        Ok(withdrawal)
    }

    pub async fn list_pending(&self) -> Result<Vec<Withdrawal>, LedgerError> {
        Ok(self.store.list_pending_withdrawals().await?)
    }

    pub async fn latest_for(&self, user_id: UserId) -> Result<Option<Withdrawal>, LedgerError> {
        Ok(self.store.latest_withdrawal_for(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::store::memory::MemoryStore;
    use crate::store::models::{Intent, WithdrawalStatus};
    use crate::store::AccountStore;

    fn ledger_with(
        admins: Vec<UserId>,
    ) -> (Arc<MemoryStore>, Arc<RecordingNotifier>, WithdrawalLedger) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let policy = Arc::new(LedgerPolicy {
            admin_ids: admins,
            ..LedgerPolicy::default()
        });
        let ledger = WithdrawalLedger::new(store.clone(), notifier.clone(), policy);
        (store, notifier, ledger)
    }

    async fn funded_account(store: &MemoryStore, user_id: UserId, amount: i64) -> Account {
        store
            .create_account(&Account::new(user_id))
            .await
            .unwrap();
        store
            .adjust_balance(user_id, Decimal::from(amount))
            .await
            .unwrap()
            .unwrap();
        store.get_account(user_id).await.unwrap().unwrap()
    }

    /// Shortcut past the dialogue: put the draft in the confirmable state.
    async fn make_confirmable(store: &MemoryStore, user_id: UserId, amount: i64, target: &str) {
        store
            .set_intent_if(
                user_id,
                IntentKind::DraftingWithdrawal,
                &Intent::DraftingWithdrawal {
                    locked_amount: Decimal::from(amount),
                    draft: Some(target.to_string()),
                    confirmable: true,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_begin_draft_locks_everything() {
        let (store, _, ledger) = ledger_with(vec![]);
        let account = funded_account(&store, 10, 100).await;

        let replies = ledger.begin_draft(&account).await.unwrap();
        assert!(replies[0].contains("100"));

        let account = store.get_account(10).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.locked_balance, Decimal::from(100));
        assert!(!account.intent.confirmable());
        assert_eq!(account.intent.draft(), None);
    }

    #[tokio::test]
    async fn test_begin_draft_below_minimum() {
        let (store, _, ledger) = ledger_with(vec![]);
        let account = funded_account(&store, 11, 20).await;

        let err = ledger.begin_draft(&account).await.unwrap_err();
        assert_eq!(err.code(), "BELOW_MINIMUM");

        // Nothing moved
        let account = store.get_account(11).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::from(20));
        assert_eq!(account.locked_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_confirm_creates_withdrawal_and_notifies_admins() {
        let (store, notifier, ledger) = ledger_with(vec![900, 901]);
        let account = funded_account(&store, 12, 80).await;

        ledger.begin_draft(&account).await.unwrap();
        make_confirmable(&store, 12, 80, "pay@out").await;

        let replies = ledger.confirm_draft(12, "pay@out").await.unwrap();
        assert!(replies[0].contains("80"));

        let pending = ledger.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].amount, Decimal::from(80));
        assert_eq!(pending[0].payout_target, "pay@out");

        // Both admins were told
        assert_eq!(notifier.sent_to(900).len(), 1);
        assert_eq!(notifier.sent_to(901).len(), 1);

        // Lock survives until the admin decision
        let account = store.get_account(12).await.unwrap().unwrap();
        assert_eq!(account.locked_balance, Decimal::from(80));
        assert_eq!(account.payout_target.as_deref(), Some("pay@out"));
        assert_eq!(account.intent.kind(), IntentKind::Idle);
    }

    #[tokio::test]
    async fn test_settle_clears_lock_without_refund() {
        let (store, notifier, ledger) = ledger_with(vec![900]);
        let account = funded_account(&store, 13, 60).await;
        ledger.begin_draft(&account).await.unwrap();
        make_confirmable(&store, 13, 60, "a@bc").await;
        ledger.confirm_draft(13, "a@bc").await.unwrap();
        let id = ledger.list_pending().await.unwrap()[0].withdrawal_id;

        let paid = ledger.settle(id, 900).await.unwrap();
        assert_eq!(paid.status, WithdrawalStatus::Paid);
        assert_eq!(paid.decided_by, Some(900));

        let account = store.get_account(13).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.locked_balance, Decimal::ZERO);

        // Settling again reports not-found and changes nothing
        let err = ledger.settle(id, 900).await.unwrap_err();
        assert_eq!(err.code(), "WITHDRAWAL_NOT_FOUND");
        // One payout note to the user (13), nothing duplicated
        assert_eq!(notifier.sent_to(13).len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_refunds_amount() {
        let (store, _, ledger) = ledger_with(vec![900]);
        let account = funded_account(&store, 14, 75).await;
        ledger.begin_draft(&account).await.unwrap();
        make_confirmable(&store, 14, 75, "x@yz").await;
        ledger.confirm_draft(14, "x@yz").await.unwrap();
        let id = ledger.list_pending().await.unwrap()[0].withdrawal_id;

        let cancelled = ledger.cancel(id, 900).await.unwrap();
        assert_eq!(cancelled.status, WithdrawalStatus::Cancelled);

        let account = store.get_account(14).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::from(75));
        assert_eq!(account.locked_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let (_, _, ledger) = ledger_with(vec![900]);
        let err = ledger.settle(WithdrawalId::new(), 900).await.unwrap_err();
        assert_eq!(err.code(), "WITHDRAWAL_NOT_FOUND");
    }
}
