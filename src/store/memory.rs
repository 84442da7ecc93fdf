//! In-Memory Ledger Store
//!
//! Single-process backend for tests and local development. One mutex over
//! the whole table set, so multi-table operations (confirm-and-credit) stay
//! atomic exactly like their single-statement PostgreSQL counterparts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

use super::models::{
    Account, ConfirmedReferral, Intent, IntentKind, InvalidReason, PendingReferral,
    ReferralStatus, ReferrerCredit, ReferrerRank, RequiredGroup, UserId, Withdrawal,
    WithdrawalId, WithdrawalStatus,
};
use super::{
    AccountStore, GroupStore, LedgerStore, ReferralStore, StoreError, WithdrawalStore,
    SWEEP_BATCH_LIMIT,
};

#[derive(Default)]
struct Inner {
    accounts: FxHashMap<UserId, Account>,
    /// referral_code -> user_id (mirrors the unique index)
    codes: FxHashMap<String, UserId>,
    referrals: FxHashMap<i64, PendingReferral>,
    /// referred_id -> referral_id (first referrer wins)
    referred_index: FxHashMap<UserId, i64>,
    next_referral_id: i64,
    confirmed: Vec<ConfirmedReferral>,
    withdrawals: FxHashMap<WithdrawalId, Withdrawal>,
    groups: FxHashMap<String, RequiredGroup>,
}

/// In-memory ledger store
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Keep the drafting payload's locked amount in sync with the account
/// column, which is the source of truth.
fn normalized(next: &Intent, locked: Decimal) -> Intent {
    match next {
        Intent::DraftingWithdrawal {
            draft, confirmable, ..
        } => Intent::DraftingWithdrawal {
            locked_amount: locked,
            draft: draft.clone(),
            confirmable: *confirmable,
        },
        other => other.clone(),
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, account: &Account) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.accounts.contains_key(&account.user_id) {
            return Ok(false);
        }
        if inner.codes.contains_key(&account.referral_code) {
            return Err(StoreError::Conflict("referral code collision".to_string()));
        }
        inner
            .codes
            .insert(account.referral_code.clone(), account.user_id);
        inner.accounts.insert(account.user_id, account.clone());
        Ok(true)
    }

    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.accounts.get(&user_id).cloned())
    }

    async fn get_by_referral_code(&self, code: &str) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.lock().await;
        let user_id = match inner.codes.get(code) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(inner.accounts.get(&user_id).cloned())
    }

    async fn adjust_balance(
        &self,
        user_id: UserId,
        delta: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&user_id) else {
            return Ok(None);
        };
        let next = account.balance + delta;
        if next < Decimal::ZERO {
            return Ok(None);
        }
        account.balance = next;
        Ok(Some(account.balance))
    }

    async fn begin_withdrawal_draft(
        &self,
        user_id: UserId,
        min_amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&user_id) else {
            return Ok(None);
        };
        if account.locked_balance != Decimal::ZERO || account.balance < min_amount {
            return Ok(None);
        }
        let locked = account.balance;
        account.locked_balance = locked;
        account.balance = Decimal::ZERO;
        account.intent = Intent::DraftingWithdrawal {
            locked_amount: locked,
            draft: None,
            confirmable: false,
        };
        Ok(Some(locked))
    }

    async fn cancel_withdrawal_draft(
        &self,
        user_id: UserId,
    ) -> Result<Option<Decimal>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&user_id) else {
            return Ok(None);
        };
        if account.intent.kind() != IntentKind::DraftingWithdrawal {
            return Ok(None);
        }
        account.balance += account.locked_balance;
        account.locked_balance = Decimal::ZERO;
        account.intent = Intent::Idle;
        Ok(Some(account.balance))
    }

    async fn finalize_withdrawal_draft(
        &self,
        user_id: UserId,
        target: &str,
    ) -> Result<Option<Decimal>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&user_id) else {
            return Ok(None);
        };
        let matches = account.intent.kind() == IntentKind::DraftingWithdrawal
            && account.intent.confirmable()
            && account.intent.draft() == Some(target);
        if !matches {
            return Ok(None);
        }
        account.payout_target = Some(target.to_string());
        account.intent = Intent::Idle;
        Ok(Some(account.locked_balance))
    }

    async fn set_intent_if(
        &self,
        user_id: UserId,
        expected: IntentKind,
        next: &Intent,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&user_id) else {
            return Ok(false);
        };
        if account.intent.kind() != expected {
            return Ok(false);
        }
        account.intent = normalized(next, account.locked_balance);
        Ok(true)
    }

    async fn set_intent_unless_drafting(
        &self,
        user_id: UserId,
        next: &Intent,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&user_id) else {
            return Ok(false);
        };
        if account.intent.kind() == IntentKind::DraftingWithdrawal {
            return Ok(false);
        }
        account.intent = normalized(next, account.locked_balance);
        Ok(true)
    }

    async fn commit_payout_target(
        &self,
        user_id: UserId,
        target: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&user_id) else {
            return Ok(false);
        };
        let matches = account.intent.kind() == IntentKind::SettingPayoutTarget
            && account.intent.draft() == Some(target);
        if !matches {
            return Ok(false);
        }
        account.payout_target = Some(target.to_string());
        account.intent = Intent::Idle;
        Ok(true)
    }

    async fn clear_locked(&self, user_id: UserId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&user_id) else {
            return Ok(false);
        };
        account.locked_balance = Decimal::ZERO;
        Ok(true)
    }

    async fn refund_locked(&self, user_id: UserId, amount: Decimal) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&user_id) else {
            return Ok(false);
        };
        account.balance += amount;
        account.locked_balance = Decimal::ZERO;
        Ok(true)
    }

    async fn top_referrers(&self, limit: i64) -> Result<Vec<ReferrerRank>, StoreError> {
        let inner = self.inner.lock().await;
        let mut ranks: Vec<ReferrerRank> = inner
            .accounts
            .values()
            .filter(|a| a.confirmed_referrals > 0)
            .map(|a| ReferrerRank {
                user_id: a.user_id,
                confirmed_referrals: a.confirmed_referrals,
            })
            .collect();
        ranks.sort_by(|a, b| {
            b.confirmed_referrals
                .cmp(&a.confirmed_referrals)
                .then(a.user_id.cmp(&b.user_id))
        });
        ranks.truncate(limit.max(0) as usize);
        Ok(ranks)
    }
}

#[async_trait]
impl ReferralStore for MemoryStore {
    async fn create_pending(
        &self,
        referred_id: UserId,
        referrer_id: UserId,
        referral_code: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.referred_index.contains_key(&referred_id) {
            return Ok(false);
        }
        inner.next_referral_id += 1;
        let referral_id = inner.next_referral_id;
        inner.referred_index.insert(referred_id, referral_id);
        inner.referrals.insert(
            referral_id,
            PendingReferral {
                referral_id,
                referred_id,
                referrer_id,
                referral_code: referral_code.to_string(),
                status: ReferralStatus::Pending,
                reason: None,
                created_at: Utc::now(),
                confirmed_at: None,
            },
        );
        Ok(true)
    }

    async fn get_referral(&self, referral_id: i64) -> Result<Option<PendingReferral>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.referrals.get(&referral_id).cloned())
    }

    async fn due_pending(
        &self,
        created_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<PendingReferral>, StoreError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<PendingReferral> = inner
            .referrals
            .values()
            .filter(|r| r.status == ReferralStatus::Pending)
            .filter(|r| created_before.is_none_or(|cutoff| r.created_at <= cutoff))
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.created_at, r.referral_id));
        due.truncate(SWEEP_BATCH_LIMIT as usize);
        Ok(due)
    }

    async fn confirm_and_credit(
        &self,
        referral_id: i64,
        reward: Decimal,
    ) -> Result<Option<ReferrerCredit>, StoreError> {
        let mut inner = self.inner.lock().await;

        let referrer_id = match inner.referrals.get(&referral_id) {
            Some(r) if r.status == ReferralStatus::Pending => r.referrer_id,
            _ => return Ok(None),
        };
        if !inner.accounts.contains_key(&referrer_id) {
            return Ok(None);
        }

        let now = Utc::now();
        if let Some(record) = inner.referrals.get_mut(&referral_id) {
            record.status = ReferralStatus::Confirmed;
            record.confirmed_at = Some(now);
        }
        Ok(inner.accounts.get_mut(&referrer_id).map(|account| {
            account.balance += reward;
            account.confirmed_referrals += 1;
            ReferrerCredit {
                referrer_id,
                balance: account.balance,
                confirmed_referrals: account.confirmed_referrals,
            }
        }))
    }

    async fn mark_invalid_if_pending(
        &self,
        referral_id: i64,
        reason: InvalidReason,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.referrals.get_mut(&referral_id) else {
            return Ok(false);
        };
        if record.status != ReferralStatus::Pending {
            return Ok(false);
        }
        record.status = ReferralStatus::Invalid;
        record.reason = Some(reason);
        Ok(true)
    }

    async fn record_confirmed(&self, confirmed: &ConfirmedReferral) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.confirmed.push(confirmed.clone());
        Ok(())
    }

    async fn confirmed_count_since(
        &self,
        referrer_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .confirmed
            .iter()
            .filter(|c| c.referrer_id == referrer_id && c.confirmed_at >= since)
            .count() as i64)
    }

    async fn pending_count_for(&self, referrer_id: UserId) -> Result<i64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .referrals
            .values()
            .filter(|r| r.referrer_id == referrer_id && r.status == ReferralStatus::Pending)
            .count() as i64)
    }
}

#[async_trait]
impl WithdrawalStore for MemoryStore {
    async fn create_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .withdrawals
            .insert(withdrawal.withdrawal_id, withdrawal.clone());
        Ok(())
    }

    async fn get_withdrawal(
        &self,
        withdrawal_id: WithdrawalId,
    ) -> Result<Option<Withdrawal>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.withdrawals.get(&withdrawal_id).cloned())
    }

    async fn mark_paid_if_pending(
        &self,
        withdrawal_id: WithdrawalId,
        admin_id: UserId,
    ) -> Result<Option<Withdrawal>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(withdrawal) = inner.withdrawals.get_mut(&withdrawal_id) else {
            return Ok(None);
        };
        if withdrawal.status != WithdrawalStatus::Pending {
            return Ok(None);
        }
        withdrawal.status = WithdrawalStatus::Paid;
        withdrawal.decided_at = Some(Utc::now());
        withdrawal.decided_by = Some(admin_id);
        Ok(Some(withdrawal.clone()))
    }

    async fn mark_cancelled_if_pending(
        &self,
        withdrawal_id: WithdrawalId,
        admin_id: UserId,
    ) -> Result<Option<Withdrawal>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(withdrawal) = inner.withdrawals.get_mut(&withdrawal_id) else {
            return Ok(None);
        };
        if withdrawal.status != WithdrawalStatus::Pending {
            return Ok(None);
        }
        withdrawal.status = WithdrawalStatus::Cancelled;
        withdrawal.decided_at = Some(Utc::now());
        withdrawal.decided_by = Some(admin_id);
        Ok(Some(withdrawal.clone()))
    }

    async fn list_pending_withdrawals(&self) -> Result<Vec<Withdrawal>, StoreError> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<Withdrawal> = inner
            .withdrawals
            .values()
            .filter(|w| w.status == WithdrawalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|w| (w.requested_at, w.withdrawal_id.to_string()));
        Ok(pending)
    }

    async fn latest_withdrawal_for(
        &self,
        user_id: UserId,
    ) -> Result<Option<Withdrawal>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .withdrawals
            .values()
            .filter(|w| w.user_id == user_id)
            .max_by_key(|w| (w.requested_at, w.withdrawal_id.to_string()))
            .cloned())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn add_group(&self, group: &RequiredGroup) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.groups.contains_key(&group.group_id) {
            return Ok(false);
        }
        inner.groups.insert(group.group_id.clone(), group.clone());
        Ok(true)
    }

    async fn remove_group(&self, group_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.groups.remove(group_id).is_some())
    }

    async fn list_groups(&self) -> Result<Vec<RequiredGroup>, StoreError> {
        let inner = self.inner.lock().await;
        let mut groups: Vec<RequiredGroup> = inner.groups.values().cloned().collect();
        groups.sort_by_key(|g| (g.added_at, g.group_id.clone()));
        Ok(groups)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
