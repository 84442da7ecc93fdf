//! Ledger Store Layer
//!
//! Trait seams over persistence so engines stay storage-agnostic.
//! Two backends: PostgreSQL (`PgStore`) for deployments and an in-memory
//! store (`MemoryStore`) for tests and single-node development.
//!
//! Every state transition is exposed as a single conditional operation
//! ("update only if still in the expected state") so concurrent events
//! degrade to one winner plus benign no-ops, never double effects.

pub mod db;
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use models::{
    Account, ConfirmedReferral, Intent, IntentKind, InvalidReason, PendingReferral,
    ReferrerCredit, ReferrerRank, RequiredGroup, UserId, Withdrawal, WithdrawalId,
};

/// Maximum records one confirmation pass pulls from the store.
pub const SWEEP_BATCH_LIMIT: i64 = 500;

/// Store-level failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row failed to map back into a model
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Unique-key collision the caller can retry around
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Account records: balances, locks, referral codes, intent columns.
#[async_trait]
pub trait AccountStore {
    /// Insert a fresh account.
    ///
    /// Returns false if the user already has one. A referral-code
    /// collision surfaces as `StoreError::Conflict`; the caller retries
    /// with a newly generated code.
    async fn create_account(&self, account: &Account) -> Result<bool, StoreError>;

    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, StoreError>;

    async fn get_by_referral_code(&self, code: &str) -> Result<Option<Account>, StoreError>;

    /// Add `delta` (may be negative) to the spendable balance.
    ///
    /// Applies only while the result stays non-negative; returns the new
    /// balance, or None when the account is missing or the adjustment
    /// would overdraw.
    async fn adjust_balance(
        &self,
        user_id: UserId,
        delta: Decimal,
    ) -> Result<Option<Decimal>, StoreError>;

    /// Open a withdrawal draft: move the entire balance into the lock and
    /// set the drafting intent, in one conditional update.
    ///
    /// Requires no existing lock and balance >= `min_amount`. Returns the
    /// locked amount, or None when a precondition failed.
    async fn begin_withdrawal_draft(
        &self,
        user_id: UserId,
        min_amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError>;

    /// Abort an open draft: refund the lock into the balance and clear the
    /// intent. Returns the restored balance, or None if no draft was open.
    async fn cancel_withdrawal_draft(&self, user_id: UserId)
        -> Result<Option<Decimal>, StoreError>;

    /// Close a confirmable draft: clear the intent and persist `target` as
    /// the account's payout target. The lock stays in place for the
    /// withdrawal record. Returns the locked amount, or None when the
    /// draft is missing, not confirmable, or holds a different target.
    async fn finalize_withdrawal_draft(
        &self,
        user_id: UserId,
        target: &str,
    ) -> Result<Option<Decimal>, StoreError>;

    /// Replace the intent only if the current kind matches `expected`.
    async fn set_intent_if(
        &self,
        user_id: UserId,
        expected: IntentKind,
        next: &Intent,
    ) -> Result<bool, StoreError>;

    /// Replace the intent unless a withdrawal draft is open (drafts hold
    /// locked funds and must be confirmed or cancelled explicitly).
    async fn set_intent_unless_drafting(
        &self,
        user_id: UserId,
        next: &Intent,
    ) -> Result<bool, StoreError>;

    /// Persist the payout-target draft: requires the setting intent with
    /// exactly this draft, then stores it and returns to idle.
    async fn commit_payout_target(
        &self,
        user_id: UserId,
        target: &str,
    ) -> Result<bool, StoreError>;

    /// Zero the lock after a withdrawal is paid. Balance is untouched.
    async fn clear_locked(&self, user_id: UserId) -> Result<bool, StoreError>;

    /// Refund a cancelled withdrawal: add `amount` to the balance and zero
    /// the lock.
    async fn refund_locked(&self, user_id: UserId, amount: Decimal) -> Result<bool, StoreError>;

    /// Referrers ranked by confirmed count, descending.
    async fn top_referrers(&self, limit: i64) -> Result<Vec<ReferrerRank>, StoreError>;
}

/// Referral records and the confirmation audit trail.
#[async_trait]
pub trait ReferralStore {
    /// Record a pending referral. First referrer wins: returns false when
    /// the referred user is already recorded, without touching the row.
    async fn create_pending(
        &self,
        referred_id: UserId,
        referrer_id: UserId,
        referral_code: &str,
    ) -> Result<bool, StoreError>;

    async fn get_referral(&self, referral_id: i64) -> Result<Option<PendingReferral>, StoreError>;

    /// Pending records eligible for a confirmation pass, oldest first,
    /// capped at `SWEEP_BATCH_LIMIT`. `created_before` is None for a
    /// forced pass (delay waived).
    async fn due_pending(
        &self,
        created_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<PendingReferral>, StoreError>;

    /// Fused claim + credit: transition the record pending -> confirmed
    /// AND add the reward to the referrer's balance and confirmed count,
    /// as one conditional statement.
    ///
    /// Returns the post-credit snapshot, or None when the record is no
    /// longer pending or the referrer account is missing. At most one
    /// caller ever receives Some for a given record, even across fully
    /// concurrent passes.
    async fn confirm_and_credit(
        &self,
        referral_id: i64,
        reward: Decimal,
    ) -> Result<Option<ReferrerCredit>, StoreError>;

    /// Transition pending -> invalid with a reason. Returns false if the
    /// record already left pending.
    async fn mark_invalid_if_pending(
        &self,
        referral_id: i64,
        reason: InvalidReason,
    ) -> Result<bool, StoreError>;

    /// Append the confirmation audit row.
    async fn record_confirmed(&self, confirmed: &ConfirmedReferral) -> Result<(), StoreError>;

    /// Confirmations credited to `referrer_id` since `since` (rate-limit
    /// lookback).
    async fn confirmed_count_since(
        &self,
        referrer_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Open referrals currently recorded for this referrer.
    async fn pending_count_for(&self, referrer_id: UserId) -> Result<i64, StoreError>;
}

/// Withdrawal request records.
#[async_trait]
pub trait WithdrawalStore {
    async fn create_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), StoreError>;

    async fn get_withdrawal(
        &self,
        withdrawal_id: WithdrawalId,
    ) -> Result<Option<Withdrawal>, StoreError>;

    /// Transition pending -> paid and stamp the deciding admin. Returns
    /// the updated record, or None when the record is missing or already
    /// decided.
    async fn mark_paid_if_pending(
        &self,
        withdrawal_id: WithdrawalId,
        admin_id: UserId,
    ) -> Result<Option<Withdrawal>, StoreError>;

    /// Transition pending -> cancelled and stamp the deciding admin.
    async fn mark_cancelled_if_pending(
        &self,
        withdrawal_id: WithdrawalId,
        admin_id: UserId,
    ) -> Result<Option<Withdrawal>, StoreError>;

    /// All pending withdrawals, oldest first.
    async fn list_pending_withdrawals(&self) -> Result<Vec<Withdrawal>, StoreError>;

    /// The user's most recent withdrawal in any state.
    async fn latest_withdrawal_for(
        &self,
        user_id: UserId,
    ) -> Result<Option<Withdrawal>, StoreError>;
}

/// Admin-managed required-membership groups.
#[async_trait]
pub trait GroupStore {
    /// Returns false if the group is already registered.
    async fn add_group(&self, group: &RequiredGroup) -> Result<bool, StoreError>;

    /// Returns false if the group was not registered.
    async fn remove_group(&self, group_id: &str) -> Result<bool, StoreError>;

    async fn list_groups(&self) -> Result<Vec<RequiredGroup>, StoreError>;
}

/// The full store surface engines program against.
#[async_trait]
pub trait LedgerStore:
    AccountStore + ReferralStore + WithdrawalStore + GroupStore + Send + Sync
{
    /// Cheap liveness probe for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
