//! Referral Recording and Confirmation
//!
//! Arrivals are recorded immediately (first referrer wins); rewards land
//! only after a confirmation pass judges the recruit durable. Passes are
//! idempotent and safe to overlap: the claim and the credit are one
//! conditional store operation, so a record pays out at most once no
//! matter how many sweeps race over it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::notify::{notify_quietly, Notifier};
use crate::store::models::{
    Account, ConfirmedReferral, InvalidReason, PendingReferral, ReferralStatus,
};
use crate::store::LedgerStore;

use super::error::LedgerError;
use super::LedgerPolicy;

/// Records arrivals carrying a referral code.
pub struct ReferralService {
    store: Arc<dyn LedgerStore>,
}

impl ReferralService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Record that `referred` arrived through `code`. Returns the reply
    /// lines to append to the welcome message.
    pub async fn record_arrival(
        &self,
        referred: &Account,
        code: &str,
    ) -> Result<Vec<String>, LedgerError> {
        let Some(referrer) = self.store.get_by_referral_code(code).await? else {
            debug!(referred = referred.user_id, code, "unknown referral code");
            return Ok(vec![
                "That referral code does not match anyone, but welcome anyway!".to_string(),
            ]);
        };

        // Self-referrals are recorded too; the confirmation pass rejects
        // them with an audit trail instead of dropping them silently.
        let created = self
            .store
            .create_pending(referred.user_id, referrer.user_id, code)
            .await?;

        if created {
            info!(
                referred = referred.user_id,
                referrer = referrer.user_id,
                code,
                "referral recorded"
            );
            Ok(vec![
                "Your referral was recorded. It becomes final after the trial period.".to_string(),
            ])
        } else {
            // First referrer wins; later codes are dropped without a fuss
            debug!(
                referred = referred.user_id,
                code, "referral already recorded, keeping the first"
            );
            Ok(vec![])
        }
    }
}

/// What one confirmation pass did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub confirmed: Vec<i64>,
    pub invalidated: Vec<i64>,
    /// Left pending for a later pass (rate-limited referrers)
    pub deferred: usize,
    /// Store errors; the records stay pending and will be retried
    pub failed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty()
            && self.invalidated.is_empty()
            && self.deferred == 0
            && self.failed == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} confirmed, {} invalidated, {} deferred, {} failed",
            self.confirmed.len(),
            self.invalidated.len(),
            self.deferred,
            self.failed
        )
    }
}

enum StepOutcome {
    Confirmed,
    Invalidated,
    Deferred,
    /// A concurrent pass got there first
    AlreadyHandled,
}

/// Promotes due pending referrals to confirmed or invalid.
pub struct ConfirmationEngine {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<LedgerPolicy>,
}

impl ConfirmationEngine {
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

    /// Run one pass. `force` waives the confirmation delay but changes no
    /// other rule. Records are independent: one failure never aborts the
    /// batch.
    pub async fn run(&self, force: bool) -> Result<SweepReport, LedgerError> {
        let cutoff = if force {
            None
        } else {
            Some(Utc::now() - self.policy.confirmation_delay)
        };

        let due = self.store.due_pending(cutoff).await?;
        if due.is_empty() {
            return Ok(SweepReport::default());
        }
        debug!(count = due.len(), force, "confirmation pass started");

        let mut report = SweepReport::default();
        for record in due {
            match self.step(&record).await {
                Ok(StepOutcome::Confirmed) => report.confirmed.push(record.referral_id),
                Ok(StepOutcome::Invalidated) => report.invalidated.push(record.referral_id),
                Ok(StepOutcome::Deferred) => report.deferred += 1,
                Ok(StepOutcome::AlreadyHandled) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        referral_id = record.referral_id,
                        error = %e,
                        "confirmation step failed, record stays pending"
                    );
                }
            }
        }

        if !report.is_empty() {
            info!(summary = %report.summary(), force, "confirmation pass finished");
        }
        Ok(report)
    }

    async fn step(&self, record: &PendingReferral) -> Result<StepOutcome, LedgerError> {
        // Self-referral is checked first so it wins over every other verdict
        if record.referred_id == record.referrer_id {
            return self.invalidate(record, InvalidReason::SelfReferral).await;
        }

        if self.store.get_account(record.referred_id).await?.is_none() {
            return self.invalidate(record, InvalidReason::NoUserRecord).await;
        }

        // Over the hourly cap: defer, never invalidate. The next pass
        // retries once the window has moved on.
        if self.policy.referral_hourly_cap > 0 {
            let since = Utc::now() - chrono::Duration::hours(1);
            let recent = self
                .store
                .confirmed_count_since(record.referrer_id, since)
                .await?;
            if recent >= self.policy.referral_hourly_cap {
                debug!(
                    referral_id = record.referral_id,
                    referrer = record.referrer_id,
                    recent,
                    "hourly cap reached, deferring"
                );
                return Ok(StepOutcome::Deferred);
            }
        }

        match self
            .store
            .confirm_and_credit(record.referral_id, self.policy.referral_reward)
            .await?
        {
            Some(credit) => {
                let audit = ConfirmedReferral {
                    referrer_id: record.referrer_id,
                    referred_id: record.referred_id,
                    referral_code: record.referral_code.clone(),
                    confirmed_at: Utc::now(),
                };
                // The credit is already committed; a missed audit row only
                // loosens the rate-limit lookback.
                if let Err(e) = self.store.record_confirmed(&audit).await {
                    warn!(referral_id = record.referral_id, error = %e, "audit row write failed");
                }

                info!(
                    referral_id = record.referral_id,
                    referrer = record.referrer_id,
                    referred = record.referred_id,
                    balance = %credit.balance,
                    "referral confirmed"
                );
                notify_quietly(
                    self.notifier.as_ref(),
                    record.referrer_id,
                    &format!(
                        "Referral confirmed! +{} on your balance (now {}). Confirmed referrals: {}.",
                        self.policy.referral_reward, credit.balance, credit.confirmed_referrals
                    ),
                )
                .await;
                Ok(StepOutcome::Confirmed)
            }
            None => {
                // Either a concurrent pass took the record, or the claim
                // refused because the referrer row is gone. Re-read to tell
                // them apart.
                match self.store.get_referral(record.referral_id).await? {
                    Some(current) if current.status == ReferralStatus::Pending => {
                        self.invalidate(record, InvalidReason::NoReferrerRecord)
                            .await
                    }
                    _ => {
                        debug!(
                            referral_id = record.referral_id,
                            "already handled by another pass"
                        );
                        Ok(StepOutcome::AlreadyHandled)
                    }
                }
            }
        }
    }

    async fn invalidate(
        &self,
        record: &PendingReferral,
        reason: InvalidReason,
    ) -> Result<StepOutcome, LedgerError> {
        if self
            .store
            .mark_invalid_if_pending(record.referral_id, reason)
            .await?
        {
            info!(
                referral_id = record.referral_id,
                reason = %reason,
                "referral invalidated"
            );
            Ok(StepOutcome::Invalidated)
        } else {
            debug!(
                referral_id = record.referral_id,
                "already handled by another pass"
            );
            Ok(StepOutcome::AlreadyHandled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::store::memory::MemoryStore;
    use crate::store::models::UserId;
    use crate::store::{AccountStore, ReferralStore};
    use rust_decimal::Decimal;

    struct Rig {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        referrals: ReferralService,
        engine: ConfirmationEngine,
        policy: Arc<LedgerPolicy>,
    }

    fn rig_with(policy: LedgerPolicy) -> Rig {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let policy = Arc::new(policy);
        let referrals = ReferralService::new(store.clone());
        let engine = ConfirmationEngine::new(store.clone(), notifier.clone(), policy.clone());
        Rig {
            store,
            notifier,
            referrals,
            engine,
            policy,
        }
    }

    fn rig() -> Rig {
        rig_with(LedgerPolicy::default())
    }

    async fn signup(rig: &Rig, user_id: UserId) -> Account {
        rig.store
            .create_account(&Account::new(user_id))
            .await
            .unwrap();
        rig.store.get_account(user_id).await.unwrap().unwrap()
    }

    async fn refer(rig: &Rig, referrer: &Account, referred: UserId) {
        let referred = signup(rig, referred).await;
        rig.referrals
            .record_arrival(&referred, &referrer.referral_code)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_two_confirmations_credit_twice() {
        let rig = rig();
        let referrer = signup(&rig, 1).await;
        refer(&rig, &referrer, 2).await;
        refer(&rig, &referrer, 3).await;

        let report = rig.engine.run(true).await.unwrap();
        assert_eq!(report.confirmed.len(), 2);
        assert!(report.invalidated.is_empty());

        let account = rig.store.get_account(1).await.unwrap().unwrap();
        assert_eq!(account.balance, rig.policy.referral_reward * Decimal::TWO);
        assert_eq!(account.confirmed_referrals, 2);

        // Referrer heard about both
        assert_eq!(rig.notifier.sent_to(1).len(), 2);
    }

    #[tokio::test]
    async fn test_regular_pass_respects_delay() {
        let rig = rig();
        let referrer = signup(&rig, 1).await;
        refer(&rig, &referrer, 2).await;

        // Brand new record: the regular pass leaves it alone
        let report = rig.engine.run(false).await.unwrap();
        assert!(report.is_empty());

        // The forced pass resolves it
        let report = rig.engine.run(true).await.unwrap();
        assert_eq!(report.confirmed.len(), 1);
    }

    #[tokio::test]
    async fn test_self_referral_rejected_even_forced() {
        let rig = rig();
        let user = signup(&rig, 5).await;
        rig.referrals
            .record_arrival(&user, &user.referral_code)
            .await
            .unwrap();

        let report = rig.engine.run(true).await.unwrap();
        assert_eq!(report.invalidated.len(), 1);
        assert!(report.confirmed.is_empty());

        let account = rig.store.get_account(5).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.confirmed_referrals, 0);

        let record = rig.store.get_referral(report.invalidated[0]).await.unwrap().unwrap();
        assert_eq!(record.reason, Some(InvalidReason::SelfReferral));
    }

    #[tokio::test]
    async fn test_missing_referred_account_invalidates() {
        let rig = rig();
        let referrer = signup(&rig, 1).await;
        // Record created directly: user 99 never signed up
        rig.store
            .create_pending(99, 1, &referrer.referral_code)
            .await
            .unwrap();

        let report = rig.engine.run(true).await.unwrap();
        assert_eq!(report.invalidated.len(), 1);

        let record = rig.store.get_referral(report.invalidated[0]).await.unwrap().unwrap();
        assert_eq!(record.reason, Some(InvalidReason::NoUserRecord));
    }

    #[tokio::test]
    async fn test_missing_referrer_account_invalidates() {
        let rig = rig();
        signup(&rig, 2).await;
        // Referrer 77 has no account row
        rig.store.create_pending(2, 77, "GHOST").await.unwrap();

        let report = rig.engine.run(true).await.unwrap();
        assert_eq!(report.invalidated.len(), 1);

        let record = rig.store.get_referral(report.invalidated[0]).await.unwrap().unwrap();
        assert_eq!(record.reason, Some(InvalidReason::NoReferrerRecord));
    }

    #[tokio::test]
    async fn test_hourly_cap_defers_instead_of_invalidating() {
        let rig = rig_with(LedgerPolicy {
            referral_hourly_cap: 1,
            ..LedgerPolicy::default()
        });
        let referrer = signup(&rig, 1).await;
        refer(&rig, &referrer, 2).await;
        refer(&rig, &referrer, 3).await;

        let report = rig.engine.run(true).await.unwrap();
        assert_eq!(report.confirmed.len(), 1);
        assert_eq!(report.deferred, 1);

        // The deferred record is untouched and still eligible later
        let account = rig.store.get_account(1).await.unwrap().unwrap();
        assert_eq!(account.confirmed_referrals, 1);
        let due = rig.store.due_pending(None).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, ReferralStatus::Pending);
    }

    #[tokio::test]
    async fn test_concurrent_passes_credit_once() {
        let rig = rig();
        let referrer = signup(&rig, 1).await;
        refer(&rig, &referrer, 2).await;

        let (a, b) = tokio::join!(rig.engine.run(true), rig.engine.run(true));
        let total = a.unwrap().confirmed.len() + b.unwrap().confirmed.len();
        assert_eq!(total, 1);

        let account = rig.store.get_account(1).await.unwrap().unwrap();
        assert_eq!(account.balance, rig.policy.referral_reward);
        assert_eq!(account.confirmed_referrals, 1);
    }

    #[tokio::test]
    async fn test_first_referrer_wins_on_arrival() {
        let rig = rig();
        let first = signup(&rig, 1).await;
        let second = signup(&rig, 2).await;
        let referred = signup(&rig, 3).await;

        let replies = rig
            .referrals
            .record_arrival(&referred, &first.referral_code)
            .await
            .unwrap();
        assert!(!replies.is_empty());

        // The second code is dropped without a reply
        let replies = rig
            .referrals
            .record_arrival(&referred, &second.referral_code)
            .await
            .unwrap();
        assert!(replies.is_empty());

        let report = rig.engine.run(true).await.unwrap();
        assert_eq!(report.confirmed.len(), 1);
        assert_eq!(
            rig.store.get_account(1).await.unwrap().unwrap().confirmed_referrals,
            1
        );
        assert_eq!(
            rig.store.get_account(2).await.unwrap().unwrap().confirmed_referrals,
            0
        );
    }

    #[tokio::test]
    async fn test_unknown_code_records_nothing() {
        let rig = rig();
        let referred = signup(&rig, 4).await;
        let replies = rig
            .referrals
            .record_arrival(&referred, "NOSUCH")
            .await
            .unwrap();
        assert!(replies[0].contains("welcome"));

        let report = rig.engine.run(true).await.unwrap();
        assert!(report.is_empty());
    }
}
