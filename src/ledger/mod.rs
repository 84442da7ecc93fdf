//! Ledger Engines
//!
//! The four engines behind the dispatcher: the intent dialogue machine,
//! the referral confirmation engine, the withdrawal ledger, and the admin
//! adjustment service. All of them program against `LedgerStore` and treat
//! a lost conditional update as a benign already-handled outcome.

pub mod admin;
pub mod dialog;
pub mod error;
pub mod referral;
pub mod withdrawal;

pub use error::LedgerError;
pub use referral::SweepReport;

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::notify::Notifier;
use crate::store::models::UserId;
use crate::store::LedgerStore;

use admin::AdminService;
use dialog::DialogEngine;
use referral::{ConfirmationEngine, ReferralService};
use withdrawal::WithdrawalLedger;

/// Reply for conditional updates that lost to a concurrent event from the
/// same user. Nothing was changed twice; the dialogue simply moved on.
pub const DIALOG_CLOSED: &str = "That dialogue already finished. Send /help to see what you can do.";

/// Program tunables shared by the engines.
#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    /// Smallest balance a withdrawal draft can open with
    pub min_withdrawal: Decimal,
    /// Credited to the referrer per confirmed referral
    pub referral_reward: Decimal,
    /// How long a referral stays pending before a regular sweep takes it
    pub confirmation_delay: chrono::Duration,
    /// Confirmations allowed per referrer per trailing hour; 0 disables
    /// the cap
    pub referral_hourly_cap: i64,
    /// Administrator user ids
    pub admin_ids: Vec<UserId>,
}

impl LedgerPolicy {
    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            min_withdrawal: Decimal::from(50),
            referral_reward: Decimal::new(5, 1),
            confirmation_delay: chrono::Duration::hours(48),
            referral_hourly_cap: 20,
            admin_ids: Vec::new(),
        }
    }
}

/// All engines wired over one store, notifier, and policy.
pub struct Engines {
    pub policy: Arc<LedgerPolicy>,
    pub referrals: Arc<ReferralService>,
    pub confirmation: Arc<ConfirmationEngine>,
    pub withdrawals: Arc<WithdrawalLedger>,
    pub dialog: Arc<DialogEngine>,
    pub admin: Arc<AdminService>,
}

impl Engines {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        policy: LedgerPolicy,
    ) -> Self {
        let policy = Arc::new(policy);
        let withdrawals = Arc::new(WithdrawalLedger::new(
            store.clone(),
            notifier.clone(),
            policy.clone(),
        ));
        let confirmation = Arc::new(ConfirmationEngine::new(
            store.clone(),
            notifier.clone(),
            policy.clone(),
        ));
        let referrals = Arc::new(ReferralService::new(store.clone()));
        let dialog = Arc::new(DialogEngine::new(
            store.clone(),
            notifier.clone(),
            policy.clone(),
            withdrawals.clone(),
        ));
        let admin = Arc::new(AdminService::new(
            store,
            notifier,
            policy.clone(),
            confirmation.clone(),
            withdrawals.clone(),
        ));

        Self {
            policy,
            referrals,
            confirmation,
            withdrawals,
            dialog,
            admin,
        }
    }
}
