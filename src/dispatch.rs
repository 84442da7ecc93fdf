//! Message Dispatch
//!
//! One entry point per incoming message: classify it, run the membership
//! gate, route to the owning engine, and turn rejections into reply text.
//! Internal failures are logged in full and answered with a generic
//! apology; the details never reach the user.

use std::sync::Arc;

use tracing::error;

use crate::commands::{self, Command, Parsed};
use crate::ledger::{Engines, LedgerError};
use crate::membership::{GateDecision, MembershipGate};
use crate::store::models::{Account, Intent, RequiredGroup, UserId, WithdrawalStatus};
use crate::store::{LedgerStore, StoreError};

const START_FIRST: &str = "You do not have an account yet. Send /start to open one.";
const INTERNAL_APOLOGY: &str = "Something went wrong on our side. Please try again in a moment.";

/// Tries before giving up on referral-code collisions
const CODE_RETRIES: usize = 4;

pub struct Dispatcher {
    store: Arc<dyn LedgerStore>,
    engines: Engines,
    gate: MembershipGate,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn LedgerStore>, engines: Engines, gate: MembershipGate) -> Self {
        Self {
            store,
            engines,
            gate,
        }
    }

    /// Handle one incoming message and return the replies to send back.
    pub async fn handle(&self, user_id: UserId, text: &str) -> Vec<String> {
        match self.dispatch(user_id, text).await {
            Ok(replies) => replies,
            Err(e) if e.is_internal() => {
                error!(user = user_id, code = e.code(), error = %e, "message handling failed");
                vec![INTERNAL_APOLOGY.to_string()]
            }
            Err(e) => vec![e.to_string()],
        }
    }

    async fn dispatch(&self, user_id: UserId, text: &str) -> Result<Vec<String>, LedgerError> {
        match commands::parse(text)? {
            Parsed::Empty => Ok(vec![]),
            Parsed::Unknown(word) => Ok(vec![format!(
                "Unknown command '/{word}'. Send /help for the list."
            )]),
            Parsed::Text(text) => {
                let Some(account) = self.store.get_account(user_id).await? else {
                    return Ok(vec![START_FIRST.to_string()]);
                };
                self.engines.dialog.handle_text(&account, &text).await
            }
            Parsed::Command(command) => self.run_command(user_id, command).await,
        }
    }

    async fn run_command(
        &self,
        user_id: UserId,
        command: Command,
    ) -> Result<Vec<String>, LedgerError> {
        // The gate guards user commands only. Administrators bypass it, and
        // their own commands carry their own authorization check.
        if !command.requires_admin() && !self.engines.policy.is_admin(user_id) {
            if let GateDecision::MissingGroups(groups) = self.gate.check(user_id).await {
                return Ok(join_prompt(&groups));
            }
        }

        match command {
            Command::Start { code } => self.start(user_id, code).await,
            Command::Help => Ok(vec![self.help_text(user_id)]),
            Command::Balance => self.balance(user_id).await,
            Command::Profile => self.profile(user_id).await,
            Command::Leaderboard => self.leaderboard().await,
            Command::SetPayout => {
                let Some(account) = self.store.get_account(user_id).await? else {
                    return Ok(vec![START_FIRST.to_string()]);
                };
                self.engines.dialog.begin_payout_update(&account).await
            }
            Command::Withdraw => {
                let Some(account) = self.store.get_account(user_id).await? else {
                    return Ok(vec![START_FIRST.to_string()]);
                };
                self.engines.withdrawals.begin_draft(&account).await
            }
            Command::Status => self.status(user_id).await,
            Command::Support => {
                let Some(account) = self.store.get_account(user_id).await? else {
                    return Ok(vec![START_FIRST.to_string()]);
                };
                self.engines.dialog.begin_support(&account).await
            }

            Command::Pending => self.pending(user_id).await,
            Command::Settle { id } => {
                let paid = self.engines.admin.settle_withdrawal(user_id, &id).await?;
                Ok(vec![format!(
                    "Withdrawal {} marked paid.",
                    paid.withdrawal_id
                )])
            }
            Command::Reject { id } => {
                let cancelled = self.engines.admin.cancel_withdrawal(user_id, &id).await?;
                Ok(vec![format!(
                    "Withdrawal {} cancelled, {} returned to user {}.",
                    cancelled.withdrawal_id, cancelled.amount, cancelled.user_id
                )])
            }
            Command::Sweep { force } => {
                let report = self.engines.admin.run_sweep(user_id, force).await?;
                Ok(vec![format!("Sweep finished: {}.", report.summary())])
            }
            Command::Credit {
                target,
                amount,
                note,
            } => {
                let balance = self
                    .engines
                    .admin
                    .credit(user_id, target, amount, note.as_deref())
                    .await?;
                Ok(vec![format!("Done. User {target} now has {balance}.")])
            }
            Command::AddGroup { group_id, title } => {
                let added = self
                    .engines
                    .admin
                    .add_group(user_id, &group_id, &title)
                    .await?;
                Ok(vec![if added {
                    format!("Group '{title}' is now required.")
                } else {
                    "That group is already on the list.".to_string()
                }])
            }
            Command::RemoveGroup { group_id } => {
                let removed = self.engines.admin.remove_group(user_id, &group_id).await?;
                Ok(vec![if removed {
                    "Group removed.".to_string()
                } else {
                    "No such group on the list.".to_string()
                }])
            }
            Command::Groups => self.groups(user_id).await,
        }
    }

    async fn start(
        &self,
        user_id: UserId,
        code: Option<String>,
    ) -> Result<Vec<String>, LedgerError> {
        let (account, fresh) = self.ensure_account(user_id).await?;
        if !fresh {
            return Ok(vec![format!(
                "Welcome back! Your referral code is {}.",
                account.referral_code
            )]);
        }

        let mut replies = vec![
            "Welcome! Your account is ready.".to_string(),
            format!(
                "Your referral code: {}. Friends who start with it earn you {} each.",
                account.referral_code, self.engines.policy.referral_reward
            ),
        ];
        // A referral payload only counts at signup
        if let Some(code) = code {
            replies.extend(
                self.engines
                    .referrals
                    .record_arrival(&account, &code)
                    .await?,
            );
        }
        Ok(replies)
    }

    async fn ensure_account(&self, user_id: UserId) -> Result<(Account, bool), LedgerError> {
        if let Some(existing) = self.store.get_account(user_id).await? {
            return Ok((existing, false));
        }
        for _ in 0..CODE_RETRIES {
            let account = Account::new(user_id);
            match self.store.create_account(&account).await {
                Ok(true) => return Ok((account, true)),
                Ok(false) => {
                    // Raced with another message from the same user
                    if let Some(existing) = self.store.get_account(user_id).await? {
                        return Ok((existing, false));
                    }
                }
                // Someone else holds this referral code, roll a new one
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(LedgerError::Store(format!(
            "no free referral code after {CODE_RETRIES} tries"
        )))
    }

    async fn balance(&self, user_id: UserId) -> Result<Vec<String>, LedgerError> {
        let Some(account) = self.store.get_account(user_id).await? else {
            return Ok(vec![START_FIRST.to_string()]);
        };
        let mut text = format!("Balance: {}", account.balance);
        if !account.locked_balance.is_zero() {
            text.push_str(&format!(
                " (locked in withdrawal: {})",
                account.locked_balance
            ));
        }
        Ok(vec![text])
    }

    async fn profile(&self, user_id: UserId) -> Result<Vec<String>, LedgerError> {
        let Some(account) = self.store.get_account(user_id).await? else {
            return Ok(vec![START_FIRST.to_string()]);
        };
        let pending = self.store.pending_count_for(user_id).await?;
        let mut lines = vec![
            format!("Referral code: {}", account.referral_code),
            format!(
                "Confirmed referrals: {} (pending: {})",
                account.confirmed_referrals, pending
            ),
            format!("Balance: {}", account.balance),
        ];
        if !account.locked_balance.is_zero() {
            lines.push(format!("Locked in withdrawal: {}", account.locked_balance));
        }
        lines.push(format!(
            "Payout target: {}",
            account.payout_target.as_deref().unwrap_or("not set")
        ));
        Ok(vec![lines.join("\n")])
    }

    async fn leaderboard(&self) -> Result<Vec<String>, LedgerError> {
        let top = self.store.top_referrers(10).await?;
        if top.is_empty() {
            return Ok(vec![
                "No confirmed referrals yet. Yours could be first!".to_string()
            ]);
        }
        let mut lines = vec!["Top referrers:".to_string()];
        for (i, rank) in top.iter().enumerate() {
            lines.push(format!(
                "{}. user {} with {}",
                i + 1,
                rank.user_id,
                rank.confirmed_referrals
            ));
        }
        Ok(vec![lines.join("\n")])
    }

    async fn status(&self, user_id: UserId) -> Result<Vec<String>, LedgerError> {
        let Some(account) = self.store.get_account(user_id).await? else {
            return Ok(vec![START_FIRST.to_string()]);
        };
        if let Intent::DraftingWithdrawal { locked_amount, .. } = &account.intent {
            return Ok(vec![format!(
                "You have an open withdrawal draft for {locked_amount}. \
                 Send your payout target, then 'confirm', or send 'cancel'."
            )]);
        }
        match self.engines.withdrawals.latest_for(user_id).await? {
            None => Ok(vec![
                "No withdrawals yet. Send /withdraw to request one.".to_string()
            ]),
            Some(w) => {
                let decided = w
                    .decided_at
                    .map(|t| format!(" on {}", t.format("%Y-%m-%d")))
                    .unwrap_or_default();
                let line = match w.status {
                    WithdrawalStatus::Pending => format!(
                        "Withdrawal {}: {} to {}, awaiting manual processing.",
                        w.withdrawal_id, w.amount, w.payout_target
                    ),
                    WithdrawalStatus::Paid => format!(
                        "Withdrawal {}: {} to {}, paid{decided}.",
                        w.withdrawal_id, w.amount, w.payout_target
                    ),
                    WithdrawalStatus::Cancelled => format!(
                        "Withdrawal {}: {} to {}, cancelled{decided}. The amount went back to your balance.",
                        w.withdrawal_id, w.amount, w.payout_target
                    ),
                };
                Ok(vec![line])
            }
        }
    }

    async fn pending(&self, caller: UserId) -> Result<Vec<String>, LedgerError> {
        let pending = self.engines.admin.pending_withdrawals(caller).await?;
        if pending.is_empty() {
            return Ok(vec!["No pending withdrawals.".to_string()]);
        }
        let mut lines = vec![format!("{} pending withdrawal(s):", pending.len())];
        for w in &pending {
            lines.push(format!(
                "{} user {} {} to {} ({})",
                w.withdrawal_id,
                w.user_id,
                w.amount,
                w.payout_target,
                w.requested_at.format("%Y-%m-%d %H:%M")
            ));
        }
        Ok(vec![lines.join("\n")])
    }

    async fn groups(&self, caller: UserId) -> Result<Vec<String>, LedgerError> {
        let groups = self.engines.admin.groups(caller).await?;
        if groups.is_empty() {
            return Ok(vec!["No required groups configured.".to_string()]);
        }
        let mut lines = vec!["Required groups:".to_string()];
        for g in &groups {
            lines.push(format!("- {} ({})", g.title, g.group_id));
        }
        Ok(vec![lines.join("\n")])
    }

    fn help_text(&self, user_id: UserId) -> String {
        let mut text = format!(
            "Commands:\n\
             /start [code] - open your account\n\
             /balance - current balance\n\
             /profile - referral code and stats\n\
             /leaderboard - top referrers\n\
             /setpayout - set where payouts go\n\
             /withdraw - request a payout (minimum {})\n\
             /status - your latest withdrawal\n\
             /support - message the team",
            self.engines.policy.min_withdrawal
        );
        if self.engines.policy.is_admin(user_id) {
            text.push_str(
                "\n\nAdmin:\n\
                 /pending - open withdrawals\n\
                 /settle <id> | /reject <id>\n\
                 /sweep [force] - run a confirmation pass\n\
                 /credit <user> <amount> [note]\n\
                 /addgroup <id> [title] | /removegroup <id> | /groups",
            );
        }
        text
    }
}

fn join_prompt(groups: &[RequiredGroup]) -> Vec<String> {
    let mut lines = vec!["You need to join the required groups first:".to_string()];
    for g in groups {
        lines.push(format!("- {}", g.title));
    }
    lines.push("Then send your command again.".to_string());
    vec![lines.join("\n")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerPolicy;
    use crate::membership::StaticMembershipOracle;
    use crate::notify::RecordingNotifier;
    use crate::store::memory::MemoryStore;
    use crate::store::AccountStore;

    const ADMIN: UserId = 900;

    struct Rig {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        oracle: Arc<StaticMembershipOracle>,
        dispatcher: Dispatcher,
    }

    fn rig_with_oracle(oracle: StaticMembershipOracle) -> Rig {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let oracle = Arc::new(oracle);
        let policy = LedgerPolicy {
            admin_ids: vec![ADMIN],
            ..LedgerPolicy::default()
        };
        let engines = Engines::new(store.clone(), notifier.clone(), policy);
        let gate = MembershipGate::new(store.clone(), oracle.clone());
        let dispatcher = Dispatcher::new(store.clone(), engines, gate);
        Rig {
            store,
            notifier,
            oracle,
            dispatcher,
        }
    }

    fn rig() -> Rig {
        rig_with_oracle(StaticMembershipOracle::allow_all())
    }

    async fn code_of(rig: &Rig, user_id: UserId) -> String {
        rig.store
            .get_account(user_id)
            .await
            .unwrap()
            .unwrap()
            .referral_code
    }

    #[tokio::test]
    async fn test_start_then_start_again() {
        let rig = rig();

        let replies = rig.dispatcher.handle(1, "/start").await;
        assert!(replies[0].contains("Welcome!"));
        assert!(replies[1].contains("referral code"));

        let replies = rig.dispatcher.handle(1, "/start").await;
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("Welcome back"));
        assert!(replies[0].contains(&code_of(&rig, 1).await));
    }

    #[tokio::test]
    async fn test_referral_signup_pays_after_sweep() {
        let rig = rig();
        rig.dispatcher.handle(1, "/start").await;
        let code = code_of(&rig, 1).await;

        let replies = rig.dispatcher.handle(2, &format!("/start {code}")).await;
        assert!(replies.iter().any(|r| r.contains("recorded")));

        let replies = rig.dispatcher.handle(ADMIN, "/sweep force").await;
        assert!(replies[0].contains("1 confirmed"));

        let replies = rig.dispatcher.handle(1, "balance").await;
        assert_eq!(replies[0], "Balance: 0.5");
        // The referrer got a push about it too
        assert_eq!(rig.notifier.sent_to(1).len(), 1);
    }

    #[tokio::test]
    async fn test_commands_before_start_prompt_for_account() {
        let rig = rig();
        for text in ["balance", "/profile", "/withdraw", "hello there"] {
            let replies = rig.dispatcher.handle(5, text).await;
            assert_eq!(replies, vec![START_FIRST.to_string()], "for {text:?}");
        }
    }

    #[tokio::test]
    async fn test_unknown_slash_command() {
        let rig = rig();
        rig.dispatcher.handle(1, "/start").await;
        let replies = rig.dispatcher.handle(1, "/wat").await;
        assert!(replies[0].contains("Unknown command '/wat'"));
    }

    #[tokio::test]
    async fn test_idle_free_text_is_ignored() {
        let rig = rig();
        rig.dispatcher.handle(1, "/start").await;
        let replies = rig.dispatcher.handle(1, "nice weather today").await;
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_payout_dialog_through_dispatch() {
        let rig = rig();
        rig.dispatcher.handle(1, "/start").await;

        rig.dispatcher.handle(1, "/setpayout").await;
        let replies = rig.dispatcher.handle(1, "alice@bank").await;
        assert!(replies[0].contains("confirm"));
        let replies = rig.dispatcher.handle(1, "confirm").await;
        assert!(replies[0].contains("alice@bank"));

        let replies = rig.dispatcher.handle(1, "/profile").await;
        assert!(replies[0].contains("Payout target: alice@bank"));
    }

    #[tokio::test]
    async fn test_withdrawal_through_dispatch() {
        let rig = rig();
        rig.dispatcher.handle(1, "/start").await;
        let replies = rig.dispatcher.handle(ADMIN, "/credit 1 60 seed").await;
        assert!(replies[0].contains("60"));

        let replies = rig.dispatcher.handle(1, "/withdraw").await;
        assert!(replies[0].contains("60"));
        rig.dispatcher.handle(1, "bob@pay").await;
        let replies = rig.dispatcher.handle(1, "confirm").await;
        assert!(replies[0].contains("submitted"));

        let replies = rig.dispatcher.handle(1, "/status").await;
        assert!(replies[0].contains("awaiting manual processing"));

        let listing = rig.dispatcher.handle(ADMIN, "/pending").await;
        assert!(listing[0].contains("user 1"));
        let id = listing[0]
            .lines()
            .nth(1)
            .and_then(|l| l.split_whitespace().next())
            .map(str::to_string)
            .unwrap();

        let replies = rig.dispatcher.handle(ADMIN, &format!("/settle {id}")).await;
        assert!(replies[0].contains("marked paid"));

        let replies = rig.dispatcher.handle(1, "/status").await;
        assert!(replies[0].contains("paid"));
        let replies = rig.dispatcher.handle(1, "/balance").await;
        assert_eq!(replies[0], "Balance: 0");
    }

    #[tokio::test]
    async fn test_gate_blocks_until_joined() {
        let rig = rig_with_oracle(StaticMembershipOracle::deny_all());
        rig.dispatcher.handle(ADMIN, "/addgroup -1001 Lounge").await;

        // Gate applies to /start as well
        let replies = rig.dispatcher.handle(1, "/start").await;
        assert!(replies[0].contains("Lounge"));

        rig.oracle.set(1, "-1001", true);
        let replies = rig.dispatcher.handle(1, "/start").await;
        assert!(replies[0].contains("Welcome!"));

        // Administrators bypass the gate
        let replies = rig.dispatcher.handle(ADMIN, "/leaderboard").await;
        assert!(!replies[0].contains("join"));
    }

    #[tokio::test]
    async fn test_admin_commands_refused_for_users() {
        let rig = rig();
        rig.dispatcher.handle(1, "/start").await;
        let replies = rig.dispatcher.handle(1, "/pending").await;
        assert!(replies[0].contains("administrators only"));
    }

    #[tokio::test]
    async fn test_bad_arguments_reported() {
        let rig = rig();
        let replies = rig.dispatcher.handle(ADMIN, "/credit oops 1").await;
        assert!(replies[0].contains("Bad arguments"));
        let replies = rig.dispatcher.handle(ADMIN, "/credit 1 0").await;
        assert!(replies[0].contains("non-zero"));
    }

    #[tokio::test]
    async fn test_help_shows_admin_section_only_to_admins() {
        let rig = rig();
        rig.dispatcher.handle(1, "/start").await;

        let replies = rig.dispatcher.handle(1, "/help").await;
        assert!(replies[0].contains("/withdraw"));
        assert!(!replies[0].contains("/sweep"));

        let replies = rig.dispatcher.handle(ADMIN, "/help").await;
        assert!(replies[0].contains("/sweep"));
    }

    #[tokio::test]
    async fn test_leaderboard_orders_by_confirmations() {
        let rig = rig();
        rig.dispatcher.handle(1, "/start").await;
        rig.dispatcher.handle(2, "/start").await;
        let code1 = code_of(&rig, 1).await;
        let code2 = code_of(&rig, 2).await;

        rig.dispatcher.handle(3, &format!("/start {code1}")).await;
        rig.dispatcher.handle(4, &format!("/start {code1}")).await;
        rig.dispatcher.handle(5, &format!("/start {code2}")).await;
        rig.dispatcher.handle(ADMIN, "/sweep force").await;

        let replies = rig.dispatcher.handle(1, "/leaderboard").await;
        let lines: Vec<&str> = replies[0].lines().collect();
        assert!(lines[1].contains("user 1 with 2"));
        assert!(lines[2].contains("user 2 with 1"));
    }
}
