//! Ledger Core Types
//!
//! Entity definitions shared by the PostgreSQL and in-memory stores.
//! Status IDs are designed for PostgreSQL storage as SMALLINT.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Platform-level user identifier (chat user id).
pub type UserId = i64;

/// Length of generated referral codes.
const REFERRAL_CODE_LEN: usize = 8;

/// Generate a fresh referral code candidate.
///
/// Uniqueness is enforced by the store; creation retries on collision.
pub fn new_referral_code() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..REFERRAL_CODE_LEN)
        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
        .collect()
}

/// Withdrawal ID - ULID-based unique identifier
///
/// Monotonic and sortable, no coordination needed between instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WithdrawalId(ulid::Ulid);

impl WithdrawalId {
    /// Generate a new unique WithdrawalId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for WithdrawalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WithdrawalId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Discriminant of the per-account conversational intent.
///
/// Stored as SMALLINT in `accounts_tb.intent_kind`; the draft and
/// confirmable payloads live in sibling columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum IntentKind {
    /// No dialogue in progress - free text is ignored
    Idle = 0,
    /// Collecting a payout target
    SettingPayoutTarget = 1,
    /// Withdrawal draft open - the account's full balance is locked
    DraftingWithdrawal = 2,
    /// Next message is forwarded to administrators
    AwaitingSupportMessage = 3,
}

impl IntentKind {
    /// Get the numeric ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(IntentKind::Idle),
            1 => Some(IntentKind::SettingPayoutTarget),
            2 => Some(IntentKind::DraftingWithdrawal),
            3 => Some(IntentKind::AwaitingSupportMessage),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Idle => "IDLE",
            IntentKind::SettingPayoutTarget => "SETTING_PAYOUT_TARGET",
            IntentKind::DraftingWithdrawal => "DRAFTING_WITHDRAWAL",
            IntentKind::AwaitingSupportMessage => "AWAITING_SUPPORT_MESSAGE",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for IntentKind {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        IntentKind::from_id(value).ok_or(())
    }
}

/// Active conversational intent of an account.
///
/// Exactly one intent per account. The `DraftingWithdrawal` payload mirrors
/// the account's `locked_balance` column, which is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Idle,
    SettingPayoutTarget {
        draft: Option<String>,
    },
    DraftingWithdrawal {
        locked_amount: Decimal,
        draft: Option<String>,
        confirmable: bool,
    },
    AwaitingSupportMessage,
}

impl Intent {
    /// Discriminant of this intent
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Idle => IntentKind::Idle,
            Intent::SettingPayoutTarget { .. } => IntentKind::SettingPayoutTarget,
            Intent::DraftingWithdrawal { .. } => IntentKind::DraftingWithdrawal,
            Intent::AwaitingSupportMessage => IntentKind::AwaitingSupportMessage,
        }
    }

    /// Candidate payout target collected so far, if any
    pub fn draft(&self) -> Option<&str> {
        match self {
            Intent::SettingPayoutTarget { draft } => draft.as_deref(),
            Intent::DraftingWithdrawal { draft, .. } => draft.as_deref(),
            _ => None,
        }
    }

    /// Whether a `confirm` would currently be accepted
    pub fn confirmable(&self) -> bool {
        matches!(
            self,
            Intent::DraftingWithdrawal {
                confirmable: true,
                ..
            }
        )
    }

    /// Rebuild an intent from its stored column parts.
    ///
    /// `locked` is the account's `locked_balance`, used to refill the
    /// drafting payload.
    pub fn from_parts(
        kind: i16,
        draft: Option<String>,
        confirmable: bool,
        locked: Decimal,
    ) -> Option<Self> {
        match IntentKind::from_id(kind)? {
            IntentKind::Idle => Some(Intent::Idle),
            IntentKind::SettingPayoutTarget => Some(Intent::SettingPayoutTarget { draft }),
            IntentKind::DraftingWithdrawal => Some(Intent::DraftingWithdrawal {
                locked_amount: locked,
                draft,
                confirmable,
            }),
            IntentKind::AwaitingSupportMessage => Some(Intent::AwaitingSupportMessage),
        }
    }
}

impl Default for Intent {
    fn default() -> Self {
        Intent::Idle
    }
}

/// User account, created on first contact and never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub user_id: UserId,
    /// Opaque code others use to refer this account's owner
    pub referral_code: String,
    /// Spendable balance, never negative
    pub balance: Decimal,
    /// Balance held by an open withdrawal draft or pending withdrawal
    pub locked_balance: Decimal,
    /// Lifetime confirmed referral count
    pub confirmed_referrals: i64,
    /// Last confirmed payout destination
    pub payout_target: Option<String>,
    pub intent: Intent,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Fresh account with zero balances and a generated referral code
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            referral_code: new_referral_code(),
            balance: Decimal::ZERO,
            locked_balance: Decimal::ZERO,
            confirmed_referrals: 0,
            payout_target: None,
            intent: Intent::Idle,
            created_at: Utc::now(),
        }
    }
}

/// Referral record lifecycle.
///
/// Terminal states: CONFIRMED (1), INVALID (2). A record leaves PENDING
/// exactly once and is never re-opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ReferralStatus {
    /// Awaiting the confirmation delay
    Pending = 0,
    /// Terminal: reward credited to the referrer
    Confirmed = 1,
    /// Terminal: rejected with a recorded reason
    Invalid = 2,
}

impl ReferralStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReferralStatus::Confirmed | ReferralStatus::Invalid)
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ReferralStatus::Pending),
            1 => Some(ReferralStatus::Confirmed),
            2 => Some(ReferralStatus::Invalid),
            _ => None,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Pending => "PENDING",
            ReferralStatus::Confirmed => "CONFIRMED",
            ReferralStatus::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for ReferralStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        ReferralStatus::from_id(value).ok_or(())
    }
}

/// Why a referral was marked invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Referrer and referred are the same user
    SelfReferral,
    /// The referred user never created an account
    NoUserRecord,
    /// The referrer's account row is gone
    NoReferrerRecord,
}

impl InvalidReason {
    /// Stable code stored in `pending_referrals_tb.reason`
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::SelfReferral => "self_referral",
            InvalidReason::NoUserRecord => "no_user_record",
            InvalidReason::NoReferrerRecord => "no_referrer_record",
        }
    }

    /// Parse a stored reason code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "self_referral" => Some(InvalidReason::SelfReferral),
            "no_user_record" => Some(InvalidReason::NoUserRecord),
            "no_referrer_record" => Some(InvalidReason::NoReferrerRecord),
            _ => None,
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded referral awaiting (or past) confirmation.
///
/// `referred_id` is unique: the first referrer wins, later attempts are
/// dropped at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReferral {
    /// Store-assigned sequential id
    pub referral_id: i64,
    /// The recruited user
    pub referred_id: UserId,
    /// The recruiting user
    pub referrer_id: UserId,
    /// Code the referred user arrived with
    pub referral_code: String,
    pub status: ReferralStatus,
    /// Set iff status is INVALID
    pub reason: Option<InvalidReason>,
    pub created_at: DateTime<Utc>,
    /// Set iff status is CONFIRMED
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Append-only audit row written when a referral is confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedReferral {
    pub referrer_id: UserId,
    pub referred_id: UserId,
    pub referral_code: String,
    pub confirmed_at: DateTime<Utc>,
}

/// Post-credit snapshot returned by the fused confirm-and-credit update.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferrerCredit {
    pub referrer_id: UserId,
    /// Referrer balance after the reward landed
    pub balance: Decimal,
    /// Referrer confirmed count after the increment
    pub confirmed_referrals: i64,
}

/// Withdrawal request lifecycle.
///
/// Terminal states: PAID (1), CANCELLED (2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum WithdrawalStatus {
    /// Awaiting an administrator decision
    Pending = 0,
    /// Terminal: paid out off-platform
    Paid = 1,
    /// Terminal: rejected, amount refunded
    Cancelled = 2,
}

impl WithdrawalStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawalStatus::Paid | WithdrawalStatus::Cancelled)
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawalStatus::Pending),
            1 => Some(WithdrawalStatus::Paid),
            2 => Some(WithdrawalStatus::Cancelled),
            _ => None,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Paid => "PAID",
            WithdrawalStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for WithdrawalStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        WithdrawalStatus::from_id(value).ok_or(())
    }
}

/// Withdrawal record. The amount is fixed at creation and never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct Withdrawal {
    /// Unique withdrawal ID (ULID, also the DB primary key)
    pub withdrawal_id: WithdrawalId,
    pub user_id: UserId,
    pub amount: Decimal,
    /// Payout destination captured from the confirmed draft
    pub payout_target: String,
    pub status: WithdrawalStatus,
    pub requested_at: DateTime<Utc>,
    /// Terminal decision timestamp
    pub decided_at: Option<DateTime<Utc>>,
    /// Administrator who settled or cancelled
    pub decided_by: Option<UserId>,
}

impl Withdrawal {
    /// Create a new pending withdrawal
    pub fn new(user_id: UserId, amount: Decimal, payout_target: String) -> Self {
        Self {
            withdrawal_id: WithdrawalId::new(),
            user_id,
            amount,
            payout_target,
            status: WithdrawalStatus::Pending,
            requested_at: Utc::now(),
            decided_at: None,
            decided_by: None,
        }
    }
}

impl fmt::Display for Withdrawal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Withdrawal[{}] user={} amount={} target={} status={}",
            self.withdrawal_id, self.user_id, self.amount, self.payout_target, self.status
        )
    }
}

/// Group whose membership is required before user commands are served.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredGroup {
    pub group_id: String,
    pub title: String,
    pub added_by: UserId,
    pub added_at: DateTime<Utc>,
}

/// Leaderboard row: referrer ranked by confirmed count.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferrerRank {
    pub user_id: UserId,
    pub confirmed_referrals: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referral_status_terminal() {
        assert!(ReferralStatus::Confirmed.is_terminal());
        assert!(ReferralStatus::Invalid.is_terminal());
        assert!(!ReferralStatus::Pending.is_terminal());
    }

    #[test]
    fn test_referral_status_roundtrip() {
        for status in [
            ReferralStatus::Pending,
            ReferralStatus::Confirmed,
            ReferralStatus::Invalid,
        ] {
            assert_eq!(ReferralStatus::from_id(status.id()), Some(status));
        }
        assert!(ReferralStatus::from_id(99).is_none());
        assert!(ReferralStatus::from_id(-1).is_none());
    }

    #[test]
    fn test_withdrawal_status_roundtrip() {
        for status in [
            WithdrawalStatus::Pending,
            WithdrawalStatus::Paid,
            WithdrawalStatus::Cancelled,
        ] {
            assert_eq!(WithdrawalStatus::from_id(status.id()), Some(status));
        }
        assert!(WithdrawalStatus::from_id(3).is_none());
    }

    #[test]
    fn test_withdrawal_status_terminal() {
        assert!(WithdrawalStatus::Paid.is_terminal());
        assert!(WithdrawalStatus::Cancelled.is_terminal());
        assert!(!WithdrawalStatus::Pending.is_terminal());
    }

    #[test]
    fn test_intent_kind_roundtrip() {
        for kind in [
            IntentKind::Idle,
            IntentKind::SettingPayoutTarget,
            IntentKind::DraftingWithdrawal,
            IntentKind::AwaitingSupportMessage,
        ] {
            assert_eq!(IntentKind::from_id(kind.id()), Some(kind));
        }
        assert!(IntentKind::from_id(4).is_none());
    }

    #[test]
    fn test_intent_from_parts() {
        let locked = Decimal::from(75);
        let intent = Intent::from_parts(2, Some("user@host".into()), true, locked).unwrap();
        assert_eq!(
            intent,
            Intent::DraftingWithdrawal {
                locked_amount: locked,
                draft: Some("user@host".into()),
                confirmable: true,
            }
        );
        assert!(intent.confirmable());
        assert_eq!(intent.draft(), Some("user@host"));

        let idle = Intent::from_parts(0, None, false, Decimal::ZERO).unwrap();
        assert_eq!(idle, Intent::Idle);
        assert!(!idle.confirmable());

        assert!(Intent::from_parts(9, None, false, Decimal::ZERO).is_none());
    }

    #[test]
    fn test_invalid_reason_codes() {
        for reason in [
            InvalidReason::SelfReferral,
            InvalidReason::NoUserRecord,
            InvalidReason::NoReferrerRecord,
        ] {
            assert_eq!(InvalidReason::from_code(reason.as_str()), Some(reason));
        }
        assert!(InvalidReason::from_code("other").is_none());
    }

    #[test]
    fn test_withdrawal_id_roundtrip() {
        let id = WithdrawalId::new();
        let parsed: WithdrawalId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_referral_code_shape() {
        let code = new_referral_code();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        // Two draws colliding is astronomically unlikely
        assert_ne!(code, new_referral_code());
    }

    #[test]
    fn test_new_account_defaults() {
        let account = Account::new(1001);
        assert_eq!(account.user_id, 1001);
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.locked_balance, Decimal::ZERO);
        assert_eq!(account.confirmed_referrals, 0);
        assert!(account.payout_target.is_none());
        assert_eq!(account.intent, Intent::Idle);
    }
}
