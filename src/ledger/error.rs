//! Ledger Error Types
//!
//! Rejections carry the user-facing reply text in their Display impl;
//! internal failures are logged and answered with a generic apology.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::store::StoreError;

/// Ledger error types
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("That does not look like a valid payout target. Try again, or send 'cancel'.")]
    InvalidPayoutTarget,

    #[error("Amount must be a non-zero number")]
    InvalidAmount,

    #[error("Unknown withdrawal id: {0}")]
    InvalidWithdrawalId(String),

    #[error("Bad arguments: {0}")]
    InvalidArguments(String),

    // === State Errors ===
    #[error("No account found for user {0}")]
    AccountNotFound(i64),

    #[error("Withdrawal not found or already decided: {0}")]
    WithdrawalNotFound(String),

    #[error("Adjustment rejected: balance cannot go negative")]
    InsufficientBalance,

    #[error("You already have a withdrawal in progress. Wait for it to be processed.")]
    WithdrawalInFlight,

    #[error("You need at least {minimum} to withdraw (current balance: {balance})")]
    BelowMinimum { minimum: Decimal, balance: Decimal },

    #[error("Finish your open withdrawal first: send 'confirm' or 'cancel'.")]
    DraftInProgress,

    #[error("Nothing to confirm yet. Send your payout target first.")]
    NothingToConfirm,

    // === Authorization Errors ===
    #[error("This command is for administrators only")]
    AdminOnly,

    // === System Errors ===
    #[error("Store error: {0}")]
    Store(String),
}

impl LedgerError {
    /// Get the error code for API responses and logs
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidPayoutTarget => "INVALID_PAYOUT_TARGET",
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::InvalidWithdrawalId(_) => "INVALID_WITHDRAWAL_ID",
            LedgerError::InvalidArguments(_) => "INVALID_ARGUMENTS",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::WithdrawalNotFound(_) => "WITHDRAWAL_NOT_FOUND",
            LedgerError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            LedgerError::WithdrawalInFlight => "WITHDRAWAL_IN_FLIGHT",
            LedgerError::BelowMinimum { .. } => "BELOW_MINIMUM",
            LedgerError::DraftInProgress => "DRAFT_IN_PROGRESS",
            LedgerError::NothingToConfirm => "NOTHING_TO_CONFIRM",
            LedgerError::AdminOnly => "ADMIN_ONLY",
            LedgerError::Store(_) => "STORE_ERROR",
        }
    }

    /// Internal errors get a generic reply; the details only go to the log.
    pub fn is_internal(&self) -> bool {
        matches!(self, LedgerError::Store(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        LedgerError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::AdminOnly.code(), "ADMIN_ONLY");
        assert_eq!(LedgerError::InvalidAmount.code(), "INVALID_AMOUNT");
        assert_eq!(
            LedgerError::WithdrawalNotFound("x".into()).code(),
            "WITHDRAWAL_NOT_FOUND"
        );
    }

    #[test]
    fn test_internal_flag() {
        assert!(LedgerError::Store("boom".into()).is_internal());
        assert!(!LedgerError::AdminOnly.is_internal());
        assert!(!LedgerError::InvalidPayoutTarget.is_internal());
    }

    #[test]
    fn test_below_minimum_message() {
        let err = LedgerError::BelowMinimum {
            minimum: Decimal::from(50),
            balance: Decimal::from(12),
        };
        assert_eq!(
            err.to_string(),
            "You need at least 50 to withdraw (current balance: 12)"
        );
    }
}
