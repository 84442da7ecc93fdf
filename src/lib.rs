//! refledger - Referral Reward Ledger
//!
//! A referral incentive program behind a conversational surface: balances,
//! pending referrals that confirm after a delay, and manually settled
//! withdrawals.
//!
//! # Modules
//!
//! - [`store`] - Persistence traits, PostgreSQL and in-memory stores
//! - [`ledger`] - Business engines (dialog, referral, withdrawal, admin)
//! - [`commands`] - Incoming message classification
//! - [`dispatch`] - Membership gate and routing to the engines
//! - [`notify`] - Outbound push notifications
//! - [`membership`] - Required-group gate and oracle
//! - [`worker`] - Confirmation sweep cadence
//! - [`gateway`] - HTTP surface (axum)
//! - [`config`] - YAML configuration
//! - [`logging`] - Tracing setup

// Persistence - must be first!
pub mod store;

// Business engines
pub mod ledger;

// Conversational surface
pub mod commands;
pub mod dispatch;

// Collaborator seams
pub mod membership;
pub mod notify;

// Runtime
pub mod config;
pub mod gateway;
pub mod logging;
pub mod worker;

// Convenient re-exports at crate root
pub use dispatch::Dispatcher;
pub use ledger::{Engines, LedgerError, LedgerPolicy};
pub use store::models::UserId;
pub use store::LedgerStore;
