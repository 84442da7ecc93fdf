use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::ledger::LedgerPolicy;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; absent runs the in-memory store
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Ledger policy knobs
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Quote decimals as strings in the yaml ("0.5") to keep them exact
    pub min_withdrawal: Decimal,
    pub referral_reward: Decimal,
    pub confirmation_delay_hours: i64,
    /// Confirmations allowed per referrer per hour; 0 disables the cap
    pub referral_hourly_cap: i64,
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub admin_ids: Vec<i64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_withdrawal: Decimal::from(50),
            referral_reward: Decimal::new(5, 1),
            confirmation_delay_hours: 48,
            referral_hourly_cap: 20,
            sweep_interval_secs: 300,
            admin_ids: Vec::new(),
        }
    }
}

/// Outbound collaborator endpoints
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CollaboratorConfig {
    /// Push notification service base URL; absent drops notifications
    #[serde(default)]
    pub notify_url: Option<String>,
    /// Membership lookup service base URL; absent admits everyone
    #[serde(default)]
    pub membership_url: Option<String>,
}

impl AppConfig {
    /// Read `config/<env>.yaml`; panics when the file is missing or malformed.
    pub fn load(env: &str) -> Self {
        let path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&path).unwrap_or_else(|_| panic!("cannot read {}", path));
        serde_yaml::from_str(&content).unwrap_or_else(|e| panic!("bad config {}: {}", path, e))
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            min_withdrawal: self.ledger.min_withdrawal,
            referral_reward: self.ledger.referral_reward,
            confirmation_delay: chrono::Duration::hours(self.ledger.confirmation_delay_hours),
            referral_hourly_cap: self.ledger.referral_hourly_cap,
            admin_ids: self.ledger.admin_ids.clone(),
        }
    }
}
