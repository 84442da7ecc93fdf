//! refledger - Referral Reward Ledger
//!
//! Main entry point. Architecture:
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌──────────┐    ┌──────────┐
//! │ Gateway  │───▶│ Dispatcher │───▶│ Engines  │───▶│  Store   │
//! │ (axum)   │    │(gate+route)│    │ (ledger) │    │(PG/mem)  │
//! └──────────┘    └────────────┘    └──────────┘    └──────────┘
//!
//! A sweep worker runs beside the gateway and promotes pending
//! referrals on a fixed cadence.
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use refledger::config::AppConfig;
use refledger::dispatch::Dispatcher;
use refledger::gateway::{self, state::AppState};
use refledger::ledger::Engines;
use refledger::membership::{
    HttpMembershipOracle, MembershipGate, MembershipOracle, StaticMembershipOracle,
};
use refledger::notify::{HttpNotifier, NoopNotifier, Notifier};
use refledger::store::db::Database;
use refledger::store::memory::MemoryStore;
use refledger::store::postgres::PgStore;
use refledger::store::LedgerStore;
use refledger::worker::SweepWorker;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            db.init_schema()
                .await
                .context("failed to initialize schema")?;
            info!("PostgreSQL store ready");
            Ok(Arc::new(PgStore::new(db.pool().clone())))
        }
        None => {
            // Fine for development; every balance is gone on restart
            warn!("no postgres_url configured, using the in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = refledger::logging::init_logging(&config);

    info!(
        env,
        git_hash = env!("GIT_HASH"),
        "starting refledger"
    );

    let store = build_store(&config).await?;

    let notifier: Arc<dyn Notifier> = match &config.collaborators.notify_url {
        Some(url) => {
            info!(url, "using http notifier");
            Arc::new(HttpNotifier::new(url)?)
        }
        None => {
            warn!("no notify_url configured, notifications are dropped");
            Arc::new(NoopNotifier)
        }
    };

    let oracle: Arc<dyn MembershipOracle> = match &config.collaborators.membership_url {
        Some(url) => {
            info!(url, "using http membership oracle");
            Arc::new(HttpMembershipOracle::new(url)?)
        }
        None => {
            info!("no membership_url configured, the gate admits everyone");
            Arc::new(StaticMembershipOracle::allow_all())
        }
    };

    let policy = config.ledger_policy();
    info!(
        min_withdrawal = %policy.min_withdrawal,
        referral_reward = %policy.referral_reward,
        admins = policy.admin_ids.len(),
        "ledger policy loaded"
    );

    let engines = Engines::new(store.clone(), notifier, policy);
    let confirmation = engines.confirmation.clone();
    let gate = MembershipGate::new(store.clone(), oracle);
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), engines, gate));

    let worker = SweepWorker::new(confirmation, config.ledger.sweep_interval_secs);
    tokio::spawn(async move {
        worker.run().await;
    });

    let port = get_port_override().unwrap_or(config.gateway.port);
    let state = Arc::new(AppState::new(dispatcher, store));
    gateway::run_server(&config.gateway.host, port, state).await
}
