//! Confirmation Sweep Worker
//!
//! Drives the confirmation engine on a fixed cadence. The first pass runs
//! right at startup, so a restart never leaves due referrals waiting a
//! full interval.

use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{error, info};

use crate::ledger::referral::ConfirmationEngine;

pub struct SweepWorker {
    engine: Arc<ConfirmationEngine>,
    interval: Duration,
}

impl SweepWorker {
    pub fn new(engine: Arc<ConfirmationEngine>, interval_secs: u64) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Run the sweep loop. Never returns; a failed pass is logged and the
    /// cadence keeps going.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "sweep worker starting");
        loop {
            self.sweep_once().await;
            sleep(self.interval).await;
        }
    }

    /// One regular pass. The engine logs what it settled.
    pub async fn sweep_once(&self) {
        if let Err(e) = self.engine.run(false).await {
            error!(error = %e, "sweep pass failed");
        }
    }
}
