//! Periodic purge of expired ledger records.
//!
//! Runs as one independent task for the life of the process and talks to
//! request handlers only through the ledger itself. A failed pass is logged
//! and retried on the next tick; liveness checks compare expiry on their own,
//! so a late sweep only delays cleanup.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::store::StoreError;

use super::clock::Clock;
use super::traits::TokenLedger;

/// Default pause between sweep passes: 5 minutes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub struct Sweeper {
    ledger: Arc<dyn TokenLedger>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(ledger: Arc<dyn TokenLedger>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            ledger,
            clock,
            interval,
        }
    }

    /// One pass: delete every record expired as of now.
    pub async fn sweep_once(&self) -> Result<u64, StoreError> {
        self.ledger.sweep(self.clock.now()).await
    }

    /// Sweep on every tick until `shutdown` fires. The first pass runs
    /// immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "token sweeper started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("token sweeper stopped");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => {}
                        Ok(deleted) => tracing::debug!(deleted, "swept expired tokens"),
                        Err(e) => tracing::warn!(error = %e, "token sweep failed, will retry"),
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
