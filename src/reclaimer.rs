//! Background reclaimer.
//!
//! A single tokio task wakes on a fixed interval and runs one reclaim cycle
//! on the blocking pool: TTL expiry, LRU eviction under memory pressure and
//! the store's retention purge. Cancellation is checked at each wake
//! boundary; a cycle already in flight always runs to completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::UnifiedMemoryModel;

/// Result of one reclaim cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReclaimOutcome {
    pub expired: usize,
    pub evicted: usize,
    pub purged: usize,
    /// Set when the retention purge failed; the cycle still counts
    pub purge_error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Handle to the running reclaimer task.
pub struct Reclaimer {
    shutdown_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Reclaimer {
    /// Spawn the reclaimer on the current tokio runtime.
    ///
    /// The task holds only a weak reference, so dropping the model also
    /// ends the loop at its next wake.
    pub fn spawn(model: Weak<UnifiedMemoryModel>, period: Duration) -> Self {
        let shutdown_token = CancellationToken::new();
        let handle = tokio::spawn(run(model, period, shutdown_token.clone()));
        Self {
            shutdown_token,
            handle,
        }
    }

    /// Signal the loop to stop without waiting for it.
    pub fn cancel(&self) {
        self.shutdown_token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the in-flight cycle, if any, to finish.
    pub async fn stop(self) {
        self.shutdown_token.cancel();
        if let Err(e) = self.handle.await {
            warn!("Reclaimer task ended abnormally: {}", e);
        }
    }
}

async fn run(model: Weak<UnifiedMemoryModel>, period: Duration, shutdown_token: CancellationToken) {
    info!(
        interval_secs = period.as_secs(),
        "Starting reclaimer background task"
    );

    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_token.cancelled() => {
                info!("Shutdown signal received, stopping reclaimer");
                break;
            }
            _ = tick.tick() => {
                let Some(model) = model.upgrade() else {
                    debug!("Memory model dropped, stopping reclaimer");
                    break;
                };

                debug!("Running reclaim cycle");
                match tokio::task::spawn_blocking(move || model.run_reclaim_cycle()).await {
                    Ok(outcome) => info!(
                        expired = outcome.expired,
                        evicted = outcome.evicted,
                        purged = outcome.purged,
                        "Reclaim cycle completed"
                    ),
                    // A failed cycle never stops the next scheduled wake
                    Err(e) => warn!("Reclaim cycle failed: {}", e),
                }
            }
        }
    }

    info!("Reclaimer background task stopped");
}
