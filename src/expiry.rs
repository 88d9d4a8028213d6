//! Hold expiry: the pure predicate and the background sweeper.
//!
//! Expiry is evaluated two ways with the same clock and cutoff rule: the
//! [`HoldSweeper`] scans periodically, and the booking service runs the same
//! scan lazily when a reservation hits capacity pressure. Neither path relies
//! on per-booking timers surviving a process restart.

use crate::booking::BookingService;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Returns whether a hold created at `created_at` has outlived
/// `hold_duration` as of `now`. A hold expires exactly at the boundary.
#[must_use]
pub fn hold_expired(now: DateTime<Utc>, created_at: DateTime<Utc>, hold_duration: Duration) -> bool {
    now >= created_at + hold_duration
}

/// Periodic background task that cancels abandoned holds.
pub struct HoldSweeper {
    service: Arc<BookingService>,
    interval: std::time::Duration,
}

impl HoldSweeper {
    /// Creates a sweeper over the given booking service.
    #[must_use]
    pub fn new(service: Arc<BookingService>, interval: std::time::Duration) -> Self {
        Self { service, interval }
    }

    /// Spawns the sweep loop. Returns the task handle and a shutdown sender;
    /// sending (or dropping every sender) stops the loop after the current
    /// sweep.
    #[must_use]
    pub fn spawn(self) -> (JoinHandle<()>, broadcast::Sender<()>) {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick fires immediately; skip it so startup does not
            // race store initialization.
            ticker.tick().await;
            info!(interval_secs = self.interval.as_secs(), "hold sweeper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.service.expire_stale_holds().await {
                            Ok(0) => debug!("sweep found no stale holds"),
                            Ok(n) => info!(expired = n, "sweep cancelled stale holds"),
                            Err(e) => warn!(error = %e, "sweep failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("hold sweeper shutting down");
                        break;
                    }
                }
            }
        });
        (handle, shutdown_tx)
    }
}
