//! Periodic purge of expired notifications.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::NotificationService;

/// Shortest period the sweeper will run at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Run [`NotificationService::sweep_expired`] every `every`, starting one
/// period after spawn. Periods below [`MIN_SWEEP_INTERVAL`] are raised to it.
pub fn spawn(service: Arc<NotificationService>, every: Duration) -> JoinHandle<()> {
    if every < MIN_SWEEP_INTERVAL {
        tracing::warn!(requested = ?every, using = ?MIN_SWEEP_INTERVAL, "sweep interval too short");
    }
    let every = every.max(MIN_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut interval = interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            match service.sweep_expired().await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(count, "purged expired notifications");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to purge expired notifications");
                }
            }
        }
    })
}
