//! In-process schedule for polling every room.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bot::Poller;

/// Next occurrence of `schedule` strictly after `after`, evaluated in `tz`.
pub fn next_run(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|t| t.with_timezone(&Utc))
}

/// Spawn a task that runs [`Poller::poll_all`] on every occurrence of `schedule`.
pub fn spawn(poller: Arc<Poller>, schedule: Schedule, tz: Tz) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = next_run(&schedule, tz, now) else {
                warn!("Poll schedule has no future occurrence, stopping scheduler");
                return;
            };
            info!("⏰ Next scheduled poll at {next}");
            tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

            match poller.poll_all().await {
                Ok(summary) => info!(
                    "Scheduled poll: {} room(s), {} failed",
                    summary.polled, summary.failed
                ),
                Err(e) => error!("Scheduled poll failed: {e}"),
            }
        }
    })
}
