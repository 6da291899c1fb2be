use log::{info, warn};
use std::sync::Arc;
use time::{Duration, OffsetDateTime, Time, UtcOffset};
use tokio::{task::JoinHandle, time::sleep};

use crate::{CycleOutcome, RateUpdater};

/// Next occurrence of `at` (wall clock in `offset`) strictly after `now`.
pub fn next_run_after(now: OffsetDateTime, at: Time, offset: UtcOffset) -> OffsetDateTime {
    let local = now.to_offset(offset);
    let candidate = local.replace_time(at);
    if candidate > local {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

/// Runs one update cycle every day at `at`, forever.
///
/// Cycles are awaited in the loop so the scheduler never overlaps itself.
pub async fn run_daily(updater: Arc<RateUpdater>, at: Time, offset: UtcOffset) {
    loop {
        let now = OffsetDateTime::now_utc();
        let next = next_run_after(now, at, offset);
        info!("next rate update scheduled for {}", next);

        sleep((next - now).unsigned_abs()).await;

        match updater.run_cycle().await {
            CycleOutcome::Resolved(resolution) => info!(
                "scheduled rate update finished, rate {:.4} (source: {})",
                resolution.value(),
                resolution.source()
            ),
            CycleOutcome::Skipped => warn!("scheduled rate update skipped, a cycle was running"),
        }
    }
}

pub fn spawn_daily(updater: Arc<RateUpdater>, at: Time, offset: UtcOffset) -> JoinHandle<()> {
    tokio::spawn(run_daily(updater, at, offset))
}
