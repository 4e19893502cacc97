//! The fixed job slots derived from operational settings.

use super::{tags, JobAction, Scheduler, SchedulerError};
use crate::storage::settings::AppSettings;
use chrono::Duration;
use tracing::{info, warn};

/// Align the `hourly-test` slot with `schedule_hours`.
///
/// A positive value replaces the slot so the next fire is `now + hours`;
/// zero (or a negative value) disables recurring testing by cancelling it.
pub fn arm_hourly_test(scheduler: &Scheduler, schedule_hours: i64) -> Result<(), SchedulerError> {
    if schedule_hours > 0 {
        let period = Duration::try_hours(schedule_hours).ok_or_else(|| SchedulerError::DueTimeOverflow {
            tag: tags::HOURLY_TEST.to_string(),
        })?;
        scheduler.schedule_recurring(tags::HOURLY_TEST, period, JobAction::SpeedTest)?;
        info!(hours = schedule_hours, "Scheduler reset: next run in {} hours", schedule_hours);
    } else {
        scheduler.cancel(tags::HOURLY_TEST);
        info!("Recurring speed tests disabled");
    }
    Ok(())
}

/// Register the jobs a freshly started daemon needs.
///
/// An unusable stored interval leaves the recurring slot empty rather than
/// keeping the daemon from starting; the startup test is still registered.
pub fn install_startup_jobs(
    scheduler: &Scheduler,
    settings: &AppSettings,
    startup_delay: Duration,
) -> Result<(), SchedulerError> {
    if settings.schedule_hours > 0 {
        if let Err(e) = arm_hourly_test(scheduler, settings.schedule_hours) {
            warn!(hours = settings.schedule_hours, error = %e, "Stored test interval is unusable, recurring tests not scheduled");
        }
    }
    if settings.startup_test_enabled {
        scheduler.schedule_once_tagged(tags::STARTUP_TEST, startup_delay, JobAction::SpeedTest)?;
        info!(delay_secs = startup_delay.num_seconds(), "Startup test scheduled");
    }
    Ok(())
}
