//! In-memory tagged job set.
//!
//! All reads and writes of the job set go through one mutex, including the
//! go/no-go decision of a sweep. A cancel+register pair issued by a settings
//! change is therefore either fully visible to a sweep or not at all.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Well-known job slots.
pub mod tags {
    pub const HOURLY_TEST: &str = "hourly-test";
    pub const STARTUP_TEST: &str = "startup-test";
    pub const BACKUP: &str = "backup";
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("recurrence period must be positive, got {secs}s")]
    InvalidPeriod { secs: i64 },

    #[error("job '{tag}' would be due beyond the representable time range")]
    DueTimeOverflow { tag: String },
}

/// What a fired job asks the executor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    SpeedTest,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Every(Duration),
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct JobId(u64);

#[derive(Debug, Clone)]
struct Job {
    id: JobId,
    tag: String,
    due: DateTime<Utc>,
    recurrence: Recurrence,
    action: JobAction,
}

/// A job handed to the executor by a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredJob {
    pub id: JobId,
    pub tag: String,
    pub action: JobAction,
    pub recurrence: Recurrence,
    pub due: DateTime<Utc>,
}

/// Read-only copy of a job for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub tag: String,
    pub action: JobAction,
    /// `None` for one-shot jobs.
    pub period_secs: Option<i64>,
    pub next_run: DateTime<Utc>,
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Default)]
struct JobSet {
    jobs: Vec<Job>,
    next_id: u64,
}

impl JobSet {
    fn remove_tag(&mut self, tag: &str) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.tag != tag);
        before - self.jobs.len()
    }

    fn insert(&mut self, tag: &str, due: DateTime<Utc>, recurrence: Recurrence, action: JobAction) -> JobId {
        self.next_id += 1;
        let id = JobId(self.next_id);
        self.jobs.push(Job {
            id,
            tag: tag.to_string(),
            due,
            recurrence,
            action,
        });
        id
    }
}

/// Process-wide job scheduler. Cheap to clone; clones share the job set.
#[derive(Clone)]
pub struct Scheduler {
    jobs: Arc<Mutex<JobSet>>,
    clock: Clock,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").field("jobs", &self.lock().jobs.len()).finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }

    /// Build a scheduler driven by an external clock (tests, simulations).
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(JobSet::default())),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // A panic while holding the lock leaves the set consistent: every
    // mutation below completes before any call that could unwind.
    fn lock(&self) -> MutexGuard<'_, JobSet> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a job firing every `period`, first at `now + period`.
    /// Any job already carrying `tag` is cancelled in the same critical
    /// section.
    pub fn schedule_recurring(&self, tag: &str, period: Duration, action: JobAction) -> Result<JobId, SchedulerError> {
        let first_due = self
            .now()
            .checked_add_signed(period)
            .ok_or_else(|| SchedulerError::DueTimeOverflow { tag: tag.to_string() })?;
        self.schedule_recurring_at(tag, first_due, period, action)
    }

    /// Register a recurring job whose first fire is `first_due`.
    pub fn schedule_recurring_at(
        &self,
        tag: &str,
        first_due: DateTime<Utc>,
        period: Duration,
        action: JobAction,
    ) -> Result<JobId, SchedulerError> {
        if period <= Duration::zero() {
            return Err(SchedulerError::InvalidPeriod {
                secs: period.num_seconds(),
            });
        }
        // The sweep re-arms at `now + period`; refuse periods that cannot be added twice.
        if first_due.checked_add_signed(period).is_none() {
            return Err(SchedulerError::DueTimeOverflow { tag: tag.to_string() });
        }
        let mut set = self.lock();
        let replaced = set.remove_tag(tag);
        let id = set.insert(tag, first_due, Recurrence::Every(period), action);
        debug!(%tag, replaced, next_run = %first_due, period_secs = period.num_seconds(), "recurring job registered");
        Ok(id)
    }

    /// Register a one-shot job firing once after `delay`. The sweep that
    /// fires it also retires it, so the action never runs twice even if its
    /// body is slow to start.
    pub fn schedule_once_tagged(&self, tag: &str, delay: Duration, action: JobAction) -> Result<JobId, SchedulerError> {
        let due = self
            .now()
            .checked_add_signed(delay)
            .ok_or_else(|| SchedulerError::DueTimeOverflow { tag: tag.to_string() })?;
        let mut set = self.lock();
        let replaced = set.remove_tag(tag);
        let id = set.insert(tag, due, Recurrence::Once, action);
        debug!(%tag, replaced, due = %due, "one-shot job registered");
        Ok(id)
    }

    /// Remove every job carrying `tag`. Returns how many were removed.
    pub fn cancel(&self, tag: &str) -> usize {
        let removed = self.lock().remove_tag(tag);
        if removed > 0 {
            debug!(%tag, removed, "jobs cancelled");
        }
        removed
    }

    /// Collect every job whose due time has passed, oldest due first.
    ///
    /// Recurring jobs are re-armed at `now + period` (a long pause yields one
    /// fire, never a backlog); one-shot jobs are removed.
    pub fn take_due(&self) -> Vec<FiredJob> {
        let now = self.now();
        let mut set = self.lock();

        let mut fired: Vec<FiredJob> = set
            .jobs
            .iter()
            .filter(|j| j.due <= now)
            .map(|j| FiredJob {
                id: j.id,
                tag: j.tag.clone(),
                action: j.action,
                recurrence: j.recurrence,
                due: j.due,
            })
            .collect();
        if fired.is_empty() {
            return fired;
        }
        // Ids grow with registration order, which breaks ties between equal due times.
        fired.sort_by_key(|f| (f.due, f.id));

        set.jobs.retain(|j| !(j.due <= now && j.recurrence == Recurrence::Once));
        for job in set.jobs.iter_mut() {
            if let Recurrence::Every(period) = job.recurrence {
                if job.due <= now {
                    job.due = now.checked_add_signed(period).unwrap_or(DateTime::<Utc>::MAX_UTC);
                }
            }
        }
        fired
    }

    pub fn next_run(&self, tag: &str) -> Option<DateTime<Utc>> {
        self.lock().jobs.iter().filter(|j| j.tag == tag).map(|j| j.due).min()
    }

    pub fn count(&self, tag: &str) -> usize {
        self.lock().jobs.iter().filter(|j| j.tag == tag).count()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    /// Copies of all registered jobs, soonest first.
    pub fn snapshot(&self) -> Vec<JobInfo> {
        let set = self.lock();
        let mut infos: Vec<JobInfo> = set
            .jobs
            .iter()
            .map(|j| JobInfo {
                tag: j.tag.clone(),
                action: j.action,
                period_secs: match j.recurrence {
                    Recurrence::Every(p) => Some(p.num_seconds()),
                    Recurrence::Once => None,
                },
                next_run: j.due,
            })
            .collect();
        infos.sort_by_key(|i| i.next_run);
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Clock that only moves when told to.
    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

    impl ManualClock {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())))
        }
        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
        fn scheduler(&self) -> Scheduler {
            let inner = self.0.clone();
            Scheduler::with_clock(Arc::new(move || *inner.lock().unwrap()))
        }
    }

    #[test]
    fn test_recurring_first_fire_after_one_period() {
        let clock = ManualClock::new();
        let sched = clock.scheduler();
        sched.schedule_recurring(tags::HOURLY_TEST, Duration::hours(1), JobAction::SpeedTest).unwrap();

        clock.advance(Duration::minutes(59));
        assert!(sched.take_due().is_empty());

        clock.advance(Duration::minutes(1));
        let fired = sched.take_due();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].tag, tags::HOURLY_TEST);
        assert_eq!(fired[0].action, JobAction::SpeedTest);
    }

    #[test]
    fn test_replace_same_tag_twice_leaves_one_job() {
        let clock = ManualClock::new();
        let sched = clock.scheduler();
        sched.schedule_recurring(tags::HOURLY_TEST, Duration::hours(1), JobAction::SpeedTest).unwrap();
        sched.schedule_recurring(tags::HOURLY_TEST, Duration::hours(3), JobAction::SpeedTest).unwrap();
        sched.schedule_recurring(tags::HOURLY_TEST, Duration::hours(2), JobAction::SpeedTest).unwrap();

        assert_eq!(sched.count(tags::HOURLY_TEST), 1);
        let info = sched.snapshot();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].period_secs, Some(2 * 3600));
    }

    #[test]
    fn test_missed_ticks_fire_once() {
        let clock = ManualClock::new();
        let sched = clock.scheduler();
        sched.schedule_recurring("custom", Duration::minutes(1), JobAction::SpeedTest).unwrap();

        // Process "paused" for ten periods.
        clock.advance(Duration::minutes(10));
        assert_eq!(sched.take_due().len(), 1);
        assert!(sched.take_due().is_empty());
        assert_eq!(sched.next_run("custom"), Some(sched.now() + Duration::minutes(1)));
    }

    #[test]
    fn test_once_job_is_retired_by_sweep() {
        let clock = ManualClock::new();
        let sched = clock.scheduler();
        sched.schedule_once_tagged(tags::STARTUP_TEST, Duration::minutes(1), JobAction::SpeedTest).unwrap();

        clock.advance(Duration::minutes(1));
        assert_eq!(sched.take_due().len(), 1);
        assert_eq!(sched.count(tags::STARTUP_TEST), 0);
        clock.advance(Duration::minutes(5));
        assert!(sched.take_due().is_empty());
    }

    #[test]
    fn test_fires_in_due_order() {
        let clock = ManualClock::new();
        let sched = clock.scheduler();
        sched.schedule_once_tagged("late", Duration::seconds(30), JobAction::Backup).unwrap();
        sched.schedule_once_tagged("early", Duration::seconds(10), JobAction::SpeedTest).unwrap();
        sched.schedule_recurring("middle", Duration::seconds(20), JobAction::SpeedTest).unwrap();

        clock.advance(Duration::seconds(40));
        let tags: Vec<String> = sched.take_due().into_iter().map(|f| f.tag).collect();
        assert_eq!(tags, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_cancel_removes_all_and_is_noop_when_absent() {
        let sched = Scheduler::new();
        assert_eq!(sched.cancel("nothing"), 0);
        sched.schedule_once_tagged(tags::BACKUP, Duration::hours(1), JobAction::Backup).unwrap();
        assert_eq!(sched.cancel(tags::BACKUP), 1);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_cancel_before_due_prevents_fire() {
        let clock = ManualClock::new();
        let sched = clock.scheduler();
        sched.schedule_recurring(tags::HOURLY_TEST, Duration::hours(1), JobAction::SpeedTest).unwrap();
        sched.cancel(tags::HOURLY_TEST);
        clock.advance(Duration::hours(2));
        assert!(sched.take_due().is_empty());
    }

    #[test]
    fn test_rejects_non_positive_period() {
        let sched = Scheduler::new();
        let err = sched
            .schedule_recurring(tags::HOURLY_TEST, Duration::zero(), JobAction::SpeedTest)
            .unwrap_err();
        assert_eq!(err, SchedulerError::InvalidPeriod { secs: 0 });
        assert!(sched.is_empty());
    }

    #[test]
    fn test_overflowing_period_is_rejected() {
        let sched = Scheduler::new();
        let err = sched
            .schedule_recurring(tags::HOURLY_TEST, Duration::MAX, JobAction::SpeedTest)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DueTimeOverflow { .. }));

        // Fits once but not twice: the sweep could never re-arm it.
        let far = Duration::days(365 * 200_000);
        assert!(sched.schedule_recurring(tags::HOURLY_TEST, far, JobAction::SpeedTest).is_err());
        assert!(sched
            .schedule_once_tagged(tags::STARTUP_TEST, Duration::MAX, JobAction::SpeedTest)
            .is_err());
        assert!(sched.is_empty());
    }

    #[test]
    fn test_recurring_at_uses_explicit_first_due() {
        let clock = ManualClock::new();
        let sched = clock.scheduler();
        let first = sched.now() + Duration::hours(3);
        sched
            .schedule_recurring_at(tags::BACKUP, first, Duration::days(1), JobAction::Backup)
            .unwrap();
        assert_eq!(sched.next_run(tags::BACKUP), Some(first));
    }

    #[test]
    fn test_concurrent_replace_and_sweep_keep_one_job() {
        let sched = Scheduler::new();
        sched.schedule_recurring(tags::HOURLY_TEST, Duration::hours(1), JobAction::SpeedTest).unwrap();

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let sched = sched.clone();
                std::thread::spawn(move || {
                    for n in 0..200 {
                        let hours = 1 + ((i + n) % 5) as i64;
                        sched
                            .schedule_recurring(tags::HOURLY_TEST, Duration::hours(hours), JobAction::SpeedTest)
                            .unwrap();
                    }
                })
            })
            .collect();
        let sweeper = {
            let sched = sched.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let _ = sched.take_due();
                    // Never zero: a replace is never observed half-done.
                    assert_eq!(sched.count(tags::HOURLY_TEST), 1);
                }
            })
        };
        for w in writers {
            w.join().unwrap();
        }
        sweeper.join().unwrap();
        assert_eq!(sched.count(tags::HOURLY_TEST), 1);
    }
}
