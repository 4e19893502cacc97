use crate::scheduler::{FiredJob, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Owns *how* fired jobs run. The scheduler only decides *when*.
///
/// `dispatch` must return promptly: implementations spawn the job body as a
/// detached task so a slow test never stalls the sweep.
pub trait JobExecutor: Send + Sync {
    fn dispatch(&self, job: FiredJob);
}

/// One sweep: take every due job under the scheduler lock, then hand each
/// to the executor outside of it. Returns the number of jobs fired.
pub fn run_due(scheduler: &Scheduler, executor: &dyn JobExecutor) -> usize {
    let due = scheduler.take_due();
    let fired = due.len();
    for job in due {
        info!(tag = %job.tag, action = ?job.action, "Job due");
        executor.dispatch(job);
    }
    fired
}

/// Main scheduler execution loop. Sweeps once per `tick`, forever.
pub async fn run_scheduler_loop(scheduler: Scheduler, executor: Arc<dyn JobExecutor>, tick: Duration) {
    info!(tick_ms = tick.as_millis() as u64, "Scheduler engine started");

    let mut interval = tokio::time::interval(tick);
    // A stalled runtime must not produce a burst of catch-up sweeps.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let fired = run_due(&scheduler, executor.as_ref());
        if fired > 0 {
            debug!(fired, "Sweep dispatched jobs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{tags, JobAction};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collecting(Mutex<Vec<FiredJob>>);

    impl JobExecutor for Collecting {
        fn dispatch(&self, job: FiredJob) {
            self.0.lock().unwrap().push(job);
        }
    }

    #[test]
    fn test_run_due_dispatches_each_due_job_once() {
        let scheduler = Scheduler::new();
        scheduler
            .schedule_once_tagged(tags::STARTUP_TEST, chrono::Duration::zero(), JobAction::SpeedTest)
            .unwrap();
        scheduler
            .schedule_recurring(tags::HOURLY_TEST, chrono::Duration::hours(1), JobAction::SpeedTest)
            .unwrap();

        let exec = Collecting::default();
        assert_eq!(run_due(&scheduler, &exec), 1);
        assert_eq!(run_due(&scheduler, &exec), 0);

        let seen = exec.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].tag, tags::STARTUP_TEST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_fires_one_shot() {
        let scheduler = Scheduler::new();
        scheduler
            .schedule_once_tagged(tags::STARTUP_TEST, chrono::Duration::zero(), JobAction::SpeedTest)
            .unwrap();

        let exec = Arc::new(Collecting::default());
        let handle = tokio::spawn(run_scheduler_loop(
            scheduler.clone(),
            exec.clone(),
            Duration::from_millis(50),
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert_eq!(exec.0.lock().unwrap().len(), 1);
        assert!(scheduler.is_empty());
    }
}
