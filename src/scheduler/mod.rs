//! Tagged job scheduling: the job set, the sweep loop and the fixed slots.

pub mod engine;
pub mod jobs;
pub mod profiles;

pub use self::engine::{run_due, run_scheduler_loop, JobExecutor};
pub use self::jobs::{
    tags, Clock, FiredJob, JobAction, JobId, JobInfo, Recurrence, Scheduler, SchedulerError,
};
