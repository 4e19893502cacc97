//! Process-wide wiring: one scheduler, one gate, one watchdog, and the
//! operations the HTTP layer calls into.

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backup::{self, BackupTask};
use crate::config::Config;
use crate::gate::TestGate;
use crate::notify::{Dispatcher, Notify};
use crate::process::{CommandRunner, SystemRunner};
use crate::scheduler::{profiles, tags, FiredJob, JobAction, JobExecutor, Scheduler, SchedulerError};
use crate::speedtest::servers::ServerCatalogue;
use crate::speedtest::{RunOutcome, SpeedTestRunner};
use crate::storage::settings::{
    self, BackupSettings, BackupSettingsInput, SavedSettings, SettingsError, SettingsUpdate,
};
use crate::storage::Pool;
use crate::watchdog::Watchdog;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Invalid(#[from] SettingsError),

    #[error(transparent)]
    Schedule(#[from] SchedulerError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct Daemon {
    pub config: Config,
    pub pool: Pool,
    pub scheduler: Scheduler,
    pub speedtest: Arc<SpeedTestRunner>,
    pub watchdog: Arc<Watchdog>,
    pub backup: Arc<BackupTask>,
    pub servers: Arc<ServerCatalogue>,
    /// Used directly only for explicit test sends.
    pub dispatcher: Arc<Dispatcher>,
}

impl Daemon {
    /// Production wiring: real processes, HTTP notifications.
    pub fn new(config: Config, pool: Pool) -> Result<Self> {
        let dispatcher = Arc::new(Dispatcher::new(pool.clone(), &config.notify)?);
        Ok(Self::with_parts(
            config,
            pool,
            Scheduler::new(),
            Arc::new(SystemRunner),
            dispatcher.clone(),
            dispatcher,
        ))
    }

    /// Wiring with injected collaborators. `notifier` receives every
    /// event notification.
    pub fn with_parts(
        config: Config,
        pool: Pool,
        scheduler: Scheduler,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notify>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let tools = &config.tools;
        let speedtest = Arc::new(SpeedTestRunner::new(
            pool.clone(),
            TestGate::new(),
            scheduler.clone(),
            runner.clone(),
            notifier.clone(),
            tools.speedtest_path.clone(),
            tools.speedtest_timeout(),
        ));
        let watchdog = Arc::new(Watchdog::new(
            pool.clone(),
            runner.clone(),
            notifier,
            tools.ping_path.clone(),
            tools.ping_timeout(),
            config.watchdog.clone(),
        ));
        let backup = Arc::new(BackupTask::new(
            pool.clone(),
            runner.clone(),
            tools.backup_command.clone(),
            tools.restore_command.clone(),
            config.storage.db_path.clone(),
            config.storage.backup_dir.clone(),
            tools.backup_timeout(),
        ));
        let servers = Arc::new(ServerCatalogue::new(
            runner,
            tools.speedtest_path.clone(),
            config.storage.data_dir.join("servers.json"),
            tools.speedtest_timeout(),
        ));

        Self {
            config,
            pool,
            scheduler,
            speedtest,
            watchdog,
            backup,
            servers,
            dispatcher,
        }
    }

    /// Register the jobs implied by persisted settings.
    pub fn install_jobs(&self) -> Result<()> {
        let current = settings::load_settings(&self.pool)?;
        let delay = chrono::Duration::seconds(self.config.scheduler.startup_delay_secs as i64);
        profiles::install_startup_jobs(&self.scheduler, &current, delay)?;
        self.align_backup_job()
    }

    /// A stored schedule the scheduler cannot represent leaves the slot
    /// empty instead of failing startup.
    fn align_backup_job(&self) -> Result<()> {
        let backup_settings = settings::load_backup_settings(&self.pool)?;
        if let Err(e) = backup::setup(&self.scheduler, &backup_settings) {
            warn!(days = backup_settings.schedule_days, error = %e, "Stored backup schedule is unusable, backup not scheduled");
        }
        Ok(())
    }

    /// Replace the database with an uploaded dump, then realign the
    /// recurring slots with the restored settings.
    pub async fn restore(&self, sql: &[u8]) -> Result<usize> {
        let copied = self.backup.restore(sql).await?;
        let current = settings::load_settings(&self.pool)?;
        if let Err(e) = profiles::arm_hourly_test(&self.scheduler, current.schedule_hours) {
            warn!(hours = current.schedule_hours, error = %e, "Restored test interval is unusable, recurring tests not scheduled");
        }
        self.align_backup_job()?;
        Ok(copied)
    }

    pub fn executor(&self) -> Arc<dyn JobExecutor> {
        Arc::new(Executor {
            pool: self.pool.clone(),
            speedtest: self.speedtest.clone(),
            backup: self.backup.clone(),
        })
    }

    /// Spawn the sweep loop, the watchdog loop and the server-list warmup.
    pub fn spawn_background(&self) {
        tokio::spawn(crate::scheduler::run_scheduler_loop(
            self.scheduler.clone(),
            self.executor(),
            self.config.scheduler.tick(),
        ));
        tokio::spawn(self.watchdog.clone().run());

        let servers = self.servers.clone();
        tokio::spawn(async move {
            if let Err(e) = servers.warm().await {
                warn!(error = %e, "Could not fetch server list");
            }
        });
    }

    /// Apply a partial settings update. A changed interval is rescheduled
    /// before this returns.
    pub fn save_settings(&self, update: &SettingsUpdate) -> Result<SavedSettings, UpdateError> {
        update.validate()?;
        let saved = settings::save_settings(&self.pool, update)?;
        if saved.interval_changed {
            profiles::arm_hourly_test(&self.scheduler, saved.settings.schedule_hours)?;
        }
        Ok(saved)
    }

    /// Persist backup settings and realign the backup slot before returning.
    pub fn save_backup_settings(&self, input: &BackupSettingsInput) -> Result<BackupSettings, UpdateError> {
        input.validate()?;
        let saved = settings::save_backup_settings(&self.pool, input)?;
        backup::setup(&self.scheduler, &saved)?;
        Ok(saved)
    }

    /// Start a test in the background. Returns `false` when one is already
    /// running; nothing is spawned in that case.
    pub fn trigger_test(&self, server_id: Option<i64>, lang: Option<String>) -> bool {
        let Some(permit) = self.speedtest.gate().try_acquire() else {
            debug!("Manual test rejected: already running");
            return false;
        };
        // A manual run supersedes the pending startup run.
        self.scheduler.cancel(tags::STARTUP_TEST);

        let speedtest = self.speedtest.clone();
        tokio::spawn(async move {
            if let Err(e) = speedtest.execute(permit, server_id, lang.as_deref()).await {
                warn!(error = %e, "Manual speed test failed");
            }
        });
        true
    }

    pub fn test_running(&self) -> bool {
        self.speedtest.gate().is_held()
    }
}

/// Runs fired jobs as detached tasks so the sweep never waits on them.
struct Executor {
    pool: Pool,
    speedtest: Arc<SpeedTestRunner>,
    backup: Arc<BackupTask>,
}

impl JobExecutor for Executor {
    fn dispatch(&self, job: FiredJob) {
        match job.action {
            JobAction::SpeedTest => {
                let pool = self.pool.clone();
                let speedtest = self.speedtest.clone();
                tokio::spawn(async move {
                    // The server is read at fire time, not when the job was armed.
                    let server_id = match settings::load_settings(&pool) {
                        Ok(s) => s.selected_server_id,
                        Err(e) => {
                            warn!(error = %e, "Could not read selected server");
                            None
                        }
                    };
                    match speedtest.run(server_id, None).await {
                        Ok(RunOutcome::Completed(_)) => {}
                        Ok(RunOutcome::Rejected) => info!(tag = %job.tag, "Test already running; scheduled run skipped"),
                        Err(e) => error!(tag = %job.tag, error = %e, "Scheduled speed test failed"),
                    }
                });
            }
            JobAction::Backup => {
                let backup = self.backup.clone();
                tokio::spawn(async move {
                    if let Err(e) = backup.perform().await {
                        error!(error = %e, "Backup failed");
                    }
                });
            }
        }
    }
}
