//! Bandwidth test orchestration around the Ookla `speedtest` CLI.
//!
//! One invocation moves through: gate acquisition, the primary run (plus at
//! most one fallback run without a pinned server), decoding, persistence,
//! notification, gate release and re-arming of the recurring slot.

pub mod ookla;
pub mod servers;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::gate::{GatePermit, TestGate};
use crate::notify::{Category, Notify};
use crate::process::{CommandRunner, ProcessError, ProcessOutput};
use crate::scheduler::{profiles, Scheduler};
use crate::storage::{self, settings, Pool};

#[derive(Debug, Error)]
pub enum SpeedTestError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("unexpected speedtest output (type {kind:?})")]
    Format { kind: Option<String>, raw: String },

    #[error("failed to decode speedtest output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

/// One persisted measurement. Bandwidth in Mbps, latencies in ms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedtestResult {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub ping: f64,
    pub jitter: f64,
    pub download: f64,
    pub upload: f64,
    pub server_id: Option<i64>,
    pub server_name: Option<String>,
    pub server_location: Option<String>,
    pub result_url: Option<String>,
    pub isp: Option<String>,
    pub client_ip: Option<String>,
    pub ping_low: Option<f64>,
    pub download_latency_low: Option<f64>,
    pub download_latency_high: Option<f64>,
    pub upload_latency_low: Option<f64>,
    pub upload_latency_high: Option<f64>,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(SpeedtestResult),
    /// Another test held the gate. Nothing was spawned.
    Rejected,
}

pub struct SpeedTestRunner {
    pool: Pool,
    gate: TestGate,
    scheduler: Scheduler,
    runner: Arc<dyn CommandRunner>,
    notifier: Arc<dyn Notify>,
    speedtest_path: String,
    timeout: Duration,
}

impl SpeedTestRunner {
    pub fn new(
        pool: Pool,
        gate: TestGate,
        scheduler: Scheduler,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notify>,
        speedtest_path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            gate,
            scheduler,
            runner,
            notifier,
            speedtest_path: speedtest_path.into(),
            timeout,
        }
    }

    pub fn gate(&self) -> &TestGate {
        &self.gate
    }

    /// Run one test unless one is already in progress.
    pub async fn run(&self, server_id: Option<i64>, lang: Option<&str>) -> Result<RunOutcome, SpeedTestError> {
        let Some(permit) = self.gate.try_acquire() else {
            debug!("Speed test already running; request rejected");
            return Ok(RunOutcome::Rejected);
        };
        self.execute(permit, server_id, lang).await.map(RunOutcome::Completed)
    }

    /// Run one test with a gate permit the caller already holds.
    ///
    /// The permit is released before re-arming the recurring slot, on every
    /// path out of this function.
    pub async fn execute(
        &self,
        permit: GatePermit,
        server_id: Option<i64>,
        lang: Option<&str>,
    ) -> Result<SpeedtestResult, SpeedTestError> {
        let current = settings::load_settings(&self.pool).map_err(SpeedTestError::Storage)?;
        let hours_at_start = current.schedule_hours;
        let lang = lang.unwrap_or(&current.app_language).to_string();

        let outcome = self.measure_and_record(server_id, &lang).await;
        if let Err(e) = &outcome {
            match e {
                SpeedTestError::Format { raw, .. } => error!(error = %e, %raw, "Speed test produced unusable output"),
                _ => error!(error = %e, "Speed test failed"),
            }
        }

        permit.release();
        self.rearm(hours_at_start);
        outcome
    }

    async fn measure_and_record(&self, server_id: Option<i64>, lang: &str) -> Result<SpeedtestResult, SpeedTestError> {
        let output = self.run_with_fallback(server_id).await?;
        let result = ookla::parse_result(&output.stdout, Utc::now())?;
        storage::insert_result(&self.pool, &result).map_err(SpeedTestError::Storage)?;
        info!(
            download = result.download,
            upload = result.upload,
            ping = result.ping,
            server = ?result.server_name,
            "Speed test finished"
        );

        let msgs = crate::i18n::messages(lang);
        let body = msgs.speedtest_body(result.download, result.upload, result.ping);
        self.notifier.notify(msgs.speedtest_title, &body, Category::Speedtest).await;
        Ok(result)
    }

    fn argv(&self, server_id: Option<i64>) -> Vec<String> {
        let mut argv: Vec<String> = [
            self.speedtest_path.as_str(),
            "--accept-license",
            "--accept-gdpr",
            "--format=json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        if let Some(id) = server_id {
            argv.push("--server-id".to_string());
            argv.push(id.to_string());
        }
        argv
    }

    /// A non-zero exit on a pinned server is retried once with automatic
    /// server selection. Timeouts and spawn failures are final: a retry
    /// would hold the gate for a second full timeout.
    async fn run_with_fallback(&self, server_id: Option<i64>) -> Result<ProcessOutput, SpeedTestError> {
        match self.runner.run(&self.argv(server_id), self.timeout).await {
            Ok(out) => Ok(out),
            Err(e @ ProcessError::NonZeroExit { .. }) => match server_id {
                Some(id) => {
                    warn!(server_id = id, error = %e, "Test on selected server failed, retrying with automatic selection");
                    Ok(self.runner.run(&self.argv(None), self.timeout).await?)
                }
                None => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Realign the recurring slot to `now + interval`. The interval is read
    /// again so a change saved during the run wins; the value seen at start
    /// is used if the store is unavailable.
    fn rearm(&self, hours_at_start: i64) {
        let hours = match settings::load_settings(&self.pool) {
            Ok(s) => s.schedule_hours,
            Err(e) => {
                warn!(error = %e, "Could not re-read schedule interval");
                hours_at_start
            }
        };
        if hours <= 0 && hours_at_start <= 0 {
            return;
        }
        if let Err(e) = profiles::arm_hourly_test(&self.scheduler, hours) {
            error!(error = %e, "Failed to re-arm recurring test");
        }
    }
}
