//! Ping watchdog: samples link health forever, independent of the job
//! scheduler, and raises a notification on every online/offline edge.

pub mod ping;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::WatchdogConfig;
use crate::notify::{Category, Notify};
use crate::process::{run_lenient, CommandRunner, ProcessOutput};
use crate::storage::{self, settings, Pool};

use self::ping::{parse_ping_output, ping_argv};

/// One stored ping cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingSample {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub latency: Option<f64>,
    pub packet_loss: f64,
    pub online: bool,
}

/// Latest cycle summary. `online` is `None` until the first cycle completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WatchdogStatus {
    pub online: Option<bool>,
    pub latency: Option<f64>,
    pub loss: f64,
    pub target: String,
    pub updated: Option<DateTime<Utc>>,
}

/// Written only by the watchdog loop.
pub type SharedStatus = Arc<RwLock<WatchdogStatus>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Up,
    Down,
}

/// Edge detection. An unknown previous state never produces an edge.
pub fn detect_transition(previous: Option<bool>, current: bool) -> Option<Transition> {
    match previous {
        Some(prev) if prev != current => Some(if current { Transition::Up } else { Transition::Down }),
        _ => None,
    }
}

/// Configured interval, or the default when unset, never below the floor.
pub fn effective_interval(configured: Option<i64>, cfg: &WatchdogConfig) -> Duration {
    let secs = match configured {
        Some(s) => s.max(cfg.min_interval_secs as i64) as u64,
        None => cfg.default_interval_secs,
    };
    Duration::from_secs(secs)
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub status: WatchdogStatus,
    pub sample: PingSample,
    pub transition: Option<Transition>,
    pub interval: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPoint {
    /// Local wall-clock `HH:MM:SS`.
    pub time: String,
    pub latency: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchdogReport {
    pub current: WatchdogStatus,
    pub history: Vec<HistoryPoint>,
}

pub struct Watchdog {
    pool: Pool,
    runner: Arc<dyn CommandRunner>,
    notifier: Arc<dyn Notify>,
    status: SharedStatus,
    ping_path: String,
    ping_timeout: Duration,
    cfg: WatchdogConfig,
}

impl Watchdog {
    pub fn new(
        pool: Pool,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notify>,
        ping_path: impl Into<String>,
        ping_timeout: Duration,
        cfg: WatchdogConfig,
    ) -> Self {
        Self {
            pool,
            runner,
            notifier,
            status: Arc::new(RwLock::new(WatchdogStatus::default())),
            ping_path: ping_path.into(),
            ping_timeout,
            cfg,
        }
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// One sample against the configured target, without persisting it.
    pub async fn probe(&self, target: &str) -> anyhow::Result<ping::PingReport> {
        settings::validate_target(target)?;
        let output = match run_lenient(self.runner.as_ref(), &ping_argv(&self.ping_path, target), self.ping_timeout).await {
            Ok(out) => out,
            Err(e) if e.is_timeout() => {
                warn!(%target, "Ping timed out");
                ProcessOutput::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(parse_ping_output(&output.stdout))
    }

    /// One full cycle stamped `now`. `previous` is the online state recorded
    /// by the preceding cycle.
    pub async fn cycle(&self, previous: Option<bool>, now: DateTime<Utc>) -> anyhow::Result<CycleOutcome> {
        let current = settings::load_settings(&self.pool)?;
        let interval = effective_interval(current.ping_interval, &self.cfg);
        let target = current.ping_target;

        let report = self.probe(&target).await?;
        let sample = PingSample {
            id: None,
            timestamp: now,
            target: target.clone(),
            latency: report.latency,
            packet_loss: report.packet_loss,
            online: report.online,
        };

        let cutoff = now - chrono::Duration::hours(self.cfg.retention_hours);
        let pruned = storage::record_ping_sample(&self.pool, &sample, cutoff)?;
        if pruned > 0 {
            debug!(pruned, "Pruned old ping samples");
        }

        let transition = detect_transition(previous, report.online);
        if let Some(t) = transition {
            let msgs = crate::i18n::messages(&current.app_language);
            let (title, category) = match t {
                Transition::Up => (msgs.watchdog_up_title, Category::WatchdogUp),
                Transition::Down => (msgs.watchdog_down_title, Category::WatchdogDown),
            };
            info!(%target, online = report.online, "Watchdog state changed");
            let body = msgs.watchdog_body(&target, report.online);
            self.notifier.notify(title, &body, category).await;
        }

        let status = WatchdogStatus {
            online: Some(report.online),
            latency: report.latency.map(|l| (l * 10.0).round() / 10.0),
            loss: report.packet_loss,
            target,
            updated: Some(now),
        };
        Ok(CycleOutcome {
            status,
            sample,
            transition,
            interval,
        })
    }

    /// Never returns. A failed cycle is logged and the loop sleeps the last
    /// known interval before trying again.
    pub async fn run(self: Arc<Self>) {
        info!("Ping watchdog started");
        let mut interval = Duration::from_secs(self.cfg.default_interval_secs);
        loop {
            let previous = self.status.read().await.online;
            match self.cycle(previous, Utc::now()).await {
                Ok(outcome) => {
                    interval = outcome.interval;
                    *self.status.write().await = outcome.status;
                }
                Err(e) => error!(error = %e, "Watchdog cycle failed"),
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Current status plus the most recent samples in the retention window,
    /// oldest first.
    pub async fn report(&self, now: DateTime<Utc>) -> anyhow::Result<WatchdogReport> {
        let since = now - chrono::Duration::hours(self.cfg.retention_hours);
        let history = storage::ping_history(&self.pool, since, self.cfg.history_limit)?
            .into_iter()
            .map(|s| HistoryPoint {
                time: s.timestamp.with_timezone(&Local).format("%H:%M:%S").to_string(),
                latency: s.latency,
            })
            .collect();
        Ok(WatchdogReport {
            current: self.status.read().await.clone(),
            history,
        })
    }
}
