//! TOML configuration for the SpeedtestLog daemon.
//!
//! Process-level knobs only: where to listen, where the database lives,
//! which binaries to invoke and how long to wait for them. Operational
//! settings that the operator edits at runtime (interval, ping target,
//! language) live in the `app_settings` table instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable that points at an explicit config file.
pub const CONFIG_ENV: &str = "SPEEDTESTLOG_CONFIG";

const SYSTEM_CONFIG_PATH: &str = "/etc/speedtestlog/speedtestlog.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the daemon process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        if config.scheduler.tick_ms == 0 {
            warn!(path = %path.display(), "scheduler.tick_ms must be positive, using 1");
            config.scheduler.tick_ms = 1;
        }
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. An explicit path (the `--config` flag). Errors are fatal here.
    /// 2. The path in `SPEEDTESTLOG_CONFIG`.
    /// 3. `/etc/speedtestlog/speedtestlog.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SPEEDTESTLOG_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the API listener.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Database and on-disk artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Directory for cached process output (server catalogue).
    pub data_dir: PathBuf,
    /// Directory that receives database dumps.
    pub backup_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/speedtestlog.db"),
            data_dir: PathBuf::from("data"),
            backup_dir: PathBuf::from("data/backups"),
        }
    }
}

// ---------------------------------------------------------------------------
// External tools
// ---------------------------------------------------------------------------

/// External binaries and their hard timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Ookla `speedtest` CLI (bare name resolved via `$PATH`, or absolute).
    pub speedtest_path: String,
    pub speedtest_timeout_secs: u64,
    pub ping_path: String,
    /// Bound on the whole `ping -c 3` invocation, not per echo.
    pub ping_timeout_secs: u64,
    /// Dump command for backups. `{db}` is replaced with the database path.
    pub backup_command: Vec<String>,
    /// Loads an uploaded dump into a scratch database. `{db}` is the
    /// scratch database, `{file}` the uploaded SQL.
    pub restore_command: Vec<String>,
    pub backup_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            speedtest_path: "speedtest".to_string(),
            speedtest_timeout_secs: 600,
            ping_path: "ping".to_string(),
            ping_timeout_secs: 15,
            backup_command: vec!["sqlite3".to_string(), "{db}".to_string(), ".dump".to_string()],
            restore_command: vec![
                "sqlite3".to_string(),
                "-bail".to_string(),
                "{db}".to_string(),
                ".read '{file}'".to_string(),
            ],
            backup_timeout_secs: 300,
        }
    }
}

impl ToolsConfig {
    pub fn speedtest_timeout(&self) -> Duration {
        Duration::from_secs(self.speedtest_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn backup_timeout(&self) -> Duration {
        Duration::from_secs(self.backup_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sweep tick in milliseconds.
    pub tick_ms: u64,
    /// Delay before the one-shot startup test fires.
    pub startup_delay_secs: u64,
}

impl SchedulerConfig {
    /// Sweep period, never zero.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            startup_delay_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Used when the stored interval is absent.
    pub default_interval_secs: u64,
    /// Floor applied to the stored interval.
    pub min_interval_secs: u64,
    /// Samples older than this are pruned every cycle.
    pub retention_hours: i64,
    /// Number of samples returned by the status endpoint.
    pub history_limit: usize,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 30,
            min_interval_secs: 5,
            retention_hours: 24,
            history_limit: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub timeout_secs: u64,
    pub default_ntfy_server: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            default_ntfy_server: "https://ntfy.sh".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
