//! Single-row settings tables: operational, notification and backup.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{format_ts, parse_ts, Pool};

const SETTINGS_ROW: i64 = 1;

/// One year.
pub const MAX_SCHEDULE_HOURS: i64 = 24 * 365;
/// One day, in seconds.
pub const MAX_PING_INTERVAL: i64 = 86_400;
pub const MAX_BACKUP_SCHEDULE_DAYS: i64 = 365;
pub const MAX_BACKUP_RETENTION_DAYS: i64 = 3650;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid ping target '{0}'")]
    InvalidTarget(String),
    #[error("{field} must not be negative")]
    Negative { field: &'static str },
    #[error("{field} must be at most {max}")]
    TooLarge { field: &'static str, max: i64 },
    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),
    #[error("invalid time of day '{0}', expected HH:MM")]
    InvalidTimeOfDay(String),
}

/// Reject anything that could be mistaken for a command-line flag or that
/// is not a plain host name / IP literal.
pub fn validate_target(target: &str) -> Result<(), SettingsError> {
    let invalid = target.is_empty()
        || target.starts_with('-')
        || target.chars().any(|c| !c.is_alphanumeric() && c != '.' && c != '-' && c != ':');
    if invalid {
        return Err(SettingsError::InvalidTarget(target.to_string()));
    }
    Ok(())
}

fn check_range(field: &'static str, value: i64, max: i64) -> Result<(), SettingsError> {
    if value < 0 {
        return Err(SettingsError::Negative { field });
    }
    if value > max {
        return Err(SettingsError::TooLarge { field, max });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Operational settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppSettings {
    pub selected_server_id: Option<i64>,
    /// 0 disables recurring tests.
    pub schedule_hours: i64,
    pub ping_target: String,
    /// Seconds; the watchdog applies its own floor and default.
    pub ping_interval: Option<i64>,
    pub declared_download: i64,
    pub declared_upload: i64,
    pub startup_test_enabled: bool,
    pub app_language: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            selected_server_id: None,
            schedule_hours: 1,
            ping_target: "8.8.8.8".to_string(),
            ping_interval: Some(30),
            declared_download: 0,
            declared_upload: 0,
            startup_test_enabled: true,
            app_language: "pl".to_string(),
        }
    }
}

/// Partial update. Absent or null fields keep their stored value;
/// `server_id: 0` clears the selection (automatic server).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub server_id: Option<i64>,
    pub schedule_hours: Option<i64>,
    pub ping_target: Option<String>,
    pub ping_interval: Option<i64>,
    pub declared_download: Option<i64>,
    pub declared_upload: Option<i64>,
    pub startup_test_enabled: Option<bool>,
    pub app_language: Option<String>,
}

impl SettingsUpdate {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(target) = &self.ping_target {
            validate_target(target)?;
        }
        if let Some(h) = self.schedule_hours {
            check_range("schedule_hours", h, MAX_SCHEDULE_HOURS)?;
        }
        if let Some(i) = self.ping_interval {
            check_range("ping_interval", i, MAX_PING_INTERVAL)?;
        }
        if let Some(lang) = &self.app_language {
            if !crate::i18n::is_supported(lang) {
                return Err(SettingsError::UnsupportedLanguage(lang.clone()));
            }
        }
        Ok(())
    }

    fn apply(&self, s: &mut AppSettings) {
        if let Some(id) = self.server_id {
            s.selected_server_id = (id > 0).then_some(id);
        }
        if let Some(h) = self.schedule_hours {
            s.schedule_hours = h;
        }
        if let Some(t) = &self.ping_target {
            s.ping_target = t.clone();
        }
        if let Some(i) = self.ping_interval {
            s.ping_interval = Some(i);
        }
        if let Some(d) = self.declared_download {
            s.declared_download = d;
        }
        if let Some(u) = self.declared_upload {
            s.declared_upload = u;
        }
        if let Some(e) = self.startup_test_enabled {
            s.startup_test_enabled = e;
        }
        if let Some(l) = &self.app_language {
            s.app_language = l.clone();
        }
    }
}

/// Outcome of [`save_settings`].
#[derive(Debug, Clone)]
pub struct SavedSettings {
    pub settings: AppSettings,
    /// `schedule_hours` differs from the previously stored value.
    pub interval_changed: bool,
}

fn read_app_settings(conn: &rusqlite::Connection) -> Result<Option<AppSettings>> {
    Ok(conn
        .query_row(
            "SELECT selected_server_id, schedule_hours, ping_target, ping_interval,
                    declared_download, declared_upload, startup_test_enabled, app_language
             FROM app_settings WHERE id = ?1",
            params![SETTINGS_ROW],
            |row| {
                Ok(AppSettings {
                    selected_server_id: row.get(0)?,
                    schedule_hours: row.get(1)?,
                    ping_target: row.get(2)?,
                    ping_interval: row.get(3)?,
                    declared_download: row.get(4)?,
                    declared_upload: row.get(5)?,
                    startup_test_enabled: row.get(6)?,
                    app_language: row.get(7)?,
                })
            },
        )
        .optional()?)
}

fn write_app_settings(conn: &rusqlite::Connection, s: &AppSettings) -> Result<()> {
    conn.execute(
        "INSERT INTO app_settings (id, selected_server_id, schedule_hours, ping_target, ping_interval,
                                   declared_download, declared_upload, startup_test_enabled, app_language)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            selected_server_id = excluded.selected_server_id,
            schedule_hours = excluded.schedule_hours,
            ping_target = excluded.ping_target,
            ping_interval = excluded.ping_interval,
            declared_download = excluded.declared_download,
            declared_upload = excluded.declared_upload,
            startup_test_enabled = excluded.startup_test_enabled,
            app_language = excluded.app_language",
        params![
            SETTINGS_ROW,
            s.selected_server_id,
            s.schedule_hours,
            s.ping_target,
            s.ping_interval,
            s.declared_download,
            s.declared_upload,
            s.startup_test_enabled,
            s.app_language,
        ],
    )
    .context("Failed to upsert app settings")?;
    Ok(())
}

/// Read the settings row, creating it with defaults on first access.
pub fn load_settings(pool: &Pool) -> Result<AppSettings> {
    let conn = pool.get()?;
    if let Some(s) = read_app_settings(&conn)? {
        return Ok(s);
    }
    let defaults = AppSettings::default();
    write_app_settings(&conn, &defaults)?;
    Ok(defaults)
}

/// Apply a partial update in one transaction.
pub fn save_settings(pool: &Pool, update: &SettingsUpdate) -> Result<SavedSettings> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let mut settings = read_app_settings(&tx)?.unwrap_or_default();
    let previous_hours = settings.schedule_hours;
    update.apply(&mut settings);
    write_app_settings(&tx, &settings)?;
    tx.commit()?;
    Ok(SavedSettings {
        interval_changed: settings.schedule_hours != previous_hours,
        settings,
    })
}

// ---------------------------------------------------------------------------
// Notification settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Delivered by the web UI; nothing is sent server-side.
    #[default]
    Browser,
    Webhook,
    Ntfy,
    Pushover,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Browser => "browser",
            Provider::Webhook => "webhook",
            Provider::Ntfy => "ntfy",
            Provider::Pushover => "pushover",
        }
    }

    fn from_db(s: &str) -> Self {
        match s {
            "webhook" => Provider::Webhook,
            "ntfy" => Provider::Ntfy,
            "pushover" => Provider::Pushover,
            _ => Provider::Browser,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub provider: Provider,
    pub webhook_url: Option<String>,
    pub ntfy_topic: Option<String>,
    pub ntfy_server: Option<String>,
    pub pushover_user_key: Option<String>,
    pub pushover_api_token: Option<String>,
}

pub fn load_notification_settings(pool: &Pool) -> Result<NotificationSettings> {
    let conn = pool.get()?;
    let found = conn
        .query_row(
            "SELECT enabled, provider, webhook_url, ntfy_topic, ntfy_server,
                    pushover_user_key, pushover_api_token
             FROM notification_settings WHERE id = ?1",
            params![SETTINGS_ROW],
            |row| {
                Ok(NotificationSettings {
                    enabled: row.get(0)?,
                    provider: Provider::from_db(&row.get::<_, String>(1)?),
                    webhook_url: row.get(2)?,
                    ntfy_topic: row.get(3)?,
                    ntfy_server: row.get(4)?,
                    pushover_user_key: row.get(5)?,
                    pushover_api_token: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(found.unwrap_or_default())
}

pub fn save_notification_settings(pool: &Pool, ns: &NotificationSettings) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT OR REPLACE INTO notification_settings
            (id, enabled, provider, webhook_url, ntfy_topic, ntfy_server, pushover_user_key, pushover_api_token)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            SETTINGS_ROW,
            ns.enabled,
            ns.provider.as_str(),
            ns.webhook_url,
            ns.ntfy_topic,
            ns.ntfy_server,
            ns.pushover_user_key,
            ns.pushover_api_token,
        ],
    )
    .context("Failed to save notification settings")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Backup settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupSettings {
    pub enabled: bool,
    pub folder_name: String,
    pub schedule_days: i64,
    /// Local time of day, `HH:MM`.
    pub schedule_time: String,
    pub retention_days: i64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            folder_name: "SpeedtestLog_Backup".to_string(),
            schedule_days: 1,
            schedule_time: "03:00".to_string(),
            retention_days: 30,
            last_run: None,
            last_status: None,
        }
    }
}

/// Operator-editable part of [`BackupSettings`]. Missing fields take the
/// documented defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSettingsInput {
    pub enabled: bool,
    pub folder_name: String,
    pub schedule_days: i64,
    pub schedule_time: String,
    pub retention_days: i64,
}

impl Default for BackupSettingsInput {
    fn default() -> Self {
        let d = BackupSettings::default();
        Self {
            enabled: d.enabled,
            folder_name: d.folder_name,
            schedule_days: d.schedule_days,
            schedule_time: d.schedule_time,
            retention_days: d.retention_days,
        }
    }
}

impl BackupSettingsInput {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if crate::backup::parse_time_of_day(&self.schedule_time).is_none() {
            return Err(SettingsError::InvalidTimeOfDay(self.schedule_time.clone()));
        }
        check_range("schedule_days", self.schedule_days, MAX_BACKUP_SCHEDULE_DAYS)?;
        check_range("retention_days", self.retention_days, MAX_BACKUP_RETENTION_DAYS)?;
        Ok(())
    }
}

pub fn load_backup_settings(pool: &Pool) -> Result<BackupSettings> {
    let conn = pool.get()?;
    let found = conn
        .query_row(
            "SELECT enabled, folder_name, schedule_days, schedule_time, retention_days, last_run, last_status
             FROM backup_settings WHERE id = ?1",
            params![SETTINGS_ROW],
            |row| {
                let last_run: Option<String> = row.get(5)?;
                Ok(BackupSettings {
                    enabled: row.get(0)?,
                    folder_name: row.get(1)?,
                    schedule_days: row.get(2)?,
                    schedule_time: row.get(3)?,
                    retention_days: row.get(4)?,
                    last_run: last_run.as_deref().and_then(parse_ts),
                    last_status: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(found.unwrap_or_default())
}

/// Store the operator-editable fields, keeping `last_run`/`last_status`.
pub fn save_backup_settings(pool: &Pool, input: &BackupSettingsInput) -> Result<BackupSettings> {
    {
        let conn = pool.get()?;
        conn.execute(
            "INSERT INTO backup_settings (id, enabled, folder_name, schedule_days, schedule_time, retention_days)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled,
                folder_name = excluded.folder_name,
                schedule_days = excluded.schedule_days,
                schedule_time = excluded.schedule_time,
                retention_days = excluded.retention_days",
            params![
                SETTINGS_ROW,
                input.enabled,
                input.folder_name,
                input.schedule_days,
                input.schedule_time,
                input.retention_days,
            ],
        )
        .context("Failed to save backup settings")?;
    }
    load_backup_settings(pool)
}

pub fn record_backup_status(pool: &Pool, last_run: Option<DateTime<Utc>>, status: &str) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO backup_settings (id, last_run, last_status) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            last_run = COALESCE(excluded.last_run, backup_settings.last_run),
            last_status = excluded.last_status",
        params![SETTINGS_ROW, last_run.map(format_ts), status],
    )?;
    Ok(())
}
