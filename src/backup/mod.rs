//! Scheduled database dumps with local retention.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::process::CommandRunner;
use crate::scheduler::{tags, JobAction, Scheduler, SchedulerError};
use crate::storage::settings::{self, BackupSettings};
use crate::storage::{schema, Pool};

const FILE_PREFIX: &str = "speedtestlog_backup_";
const FILE_SUFFIX: &str = ".sql";
const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Tables replaced wholesale by a restore.
const RESTORED_TABLES: [&str; 5] = [
    "speedtest_results",
    "ping_logs",
    "app_settings",
    "notification_settings",
    "backup_settings",
];

/// Attachment name for a dump download, stamped with local time.
pub fn dump_file_name(now: NaiveDateTime) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", now.format(STAMP_FORMAT))
}

/// `HH:MM`, 24-hour clock.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// First instant strictly after `now` whose wall-clock time in `now`'s zone
/// is `at`. Falls through to the following day when `at` does not exist on
/// a DST change day.
pub fn next_occurrence<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> Option<DateTime<Utc>> {
    let tz = now.timezone();
    let mut day = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&day.and_time(at)).earliest() {
            if candidate > *now {
                return Some(candidate.with_timezone(&Utc));
            }
        }
        day = day.succ_opt()?;
    }
    None
}

/// Align the `backup` slot with `settings`. Safe to call after every save:
/// the slot is replaced, never duplicated. Returns whether a job is armed.
pub fn setup(scheduler: &Scheduler, settings: &BackupSettings) -> Result<bool, SchedulerError> {
    if !settings.enabled || settings.schedule_days == 0 {
        scheduler.cancel(tags::BACKUP);
        return Ok(false);
    }
    let Some(at) = parse_time_of_day(&settings.schedule_time) else {
        warn!(time = %settings.schedule_time, "Invalid backup time; backup not scheduled");
        scheduler.cancel(tags::BACKUP);
        return Ok(false);
    };
    let days = settings.schedule_days.max(1);
    let period = TimeDelta::try_days(days).ok_or_else(|| SchedulerError::DueTimeOverflow {
        tag: tags::BACKUP.to_string(),
    })?;
    let now_local = scheduler.now().with_timezone(&Local);
    let Some(first) = next_occurrence(&now_local, at) else {
        scheduler.cancel(tags::BACKUP);
        return Ok(false);
    };

    scheduler.schedule_recurring_at(tags::BACKUP, first, period, JobAction::Backup)?;
    info!(days, time = %settings.schedule_time, next_run = %first, "Backup scheduled");
    Ok(true)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Backups are disabled in settings.
    Skipped,
    Written { path: PathBuf, pruned: usize },
}

pub struct BackupTask {
    pool: Pool,
    runner: Arc<dyn CommandRunner>,
    command: Vec<String>,
    restore_command: Vec<String>,
    db_path: PathBuf,
    backup_dir: PathBuf,
    timeout: Duration,
}

impl BackupTask {
    pub fn new(
        pool: Pool,
        runner: Arc<dyn CommandRunner>,
        command: Vec<String>,
        restore_command: Vec<String>,
        db_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            runner,
            command,
            restore_command,
            db_path: db_path.into(),
            backup_dir: backup_dir.into(),
            timeout,
        }
    }

    fn argv(&self) -> Vec<String> {
        let db = self.db_path.to_string_lossy();
        self.command.iter().map(|part| part.replace("{db}", &db)).collect()
    }

    fn restore_argv(&self, scratch_db: &Path, script: &Path) -> Vec<String> {
        let db = scratch_db.to_string_lossy();
        let file = script.to_string_lossy();
        self.restore_command
            .iter()
            .map(|part| part.replace("{db}", &db).replace("{file}", &file))
            .collect()
    }

    /// Run the dump command and return its SQL. Nothing is written to disk.
    pub async fn dump(&self) -> Result<String> {
        let out = self.runner.run(&self.argv(), self.timeout).await?;
        Ok(out.stdout)
    }

    /// Dump, write, prune, then record the outcome in `backup_settings`.
    pub async fn perform(&self) -> Result<BackupOutcome> {
        info!("Backup started");
        let current = settings::load_backup_settings(&self.pool)?;
        if !current.enabled {
            warn!("Backup skipped: disabled");
            return Ok(BackupOutcome::Skipped);
        }

        match self.dump_and_prune(&current).await {
            Ok(outcome) => {
                settings::record_backup_status(&self.pool, Some(Utc::now()), "success")?;
                info!(?outcome, "Backup finished");
                Ok(outcome)
            }
            Err(e) => {
                let status = format!("error: {e:#}");
                if let Err(store_err) = settings::record_backup_status(&self.pool, None, &status) {
                    warn!(error = %store_err, "Could not record backup status");
                }
                Err(e)
            }
        }
    }

    async fn dump_and_prune(&self, current: &BackupSettings) -> Result<BackupOutcome> {
        let sql = self.dump().await?;

        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .with_context(|| format!("failed to create {}", self.backup_dir.display()))?;
        let now = Local::now().naive_local();
        let path = self.backup_dir.join(dump_file_name(now));
        tokio::fs::write(&path, sql.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        // A cutoff before the representable range keeps everything.
        let cutoff = TimeDelta::try_days(current.retention_days).and_then(|age| now.checked_sub_signed(age));
        let pruned = match cutoff {
            Some(cutoff) if current.retention_days > 0 => prune_local(&self.backup_dir, cutoff).await?,
            _ => 0,
        };
        Ok(BackupOutcome::Written { path, pruned })
    }

    /// Replace the database contents with an uploaded SQL dump.
    ///
    /// The dump is loaded into a scratch database by the restore command,
    /// migrated, and then copied over the live tables in one transaction.
    /// A dump that fails to load leaves the live database untouched.
    /// Returns the number of rows copied.
    pub async fn restore(&self, sql: &[u8]) -> Result<usize> {
        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .with_context(|| format!("failed to create {}", self.backup_dir.display()))?;
        let scratch = Scratch::new(&self.backup_dir);
        tokio::fs::write(&scratch.script, sql)
            .await
            .with_context(|| format!("failed to write {}", scratch.script.display()))?;

        info!(bytes = sql.len(), "Restore started");
        self.runner
            .run(&self.restore_argv(&scratch.db, &scratch.script), self.timeout)
            .await
            .context("restore command failed")?;

        let pool = self.pool.clone();
        let db = scratch.db.clone();
        let copied = tokio::task::spawn_blocking(move || copy_into_live(&pool, &db))
            .await
            .context("restore task panicked")??;
        info!(rows = copied, "Restore finished");
        Ok(copied)
    }
}

/// Script and database files for one restore, removed on drop.
struct Scratch {
    script: PathBuf,
    db: PathBuf,
}

impl Scratch {
    fn new(dir: &Path) -> Self {
        let id = uuid::Uuid::new_v4();
        Self {
            script: dir.join(format!("restore-{id}.sql")),
            db: dir.join(format!("restore-{id}.db")),
        }
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        for path in [&self.script, &self.db] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %path.display(), error = %e, "Could not remove restore scratch file");
                }
            }
        }
    }
}

fn copy_into_live(pool: &Pool, scratch_db: &Path) -> Result<usize> {
    {
        let conn = Connection::open(scratch_db)
            .with_context(|| format!("failed to open {}", scratch_db.display()))?;
        let has_results: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'speedtest_results'",
            [],
            |row| row.get(0),
        )?;
        if has_results == 0 {
            anyhow::bail!("uploaded dump has no speedtest_results table");
        }
        schema::migrate(&conn).context("uploaded dump does not fit the schema")?;
    }

    let mut conn = pool.get()?;
    conn.execute(
        "ATTACH DATABASE ?1 AS restored",
        params![scratch_db.to_string_lossy().into_owned()],
    )?;
    let copied = replace_tables(&mut conn);
    if let Err(e) = conn.execute_batch("DETACH DATABASE restored") {
        warn!(error = %e, "Could not detach restored database");
    }
    copied
}

fn table_columns(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1, ?2)")?;
    let rows = stmt.query_map(params![table, schema], |row| row.get(0))?;
    rows.collect()
}

fn replace_tables(conn: &mut Connection) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut copied = 0;
    for table in RESTORED_TABLES {
        // Columns a dump from an older release lacks keep their defaults.
        let present = table_columns(&tx, "restored", table)?;
        let columns = table_columns(&tx, "main", table)?
            .into_iter()
            .filter(|c| present.contains(c))
            .collect::<Vec<_>>()
            .join(", ");
        tx.execute(&format!("DELETE FROM main.{table}"), [])?;
        let rows = tx.execute(
            &format!("INSERT INTO main.{table} ({columns}) SELECT {columns} FROM restored.{table}"),
            [],
        )?;
        debug!(%table, rows, "Table restored");
        copied += rows;
    }
    tx.commit()?;
    Ok(copied)
}

fn stamp_of(file_name: &str) -> Option<NaiveDateTime> {
    let stamp = file_name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()
}

/// Remove our own dump files stamped before `cutoff`. Other files are left
/// alone.
async fn prune_local(dir: &Path, cutoff: NaiveDateTime) -> Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(stamp) = name.to_str().and_then(stamp_of) else {
            continue;
        };
        if stamp < cutoff {
            tokio::fs::remove_file(entry.path()).await?;
            info!(file = %entry.path().display(), "Old backup removed");
            removed += 1;
        }
    }
    Ok(removed)
}
