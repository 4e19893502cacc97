//! SQLite storage layer -- schema, queries, migrations.
//!
//! Every function takes the pool and checks out one connection for the
//! duration of a single logical operation. Nothing here holds a connection
//! across an await point or an external process call.

pub mod schema;
pub mod settings;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};

use crate::speedtest::SpeedtestResult;
use crate::watchdog::PingSample;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: impl AsRef<Path>) -> Result<Pool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Fixed-width UTC text so that string order equals time order in SQL.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp '{raw}'").into(),
        )
    })
}

// ---------------------------------------------------------------------------
// Speed test results
// ---------------------------------------------------------------------------

const RESULT_COLUMNS: &str = "id, timestamp, ping, jitter, download, upload, server_id, server_name,
     server_location, result_url, isp, client_ip, ping_low, download_latency_low,
     download_latency_high, upload_latency_low, upload_latency_high";

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<SpeedtestResult> {
    Ok(SpeedtestResult {
        id: row.get(0)?,
        timestamp: ts_column(row, 1)?,
        ping: row.get(2)?,
        jitter: row.get(3)?,
        download: row.get(4)?,
        upload: row.get(5)?,
        server_id: row.get(6)?,
        server_name: row.get(7)?,
        server_location: row.get(8)?,
        result_url: row.get(9)?,
        isp: row.get(10)?,
        client_ip: row.get(11)?,
        ping_low: row.get(12)?,
        download_latency_low: row.get(13)?,
        download_latency_high: row.get(14)?,
        upload_latency_low: row.get(15)?,
        upload_latency_high: row.get(16)?,
    })
}

/// Append a completed speed test result.
pub fn insert_result(pool: &Pool, r: &SpeedtestResult) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        &format!(
            "INSERT INTO speedtest_results ({RESULT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ),
        params![
            r.id,
            format_ts(r.timestamp),
            r.ping,
            r.jitter,
            r.download,
            r.upload,
            r.server_id,
            r.server_name,
            r.server_location,
            r.result_url,
            r.isp,
            r.client_ip,
            r.ping_low,
            r.download_latency_low,
            r.download_latency_high,
            r.upload_latency_low,
            r.upload_latency_high,
        ],
    )
    .context("Failed to insert speed test result")?;
    Ok(())
}

/// Newest first.
pub fn list_results(pool: &Pool, limit: usize) -> Result<Vec<SpeedtestResult>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {RESULT_COLUMNS} FROM speedtest_results ORDER BY timestamp DESC LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit as i64], result_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Every stored result, newest first.
pub fn all_results(pool: &Pool) -> Result<Vec<SpeedtestResult>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {RESULT_COLUMNS} FROM speedtest_results ORDER BY timestamp DESC"
    ))?;
    let rows = stmt.query_map([], result_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn latest_result(pool: &Pool) -> Result<Option<SpeedtestResult>> {
    Ok(list_results(pool, 1)?.into_iter().next())
}

/// Delete results by id. Unknown ids are ignored.
pub fn delete_results(pool: &Pool, ids: &[String]) -> Result<usize> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let mut deleted = 0;
    {
        let mut stmt = tx.prepare("DELETE FROM speedtest_results WHERE id = ?1")?;
        for id in ids {
            deleted += stmt.execute(params![id])?;
        }
    }
    tx.commit()?;
    Ok(deleted)
}

// ---------------------------------------------------------------------------
// Ping samples
// ---------------------------------------------------------------------------

/// Append one watchdog sample and prune everything older than `cutoff`,
/// atomically. Returns the number of pruned rows.
pub fn record_ping_sample(pool: &Pool, sample: &PingSample, cutoff: DateTime<Utc>) -> Result<usize> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO ping_logs (timestamp, target, latency, packet_loss, is_online)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            format_ts(sample.timestamp),
            sample.target,
            sample.latency,
            sample.packet_loss,
            sample.online,
        ],
    )
    .context("Failed to insert ping sample")?;
    let pruned = tx.execute(
        "DELETE FROM ping_logs WHERE timestamp < ?1",
        params![format_ts(cutoff)],
    )?;
    tx.commit()?;
    Ok(pruned)
}

/// The most recent `limit` samples not older than `since`, oldest first.
pub fn ping_history(pool: &Pool, since: DateTime<Utc>, limit: usize) -> Result<Vec<PingSample>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, target, latency, packet_loss, is_online FROM ping_logs
         WHERE timestamp >= ?1
         ORDER BY timestamp DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![format_ts(since), limit as i64], |row| {
        Ok(PingSample {
            id: Some(row.get(0)?),
            timestamp: ts_column(row, 1)?,
            target: row.get(2)?,
            latency: row.get(3)?,
            packet_loss: row.get(4)?,
            online: row.get(5)?,
        })
    })?;
    let mut samples = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    samples.reverse();
    Ok(samples)
}

pub fn count_ping_samples(pool: &Pool) -> Result<i64> {
    let conn = pool.get()?;
    Ok(conn.query_row("SELECT COUNT(*) FROM ping_logs", [], |row| row.get(0))?)
}
