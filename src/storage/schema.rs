//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS speedtest_results (
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            ping REAL NOT NULL,
            jitter REAL NOT NULL,
            download REAL NOT NULL,
            upload REAL NOT NULL,
            server_id INTEGER,
            server_name TEXT,
            server_location TEXT,
            result_url TEXT,
            isp TEXT,
            client_ip TEXT,
            ping_low REAL,
            download_latency_low REAL,
            download_latency_high REAL,
            upload_latency_low REAL,
            upload_latency_high REAL
        );

        CREATE TABLE IF NOT EXISTS ping_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            target TEXT NOT NULL,
            latency REAL,
            packet_loss REAL NOT NULL,
            is_online INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS app_settings (
            id INTEGER PRIMARY KEY,
            selected_server_id INTEGER,
            schedule_hours INTEGER NOT NULL DEFAULT 1,
            ping_target TEXT NOT NULL DEFAULT '8.8.8.8',
            ping_interval INTEGER DEFAULT 30,
            declared_download INTEGER NOT NULL DEFAULT 0,
            declared_upload INTEGER NOT NULL DEFAULT 0,
            startup_test_enabled INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS notification_settings (
            id INTEGER PRIMARY KEY,
            enabled INTEGER NOT NULL DEFAULT 0,
            provider TEXT NOT NULL DEFAULT 'browser',
            webhook_url TEXT,
            ntfy_topic TEXT,
            ntfy_server TEXT,
            pushover_user_key TEXT,
            pushover_api_token TEXT
        );

        CREATE TABLE IF NOT EXISTS backup_settings (
            id INTEGER PRIMARY KEY,
            enabled INTEGER NOT NULL DEFAULT 0,
            folder_name TEXT NOT NULL DEFAULT 'SpeedtestLog_Backup',
            schedule_days INTEGER NOT NULL DEFAULT 1,
            schedule_time TEXT NOT NULL DEFAULT '03:00',
            retention_days INTEGER NOT NULL DEFAULT 30,
            last_run TEXT,
            last_status TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_speedtest_results_ts ON speedtest_results(timestamp);
        CREATE INDEX IF NOT EXISTS idx_ping_logs_ts ON ping_logs(timestamp);",
    )?;

    // Migration: 'app_language' was added after the first release.
    add_column_if_missing(
        conn,
        "app_settings",
        "app_language",
        "ALTER TABLE app_settings ADD COLUMN app_language TEXT NOT NULL DEFAULT 'pl'",
    )?;

    Ok(())
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, ddl: &str) -> Result<()> {
    let present: i64 = conn.query_row(
        "SELECT count(*) FROM pragma_table_info(?1) WHERE name = ?2",
        rusqlite::params![table, column],
        |row| row.get(0),
    )?;
    if present == 0 {
        tracing::info!(%table, %column, "Migration: adding column");
        conn.execute(ddl, [])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        for table in ["speedtest_results", "ping_logs", "app_settings", "notification_settings", "backup_settings"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "{table} should start empty");
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_language_column_added_to_legacy_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE app_settings (
                id INTEGER PRIMARY KEY,
                selected_server_id INTEGER,
                schedule_hours INTEGER NOT NULL DEFAULT 1,
                ping_target TEXT NOT NULL DEFAULT '8.8.8.8',
                ping_interval INTEGER DEFAULT 30,
                declared_download INTEGER NOT NULL DEFAULT 0,
                declared_upload INTEGER NOT NULL DEFAULT 0,
                startup_test_enabled INTEGER NOT NULL DEFAULT 1
            );
            INSERT INTO app_settings (id) VALUES (1);",
        )
        .unwrap();

        migrate(&conn).unwrap();
        let lang: String = conn
            .query_row("SELECT app_language FROM app_settings WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(lang, "pl");
    }
}
