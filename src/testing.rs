//! Fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::notify::{Category, Notify};
use crate::process::{CommandRunner, ProcessError, ProcessOutput};

/// Replays queued results in order and records every argv it was given.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<Result<ProcessOutput, ProcessError>>>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_stdout(self, stdout: &str) -> Self {
        self.push(Ok(ProcessOutput {
            stdout: stdout.to_string(),
            ..Default::default()
        }))
    }

    pub fn then_exit(self, code: i32, stderr: &str) -> Self {
        self.push(Err(ProcessError::NonZeroExit {
            program: "fake".into(),
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }))
    }

    pub fn then_timeout(self) -> Self {
        self.push(Err(ProcessError::Timeout {
            program: "fake".into(),
            timeout: Duration::from_secs(1),
        }))
    }

    pub fn push(self, result: Result<ProcessOutput, ProcessError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, argv: &[String], _timeout: Duration) -> Result<ProcessOutput, ProcessError> {
        self.calls.lock().unwrap().push(argv.to_vec());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted call: {argv:?}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub title: String,
    pub body: String,
    pub category: Category,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn categories(&self) -> Vec<Category> {
        self.sent.lock().unwrap().iter().map(|s| s.category).collect()
    }
}

#[async_trait::async_trait]
impl Notify for RecordingNotifier {
    async fn notify(&self, title: &str, body: &str, category: Category) {
        self.sent.lock().unwrap().push(Sent {
            title: title.to_string(),
            body: body.to_string(),
            category,
        });
    }
}

pub fn temp_pool() -> (tempfile::TempDir, crate::storage::Pool) {
    let dir = tempfile::TempDir::new().unwrap();
    let pool = crate::storage::open_pool(dir.path().join("test.db")).unwrap();
    (dir, pool)
}

/// Minimal completed-run document in the speedtest CLI's JSON format.
pub fn ookla_json(download_bw: u64, upload_bw: u64, server_id: i64) -> String {
    serde_json::json!({
        "type": "result",
        "timestamp": "2026-01-01T00:00:00Z",
        "ping": { "jitter": 0.5, "latency": 12.25, "low": 11.0, "high": 14.0 },
        "download": { "bandwidth": download_bw, "bytes": 1, "elapsed": 1,
                      "latency": { "iqm": 20.0, "low": 15.0, "high": 40.0, "jitter": 2.0 } },
        "upload": { "bandwidth": upload_bw, "bytes": 1, "elapsed": 1,
                    "latency": { "iqm": 30.0, "low": 25.0, "high": 60.0, "jitter": 3.0 } },
        "isp": "Example ISP",
        "interface": { "internalIp": "10.0.0.2", "externalIp": "203.0.113.7" },
        "server": { "id": server_id, "name": "Example", "location": "Warsaw", "country": "Poland" },
        "result": { "id": "abc", "url": "https://www.speedtest.net/result/c/abc" }
    })
    .to_string()
}

/// Stands in for `sqlite3 -bail {db} ".read '{file}'"`: executes the named
/// script against the named database in-process.
#[derive(Default)]
pub struct SqliteScriptRunner;

#[async_trait::async_trait]
impl CommandRunner for SqliteScriptRunner {
    async fn run(&self, argv: &[String], _timeout: Duration) -> Result<ProcessOutput, ProcessError> {
        let failed = |stderr: String| ProcessError::NonZeroExit {
            program: "sqlite3".into(),
            code: 1,
            stdout: String::new(),
            stderr,
        };
        let [_, _, db, read] = argv else {
            panic!("unexpected restore argv: {argv:?}");
        };
        let script = read
            .strip_prefix(".read '")
            .and_then(|rest| rest.strip_suffix('\''))
            .unwrap_or_else(|| panic!("unexpected read command: {read}"));
        let sql = std::fs::read_to_string(script).map_err(|e| failed(e.to_string()))?;
        let conn = rusqlite::Connection::open(db).map_err(|e| failed(e.to_string()))?;
        conn.execute_batch(&sql).map_err(|e| failed(e.to_string()))?;
        Ok(ProcessOutput::default())
    }
}
