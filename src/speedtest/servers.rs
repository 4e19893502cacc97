//! Nearby-server catalogue, fetched once from the CLI and cached on disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::process::CommandRunner;

pub struct ServerCatalogue {
    runner: Arc<dyn CommandRunner>,
    speedtest_path: String,
    cache_path: PathBuf,
    timeout: Duration,
}

impl ServerCatalogue {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        speedtest_path: impl Into<String>,
        cache_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            speedtest_path: speedtest_path.into(),
            cache_path: cache_path.into(),
            timeout,
        }
    }

    fn argv(&self) -> Vec<String> {
        [
            self.speedtest_path.as_str(),
            "--accept-license",
            "--accept-gdpr",
            "--servers",
            "--format=json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    async fn cache_is_usable(&self) -> bool {
        matches!(tokio::fs::metadata(&self.cache_path).await, Ok(m) if m.len() > 0)
    }

    /// Populate the cache if it is missing or empty. Returns whether the CLI
    /// was invoked.
    pub async fn warm(&self) -> Result<bool> {
        if self.cache_is_usable().await {
            return Ok(false);
        }
        let out = self.runner.run(&self.argv(), self.timeout).await?;
        if let Some(parent) = self.cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.cache_path, out.stdout.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", self.cache_path.display()))?;
        info!(path = %self.cache_path.display(), "Server list cached");
        Ok(true)
    }

    /// The cached server list as returned by the CLI.
    pub async fn closest_servers(&self) -> Result<serde_json::Value> {
        if let Err(e) = self.warm().await {
            warn!(error = %e, "Could not refresh server list");
        }
        let raw = tokio::fs::read_to_string(&self.cache_path)
            .await
            .with_context(|| format!("no server list at {}", self.cache_path.display()))?;
        serde_json::from_str(&raw).context("cached server list is not valid JSON")
    }
}
