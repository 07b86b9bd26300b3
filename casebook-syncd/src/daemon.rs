use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use casebook_core::{ApiErrorClass, CasebookClient};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::mirror::{MirrorStore, default_db_path};
use crate::sync::engine::{SyncEngine, SyncError};
use crate::sync::progress::SyncProgress;

const DEFAULT_API_URL: &str = "http://localhost:3000/api";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub api_url: String,
    pub api_token: String,
    pub db_path: PathBuf,
    pub sync_interval: Duration,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Self::from_lookup(|name| std::env::var(name).ok(), &home)
    }

    pub fn from_lookup<F>(lookup: F, home: &Path) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("CASEBOOK_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_token = lookup("CASEBOOK_API_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .context("CASEBOOK_API_TOKEN is not set")?;
        let db_path = match lookup("CASEBOOK_DB_PATH") {
            Some(value) => expand_with_home(&value, home),
            None => default_db_path().context("no default location for the mirror database")?,
        };
        let sync_interval = Duration::from_secs(read_u64(
            lookup("CASEBOOK_SYNC_INTERVAL_SECS"),
            DEFAULT_SYNC_INTERVAL_SECS,
        ));

        Ok(Self {
            api_url,
            api_token,
            db_path,
            sync_interval,
        })
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: SyncEngine,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let client = CasebookClient::new(&config.api_url, config.api_token.clone())
            .with_context(|| format!("invalid CASEBOOK_API_URL {:?}", config.api_url))?;
        let store = MirrorStore::open(&config.db_path)
            .await
            .with_context(|| format!("failed to open mirror at {:?}", config.db_path))?;
        Ok(Self {
            config,
            engine: SyncEngine::new(client, store),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Runs a full sync every interval until Ctrl-C. Failed runs are logged
    /// and retried on the next tick.
    pub async fn watch(&self) -> anyhow::Result<()> {
        info!(
            api_url = %self.config.api_url,
            db_path = %self.config.db_path.display(),
            interval_secs = self.config.sync_interval.as_secs(),
            "watching backend"
        );

        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = &mut shutdown => {
                    result.context("failed to listen for Ctrl-C")?;
                    info!("shutdown requested");
                    return Ok(());
                }
                _ = self.tick_and_sync(&mut ticker) => {}
            }
        }
    }

    async fn tick_and_sync(&self, ticker: &mut Interval) {
        ticker.tick().await;
        let reporter = |progress: &SyncProgress| {
            debug!(
                completed = progress.completed,
                total = progress.total,
                entity = %progress.current_entity,
                "sync progress"
            );
        };
        match self.engine.sync_all(Some(&reporter)).await {
            Ok(Some(report)) => info!(records = report.records_written(), "mirror refreshed"),
            Ok(None) => {}
            Err(err) => log_sync_failure(&err),
        }
    }
}

pub fn log_sync_failure(err: &SyncError) {
    if let SyncError::Api(api) = err
        && api.classification() == Some(ApiErrorClass::Auth)
    {
        error!(error = %err, "backend rejected the API token, check CASEBOOK_API_TOKEN");
    } else {
        warn!(error = %err, "sync failed");
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64(value: Option<String>, default: u64) -> u64 {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
