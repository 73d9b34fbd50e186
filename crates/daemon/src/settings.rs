//! Daemon configuration
//!
//! Loaded from `courier.toml` (or the file named by `COURIER_CONFIG`) and
//! overridden by `COURIER__*` environment variables, e.g.
//! `COURIER__RPC__PORT=7700` or `COURIER__DATABASE_URL=postgres://...`.

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use courier_api_rpc::RpcServerConfig;
use courier_core::application::worker::constants::DEFAULT_DRAIN_TIMEOUT;
use courier_core::domain::{RetryPolicy, WorkerConfig, DEFAULT_MAX_ATTEMPTS};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATH_ENV: &str = "COURIER_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "courier.toml";
const ENV_PREFIX: &str = "COURIER";
const DEFAULT_DB_PATH: &str = "~/.courier/courier.db";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `postgres://...`, `sqlite:...` or a plain SQLite file path
    pub database_url: String,
    /// Chat webhook for permanently failed jobs; alerts are only logged when unset
    pub alert_webhook_url: Option<String>,
    pub shutdown_timeout_secs: u64,
    pub rpc: RpcServerConfig,
    pub retry: RetrySettings,
    pub reclaim: ReclaimSettings,
    pub log: LogSettings,
    pub workers: Vec<WorkerSettings>,
    pub handlers: Vec<HandlerSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DB_PATH.to_string(),
            alert_webhook_url: None,
            shutdown_timeout_secs: DEFAULT_DRAIN_TIMEOUT.as_secs(),
            rpc: RpcServerConfig::default(),
            retry: RetrySettings::default(),
            reclaim: ReclaimSettings::default(),
            log: LogSettings::default(),
            workers: Vec::new(),
            handlers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_secs: u64,
    pub factor: f64,
    pub max_delay_secs: u64,
    pub max_attempts: i32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            factor: 2.0,
            max_delay_secs: 3600,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReclaimSettings {
    /// Period of the standalone reclaim sweep
    pub interval_secs: u64,
    pub stale_timeout_secs: u64,
}

impl Default for ReclaimSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            stale_timeout_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Used when `RUST_LOG` is not set
    pub filter: Option<String>,
    /// Daily rolling JSON log files are written here when set
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    pub name: String,
    pub task_types: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub poll_interval_ms: Option<u64>,
    pub stale_timeout_secs: Option<u64>,
}

fn default_concurrency() -> usize {
    1
}

/// A task type served by POSTing the payload to `url`
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerSettings {
    pub task_type: String,
    pub url: String,
    #[serde(default = "default_handler_timeout")]
    pub timeout_secs: u64,
}

fn default_handler_timeout() -> u64 {
    30
}

/// Where the job table lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Postgres(String),
    Sqlite {
        url: String,
        /// Set for file databases so the parent directory can be created
        path: Option<PathBuf>,
    },
}

impl Settings {
    /// Load from the config file and `COURIER__*` environment variables
    pub fn load() -> Result<Self> {
        let (path, required) = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => (path, true),
            Err(_) => (DEFAULT_CONFIG_FILE.to_string(), false),
        };
        let path = shellexpand::tilde(&path).into_owned();

        let builder = Config::builder()
            .add_source(File::from(Path::new(&path)).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );

        Self::from_builder(builder).with_context(|| format!("Invalid configuration ({})", path))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Catch wiring mistakes before anything is started
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            bail!("database_url cannot be empty");
        }
        if self.retry.max_attempts < 1 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.reclaim.interval_secs == 0 {
            bail!("reclaim.interval_secs must be greater than 0");
        }

        let mut handled = HashSet::new();
        for handler in &self.handlers {
            if !handled.insert(handler.task_type.as_str()) {
                bail!("handler for task type '{}' defined twice", handler.task_type);
            }
        }

        let mut names = HashSet::new();
        for worker in &self.workers {
            if !names.insert(worker.name.as_str()) {
                bail!("worker name '{}' used twice", worker.name);
            }
            for task_type in &worker.task_types {
                if !handled.contains(task_type.as_str()) {
                    bail!(
                        "worker '{}' consumes '{}' but no handler is configured for it",
                        worker.name,
                        task_type
                    );
                }
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.retry.base_delay_secs),
            self.retry.factor,
        )
        .with_max_delay(Duration::from_secs(self.retry.max_delay_secs))
        .with_default_max_attempts(self.retry.max_attempts)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.reclaim.stale_timeout_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim.interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn worker_configs(&self) -> Vec<WorkerConfig> {
        self.workers
            .iter()
            .map(|w| {
                let mut config = WorkerConfig::new(&w.name, w.task_types.iter(), w.concurrency)
                    .with_stale_timeout(
                        w.stale_timeout_secs
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| self.stale_timeout()),
                    );
                if let Some(ms) = w.poll_interval_ms {
                    config = config.with_poll_interval(Duration::from_millis(ms));
                }
                config
            })
            .collect()
    }

    pub fn database_target(&self) -> DatabaseTarget {
        let url = self.database_url.trim();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return DatabaseTarget::Postgres(url.to_string());
        }
        if url.starts_with("sqlite:") {
            return DatabaseTarget::Sqlite {
                url: url.to_string(),
                path: None,
            };
        }
        let path = shellexpand::tilde(url).into_owned();
        DatabaseTarget::Sqlite {
            url: format!("sqlite://{}", path),
            path: Some(PathBuf::from(path)),
        }
    }
}
