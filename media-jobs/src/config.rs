//! Process configuration from environment variables.

use std::time::Duration;
use tracing::warn;

use crate::api::server::ApiServerConfig;

const DEFAULT_DATABASE_URL: &str = "sqlite:media-jobs.db?mode=rwc";
const DEFAULT_MAX_CONCURRENT_JOBS: u64 = 5;
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Transport used for the work queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QueueBackend {
    /// Durable `queue_message` table in the application database.
    #[default]
    Sqlite,
    /// In-process queue, lost on restart.
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub api: ApiServerConfig,
    /// Shared ceiling for queued and running process/convert units.
    pub max_concurrent_jobs: u64,
    pub sweep_interval: Duration,
    /// Enables daily rolling log files in this directory.
    pub log_dir: Option<String>,
    pub queue_backend: QueueBackend,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            api: ApiServerConfig::default(),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            log_dir: None,
            queue_backend: QueueBackend::default(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `DATABASE_URL`
    /// - `API_BIND_ADDRESS`, `API_PORT`
    /// - `MAX_CONCURRENT_JOBS` (at least 1)
    /// - `SWEEP_INTERVAL_SECS` (at least 1)
    /// - `LOG_DIR`
    /// - `QUEUE_BACKEND` (`sqlite` or `memory`)
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env_or_default`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(bind_address) = get("API_BIND_ADDRESS") {
            config.api.bind_address = bind_address;
        }

        if let Some(port) = get("API_PORT") {
            match port.trim().parse::<u16>() {
                Ok(parsed) => config.api.port = parsed,
                Err(_) => warn!("Ignoring invalid API_PORT '{}'", port),
            }
        }

        if let Some(max) = get("MAX_CONCURRENT_JOBS") {
            match max.trim().parse::<u64>() {
                Ok(parsed) if parsed >= 1 => config.max_concurrent_jobs = parsed,
                _ => warn!(
                    "Ignoring invalid MAX_CONCURRENT_JOBS '{}', using {}",
                    max, DEFAULT_MAX_CONCURRENT_JOBS
                ),
            }
        }

        if let Some(secs) = get("SWEEP_INTERVAL_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(parsed) if parsed >= 1 => config.sweep_interval = Duration::from_secs(parsed),
                _ => warn!("Ignoring invalid SWEEP_INTERVAL_SECS '{}'", secs),
            }
        }

        config.log_dir = get("LOG_DIR");

        if let Some(backend) = get("QUEUE_BACKEND") {
            match backend.trim().parse::<QueueBackend>() {
                Ok(parsed) => config.queue_backend = parsed,
                Err(_) => warn!("Ignoring unknown QUEUE_BACKEND '{}'", backend),
            }
        }

        config
    }
}
