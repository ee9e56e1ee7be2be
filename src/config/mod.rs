/// Configuration management for the hrflow engine
///
/// Every value can be overridden through `HRFLOW_*` environment variables;
/// anything unset or unparsable falls back to the built-in default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub delivery: DeliveryConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Base directory; tenant databases live at `{data_dir}/{tenant}/records.db`
    pub data_dir: String,
    /// Engine database (workflows, executions, logs, schedules)
    pub engine_db: String,
}

/// Worker pool and execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub workers: usize,
    /// Idle workers poll the queue this often
    pub poll_interval_ms: u64,
    /// Node steps allowed in a single advance of one execution
    pub max_steps: u32,
    pub retry_max_attempts: u32,
    pub retry_backoff_ms: Vec<u64>,
    /// Re-check interval of `until_field` waits that set no `poll_interval`
    pub wait_poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    /// `running` executions untouched this long are re-queued
    pub stale_after_secs: u64,
}

/// Outbound delivery endpoint for emails; unset keeps messages in the outbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_backoff(raw: &str) -> Option<Vec<u64>> {
    raw.split(',')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect()
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let data_dir = std::env::var("HRFLOW_DATA_DIR").unwrap_or_else(|_| "data".to_string());
        let engine_db = std::env::var("HRFLOW_ENGINE_DB").unwrap_or_else(|_| {
            PathBuf::from(&data_dir)
                .join("engine.db")
                .to_string_lossy()
                .into_owned()
        });

        Self {
            server: ServerConfig {
                host: std::env::var("HRFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("HRFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir,
                engine_db,
            },
            engine: EngineConfig {
                workers: env_or("HRFLOW_WORKERS", 4),
                poll_interval_ms: env_or("HRFLOW_POLL_INTERVAL_MS", 500),
                max_steps: env_or("HRFLOW_MAX_STEPS", 1000),
                retry_max_attempts: env_or("HRFLOW_RETRY_MAX_ATTEMPTS", 3),
                retry_backoff_ms: std::env::var("HRFLOW_RETRY_BACKOFF_MS")
                    .ok()
                    .and_then(|raw| parse_backoff(&raw))
                    .unwrap_or_else(|| vec![1000, 5000, 15000]),
                wait_poll_interval_secs: env_or("HRFLOW_WAIT_POLL_INTERVAL_SECS", 3600),
            },
            scheduler: SchedulerConfig {
                interval_secs: env_or("HRFLOW_SCHEDULER_INTERVAL_SECS", 60),
                stale_after_secs: env_or("HRFLOW_STALE_AFTER_SECS", 900),
            },
            delivery: DeliveryConfig {
                url: std::env::var("HRFLOW_DELIVERY_URL")
                    .ok()
                    .filter(|url| !url.trim().is_empty()),
                timeout_secs: env_or("HRFLOW_DELIVERY_TIMEOUT_SECS", 10),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_list_parsing() {
        assert_eq!(parse_backoff("1000, 5000,15000"), Some(vec![1000, 5000, 15000]));
        assert_eq!(parse_backoff("1000,soon"), None);
    }
}
