// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for wes-runtime.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base directory holding all run directories
    pub run_dir: PathBuf,
    /// Optional service-info JSON document; built-in defaults when unset
    pub service_info_path: Option<PathBuf>,
    /// Executor program invoked for every run
    pub executor: String,
    /// How long a cancel request waits for the executor to exit
    pub cancel_timeout: Duration,
    /// Age after which terminal runs are deleted; `None` keeps runs forever
    pub retention: Option<Duration>,
    /// How often the cleanup worker scans the run directory
    pub cleanup_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from("run"),
            service_info_path: None,
            executor: "cwltool".to_string(),
            cancel_timeout: Duration::from_secs(10),
            retention: None,
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let run_dir = lookup("WES_RUN_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.run_dir);

        let service_info_path = lookup("WES_SERVICE_INFO")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let executor = lookup("WES_EXECUTOR")
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.executor);

        let cancel_timeout = match lookup("WES_CANCEL_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_number("WES_CANCEL_TIMEOUT_SECS", &v)?),
            None => defaults.cancel_timeout,
        };

        // Retention is opt-in: without it run directories are never deleted.
        let retention = lookup("WES_RUN_RETENTION_HOURS")
            .filter(|v| !v.is_empty())
            .map(|v| parse_number("WES_RUN_RETENTION_HOURS", &v))
            .transpose()?
            .map(|hours| Duration::from_secs(hours * 3600));

        let cleanup_interval = match lookup("WES_CLEANUP_INTERVAL_SECS") {
            Some(v) => Duration::from_secs(parse_number("WES_CLEANUP_INTERVAL_SECS", &v)?),
            None => defaults.cleanup_interval,
        };
        if cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidNumber {
                var: "WES_CLEANUP_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            run_dir,
            service_info_path,
            executor,
            cancel_timeout,
            retention,
            cleanup_interval,
        })
    }
}

fn parse_number(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A numeric variable does not hold a valid number.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidNumber {
        /// Variable name
        var: &'static str,
        /// Rejected value
        value: String,
    },
}
