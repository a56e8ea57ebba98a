// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for wes-runtime.
//!
//! [`WesRuntime`] wires the run store, supervisor, cancellation controller
//! and registry into one [`WesHandlerState`], recovers runs interrupted by a
//! previous service process and, when retention is configured, runs the
//! cleanup worker in the background.
//!
//! ```rust,ignore
//! use wes_runtime::runtime::WesRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = WesRuntime::builder()
//!         .run_dir("/srv/wes/run")
//!         .executor("cwltool")
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // Hand runtime.state() to the HTTP layer ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::{CancelConfig, NixSignaller, Signaller};
use crate::cleanup_worker::{CleanupWorker, CleanupWorkerConfig};
use crate::config::Config;
use crate::handlers::WesHandlerState;
use crate::registry::RunRegistry;
use crate::run_store::{RunField, RunStore};
use crate::service_info::ServiceInfo;
use crate::state::RunState;

/// Builder for creating a [`WesRuntime`].
pub struct WesRuntimeBuilder {
    run_dir: PathBuf,
    service_info: Option<ServiceInfo>,
    executor: String,
    cancel_config: CancelConfig,
    signaller: Option<Arc<dyn Signaller>>,
    retention: Option<Duration>,
    cleanup_interval: Duration,
}

impl Default for WesRuntimeBuilder {
    fn default() -> Self {
        let config = Config::default();
        Self {
            run_dir: config.run_dir,
            service_info: None,
            executor: config.executor,
            cancel_config: CancelConfig {
                timeout: config.cancel_timeout,
                ..CancelConfig::default()
            },
            signaller: None,
            retention: config.retention,
            cleanup_interval: config.cleanup_interval,
        }
    }
}

impl WesRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder from loaded configuration, reading the service-info
    /// document if one is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let service_info = match &config.service_info_path {
            Some(path) => Some(
                ServiceInfo::load(path)
                    .with_context(|| format!("Failed to load service info from {}", path.display()))?,
            ),
            None => None,
        };
        Ok(Self {
            run_dir: config.run_dir.clone(),
            service_info,
            executor: config.executor.clone(),
            cancel_config: CancelConfig {
                timeout: config.cancel_timeout,
                ..CancelConfig::default()
            },
            signaller: None,
            retention: config.retention,
            cleanup_interval: config.cleanup_interval,
        })
    }

    /// Set the run base directory.
    ///
    /// Default: `run`
    pub fn run_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.run_dir = path.into();
        self
    }

    /// Set the service-info document.
    ///
    /// Default: built-in document accepting CWL.
    pub fn service_info(mut self, service_info: ServiceInfo) -> Self {
        self.service_info = Some(service_info);
        self
    }

    /// Set the executor program.
    ///
    /// Default: `cwltool`
    pub fn executor(mut self, program: impl Into<String>) -> Self {
        self.executor = program.into();
        self
    }

    /// Set cancellation timing.
    pub fn cancel_config(mut self, config: CancelConfig) -> Self {
        self.cancel_config = config;
        self
    }

    /// Set the process signaller used for cancellation and recovery.
    ///
    /// Default: `kill(2)`
    pub fn signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.signaller = Some(signaller);
        self
    }

    /// Enable the cleanup worker with this retention period.
    pub fn retention(mut self, max_age: Duration) -> Self {
        self.retention = Some(max_age);
        self
    }

    /// Set how often the cleanup worker scans.
    ///
    /// Default: 1 hour
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Build the runtime configuration.
    pub fn build(self) -> Result<WesRuntimeConfig> {
        if self.executor.trim().is_empty() {
            anyhow::bail!("executor must not be empty");
        }
        if self.cleanup_interval.is_zero() {
            anyhow::bail!("cleanup interval must be positive");
        }

        Ok(WesRuntimeConfig {
            store: RunStore::new(self.run_dir),
            service_info: self.service_info.unwrap_or_default(),
            executor: self.executor,
            cancel_config: self.cancel_config,
            signaller: self.signaller.unwrap_or_else(|| Arc::new(NixSignaller)),
            retention: self.retention,
            cleanup_interval: self.cleanup_interval,
        })
    }
}

/// Configuration for a [`WesRuntime`].
pub struct WesRuntimeConfig {
    store: RunStore,
    service_info: ServiceInfo,
    executor: String,
    cancel_config: CancelConfig,
    signaller: Arc<dyn Signaller>,
    retention: Option<Duration>,
    cleanup_interval: Duration,
}

impl WesRuntimeConfig {
    /// Recover interrupted runs and start background workers.
    pub async fn start(self) -> Result<WesRuntime> {
        tokio::fs::create_dir_all(self.store.base_dir())
            .await
            .with_context(|| {
                format!(
                    "Failed to create run directory {}",
                    self.store.base_dir().display()
                )
            })?;

        let state = Arc::new(
            WesHandlerState::new(
                self.store.clone(),
                self.service_info,
                self.executor.clone(),
                self.cancel_config.clone(),
            )
            .with_signaller(self.signaller.clone(), self.cancel_config),
        );

        let registry = state.registry.clone();
        let signaller = self.signaller.clone();
        let recovery =
            tokio::task::spawn_blocking(move || recover_interrupted_runs(&registry, signaller.as_ref()))
                .await
                .context("Run recovery task failed")?;
        if recovery.recovered > 0 || recovery.still_alive > 0 {
            info!(
                recovered = recovery.recovered,
                still_alive = recovery.still_alive,
                "Recovered interrupted runs"
            );
        }

        let cleanup = self.retention.map(|max_age| {
            let worker = CleanupWorker::new(
                state.registry.clone(),
                self.signaller.clone(),
                CleanupWorkerConfig {
                    poll_interval: self.cleanup_interval,
                    max_age,
                },
            );
            let shutdown = worker.shutdown_handle();
            let handle = tokio::spawn(async move {
                worker.run().await;
            });
            (handle, shutdown)
        });
        if cleanup.is_none() {
            debug!("Run retention not configured; cleanup worker disabled");
        }

        info!(
            run_dir = %self.store.base_dir().display(),
            executor = %self.executor,
            cleanup = cleanup.is_some(),
            "WesRuntime started"
        );

        Ok(WesRuntime { state, cleanup })
    }
}

/// A running wes-runtime instance that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination. Runs already
/// launched keep going; their supervisor threads are not tied to the runtime.
pub struct WesRuntime {
    state: Arc<WesHandlerState>,
    cleanup: Option<(JoinHandle<()>, Arc<Notify>)>,
}

impl WesRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> WesRuntimeBuilder {
        WesRuntimeBuilder::new()
    }

    /// Get a reference to the shared handler state.
    pub fn state(&self) -> &Arc<WesHandlerState> {
        &self.state
    }

    /// Check whether background workers are still running.
    pub fn is_running(&self) -> bool {
        self.cleanup
            .as_ref()
            .is_none_or(|(handle, _)| !handle.is_finished())
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("WesRuntime shutting down...");

        if let Some((handle, shutdown)) = self.cleanup {
            shutdown.notify_one();
            if let Err(e) = handle.await {
                error!("Cleanup worker task panicked: {}", e);
            }
        }

        info!("WesRuntime shutdown complete");
        Ok(())
    }
}

/// Outcome of startup recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Runs moved to a terminal state.
    pub recovered: u64,
    /// Active runs whose executor is still alive.
    pub still_alive: u64,
}

/// Settle runs left active by a previous service process.
///
/// Their supervisor threads died with that process, so nobody will record
/// their outcome. Runs whose executor is gone become `SYSTEM_ERROR`
/// (`UNKNOWN` if they were being canceled). Runs whose executor is still
/// alive are left as they are.
pub fn recover_interrupted_runs(registry: &RunRegistry, signaller: &dyn Signaller) -> RecoveryStats {
    let store = registry.store();
    let mut stats = RecoveryStats::default();

    for run_id in registry.list_run_ids() {
        let state = store.read_state(&run_id);
        if !state.is_active() {
            continue;
        }

        let pid = store.read_pid(&run_id);
        if let Some(pid) = pid
            && signaller.is_alive(pid)
        {
            warn!(
                run_id = %run_id,
                pid = pid,
                state = %state,
                "Executor from a previous service process is still alive, leaving run as is"
            );
            stats.still_alive += 1;
            continue;
        }

        let next = if state == RunState::Canceling {
            RunState::Unknown
        } else {
            let note = format!(
                "Run was {} when the service stopped and its executor (pid {}) is gone\n",
                state,
                pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
            );
            if let Err(e) = store.write_field(&run_id, RunField::SysError, note) {
                warn!(run_id = %run_id, error = %e, "Failed to write sys_error");
            }
            RunState::SystemError
        };

        match store.write_state(&run_id, next) {
            Ok(()) => {
                info!(run_id = %run_id, from = %state, to = %next, "Recovered interrupted run");
                stats.recovered += 1;
            }
            Err(e) => warn!(run_id = %run_id, error = %e, "Failed to recover run"),
        }
    }

    stats
}
