// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for deleting old run directories.
//!
//! Run directories are kept after a run finishes so clients can fetch logs
//! and outputs. When a retention period is configured, this worker
//! periodically removes whole run directories whose state is terminal and
//! whose last state change is older than that period. Active runs are never
//! touched, whatever their age, and neither are `UNKNOWN` runs whose executor
//! is still alive.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::cancel::Signaller;
use crate::registry::RunRegistry;
use crate::run_store::RunField;
use crate::state::RunState;

/// Configuration for the cleanup worker.
#[derive(Debug, Clone)]
pub struct CleanupWorkerConfig {
    /// How often to scan for old runs.
    pub poll_interval: Duration,
    /// Minimum age of a terminal run before it is deleted.
    pub max_age: Duration,
}

impl Default for CleanupWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3600), // 1 hour
            max_age: Duration::from_secs(24 * 3600),  // 24 hours
        }
    }
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Run directories removed.
    pub removed: u64,
    /// Runs that could not be inspected or removed.
    pub errors: u64,
}

/// Background worker that removes old terminal runs.
pub struct CleanupWorker {
    registry: RunRegistry,
    signaller: Arc<dyn Signaller>,
    config: CleanupWorkerConfig,
    shutdown: Arc<Notify>,
}

impl CleanupWorker {
    /// Create a new cleanup worker.
    pub fn new(
        registry: RunRegistry,
        signaller: Arc<dyn Signaller>,
        config: CleanupWorkerConfig,
    ) -> Self {
        Self {
            registry,
            signaller,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the cleanup loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            run_dir = %self.registry.store().base_dir().display(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_age_hours = self.config.max_age.as_secs() / 3600,
            "Cleanup worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Cleanup worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    let registry = self.registry.clone();
                    let signaller = self.signaller.clone();
                    let max_age = self.config.max_age;
                    match tokio::task::spawn_blocking(move || sweep(&registry, signaller.as_ref(), max_age)).await {
                        Ok(stats) if stats.removed > 0 || stats.errors > 0 => {
                            info!(removed = stats.removed, errors = stats.errors, "Cleanup cycle completed");
                        }
                        Ok(_) => debug!("Cleanup cycle completed, no old runs found"),
                        Err(e) => error!(error = %e, "Cleanup cycle failed"),
                    }
                }
            }
        }

        info!("Cleanup worker stopped");
    }
}

/// Remove terminal runs last changed more than `max_age` ago, then any shard
/// directories left empty.
///
/// An `UNKNOWN` run may still have a live executor after a timed-out cancel;
/// it is kept while its recorded pid is alive.
pub fn sweep(registry: &RunRegistry, signaller: &dyn Signaller, max_age: Duration) -> CleanupStats {
    let mut stats = CleanupStats::default();
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return stats;
    };
    let store = registry.store();
    let mut touched_shards = BTreeSet::new();

    for run_id in registry.list_run_ids() {
        let state = store.read_state(&run_id);
        if !state.is_terminal() {
            continue;
        }
        if state == RunState::Unknown
            && let Some(pid) = store.read_pid(&run_id)
            && signaller.is_alive(pid)
        {
            debug!(run_id = %run_id, pid, "Skipping UNKNOWN run with live executor");
            continue;
        }

        let run_dir = store.run_dir(&run_id);
        let modified = match last_modified(&run_dir, &store.path(&run_id, RunField::State)) {
            Ok(t) => t,
            Err(e) => {
                debug!(run_id = %run_id, error = %e, "Failed to get modification time");
                stats.errors += 1;
                continue;
            }
        };
        if modified > cutoff {
            continue;
        }

        match fs::remove_dir_all(&run_dir) {
            Ok(()) => {
                debug!(run_id = %run_id, state = %state, "Removed old run directory");
                stats.removed += 1;
                if let Some(shard) = run_dir.parent() {
                    touched_shards.insert(shard.to_path_buf());
                }
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to remove old run directory");
                stats.errors += 1;
            }
        }
    }

    remove_empty_dirs(touched_shards);
    stats
}

/// Latest of the directory's and the state file's modification times.
fn last_modified(run_dir: &Path, state_file: &Path) -> std::io::Result<SystemTime> {
    let dir_time = fs::metadata(run_dir)?.modified()?;
    match fs::metadata(state_file).and_then(|m| m.modified()) {
        Ok(state_time) => Ok(dir_time.max(state_time)),
        Err(_) => Ok(dir_time),
    }
}

fn remove_empty_dirs(dirs: BTreeSet<PathBuf>) {
    for dir in dirs {
        let is_empty = fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty && let Err(e) = fs::remove_dir(&dir) {
            debug!(path = %dir.display(), error = %e, "Failed to remove empty shard directory");
        }
    }
}
