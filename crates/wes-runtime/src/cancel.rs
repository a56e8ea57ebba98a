// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cancellation Controller.
//!
//! Cancels a `RUNNING` run by signalling its executor once and watching the
//! state file for the supervisor's reaction:
//!
//! ```text
//! RUNNING -> CANCELING -> SIGTERM -> poll state
//!     state moved on within the window  -> CANCELED
//!     timeout / no pid / signal failure -> UNKNOWN
//! ```
//!
//! The controller never touches the `Child`; it only shares the run directory
//! with the supervisor thread.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::run_store::{RunId, RunStore};
use crate::state::RunState;

/// Errors from signalling a process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SignalError {
    /// PID is not a single positive process ID.
    #[error("Refusing to signal invalid pid {0}")]
    InvalidPid(i32),

    /// No process with this PID exists.
    #[error("No such process: {0}")]
    NoSuchProcess(i32),

    /// The OS rejected the signal.
    #[error("Failed to signal pid {pid}: {source}")]
    Os {
        /// Target PID.
        pid: i32,
        /// Underlying errno.
        #[source]
        source: nix::errno::Errno,
    },
}

/// OS process signalling, abstracted for tests.
pub trait Signaller: Send + Sync {
    /// Ask the process to terminate.
    fn terminate(&self, pid: i32) -> std::result::Result<(), SignalError>;

    /// Whether a process with this PID exists.
    fn is_alive(&self, pid: i32) -> bool;
}

/// [`Signaller`] backed by `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NixSignaller;

impl Signaller for NixSignaller {
    fn terminate(&self, pid: i32) -> std::result::Result<(), SignalError> {
        // 0 and negative values address process groups.
        if pid <= 0 {
            return Err(SignalError::InvalidPid(pid));
        }
        match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {
                debug!(pid = pid, "Sent SIGTERM to process");
                Ok(())
            }
            Err(nix::errno::Errno::ESRCH) => Err(SignalError::NoSuchProcess(pid)),
            Err(source) => Err(SignalError::Os { pid, source }),
        }
    }

    fn is_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        // EPERM still means the process exists.
        match signal::kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            Err(nix::errno::Errno::ESRCH) => false,
            Err(_) => true,
        }
    }
}

/// Cancellation timing.
#[derive(Debug, Clone)]
pub struct CancelConfig {
    /// How long to wait for the executor to exit after the signal.
    pub timeout: Duration,
    /// How often the state is re-read while waiting.
    pub poll_interval: Duration,
}

impl Default for CancelConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Drives runs through `CANCELING` to `CANCELED` or `UNKNOWN`.
#[derive(Clone)]
pub struct CancelController {
    store: RunStore,
    signaller: Arc<dyn Signaller>,
    config: CancelConfig,
}

impl std::fmt::Debug for CancelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelController")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CancelController {
    /// Create a controller signalling through `kill(2)`.
    pub fn new(store: RunStore, config: CancelConfig) -> Self {
        Self::with_signaller(store, Arc::new(NixSignaller), config)
    }

    /// Create a controller with a custom signaller.
    pub fn with_signaller(
        store: RunStore,
        signaller: Arc<dyn Signaller>,
        config: CancelConfig,
    ) -> Self {
        Self {
            store,
            signaller,
            config,
        }
    }

    /// Cancel a run and return the state it ends up in.
    ///
    /// Runs that are not `RUNNING` are left untouched and their current
    /// state is returned. Otherwise the executor is signalled exactly once.
    pub async fn cancel(&self, run_id: &RunId) -> Result<RunState> {
        let current = self.store.read_state(run_id);
        if current != RunState::Running {
            debug!(run_id = %run_id, state = %current, "Run is not running, nothing to cancel");
            return Ok(current);
        }

        self.store.write_state(run_id, RunState::Canceling)?;
        info!(run_id = %run_id, "Canceling run");

        let Some(pid) = self.store.read_pid(run_id) else {
            warn!(run_id = %run_id, "No pid recorded for running run");
            return self.finish(run_id, RunState::Unknown);
        };

        if let Err(e) = self.signaller.terminate(pid) {
            warn!(run_id = %run_id, pid = pid, error = %e, "Failed to signal executor");
            return self.finish(run_id, RunState::Unknown);
        }

        let deadline = Instant::now() + self.config.timeout;
        loop {
            if self.store.read_state(run_id) != RunState::Canceling {
                return self.finish(run_id, RunState::Canceled);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }

        warn!(
            run_id = %run_id,
            pid = pid,
            timeout_secs = self.config.timeout.as_secs(),
            "Executor did not exit within the cancel window"
        );
        self.finish(run_id, RunState::Unknown)
    }

    fn finish(&self, run_id: &RunId, state: RunState) -> Result<RunState> {
        self.store.write_state(run_id, state)?;
        info!(run_id = %run_id, state = %state, "Cancellation finished");
        Ok(state)
    }
}
