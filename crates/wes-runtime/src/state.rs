// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run state machine.
//!
//! Pure logic, no I/O. The on-disk encoding of a state is its bare token
//! (e.g. `RUNNING`), which is also what [`RunState::as_str`] returns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// No readable state file, or cancellation could not be confirmed.
    #[default]
    Unknown,
    /// Accepted but not yet picked up. Never written by the supervisor.
    Queued,
    /// The supervisor is preparing the command line.
    Initializing,
    /// The executor process is running.
    Running,
    /// Reserved.
    Paused,
    /// The executor exited with code 0.
    Complete,
    /// The executor exited with a non-zero or missing code.
    ExecutorError,
    /// The service failed while launching or monitoring the executor.
    SystemError,
    /// A termination signal was sent and the service is waiting for the exit.
    Canceling,
    /// The executor stopped after a cancel request.
    Canceled,
}

impl RunState {
    /// All states, in declaration order.
    pub const ALL: [RunState; 10] = [
        RunState::Unknown,
        RunState::Queued,
        RunState::Initializing,
        RunState::Running,
        RunState::Paused,
        RunState::Complete,
        RunState::ExecutorError,
        RunState::SystemError,
        RunState::Canceling,
        RunState::Canceled,
    ];

    /// Get the state token as written to disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Unknown => "UNKNOWN",
            RunState::Queued => "QUEUED",
            RunState::Initializing => "INITIALIZING",
            RunState::Running => "RUNNING",
            RunState::Paused => "PAUSED",
            RunState::Complete => "COMPLETE",
            RunState::ExecutorError => "EXECUTOR_ERROR",
            RunState::SystemError => "SYSTEM_ERROR",
            RunState::Canceling => "CANCELING",
            RunState::Canceled => "CANCELED",
        }
    }

    /// Check if neither the supervisor nor the cancel controller will move
    /// the run any further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Complete
                | RunState::ExecutorError
                | RunState::SystemError
                | RunState::Canceled
                | RunState::Unknown
        )
    }

    /// Check if a process may still be attached to the run.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunState::Initializing | RunState::Running | RunState::Canceling
        )
    }

    /// Check whether `next` is a legal successor of this state.
    ///
    /// ```text
    /// (none) ──► INITIALIZING ──► RUNNING ──► COMPLETE | EXECUTOR_ERROR
    ///                 │              │
    ///                 │              └──► CANCELING ──► CANCELED | UNKNOWN
    ///                 └──────────────────────────────► SYSTEM_ERROR
    /// ```
    ///
    /// `SYSTEM_ERROR` is reachable from any state the supervisor owns.
    /// `CANCELING` may also be overwritten by the supervisor's own terminal
    /// write when the child exits, before the controller records `CANCELED`.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Unknown | Queued, Initializing) => true,
            (Unknown | Queued | Initializing | Running, SystemError) => true,
            (Initializing, Running) => true,
            (Running, Complete | ExecutorError | Canceling) => true,
            (Canceling, Canceled | Unknown) => true,
            (Canceling, Complete | ExecutorError | SystemError) => true,
            (Complete | ExecutorError | SystemError, Canceled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a token is not a state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown run state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for RunState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}
