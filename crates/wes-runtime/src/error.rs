// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for wes-runtime.

use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Process supervision failed before the run could be handed off.
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    /// Run was not found under the run base directory.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Run ID is not a safe directory name.
    #[error("Invalid run ID: {0}")]
    InvalidRunId(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the runtime Error.
pub type Result<T> = std::result::Result<T, Error>;
