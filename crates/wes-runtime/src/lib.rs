// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WES Runtime - Workflow Run Lifecycle Management
//!
//! This crate is the core of a single-node workflow execution service. It
//! turns a submitted run request into a detached executor process, tracks it
//! through a crash-consistent state machine kept entirely on the filesystem,
//! and answers status, listing, cancel and output queries by re-reading that
//! state. There is no database and no in-memory run table: a restarted
//! service sees exactly what the previous one left on disk.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      HTTP layer (not in this crate)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        handlers (WesHandlerState)                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │ Supervisor  │  │   Cancel    │  │    Run      │  │   Output    │     │
//! │  │ (thread/run)│  │ Controller  │  │  Registry   │  │  Harvester  │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │ spawn / wait         │ SIGTERM              │ read
//!           ▼                      ▼                      ▼
//! ┌───────────────────┐   ┌─────────────────────────────────────────────────┐
//! │ Executor process  │   │ Run Store: {RUN_DIR}/{id[..2]}/{id}/ state.txt … │
//! └───────────────────┘   └─────────────────────────────────────────────────┘
//! ```
//!
//! # Run State Machine
//!
//! ```text
//!    (none) ──► INITIALIZING ──► RUNNING ──┬──► COMPLETE        (exit 0)
//!                   │               │      └──► EXECUTOR_ERROR  (exit ≠ 0)
//!                   │               │
//!                   │               └── cancel ──► CANCELING ──┬──► CANCELED
//!                   │                                          └──► UNKNOWN
//!                   └── any internal failure ──► SYSTEM_ERROR
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `WES_RUN_DIR` | No | `run` | Base directory for run directories |
//! | `WES_SERVICE_INFO` | No | built-in | Service-info JSON document |
//! | `WES_EXECUTOR` | No | `cwltool` | Executor program |
//! | `WES_CANCEL_TIMEOUT_SECS` | No | `10` | Cancel wait window |
//! | `WES_RUN_RETENTION_HOURS` | No | unset | Delete terminal runs older than this |
//! | `WES_CLEANUP_INTERVAL_SECS` | No | `3600` | Retention scan interval |
//!
//! # Modules
//!
//! - [`run_store`]: Run directory layout and typed field access
//! - [`state`]: Run states and legal transitions
//! - [`supervisor`]: Executor launch and lifecycle recording
//! - [`cancel`]: Signal-based cancellation with a bounded wait
//! - [`registry`]: Run enumeration and per-state counts
//! - [`outputs`]: Output file discovery
//! - [`record`]: Run records returned to clients
//! - [`request`]: Run requests and attachment names
//! - [`service_info`]: Service-info document
//! - [`handlers`]: Operation entry points for the HTTP layer
//! - [`cleanup_worker`]: Retention of finished runs
//! - [`runtime`]: Embeddable runtime with startup recovery

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for runtime operations.
pub mod error;

/// Run states and transitions.
pub mod state;

/// Run directory layout and typed field access.
pub mod run_store;

/// Run requests and attachments.
pub mod request;

/// Service-info document.
pub mod service_info;

/// Executor launch and supervision.
pub mod supervisor;

/// Run cancellation.
pub mod cancel;

/// Run enumeration and aggregation.
pub mod registry;

/// Output file discovery.
pub mod outputs;

/// Run records.
pub mod record;

/// WES operation handlers.
pub mod handlers;

/// Background worker for deleting old run directories.
pub mod cleanup_worker;

/// Embeddable runtime for wes-runtime.
pub mod runtime;

pub use config::Config;
pub use error::{Error, Result};
pub use run_store::{RunField, RunId, RunStore};
pub use state::RunState;
