// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run Registry - enumeration and aggregation over the run directory tree.
//!
//! A run exists when `{base}/{shard}/{run_id}/run_request.json` exists. The
//! walk is bounded to that depth, so files inside `exe/` or `outputs/` are
//! never mistaken for runs.

use std::collections::BTreeMap;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::record::RunStatus;
use crate::run_store::{RunField, RunId, RunStore};
use crate::state::RunState;

/// Depth of `run_request.json` below the base directory.
const RUN_REQUEST_DEPTH: usize = 3;

/// Read-only view over all runs in a store.
#[derive(Debug, Clone)]
pub struct RunRegistry {
    store: RunStore,
}

impl RunRegistry {
    /// Create a registry over `store`.
    pub fn new(store: RunStore) -> Self {
        Self { store }
    }

    /// Get the underlying store.
    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// List every run ID, ordered by shard then ID.
    ///
    /// A missing base directory means no runs yet.
    pub fn list_run_ids(&self) -> Vec<RunId> {
        let request_file = RunField::RunRequest.file_name();
        let mut run_ids = Vec::new();

        let walker = WalkDir::new(self.store.base_dir())
            .min_depth(RUN_REQUEST_DEPTH)
            .max_depth(RUN_REQUEST_DEPTH)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // The base dir itself is absent until the first submission.
                    if e.depth() > 0 {
                        warn!(error = %e, "Skipping unreadable entry in run directory");
                    }
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.file_name() != request_file {
                continue;
            }
            let Some(name) = entry
                .path()
                .parent()
                .and_then(|dir| dir.file_name())
                .and_then(|name| name.to_str())
            else {
                continue;
            };
            match RunId::parse(name) {
                Ok(run_id) if run_id.shard() == parent_shard(&entry) => run_ids.push(run_id),
                _ => debug!(path = %entry.path().display(), "Ignoring stray run request"),
            }
        }

        run_ids
    }

    /// Fail with [`Error::RunNotFound`] unless the run exists.
    pub fn validate_exists(&self, run_id: &RunId) -> Result<()> {
        if self.store.exists(run_id) {
            Ok(())
        } else {
            Err(Error::RunNotFound(run_id.to_string()))
        }
    }

    /// Number of runs in each state. States with no runs are absent.
    pub fn count_by_state(&self) -> BTreeMap<RunState, usize> {
        let mut counts = BTreeMap::new();
        for run_id in self.list_run_ids() {
            *counts.entry(self.store.read_state(&run_id)).or_insert(0) += 1;
        }
        counts
    }

    /// ID and current state of every run.
    pub fn list_runs(&self) -> Vec<RunStatus> {
        self.list_run_ids()
            .into_iter()
            .map(|run_id| {
                let state = self.store.read_state(&run_id);
                RunStatus { run_id, state }
            })
            .collect()
    }
}

fn parent_shard(entry: &walkdir::DirEntry) -> &str {
    entry
        .path()
        .parent()
        .and_then(|dir| dir.parent())
        .and_then(|shard| shard.file_name())
        .and_then(|name| name.to_str())
        .unwrap_or_default()
}
