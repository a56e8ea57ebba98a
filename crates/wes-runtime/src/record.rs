// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run records as returned to clients, computed from the run directory on
//! every query.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::outputs::collect_outputs;
use crate::run_store::{RunField, RunId, RunStore};
use crate::state::RunState;

/// Executor-level log of a run. Fields not yet written are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLog {
    /// Workflow name, taken from the `workflow_name` tag.
    pub name: String,
    /// Executor command line.
    pub cmd: String,
    /// Start timestamp.
    pub start_time: String,
    /// End timestamp.
    pub end_time: String,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit status.
    pub exit_code: String,
}

/// Full view of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run ID.
    pub run_id: RunId,
    /// Request as submitted.
    pub request: Value,
    /// Current state.
    pub state: RunState,
    /// Executor log.
    pub run_log: RunLog,
    /// Per-task logs.
    pub task_logs: Vec<Value>,
    /// Produced files, relative path -> absolute path.
    pub outputs: BTreeMap<String, String>,
}

/// ID and state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    /// Run ID.
    pub run_id: RunId,
    /// Current state.
    pub state: RunState,
}

/// Run listing. Paging is not supported, so the token is always empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunListResponse {
    /// All runs.
    pub runs: Vec<RunStatus>,
    /// Always empty.
    pub next_page_token: String,
}

/// Assemble the record of a run from its directory.
pub fn read_run_record(store: &RunStore, run_id: &RunId) -> Result<RunRecord> {
    let request = store.read_request(run_id)?;
    let text = |field| store.read_text(run_id, field);

    let run_log = RunLog {
        name: workflow_name(&request),
        cmd: text(RunField::Cmd)?,
        start_time: text(RunField::StartTime)?,
        end_time: text(RunField::EndTime)?,
        stdout: text(RunField::Stdout)?,
        stderr: text(RunField::Stderr)?,
        exit_code: text(RunField::ExitCode)?,
    };

    Ok(RunRecord {
        run_id: run_id.clone(),
        state: store.read_state(run_id),
        run_log,
        task_logs: store.read_task_logs(run_id)?,
        outputs: collect_outputs(store, run_id),
        request,
    })
}

/// `tags` is stored as JSON text; unparseable tags just mean no name.
fn workflow_name(request: &Value) -> String {
    let tags = match request.get("tags") {
        Some(Value::String(text)) => serde_json::from_str(text).unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    };
    tags.get("workflow_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
