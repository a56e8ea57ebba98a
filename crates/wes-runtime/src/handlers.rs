// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WES operation handlers.
//!
//! Transport-agnostic entry points for the HTTP layer. Each handler takes the
//! shared [`WesHandlerState`] plus an already-decoded request and returns a
//! serializable response or an [`Error`] the caller maps to a status code
//! (`InvalidRequest`/`InvalidRunId` -> 400, `RunNotFound` -> 404, else 500).

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cancel::{CancelConfig, CancelController, Signaller};
use crate::error::{Error, Result};
use crate::record::{RunListResponse, RunRecord, RunStatus, read_run_record};
use crate::registry::RunRegistry;
use crate::request::{Attachment, RunRequest, secure_file_name};
use crate::run_store::{RunField, RunId, RunStore};
use crate::service_info::ServiceInfo;
use crate::state::RunState;
use crate::supervisor::{ExecutorConfig, Supervisor};

/// Shared state for WES handlers.
#[derive(Debug, Clone)]
pub struct WesHandlerState {
    /// Run directory storage.
    pub store: RunStore,
    /// Enumeration over the store.
    pub registry: RunRegistry,
    /// Executor launcher.
    pub supervisor: Supervisor,
    /// Cancellation of running runs.
    pub cancel: CancelController,
    /// Static service description; counts are filled in per request.
    pub service_info: Arc<ServiceInfo>,
}

impl WesHandlerState {
    /// Create handler state.
    ///
    /// The service info's default engine parameters are passed to every run.
    pub fn new(
        store: RunStore,
        service_info: ServiceInfo,
        executor: impl Into<String>,
        cancel_config: CancelConfig,
    ) -> Self {
        let executor = ExecutorConfig::new(executor)
            .with_default_parameters(service_info.default_workflow_engine_parameters.clone());
        Self {
            registry: RunRegistry::new(store.clone()),
            supervisor: Supervisor::new(store.clone(), executor),
            cancel: CancelController::new(store.clone(), cancel_config),
            service_info: Arc::new(service_info),
            store,
        }
    }

    /// Replace the process signaller used for cancellation.
    pub fn with_signaller(mut self, signaller: Arc<dyn Signaller>, config: CancelConfig) -> Self {
        self.cancel = CancelController::with_signaller(self.store.clone(), signaller, config);
        self
    }

    fn resolve_run(&self, raw_run_id: &str) -> Result<RunId> {
        let run_id = RunId::parse(raw_run_id)?;
        self.registry.validate_exists(&run_id)?;
        Ok(run_id)
    }
}

// ============================================================================
// Service Info
// ============================================================================

/// Handle a service-info request.
pub async fn handle_service_info(state: &WesHandlerState) -> Result<ServiceInfo> {
    let registry = state.registry.clone();
    let counts = blocking(move || registry.count_by_state()).await?;
    Ok(state.service_info.with_state_counts(counts))
}

// ============================================================================
// Submit Run
// ============================================================================

/// Request to start a new run.
#[derive(Debug, Clone)]
pub struct SubmitRunRequest {
    /// The run request.
    pub request: RunRequest,
    /// Files to place in the execution directory.
    pub attachments: Vec<Attachment>,
}

/// Response to a submitted run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SubmitRunResponse {
    /// ID of the new run.
    pub run_id: RunId,
}

/// Handle a run submission.
///
/// Validation happens before anything is written. Once the run directory
/// exists, any failure leaves the run in `SYSTEM_ERROR`.
pub async fn handle_submit_run(
    state: &WesHandlerState,
    submit: SubmitRunRequest,
) -> Result<SubmitRunResponse> {
    let SubmitRunRequest {
        request,
        attachments,
    } = submit;

    request.validate(&state.service_info)?;
    let wf_params: serde_json::Value = serde_json::from_str(&request.workflow_params)?;

    let run_id = RunId::generate();
    state.store.create_run(&run_id, &request)?;

    if let Err(e) = prepare_run(&state.store, &run_id, &wf_params, &attachments) {
        error!(run_id = %run_id, error = %e, "Failed to prepare run directory");
        mark_system_error(&state.store, &run_id, &e);
        return Err(e);
    }

    // Dropping the handle detaches the supervisor thread.
    state.supervisor.launch(run_id.clone(), request)?;

    info!(
        run_id = %run_id,
        attachments = attachments.len(),
        "Run submitted"
    );
    Ok(SubmitRunResponse { run_id })
}

fn prepare_run(
    store: &RunStore,
    run_id: &RunId,
    wf_params: &serde_json::Value,
    attachments: &[Attachment],
) -> Result<()> {
    let exe_dir = store.create_dir(run_id, RunField::ExeDir)?;
    for attachment in attachments {
        let Some(file_name) = secure_file_name(&attachment.file_name) else {
            warn!(
                run_id = %run_id,
                file_name = %attachment.file_name,
                "Skipping attachment with unusable file name"
            );
            continue;
        };
        std::fs::write(exe_dir.join(file_name), &attachment.content)?;
    }
    store.write_json(run_id, RunField::WfParams, wf_params)?;
    store.create_dir(run_id, RunField::OutputsDir)?;
    Ok(())
}

fn mark_system_error(store: &RunStore, run_id: &RunId, err: &Error) {
    if let Err(e) = store.write_field(run_id, RunField::SysError, format!("{}\n", err)) {
        error!(run_id = %run_id, error = %e, "Failed to write sys_error");
    }
    if let Err(e) = store.write_state(run_id, RunState::SystemError) {
        error!(run_id = %run_id, error = %e, "Failed to write SYSTEM_ERROR state");
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Handle a run listing request.
pub async fn handle_list_runs(state: &WesHandlerState) -> Result<RunListResponse> {
    let registry = state.registry.clone();
    let runs = blocking(move || registry.list_runs()).await?;
    Ok(RunListResponse {
        runs,
        next_page_token: String::new(),
    })
}

/// Handle a full run record request.
pub async fn handle_get_run(state: &WesHandlerState, run_id: &str) -> Result<RunRecord> {
    let run_id = state.resolve_run(run_id)?;
    let store = state.store.clone();
    blocking(move || read_run_record(&store, &run_id)).await?
}

/// Handle a run status request.
pub async fn handle_get_run_status(state: &WesHandlerState, run_id: &str) -> Result<RunStatus> {
    let run_id = state.resolve_run(run_id)?;
    let run_state = state.store.read_state(&run_id);
    Ok(RunStatus {
        run_id,
        state: run_state,
    })
}

// ============================================================================
// Cancel Run
// ============================================================================

/// Response to a cancel request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CancelRunResponse {
    /// Run that was targeted.
    pub run_id: RunId,
    /// State the run ended up in.
    pub state: RunState,
}

/// Handle a cancel request.
///
/// Waits up to the configured cancel timeout.
pub async fn handle_cancel_run(state: &WesHandlerState, run_id: &str) -> Result<CancelRunResponse> {
    let run_id = state.resolve_run(run_id)?;
    let final_state = state.cancel.cancel(&run_id).await?;
    Ok(CancelRunResponse {
        run_id,
        state: final_state,
    })
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("Blocking task failed: {}", e)))
}
