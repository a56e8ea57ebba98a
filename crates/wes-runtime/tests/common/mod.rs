// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for wes-runtime integration tests.
//!
//! Executors are small shell scripts run as `/bin/sh <script> <args..>`; the
//! script path is passed as the first default engine parameter.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use wes_runtime::cancel::CancelConfig;
use wes_runtime::handlers::WesHandlerState;
use wes_runtime::request::RunRequest;
use wes_runtime::run_store::{RunField, RunId, RunStore};
use wes_runtime::service_info::{DefaultWorkflowEngineParameter, ServiceInfo};
use wes_runtime::state::RunState;
use wes_runtime::supervisor::{ExecutorConfig, Supervisor};

/// Prints its arguments and working directory, exits 0.
pub const SUCCESS_SCRIPT: &str = r#"
echo "args: $*"
echo "cwd: $(pwd)"
echo "to stderr" >&2
exit 0
"#;

/// Exits 1.
pub const FAILURE_SCRIPT: &str = r#"
echo "boom" >&2
exit 1
"#;

/// Writes `a.txt` and `sub/b.txt` into the directory after `--outdir`.
pub const OUTPUTS_SCRIPT: &str = r#"
outdir=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) shift; outdir="$1" ;;
  esac
  shift
done
mkdir -p "$outdir/sub"
echo a > "$outdir/a.txt"
echo b > "$outdir/sub/b.txt"
"#;

/// Writes bytes that are not valid UTF-8 to both streams, exits 0.
pub const BINARY_SCRIPT: &str = r#"
printf '\377\376 binary'
printf '\377' >&2
exit 0
"#;

/// Runs until signalled.
pub const SLEEP_SCRIPT: &str = "exec sleep 30\n";

/// Ignores SIGTERM and exits on its own after two seconds.
pub const STUBBORN_SCRIPT: &str = "trap '' TERM\nsleep 2\n";

/// Temporary run directory plus helpers.
pub struct TestContext {
    pub temp_dir: TempDir,
    pub store: RunStore,
}

impl TestContext {
    /// Create a context with an empty run directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = RunStore::new(temp_dir.path().join("run"));
        Self { temp_dir, store }
    }

    /// Write a shell script and return its path.
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, body).expect("Failed to write script");
        path
    }

    /// Executor running `body` through `/bin/sh`.
    pub fn executor(&self, body: &str) -> ExecutorConfig {
        let script = self.script("executor.sh", body);
        ExecutorConfig::new("/bin/sh").with_default_parameters(vec![script_param(script)])
    }

    /// Supervisor whose executor runs `body`.
    pub fn supervisor(&self, body: &str) -> Supervisor {
        Supervisor::new(self.store.clone(), self.executor(body))
    }

    /// Handler state whose executor runs `body`.
    pub fn handler_state(&self, body: &str, cancel: CancelConfig) -> WesHandlerState {
        let script = self.script("executor.sh", body);
        let service_info = ServiceInfo {
            default_workflow_engine_parameters: vec![script_param(script)],
            ..ServiceInfo::default()
        };
        WesHandlerState::new(self.store.clone(), service_info, "/bin/sh", cancel)
    }

    /// Materialize a run the way submission does, without launching it.
    pub fn prepare_run(&self, request: &RunRequest) -> RunId {
        let run_id = RunId::generate();
        self.store.create_run(&run_id, request).unwrap();
        self.store
            .write_field(&run_id, RunField::WfParams, &request.workflow_params)
            .unwrap();
        run_id
    }
}

fn script_param(script: PathBuf) -> DefaultWorkflowEngineParameter {
    DefaultWorkflowEngineParameter {
        name: script.to_string_lossy().into_owned(),
        value_type: "path".to_string(),
        default_value: String::new(),
    }
}

/// A valid CWL request.
pub fn cwl_request() -> RunRequest {
    RunRequest {
        workflow_params: r#"{"message": "hello"}"#.to_string(),
        workflow_type: "CWL".to_string(),
        workflow_type_version: "v1.0".to_string(),
        workflow_url: "workflow.cwl".to_string(),
        workflow_engine_parameters: "{}".to_string(),
        tags: r#"{"workflow_name": "echo"}"#.to_string(),
    }
}

/// Cancel timing fast enough for tests.
pub fn fast_cancel(timeout: Duration) -> CancelConfig {
    CancelConfig {
        timeout,
        poll_interval: Duration::from_millis(50),
    }
}

/// Poll until the run satisfies `pred`, panicking after `timeout`.
pub async fn wait_for(
    store: &RunStore,
    run_id: &RunId,
    timeout: Duration,
    pred: impl Fn(&RunStore, &RunId) -> bool,
) {
    let started = Instant::now();
    while !pred(store, run_id) {
        if started.elapsed() > timeout {
            panic!(
                "Timed out waiting for run {} (state {})",
                run_id,
                store.read_state(run_id)
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until the run reaches a terminal state and return it.
pub async fn wait_for_terminal(store: &RunStore, run_id: &RunId) -> RunState {
    wait_for(store, run_id, Duration::from_secs(20), |s, id| {
        s.read_text(id, RunField::State)
            .ok()
            .and_then(|token| token.parse::<RunState>().ok())
            .is_some_and(|state| state.is_terminal())
    })
    .await;
    store.read_state(run_id)
}

/// Poll until the executor is running and its pid is recorded.
pub async fn wait_for_pid(store: &RunStore, run_id: &RunId) -> i32 {
    wait_for(store, run_id, Duration::from_secs(20), |s, id| {
        s.read_state(id) == RunState::Running && s.read_pid(id).is_some()
    })
    .await;
    store.read_pid(run_id).unwrap()
}
