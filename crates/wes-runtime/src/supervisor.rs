// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process Supervisor.
//!
//! Launches the executor for one run and follows it to a terminal state.
//! Each launch gets a dedicated OS thread that owns the `Child`, blocks on
//! `wait()` and records the outcome in the run directory:
//!
//! ```text
//! INITIALIZING -> cmd -> spawn -> RUNNING, start_time -> pid
//!     -> wait() -> end_time, exit_code -> COMPLETE | EXECUTOR_ERROR
//! ```
//!
//! Any error along the way, including a panic on the thread, lands in
//! `sys_error` and drives the run to `SYSTEM_ERROR`.

use serde_json::{Map, Value};
use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error as _;
use std::fmt::Write as _;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::request::RunRequest;
use crate::run_store::{RunField, RunId, RunStore};
use crate::service_info::DefaultWorkflowEngineParameter;
use crate::state::RunState;

/// Flag naming the executor's output directory.
pub const OUTDIR_FLAG: &str = "--outdir";

/// Errors raised while supervising a run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// I/O operation on the run directory failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The stored request could not be interpreted.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The argument vector could not be rendered as a command line.
    #[error("Failed to render command line: {0}")]
    CommandLine(String),

    /// The executor could not be started.
    #[error("Failed to start executor {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The supervisor thread panicked.
    #[error("Supervisor thread panicked: {0}")]
    Panicked(String),
}

/// How the executor is invoked.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Program to run, resolved through `PATH` when not a path.
    pub program: String,
    /// Flags passed ahead of request-supplied ones.
    pub default_parameters: Vec<DefaultWorkflowEngineParameter>,
}

impl ExecutorConfig {
    /// Executor without default parameters.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            default_parameters: Vec::new(),
        }
    }

    /// Set the default parameters.
    pub fn with_default_parameters(mut self, params: Vec<DefaultWorkflowEngineParameter>) -> Self {
        self.default_parameters = params;
        self
    }
}

/// Handle to a launched run.
#[derive(Debug)]
pub struct SupervisorHandle {
    run_id: RunId,
    thread: JoinHandle<RunState>,
}

impl SupervisorHandle {
    /// Run this handle supervises.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Whether the supervisor thread has finished.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the run reaches its terminal state.
    ///
    /// Dropping the handle instead detaches the thread; the run still
    /// completes and records its outcome.
    pub fn join(self) -> RunState {
        self.thread.join().unwrap_or(RunState::SystemError)
    }
}

/// Launches executors and records their lifecycle.
#[derive(Debug, Clone)]
pub struct Supervisor {
    store: RunStore,
    executor: ExecutorConfig,
}

impl Supervisor {
    /// Create a supervisor writing into `store`.
    pub fn new(store: RunStore, executor: ExecutorConfig) -> Self {
        Self { store, executor }
    }

    /// Get the executor configuration.
    pub fn executor(&self) -> &ExecutorConfig {
        &self.executor
    }

    /// Start supervising a run on a new thread and return immediately.
    ///
    /// The run directory, `wf_params` and attachments must already be in place.
    pub fn launch(
        &self,
        run_id: RunId,
        request: RunRequest,
    ) -> Result<SupervisorHandle, SupervisorError> {
        let supervisor = self.clone();
        let thread_run_id = run_id.clone();
        let name = format!("wes-run-{}", &run_id.as_str()[..run_id.as_str().len().min(8)]);

        match thread::Builder::new()
            .name(name)
            .spawn(move || supervisor.supervise(&thread_run_id, &request))
        {
            Ok(thread) => {
                debug!(run_id = %run_id, "Supervisor thread started");
                Ok(SupervisorHandle { run_id, thread })
            }
            Err(e) => {
                let err = SupervisorError::Io(e);
                self.record_system_error(&run_id, &err);
                Err(err)
            }
        }
    }

    /// Run the full lifecycle on the calling thread and return the terminal state.
    ///
    /// Never fails: errors and panics become `SYSTEM_ERROR`.
    pub fn supervise(&self, run_id: &RunId, request: &RunRequest) -> RunState {
        let err = match panic::catch_unwind(AssertUnwindSafe(|| self.execute(run_id, request))) {
            Ok(Ok(state)) => {
                info!(run_id = %run_id, state = %state, "Run finished");
                return state;
            }
            Ok(Err(e)) => e,
            Err(payload) => SupervisorError::Panicked(panic_message(payload.as_ref())),
        };

        error!(run_id = %run_id, error = %err, "Run failed with system error");
        self.record_system_error(run_id, &err);
        RunState::SystemError
    }

    /// Build the executor argument vector for a run.
    ///
    /// `[program, defaults.., request params.., --outdir <dir>?, workflow_url, wf_params]`
    pub fn build_command(
        &self,
        run_id: &RunId,
        request: &RunRequest,
    ) -> Result<Vec<String>, SupervisorError> {
        let engine_params = request
            .engine_parameters()
            .map_err(|e| SupervisorError::InvalidRequest(e.to_string()))?;

        let mut argv = vec![self.executor.program.clone()];
        argv.extend(default_parameter_args(&self.executor.default_parameters));
        argv.extend(flatten_engine_parameters(&engine_params));

        if !has_outdir_flag(&argv[1..]) {
            argv.push(OUTDIR_FLAG.to_string());
            argv.push(path_arg(&self.store, run_id, RunField::OutputsDir));
        }

        argv.push(request.workflow_url.clone());
        argv.push(path_arg(&self.store, run_id, RunField::WfParams));
        Ok(argv)
    }

    fn execute(&self, run_id: &RunId, request: &RunRequest) -> Result<RunState, SupervisorError> {
        self.store.write_state(run_id, RunState::Initializing)?;

        let argv = self.build_command(run_id, request)?;
        let cmd_line = shlex::try_join(argv.iter().map(String::as_str))
            .map_err(|e| SupervisorError::CommandLine(e.to_string()))?;
        self.store.write_field(run_id, RunField::Cmd, &cmd_line)?;

        let exe_dir = self.store.create_dir(run_id, RunField::ExeDir)?;
        self.store.create_dir(run_id, RunField::OutputsDir)?;
        let stdout = self.store.create_log(run_id, RunField::Stdout)?;
        let stderr = self.store.create_log(run_id, RunField::Stderr)?;

        let program = &argv[0];
        let mut child = Command::new(program)
            .args(&argv[1..])
            .current_dir(&exe_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: program.clone(),
                source,
            })?;

        match self.follow(run_id, &mut child) {
            Ok(state) => Ok(state),
            Err(e) => {
                // The bookkeeping failed with the child still attached; don't
                // leave it running unsupervised.
                if let Err(kill_err) = child.kill() {
                    debug!(run_id = %run_id, error = %kill_err, "Executor already gone");
                }
                let _ = child.wait();
                Err(e)
            }
        }
    }

    fn follow(&self, run_id: &RunId, child: &mut Child) -> Result<RunState, SupervisorError> {
        self.store.write_state(run_id, RunState::Running)?;
        self.store.write_timestamp(run_id, RunField::StartTime)?;

        let pid = child.id();
        self.store.write_field(run_id, RunField::Pid, pid.to_string())?;
        info!(run_id = %run_id, pid = pid, "Executor started");

        let status = child.wait()?;

        self.store.write_timestamp(run_id, RunField::EndTime)?;
        let exit_code = exit_code_of(&status);
        self.store.write_field(
            run_id,
            RunField::ExitCode,
            exit_code.map(|c| c.to_string()).unwrap_or_default(),
        )?;

        let state = if exit_code == Some(0) {
            RunState::Complete
        } else {
            warn!(run_id = %run_id, exit_code = ?exit_code, "Executor failed");
            RunState::ExecutorError
        };
        self.store.write_state(run_id, state)?;
        Ok(state)
    }

    fn record_system_error(&self, run_id: &RunId, err: &SupervisorError) {
        if let Err(e) = self
            .store
            .write_field(run_id, RunField::SysError, diagnostic(err))
        {
            error!(run_id = %run_id, error = %e, "Failed to write sys_error");
        }
        if let Err(e) = self.store.write_state(run_id, RunState::SystemError) {
            error!(run_id = %run_id, error = %e, "Failed to write SYSTEM_ERROR state");
        }
    }
}

/// Flatten executor parameters into command-line tokens.
///
/// Each key is followed by its value. Arrays of scalars are joined with `,`,
/// an empty string yields a bare switch, and pairs whose value cannot be
/// rendered (null, objects, nested arrays) are skipped.
pub fn flatten_engine_parameters(params: &Map<String, Value>) -> Vec<String> {
    let mut args = Vec::with_capacity(params.len() * 2);
    for (key, value) in params {
        match render_value(value) {
            Some(rendered) => push_flag(&mut args, key, rendered),
            None => warn!(
                parameter = %key,
                value = %value,
                "Skipping executor parameter with unsupported value"
            ),
        }
    }
    args
}

/// Whether an argument list already names an output directory.
pub fn has_outdir_flag(args: &[String]) -> bool {
    args.iter().any(|arg| {
        arg == OUTDIR_FLAG
            || arg
                .strip_prefix(OUTDIR_FLAG)
                .is_some_and(|rest| rest.starts_with('='))
    })
}

fn default_parameter_args(params: &[DefaultWorkflowEngineParameter]) -> Vec<String> {
    let mut args = Vec::with_capacity(params.len() * 2);
    for param in params.iter().filter(|p| !p.name.is_empty()) {
        push_flag(&mut args, &param.name, param.default_value.clone());
    }
    args
}

fn push_flag(args: &mut Vec<String>, key: &str, value: String) {
    args.push(key.to_string());
    if !value.is_empty() {
        args.push(value);
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(render_scalar)
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(",")),
        other => render_scalar(other),
    }
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn path_arg(store: &RunStore, run_id: &RunId, field: RunField) -> String {
    store.path(run_id, field).to_string_lossy().into_owned()
}

/// Exit code of a finished child; `-<signal>` when killed by a signal.
fn exit_code_of(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|sig| -sig))
    }
    #[cfg(not(unix))]
    {
        status.code()
    }
}

fn diagnostic(err: &SupervisorError) -> String {
    let mut out = format!("{}\n", err);
    // Io and Spawn already render their immediate source.
    let mut source = match err {
        SupervisorError::Io(e) | SupervisorError::Spawn { source: e, .. } => e.source(),
        _ => err.source(),
    };
    while let Some(cause) = source {
        let _ = writeln!(out, "Caused by: {}", cause);
        source = cause.source();
    }
    let _ = write!(out, "\nBacktrace:\n{}\n", Backtrace::force_capture());
    out
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn supervisor(defaults: Vec<DefaultWorkflowEngineParameter>) -> (TempDir, Supervisor) {
        let temp_dir = TempDir::new().unwrap();
        let store = RunStore::new(temp_dir.path());
        let executor = ExecutorConfig::new("cwltool").with_default_parameters(defaults);
        (temp_dir, Supervisor::new(store, executor))
    }

    #[test]
    fn test_flatten_scalars_and_lists() {
        let args = flatten_engine_parameters(&params(json!({
            "--cores": 4,
            "--tags": ["a", "b", 3],
            "--debug": "",
            "--strict": true,
            "--name": "demo run"
        })));
        assert_eq!(
            args,
            vec![
                "--cores", "4", "--tags", "a,b,3", "--debug", "--strict", "true", "--name",
                "demo run"
            ]
        );
    }

    #[test]
    fn test_flatten_skips_unsupported_values() {
        let args = flatten_engine_parameters(&params(json!({
            "--null": null,
            "--object": {"a": 1},
            "--nested": [[1]],
            "--keep": "x"
        })));
        assert_eq!(args, vec!["--keep", "x"]);
    }

    #[test]
    fn test_has_outdir_flag() {
        let args = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(has_outdir_flag(&args(&["--outdir", "/x"])));
        assert!(has_outdir_flag(&args(&["--outdir=/x"])));
        assert!(!has_outdir_flag(&args(&["--outdirs", "/x"])));
        assert!(!has_outdir_flag(&args(&[])));
    }

    #[test]
    fn test_build_command_appends_outdir() {
        let (_temp_dir, supervisor) = supervisor(vec![DefaultWorkflowEngineParameter {
            name: "--parallel".to_string(),
            value_type: "bool".to_string(),
            default_value: String::new(),
        }]);
        let run_id = RunId::parse("ab1234").unwrap();
        let request = RunRequest {
            workflow_url: "wf.cwl".to_string(),
            workflow_engine_parameters: r#"{"--cores": 2}"#.to_string(),
            ..Default::default()
        };

        let argv = supervisor.build_command(&run_id, &request).unwrap();
        let store = &supervisor.store;
        assert_eq!(
            argv,
            vec![
                "cwltool".to_string(),
                "--parallel".to_string(),
                "--cores".to_string(),
                "2".to_string(),
                "--outdir".to_string(),
                path_arg(store, &run_id, RunField::OutputsDir),
                "wf.cwl".to_string(),
                path_arg(store, &run_id, RunField::WfParams),
            ]
        );
    }

    #[test]
    fn test_build_command_keeps_request_outdir() {
        let (_temp_dir, supervisor) = supervisor(Vec::new());
        let run_id = RunId::parse("ab1234").unwrap();
        let request = RunRequest {
            workflow_url: "wf.cwl".to_string(),
            workflow_engine_parameters: r#"{"--outdir": "/data/out"}"#.to_string(),
            ..Default::default()
        };

        let argv = supervisor.build_command(&run_id, &request).unwrap();
        assert_eq!(argv.iter().filter(|a| *a == OUTDIR_FLAG).count(), 1);
        assert_eq!(argv[1..3], ["--outdir".to_string(), "/data/out".to_string()]);
    }

    #[test]
    fn test_build_command_rejects_non_object_parameters() {
        let (_temp_dir, supervisor) = supervisor(Vec::new());
        let request = RunRequest {
            workflow_engine_parameters: "[]".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            supervisor.build_command(&RunId::generate(), &request),
            Err(SupervisorError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_diagnostic_shows_spawn_cause_once() {
        let err = SupervisorError::Spawn {
            program: "missing-executor".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        let text = diagnostic(&err);
        assert!(text.starts_with("Failed to start executor missing-executor: no such file\n"));
        assert_eq!(text.matches("no such file").count(), 1);
        assert!(!text.contains("Caused by:"));
        assert!(text.contains("Backtrace:"));
    }

    #[test]
    fn test_diagnostic_walks_nested_causes_once() {
        #[derive(Debug, thiserror::Error)]
        #[error("disk quota exceeded")]
        struct Quota;

        #[derive(Debug, thiserror::Error)]
        #[error("failed to write pid")]
        struct WritePid(#[source] Quota);

        let err = SupervisorError::Io(io::Error::other(WritePid(Quota)));
        let text = diagnostic(&err);
        assert!(text.starts_with("IO error: failed to write pid\nCaused by: disk quota exceeded\n"));
        assert_eq!(text.matches("failed to write pid").count(), 1);

        let text = diagnostic(&SupervisorError::Panicked("boom".to_string()));
        assert!(text.starts_with("Supervisor thread panicked: boom\n"));
        assert!(!text.contains("Caused by:"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
