// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run Store - on-disk layout and encoding of run state.
//!
//! Every run owns one directory, sharded by the first two characters of its ID:
//!
//! ```text
//! {RUN_DIR}/{run_id[..2]}/{run_id}/
//!   run_request.json      submitted request, as received
//!   state.txt             current state token (the only rewritten field)
//!   exe/                  executor working directory, attachments
//!   outputs/              default executor output directory
//!   workflow_params.json  workflow parameter document
//!   start_time.txt        end_time.txt
//!   exit_code.txt         pid.txt         cmd.txt
//!   stdout.log            stderr.log      sys_error.log
//!   task_logs.json
//! ```
//!
//! No other module opens these files directly. A missing file is a valid value
//! and reads back as the field's default, so callers polling a run mid-flight
//! see partial data instead of errors.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::error::{Error, Result};
use crate::state::RunState;

/// Format of `start_time` / `end_time`. Lexical order matches time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Opaque run identifier, safe to use as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh random run ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Validate an externally supplied run ID.
    ///
    /// At least two characters, ASCII alphanumerics, `-` and `_` only.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let valid = raw.len() >= 2
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw))
        } else {
            Err(Error::InvalidRunId(raw))
        }
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shard directory name for this run.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RunId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A named piece of run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunField {
    /// Submitted request (JSON).
    RunRequest,
    /// Current state token.
    State,
    /// Executor working directory.
    ExeDir,
    /// Default output directory.
    OutputsDir,
    /// Workflow parameter document (JSON).
    WfParams,
    /// Executor start timestamp.
    StartTime,
    /// Executor end timestamp.
    EndTime,
    /// Executor exit status.
    ExitCode,
    /// Captured standard output.
    Stdout,
    /// Captured standard error.
    Stderr,
    /// Executor process ID.
    Pid,
    /// Executor command line.
    Cmd,
    /// Internal failure diagnostic.
    SysError,
    /// Per-task logs (JSON list).
    TaskLogs,
}

impl RunField {
    /// Name of the file or directory inside the run directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            RunField::RunRequest => "run_request.json",
            RunField::State => "state.txt",
            RunField::ExeDir => "exe",
            RunField::OutputsDir => "outputs",
            RunField::WfParams => "workflow_params.json",
            RunField::StartTime => "start_time.txt",
            RunField::EndTime => "end_time.txt",
            RunField::ExitCode => "exit_code.txt",
            RunField::Stdout => "stdout.log",
            RunField::Stderr => "stderr.log",
            RunField::Pid => "pid.txt",
            RunField::Cmd => "cmd.txt",
            RunField::SysError => "sys_error.log",
            RunField::TaskLogs => "task_logs.json",
        }
    }

    /// Fields whose value is the first line of the file.
    fn is_single_line(&self) -> bool {
        matches!(
            self,
            RunField::State
                | RunField::StartTime
                | RunField::EndTime
                | RunField::ExitCode
                | RunField::Pid
        )
    }
}

/// Filesystem-backed store for run state.
///
/// Holds nothing but the base directory: every read goes back to disk, so
/// several stores over the same directory (or a restarted service) observe
/// the same runs.
#[derive(Debug, Clone)]
pub struct RunStore {
    base_dir: PathBuf,
}

impl RunStore {
    /// Create a store rooted at `base_dir`.
    ///
    /// Relative paths are resolved against the current directory so that
    /// paths handed to the executor stay valid after it changes directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let base_dir = if base_dir.is_absolute() {
            base_dir
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&base_dir))
                .unwrap_or(base_dir)
        };
        Self { base_dir }
    }

    /// Get the run base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the directory of a run.
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.base_dir.join(run_id.shard()).join(run_id.as_str())
    }

    /// Get the absolute path of a field.
    pub fn path(&self, run_id: &RunId, field: RunField) -> PathBuf {
        self.run_dir(run_id).join(field.file_name())
    }

    /// Check whether a run has been created.
    pub fn exists(&self, run_id: &RunId) -> bool {
        self.path(run_id, RunField::RunRequest).is_file()
    }

    /// Materialize the run directory and persist the submitted request.
    pub fn create_run<T: Serialize>(&self, run_id: &RunId, request: &T) -> Result<()> {
        fs::create_dir_all(self.run_dir(run_id))?;
        self.write_json(run_id, RunField::RunRequest, request)?;
        debug!(run_id = %run_id, path = %self.run_dir(run_id).display(), "Created run directory");
        Ok(())
    }

    /// Overwrite a field, creating parent directories on demand.
    ///
    /// The content goes to a temporary sibling first and is renamed into
    /// place, so concurrent readers see either the old or the new value.
    pub fn write_field(
        &self,
        run_id: &RunId,
        field: RunField,
        content: impl AsRef<[u8]>,
    ) -> io::Result<()> {
        let run_dir = self.run_dir(run_id);
        fs::create_dir_all(&run_dir)?;
        let tmp_path = run_dir.join(format!(".{}.tmp", field.file_name()));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(content.as_ref())?;
            file.flush()?;
        }
        fs::rename(&tmp_path, run_dir.join(field.file_name()))
    }

    /// Serialize a value as pretty JSON into a field.
    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        run_id: &RunId,
        field: RunField,
        value: &T,
    ) -> Result<()> {
        let content = serde_json::to_string_pretty(value)?;
        self.write_field(run_id, field, content)?;
        Ok(())
    }

    /// Persist a state transition.
    pub fn write_state(&self, run_id: &RunId, state: RunState) -> io::Result<()> {
        self.write_field(run_id, RunField::State, state.as_str())?;
        debug!(run_id = %run_id, state = %state, "State written");
        Ok(())
    }

    /// Persist the current UTC time into a timestamp field and return it.
    pub fn write_timestamp(&self, run_id: &RunId, field: RunField) -> io::Result<String> {
        let stamp = chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string();
        self.write_field(run_id, field, &stamp)?;
        Ok(stamp)
    }

    /// Create a directory field and return its path.
    pub fn create_dir(&self, run_id: &RunId, field: RunField) -> io::Result<PathBuf> {
        let path = self.path(run_id, field);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Create (truncate) a log field and return the open handle, for use as a
    /// child process stream.
    pub fn create_log(&self, run_id: &RunId, field: RunField) -> io::Result<File> {
        let path = self.path(run_id, field);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(path)
    }

    /// Read a text field. Missing files read as `""`.
    ///
    /// Single-line fields (`state`, timestamps, `exit_code`, `pid`) return
    /// their first line. `cmd` keeps embedded newlines from quoted arguments
    /// and drops only the trailing one. Logs return the whole content, with
    /// invalid UTF-8 replaced rather than reported.
    pub fn read_text(&self, run_id: &RunId, field: RunField) -> io::Result<String> {
        let bytes = match fs::read(self.path(run_id, field)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(e),
        };
        let content = String::from_utf8_lossy(&bytes);
        if field.is_single_line() {
            Ok(content
                .lines()
                .find(|line| !line.trim().is_empty())
                .unwrap_or_default()
                .trim()
                .to_string())
        } else if field == RunField::Cmd {
            Ok(content.trim_end_matches(['\n', '\r']).to_string())
        } else {
            Ok(content.into_owned())
        }
    }

    /// Read a JSON field. Missing files read as `T::default()`; malformed JSON
    /// is returned as [`Error::Json`].
    pub fn read_json<T: DeserializeOwned + Default>(
        &self,
        run_id: &RunId,
        field: RunField,
    ) -> Result<T> {
        match fs::read_to_string(self.path(run_id, field)) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the submitted request. A missing request reads as `{}`.
    pub fn read_request(&self, run_id: &RunId) -> Result<Value> {
        let request: Option<Value> = self.read_json(run_id, RunField::RunRequest)?;
        Ok(request.unwrap_or_else(|| Value::Object(Default::default())))
    }

    /// Read the per-task logs. A missing file reads as `[]`.
    pub fn read_task_logs(&self, run_id: &RunId) -> Result<Vec<Value>> {
        self.read_json(run_id, RunField::TaskLogs)
    }

    /// Read the current state. Never fails: anything unreadable is `UNKNOWN`.
    pub fn read_state(&self, run_id: &RunId) -> RunState {
        self.read_text(run_id, RunField::State)
            .ok()
            .and_then(|token| token.parse().ok())
            .unwrap_or_default()
    }

    /// Read the recorded executor PID.
    pub fn read_pid(&self, run_id: &RunId) -> Option<i32> {
        self.read_integer(run_id, RunField::Pid)
    }

    /// Read the recorded executor exit code.
    pub fn read_exit_code(&self, run_id: &RunId) -> Option<i32> {
        self.read_integer(run_id, RunField::ExitCode)
    }

    fn read_integer(&self, run_id: &RunId, field: RunField) -> Option<i32> {
        self.read_text(run_id, field).ok()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, RunStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = RunStore::new(temp_dir.path());
        (temp_dir, store)
    }

    #[test]
    fn test_run_dir_is_sharded_by_prefix() {
        let (temp_dir, store) = store();
        let run_id = RunId::parse("ab12cd").unwrap();
        assert_eq!(
            store.run_dir(&run_id),
            temp_dir.path().join("ab").join("ab12cd")
        );
        assert_eq!(
            store.path(&run_id, RunField::State),
            temp_dir.path().join("ab").join("ab12cd").join("state.txt")
        );
    }

    #[test]
    fn test_run_id_validation() {
        assert!(RunId::parse("a").is_err());
        assert!(RunId::parse("").is_err());
        assert!(RunId::parse("../etc").is_err());
        assert!(RunId::parse("ab/cd").is_err());
        assert!(RunId::parse("ab cd").is_err());
        assert!(RunId::parse("run_01-x").is_ok());
        assert!(RunId::parse(RunId::generate().to_string()).is_ok());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
    }

    #[test]
    fn test_missing_fields_read_as_defaults() {
        let (_temp_dir, store) = store();
        let run_id = RunId::generate();

        assert_eq!(store.read_text(&run_id, RunField::Stdout).unwrap(), "");
        assert_eq!(store.read_text(&run_id, RunField::Cmd).unwrap(), "");
        assert_eq!(store.read_request(&run_id).unwrap(), serde_json::json!({}));
        assert!(store.read_task_logs(&run_id).unwrap().is_empty());
        assert_eq!(store.read_state(&run_id), RunState::Unknown);
        assert_eq!(store.read_pid(&run_id), None);
        assert_eq!(store.read_exit_code(&run_id), None);
        assert!(!store.exists(&run_id));
    }

    #[test]
    fn test_create_run_roundtrip() {
        let (_temp_dir, store) = store();
        let run_id = RunId::generate();
        let request = serde_json::json!({
            "workflow_url": "wf.cwl",
            "tags": "{\"name\": \"x\"}",
            "nested": {"list": [1, 2, 3]}
        });

        store.create_run(&run_id, &request).unwrap();

        assert!(store.exists(&run_id));
        assert_eq!(store.read_request(&run_id).unwrap(), request);
    }

    #[test]
    fn test_invalid_json_surfaces_error() {
        let (_temp_dir, store) = store();
        let run_id = RunId::generate();
        store
            .write_field(&run_id, RunField::RunRequest, "{not json")
            .unwrap();

        assert!(matches!(store.read_request(&run_id), Err(Error::Json(_))));
    }

    #[test]
    fn test_state_overwrite_and_garbage() {
        let (_temp_dir, store) = store();
        let run_id = RunId::generate();

        store.write_state(&run_id, RunState::Initializing).unwrap();
        store.write_state(&run_id, RunState::Running).unwrap();
        assert_eq!(store.read_state(&run_id), RunState::Running);

        store
            .write_field(&run_id, RunField::State, "\n\nCOMPLETE\n")
            .unwrap();
        assert_eq!(store.read_state(&run_id), RunState::Complete);

        store
            .write_field(&run_id, RunField::State, "NOT_A_STATE")
            .unwrap();
        assert_eq!(store.read_state(&run_id), RunState::Unknown);
    }

    #[test]
    fn test_single_line_fields_take_first_line() {
        let (_temp_dir, store) = store();
        let run_id = RunId::generate();
        store
            .write_field(&run_id, RunField::ExitCode, "0\ntrailing")
            .unwrap();
        store
            .write_field(&run_id, RunField::Stdout, "line one\nline two\n")
            .unwrap();

        assert_eq!(store.read_text(&run_id, RunField::ExitCode).unwrap(), "0");
        assert_eq!(store.read_exit_code(&run_id), Some(0));
        assert_eq!(
            store.read_text(&run_id, RunField::Stdout).unwrap(),
            "line one\nline two\n"
        );
    }

    #[test]
    fn test_logs_with_invalid_utf8_read_lossily() {
        let (_temp_dir, store) = store();
        let run_id = RunId::generate();
        store
            .write_field(&run_id, RunField::Stdout, b"\xff\xfe binary\n")
            .unwrap();

        let stdout = store.read_text(&run_id, RunField::Stdout).unwrap();
        assert!(stdout.ends_with(" binary\n"));
        assert!(stdout.contains('\u{FFFD}'));
    }

    #[test]
    fn test_cmd_keeps_quoted_newlines() {
        let (_temp_dir, store) = store();
        let run_id = RunId::generate();
        let cmd = "cwltool --label 'line1\nline2' --outdir /tmp/out wf.cwl";
        store
            .write_field(&run_id, RunField::Cmd, format!("{}\n", cmd))
            .unwrap();

        assert_eq!(store.read_text(&run_id, RunField::Cmd).unwrap(), cmd);
    }

    #[test]
    fn test_timestamp_format() {
        let (_temp_dir, store) = store();
        let run_id = RunId::generate();
        let stamp = store.write_timestamp(&run_id, RunField::StartTime).unwrap();

        assert_eq!(stamp.len(), "2025-01-01T00:00:00".len());
        assert!(chrono::NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT).is_ok());
        assert_eq!(store.read_text(&run_id, RunField::StartTime).unwrap(), stamp);
    }

    #[test]
    fn test_relative_base_dir_becomes_absolute() {
        let store = RunStore::new("run");
        assert!(store.base_dir().is_absolute());
    }

    #[test]
    fn test_run_id_serde_validates() {
        let id: RunId = serde_json::from_str("\"ab-01\"").unwrap();
        assert_eq!(id.as_str(), "ab-01");
        assert!(serde_json::from_str::<RunId>("\"../x\"").is_err());
    }
}
