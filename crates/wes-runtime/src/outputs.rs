// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Output Harvester.
//!
//! Finds a run's output directory from the `--outdir` token of its recorded
//! command line and lists the files the executor produced there.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::run_store::{RunField, RunId, RunStore};
use crate::supervisor::OUTDIR_FLAG;

/// Map each produced file's path relative to the output directory
/// (`/`-separated) to its absolute path.
///
/// Returns an empty map when the run has no command line, the command line
/// names no output directory, or the directory cannot be read.
pub fn collect_outputs(store: &RunStore, run_id: &RunId) -> BTreeMap<String, String> {
    let Some(outdir) = output_dir(store, run_id) else {
        return BTreeMap::new();
    };

    let mut outputs = BTreeMap::new();
    for entry in WalkDir::new(&outdir).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(run_id = %run_id, error = %e, "Failed to read output directory");
                return BTreeMap::new();
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&outdir) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        outputs.insert(key, entry.path().to_string_lossy().into_owned());
    }
    outputs
}

/// Absolute output directory named on the run's command line.
fn output_dir(store: &RunStore, run_id: &RunId) -> Option<PathBuf> {
    let cmd = match store.read_text(run_id, RunField::Cmd) {
        Ok(cmd) => cmd,
        Err(e) => {
            debug!(run_id = %run_id, error = %e, "Failed to read command line");
            return None;
        }
    };
    let Some(args) = shlex::split(&cmd) else {
        debug!(run_id = %run_id, "Command line is not valid shell syntax");
        return None;
    };
    let dir = find_outdir(&args)?;
    let dir = Path::new(&dir);
    if dir.is_absolute() {
        Some(dir.to_path_buf())
    } else {
        Some(store.path(run_id, RunField::ExeDir).join(dir))
    }
}

fn find_outdir(args: &[String]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == OUTDIR_FLAG {
            return iter.next().cloned();
        }
        if let Some(dir) = arg.strip_prefix(OUTDIR_FLAG).and_then(|r| r.strip_prefix('=')) {
            return Some(dir.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_find_outdir() {
        assert_eq!(
            find_outdir(&args(&["cwltool", "--outdir", "/out", "wf.cwl"])).as_deref(),
            Some("/out")
        );
        assert_eq!(
            find_outdir(&args(&["cwltool", "--outdir=rel/out", "wf.cwl"])).as_deref(),
            Some("rel/out")
        );
        assert_eq!(find_outdir(&args(&["cwltool", "--outdir"])), None);
        assert_eq!(find_outdir(&args(&["cwltool", "wf.cwl"])), None);
    }
}
