// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cancellation tests against real child processes.

#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use common::*;
use wes_runtime::cancel::{CancelController, NixSignaller, Signaller};
use wes_runtime::run_store::RunField;
use wes_runtime::state::RunState;

#[tokio::test]
async fn test_cancel_running_process() {
    let ctx = TestContext::new();
    let request = cwl_request();
    let run_id = ctx.prepare_run(&request);
    let handle = ctx.supervisor(SLEEP_SCRIPT).launch(run_id.clone(), request).unwrap();

    let pid = wait_for_pid(&ctx.store, &run_id).await;
    assert!(NixSignaller.is_alive(pid));

    let controller = CancelController::new(ctx.store.clone(), fast_cancel(Duration::from_secs(10)));
    let started = Instant::now();
    let state = controller.cancel(&run_id).await.unwrap();

    assert_eq!(state, RunState::Canceled);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(ctx.store.read_state(&run_id), RunState::Canceled);

    // The supervisor saw SIGTERM as an executor failure before we settled.
    assert_eq!(handle.join(), RunState::ExecutorError);
    assert_eq!(ctx.store.read_exit_code(&run_id), Some(-15));
    assert_eq!(ctx.store.read_state(&run_id), RunState::Canceled);
}

#[tokio::test]
async fn test_cancel_times_out_when_process_ignores_signal() {
    let ctx = TestContext::new();
    let request = cwl_request();
    let run_id = ctx.prepare_run(&request);
    let handle = ctx
        .supervisor(STUBBORN_SCRIPT)
        .launch(run_id.clone(), request)
        .unwrap();

    wait_for_pid(&ctx.store, &run_id).await;
    // Give the shell time to install its trap.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let controller =
        CancelController::new(ctx.store.clone(), fast_cancel(Duration::from_millis(500)));
    let state = controller.cancel(&run_id).await.unwrap();

    assert_eq!(state, RunState::Unknown);
    assert_eq!(ctx.store.read_state(&run_id), RunState::Unknown);

    // The executor finishes on its own later and the supervisor records it.
    assert_eq!(handle.join(), RunState::Complete);
    assert_eq!(ctx.store.read_text(&run_id, RunField::ExitCode).unwrap(), "0");
}

#[tokio::test]
async fn test_cancel_finished_run_is_noop() {
    let ctx = TestContext::new();
    let request = cwl_request();
    let run_id = ctx.prepare_run(&request);
    ctx.supervisor(FAILURE_SCRIPT)
        .launch(run_id.clone(), request)
        .unwrap()
        .join();

    let controller = CancelController::new(ctx.store.clone(), fast_cancel(Duration::from_secs(1)));
    let state = controller.cancel(&run_id).await.unwrap();

    assert_eq!(state, RunState::ExecutorError);
    assert_eq!(ctx.store.read_state(&run_id), RunState::ExecutorError);
}

#[tokio::test]
async fn test_cancel_with_dead_pid_is_unknown() {
    let ctx = TestContext::new();
    let run_id = ctx.prepare_run(&cwl_request());

    // A process that has already been reaped.
    let mut child = std::process::Command::new("/bin/true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();

    ctx.store.write_state(&run_id, RunState::Running).unwrap();
    ctx.store
        .write_field(&run_id, RunField::Pid, dead_pid.to_string())
        .unwrap();

    let controller = CancelController::new(ctx.store.clone(), fast_cancel(Duration::from_secs(1)));
    assert_eq!(controller.cancel(&run_id).await.unwrap(), RunState::Unknown);
    assert_eq!(ctx.store.read_state(&run_id), RunState::Unknown);
}
