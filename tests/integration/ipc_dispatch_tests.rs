//! Integration tests for IPC command dispatch and authentication.

use std::sync::Arc;

use server_warden::ipc::server::{dispatch_command, IpcRequest, IpcState};

use super::test_helpers::Harness;

fn request(command: &str, token: Option<&str>) -> IpcRequest {
    IpcRequest {
        command: command.to_owned(),
        auth_token: token.map(str::to_owned),
    }
}

fn state(h: &Harness, token: Option<&str>) -> IpcState {
    IpcState {
        controller: Arc::clone(&h.controller),
        auth_token: token.map(str::to_owned),
    }
}

#[tokio::test]
async fn valid_token_is_accepted() {
    let h = Harness::new(false, false);
    let state = state(&h, Some("secret"));

    let response = dispatch_command(&request("status", Some("secret")), &state).await;

    assert!(response.ok, "unexpected error: {:?}", response.error);
}

#[tokio::test]
async fn wrong_or_missing_token_is_rejected() {
    let h = Harness::new(false, false);
    let state = state(&h, Some("secret"));

    for token in [Some("nope"), None] {
        let response = dispatch_command(&request("start", token), &state).await;
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("unauthorized"));
    }
    assert_eq!(h.spawner.spawns(), 0);
}

#[tokio::test]
async fn status_reports_state_and_schedules() {
    let h = Harness::new(true, false);
    let state = state(&h, None);

    let response = dispatch_command(&request("status", None), &state).await;

    let data = response.data.expect("status payload");
    assert_eq!(data["state"], "stopped");
    assert_eq!(data["version"], "Unknown");
    assert!(data["backups"]["next_fire_at"].is_string());
    assert_eq!(data["backups"]["running"], false);
    assert!(data["restarts"]["next_fire_at"].is_null());
    assert!(data["latest_backup"].is_null());
    assert_eq!(data["backups_paused"], false);
}

#[tokio::test]
async fn start_and_stop_drive_the_controller() {
    let h = Harness::new(false, false);
    let state = state(&h, None);

    let started = dispatch_command(&request("start", None), &state).await;
    assert!(started.ok);
    assert!(h.controller.is_running());

    let again = dispatch_command(&request("start", None), &state).await;
    assert!(!again.ok);
    assert_eq!(h.spawner.spawns(), 1);

    let stopped = dispatch_command(&request("stop", None), &state).await;
    assert!(stopped.ok);
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn backup_commands_reach_the_backup_scheduler() {
    let h = Harness::new(true, false);
    let state = state(&h, None);

    let paused = dispatch_command(&request("pause-backups", None), &state).await;
    assert!(paused.ok);
    assert!(h.controller.backups().is_paused());

    let forced = dispatch_command(&request("backup", None), &state).await;
    assert!(forced.ok);
    assert_eq!(h.backup.calls(), 1);

    let resumed = dispatch_command(&request("resume-backups", None), &state).await;
    assert!(resumed.ok);
    assert!(!h.controller.backups().is_paused());
}

#[tokio::test]
async fn force_restart_restarts_the_server_immediately() {
    let h = Harness::new(false, true);
    let mut updated = (*h.config.snapshot()).clone();
    updated.auto_restart.warning_minutes = 5;
    h.config.replace(updated);
    let state = state(&h, None);

    let response = dispatch_command(&request("force-restart", None), &state).await;

    assert!(response.ok, "unexpected error: {:?}", response.error);
    assert_eq!(h.spawner.spawns(), 1);
    assert!(h.controller.is_running());
}

#[tokio::test]
async fn unknown_command_is_reported() {
    let h = Harness::new(false, false);
    let state = state(&h, None);

    let response = dispatch_command(&request("explode", None), &state).await;

    assert!(!response.ok);
    assert_eq!(response.error.as_deref(), Some("unknown command: explode"));
}
