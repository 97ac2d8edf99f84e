//! Integration tests for the real POSIX process table.

#![cfg(unix)]

use std::process::{Command, Stdio};
use std::time::Duration;

use serial_test::serial;
use server_warden::process::posix::PosixProcessTable;
use server_warden::process::ProcessTable;

use super::test_helpers::wait_for;

fn spawn_marked(marker: &str) -> std::process::Child {
    Command::new("sh")
        .args(["-c", &format!("sleep 30; : {marker}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sh")
}

#[tokio::test]
#[serial]
async fn find_matches_command_line_and_force_kill_removes_it() {
    let marker = format!("warden_probe_{}", std::process::id());
    let mut child = spawn_marked(&marker);
    let table = PosixProcessTable::new();

    assert!(
        wait_for(Duration::from_secs(3), || {
            table.find(&marker).ok().flatten().is_some()
        })
        .await,
        "spawned process not visible in the process table"
    );

    table.force_kill(&marker, "").await.expect("force kill");

    let status = child.wait().expect("reap child");
    assert!(!status.success());
    assert_eq!(table.find(&marker).unwrap(), None);
}

#[tokio::test]
#[serial]
async fn find_reports_nothing_for_absent_executable() {
    let table = PosixProcessTable::new();
    let needle = format!("warden_absent_{}_{}", std::process::id(), line!());

    assert_eq!(table.find(&needle).unwrap(), None);
}
