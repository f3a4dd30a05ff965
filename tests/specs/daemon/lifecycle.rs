//! Daemon lifecycle: startup, single-instance, takeover, shutdown.

use crate::prelude::*;
use std::process::{Command, Stdio};

#[test]
fn daemon_answers_ping_after_start() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();
    assert_eq!(conn.request("PING"), Frame::Pong);
}

#[test]
fn second_instance_refuses_to_start() {
    let daemon = Daemon::start();

    // Second daemon on the same socket must exit non-zero while the first
    // keeps serving.
    let status = Command::new(binary_path("agntd"))
        .args(["--socket"])
        .arg(&daemon.socket)
        .env("AGNT_STATE_DIR", daemon.state.path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success());

    let mut conn = daemon.connect();
    assert_eq!(conn.request("PING"), Frame::Pong);
}

#[test]
fn stale_socket_is_taken_over_after_crash() {
    let mut daemon = Daemon::start();

    // Crash hard: socket file stays behind
    daemon.kill();
    assert!(daemon.socket.exists());

    // A fresh instance reclaims it
    daemon.spawn();
    let mut conn = daemon.connect();
    assert_eq!(conn.request("PING"), Frame::Pong);
}

#[test]
fn shutdown_command_stops_the_daemon_and_removes_files() {
    let daemon = Daemon::start();
    let pid_file = daemon.state.path().join("agnt.sock.pid");
    assert!(pid_file.exists());

    let mut conn = daemon.connect();
    conn.request("SHUTDOWN").expect_ok();

    wait_until("socket removed after shutdown", || !daemon.socket.exists());
    wait_until("pid file removed after shutdown", || !pid_file.exists());
}

#[test]
fn cli_daemon_stop_without_daemon_is_graceful() {
    let daemon = Daemon::start();
    let mut handle = daemon;
    handle.kill();
    std::fs::remove_file(&handle.socket).ok();

    let output = handle.cli().args(["daemon", "stop"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("not running"));
}

#[test]
fn orphaned_process_is_reclaimed_on_restart() {
    let mut daemon = Daemon::start();

    let mut conn = daemon.connect();
    let started = conn.request("RUN sleep 100 id=orphan path=/tmp mode=background");
    let pid = started.json()["process"]["pid"].as_u64().unwrap() as i32;

    // Crash the daemon; the child keeps running as an orphan
    daemon.kill();
    assert!(process_alive(pid));

    // Restart on the same state dir: reclamation kills the orphan
    daemon.spawn();
    wait_until("orphan reclaimed", || !process_alive(pid));
}

fn process_alive(pid: i32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
