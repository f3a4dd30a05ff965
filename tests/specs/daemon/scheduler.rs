//! Deferred delivery: overlay posts, ordering, crash replay.

use crate::prelude::*;
use std::time::Duration;

#[test]
fn immediate_send_posts_to_the_session_overlay() {
    let daemon = Daemon::start();
    let overlay = OverlayStub::start();
    let mut conn = daemon.connect();

    conn.request(&format!(
        r#"SESSION REGISTER sess1 {} {{"project_path":"/p1"}}"#,
        overlay.socket.display()
    ))
    .json();

    conn.request_with_payload("SESSION SEND sess1", Some(b"hello overlay"))
        .expect_ok();

    overlay.wait_for(1, Duration::from_secs(2));
    assert_eq!(overlay.texts(), vec!["hello overlay"]);

    // Contract fields on the wire
    let message = &overlay.messages.lock().unwrap()[0];
    assert_eq!(message["enter"], true);
    assert_eq!(message["instant"], true);
}

#[test]
fn scheduled_task_is_delivered_after_the_delay() {
    let daemon = Daemon::start();
    let overlay = OverlayStub::start();
    let project = tempfile::TempDir::new().unwrap();
    let mut conn = daemon.connect();

    conn.request(&format!(
        r#"SESSION REGISTER sess1 {} {{"project_path":"{}"}}"#,
        overlay.socket.display(),
        project.path().display()
    ))
    .json();

    let scheduled = conn.request("SESSION SCHEDULE sess1 200ms deferred hello");
    assert_eq!(scheduled.json()["status"], "pending");

    overlay.wait_for(1, Duration::from_secs(3));
    assert_eq!(overlay.texts(), vec!["deferred hello"]);

    let tasks = conn.request("SESSION TASKS global");
    assert_eq!(tasks.json()["tasks"][0]["status"], "delivered");
}

#[test]
fn deliveries_follow_deliver_at_order_not_schedule_order() {
    let daemon = Daemon::start();
    let overlay = OverlayStub::start();
    let project = tempfile::TempDir::new().unwrap();
    let mut conn = daemon.connect();

    conn.request(&format!(
        r#"SESSION REGISTER sess1 {} {{"project_path":"{}"}}"#,
        overlay.socket.display(),
        project.path().display()
    ))
    .json();

    conn.request("SESSION SCHEDULE sess1 500ms m500").json();
    conn.request("SESSION SCHEDULE sess1 100ms m100").json();
    conn.request("SESSION SCHEDULE sess1 300ms m300").json();

    overlay.wait_for(3, Duration::from_secs(3));
    assert_eq!(overlay.texts(), vec!["m100", "m300", "m500"]);
}

#[test]
fn cancelled_task_never_fires() {
    let daemon = Daemon::start();
    let overlay = OverlayStub::start();
    let project = tempfile::TempDir::new().unwrap();
    let mut conn = daemon.connect();

    conn.request(&format!(
        r#"SESSION REGISTER sess1 {} {{"project_path":"{}"}}"#,
        overlay.socket.display(),
        project.path().display()
    ))
    .json();

    let scheduled = conn.request("SESSION SCHEDULE sess1 300ms doomed");
    let task_id = scheduled.json()["task_id"].as_str().unwrap().to_string();
    conn.request(&format!("SESSION CANCEL {task_id}")).json();

    std::thread::sleep(Duration::from_millis(600));
    assert!(overlay.texts().is_empty());
}

#[test]
fn pending_task_survives_a_daemon_crash() {
    let mut daemon = Daemon::start();
    let overlay = OverlayStub::start();
    let project = tempfile::TempDir::new().unwrap();

    let register = format!(
        r#"SESSION REGISTER sess1 {} {{"project_path":"{}"}}"#,
        overlay.socket.display(),
        project.path().display()
    );

    let task_id = {
        let mut conn = daemon.connect();
        conn.request(&register).json();
        let scheduled = conn.request("SESSION SCHEDULE sess1 2s crash survivor");
        scheduled.json()["task_id"].as_str().unwrap().to_string()
    };

    // Crash within the delay; the task is already on disk
    daemon.kill();
    assert!(project.path().join(".agnt/scheduler.json").exists());

    // Restart and re-register the session (registration is in-memory).
    // The connection must stay open or teardown would remove it again.
    daemon.spawn();
    let mut conn = daemon.connect();
    conn.request(&register).json();

    overlay.wait_for(1, Duration::from_secs(5));
    assert_eq!(overlay.texts(), vec!["crash survivor"]);

    // The replayed task keeps its identity and ends up delivered
    let tasks = conn.request("SESSION TASKS global");
    let tasks = tasks.json()["tasks"].as_array().unwrap().clone();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["id"], task_id.as_str());
    assert_eq!(tasks[0]["status"], "delivered");
}

#[test]
fn scheduler_file_is_atomic_json() {
    let daemon = Daemon::start();
    let overlay = OverlayStub::start();
    let project = tempfile::TempDir::new().unwrap();
    let mut conn = daemon.connect();

    conn.request(&format!(
        r#"SESSION REGISTER sess1 {} {{"project_path":"{}"}}"#,
        overlay.socket.display(),
        project.path().display()
    ))
    .json();

    for i in 0..10 {
        conn.request(&format!("SESSION SCHEDULE sess1 1h message-{i}"))
            .json();
        // After every mutation the file parses completely
        let content =
            std::fs::read_to_string(project.path().join(".agnt/scheduler.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["version"], 1);
        assert_eq!(parsed["tasks"].as_array().unwrap().len(), i + 1);
    }
}
