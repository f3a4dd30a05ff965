//! Wire protocol behavior over a live socket.

use crate::prelude::*;

#[test]
fn info_returns_version_and_counters() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    let info = conn.request("INFO");
    let info = info.json();
    assert!(info["version"].is_string());
    assert!(info["sessions"]["active_count"].is_u64());
    assert!(info["processes"]["total_started"].is_u64());
    assert!(info["scheduler"]["pending"].is_u64());
}

#[test]
fn unknown_verb_reports_structured_error() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    let frame = conn.request("FROBNICATE now");
    assert_eq!(frame.err_code(), "invalid_command");
    match frame {
        Frame::Err { message, .. } => {
            let payload: serde_json::Value = serde_json::from_str(&message).unwrap();
            assert_eq!(payload["command"], "FROBNICATE");
            assert!(payload["valid_actions"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v == "PING"));
        }
        _ => unreachable!(),
    }
}

#[test]
fn unknown_action_reports_valid_set() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    let frame = conn.request("SESSION EXPLODE x");
    assert_eq!(frame.err_code(), "invalid_action");
    match frame {
        Frame::Err { message, .. } => {
            let payload: serde_json::Value = serde_json::from_str(&message).unwrap();
            assert_eq!(payload["command"], "SESSION");
            assert_eq!(payload["action"], "EXPLODE");
            assert!(payload["valid_actions"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v == "REGISTER"));
        }
        _ => unreachable!(),
    }
}

#[test]
fn parse_errors_do_not_kill_the_connection() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    let frame = conn.request("SESSION SEND x -- banana");
    assert_eq!(frame.err_code(), "invalid_args");

    // Same connection keeps working
    assert_eq!(conn.request("PING"), Frame::Pong);
}

#[test]
fn payload_roundtrips_through_store() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    conn.request_with_payload("STORE SET config", Some(br#"{"theme":"dark","tabs":4}"#))
        .expect_ok();

    let value = conn.request("STORE GET config");
    assert_eq!(value.json()["theme"], "dark");
    assert_eq!(value.json()["tabs"], 4);

    let keys = conn.request("STORE LIST");
    assert_eq!(keys.json()["keys"][0], "config");
}

#[test]
fn run_output_is_chunk_streamed() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    conn.request("RUN echo spec-output id=say path=/tmp mode=foreground");
    let frame = conn.request("PROC OUTPUT say stdout");
    match frame {
        Frame::Chunks(chunks) => {
            let text = String::from_utf8(chunks.concat()).unwrap();
            assert!(text.contains("spec-output"));
        }
        other => panic!("expected chunks, got {other:?}"),
    }
}

#[test]
fn cleanup_port_bounds_are_validated() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    assert_eq!(conn.request("PROC CLEANUP-PORT 0").err_code(), "invalid_args");
    assert_eq!(
        conn.request("PROC CLEANUP-PORT 65536").err_code(),
        "invalid_args"
    );
}
