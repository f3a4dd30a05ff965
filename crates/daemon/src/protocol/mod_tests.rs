// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use agnt_core::ErrorCode;

fn cmd(verb: &str, action: Option<&str>, args: &[&str], data: Option<&[u8]>) -> Command {
    Command {
        verb: verb.to_string(),
        action: action.map(String::from),
        args: args.iter().map(|s| s.to_string()).collect(),
        data: data.map(|d| d.to_vec()),
    }
}

#[test]
fn require_arg_reports_missing_param() {
    let c = cmd("SESSION", Some("GET"), &[], None);
    let err = c.require_arg(0, "code").unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingParam);
    let payload = err.structured().unwrap();
    assert_eq!(payload.command.as_deref(), Some("SESSION GET"));
    assert_eq!(payload.param.as_deref(), Some("code"));
}

#[test]
fn require_arg_returns_value() {
    let c = cmd("SESSION", Some("GET"), &["sess1"], None);
    assert_eq!(c.require_arg(0, "code").unwrap(), "sess1");
}

#[test]
fn require_data_utf8_rejects_invalid_bytes() {
    let c = cmd("SESSION", Some("SEND"), &["s"], Some(&[0xff, 0xfe]));
    let err = c.require_data_utf8("message").unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgs);
}

#[test]
fn data_json_tolerates_missing_payload() {
    let c = cmd("RUN-JSON", None, &[], None);
    let parsed: Option<serde_json::Value> = c.data_json().unwrap();
    assert!(parsed.is_none());
}

#[test]
fn data_json_rejects_garbage() {
    let c = cmd("RUN-JSON", None, &[], Some(b"{nope"));
    let err = c.data_json::<serde_json::Value>().unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgs);
}

#[test]
fn response_into_result_surfaces_errors() {
    let resp = Response::Err {
        code: ErrorCode::NotFound,
        message: "gone".into(),
    };
    let err = resp.into_result().unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    let ok = Response::Pong.into_result().unwrap();
    assert_eq!(ok, Response::Pong);
}
