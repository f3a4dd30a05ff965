// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn verb_table_has_no_duplicates() {
    let mut names = verb_names();
    names.sort_unstable();
    let len = names.len();
    names.dedup();
    assert_eq!(names.len(), len);
}

#[test]
fn plain_verbs_take_no_action() {
    for verb in ["PING", "INFO", "SHUTDOWN", "DETECT", "RUN", "RUN-JSON"] {
        assert!(!takes_action(verb), "{verb} should not take a sub-verb");
    }
}

#[test]
fn grouped_verbs_take_actions() {
    for verb in [
        "PROC",
        "PROXY",
        "PROXYLOG",
        "CURRENTPAGE",
        "OVERLAY",
        "TUNNEL",
        "CHAOS",
        "SESSION",
        "STORE",
        "AUTOMATE",
    ] {
        assert!(takes_action(verb), "{verb} should take a sub-verb");
        assert!(!actions_for(verb).is_empty());
    }
}

#[test]
fn unknown_verb_has_no_actions() {
    assert!(!takes_action("FROB"));
    assert!(actions_for("FROB").is_empty());
}

#[test]
fn session_surface_is_complete() {
    let actions = actions_for("SESSION");
    for action in [
        "REGISTER",
        "UNREGISTER",
        "HEARTBEAT",
        "LIST",
        "GET",
        "SEND",
        "SCHEDULE",
        "CANCEL",
        "TASKS",
        "FIND",
        "ATTACH",
        "URL",
    ] {
        assert!(actions.contains(&action), "SESSION missing {action}");
    }
}
