//! Session registry behavior: registration, directory lookup, teardown.

use crate::prelude::*;

#[test]
fn register_and_find_by_directory_ancestry() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    conn.request(r#"SESSION REGISTER sess1 /tmp/ovl.sock {"project_path":"/home/u/p"}"#)
        .json();

    let found = conn.request("SESSION FIND /home/u/p/src/x");
    assert_eq!(found.json()["session"]["code"], "sess1");

    // Component-wise, not string-prefix
    assert_eq!(
        conn.request("SESSION FIND /home/u/p-backup").err_code(),
        "not_found"
    );
}

#[test]
fn duplicate_registration_is_rejected() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    conn.request(r#"SESSION REGISTER sess1 /tmp/a.sock {"project_path":"/p1"}"#)
        .json();
    let dup = conn.request(r#"SESSION REGISTER sess1 /tmp/b.sock {"project_path":"/p2"}"#);
    assert_eq!(dup.err_code(), "already_exists");
}

#[test]
fn generated_codes_count_upward() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    let first = conn.request(r#"SESSION REGISTER - /tmp/a.sock {"command":"claude"}"#);
    assert_eq!(first.json()["session"]["code"], "claude-1");

    let mut other = daemon.connect();
    let second = other.request(r#"SESSION REGISTER - /tmp/b.sock {"command":"claude"}"#);
    assert_eq!(second.json()["session"]["code"], "claude-2");
}

#[test]
fn closing_the_owning_connection_cleans_up_session_resources() {
    let daemon = Daemon::start();

    // Client A: session + process in /p1
    let mut client_a = daemon.connect();
    client_a
        .request(r#"SESSION REGISTER sess1 /tmp/ovl.sock {"project_path":"/p1"}"#)
        .json();
    client_a.request("RUN sleep 100 id=proc1 path=/p1 mode=background");

    // Client B: process in /p2, no session
    let mut client_b = daemon.connect();
    client_b.request("RUN sleep 100 id=proc2 path=/p2 mode=background");

    // Close A; its process stops and the session goes away
    drop(client_a);

    let mut observer = daemon.connect();
    wait_until("proc1 stopped after owner disconnect", || {
        let status = observer.request("PROC STATUS proc1");
        status.json()["process"]["state"] == "stopped"
    });
    assert_eq!(
        observer.request("SESSION GET sess1").err_code(),
        "not_found"
    );

    // B's process is untouched
    let proc2 = observer.request("PROC STATUS proc2");
    assert_eq!(proc2.json()["process"]["state"], "running");
}

#[test]
fn session_list_scopes_by_project() {
    let daemon = Daemon::start();

    let mut conn_a = daemon.connect();
    conn_a
        .request(r#"SESSION REGISTER a /tmp/a.sock {"project_path":"/p1"}"#)
        .json();
    let mut conn_b = daemon.connect();
    conn_b
        .request(r#"SESSION REGISTER b /tmp/b.sock {"project_path":"/p2"}"#)
        .json();

    let scoped = conn_a.request("SESSION LIST /p1");
    let sessions = scoped.json()["sessions"].as_array().unwrap().clone();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["code"], "a");

    let all = conn_a.request("SESSION LIST global");
    assert_eq!(all.json()["sessions"].as_array().unwrap().len(), 2);
}
