// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::facades::{ChaosState, FsDetector, LocalProxyManager, LocalTunnelManager, NoopAutomation};
use crate::protocol::{read_response, Response};
use crate::scheduler::Scheduler;
use crate::sessions::SessionRegistry;
use crate::supervisor::{ProcessState, ProcessSupervisor};
use agnt_core::ErrorCode;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

fn test_ctx(dir: &TempDir) -> Arc<ListenCtx> {
    test_ctx_with_heartbeat(dir, Duration::from_secs(60))
}

fn test_ctx_with_heartbeat(dir: &TempDir, heartbeat: Duration) -> Arc<ListenCtx> {
    let overlay = Arc::new(OverlayEndpoint::new(None));
    let state = Arc::new(StateStore::open(dir.path().join("state.json")));
    let supervisor = Arc::new(
        ProcessSupervisor::new(64 * 1024, Duration::from_secs(2))
            .with_observation(Duration::from_millis(100), Duration::from_millis(10)),
    );
    Arc::new(ListenCtx::new(
        Arc::new(SessionRegistry::new(heartbeat)),
        supervisor,
        Arc::new(Scheduler::new()),
        Arc::new(LocalProxyManager::new(Arc::clone(&overlay), Arc::clone(&state))),
        Arc::new(crate::facades::ProxyLogStore::new(100)),
        Arc::new(PageSessionStore::new()),
        Arc::new(LocalTunnelManager::new()),
        Arc::new(ChaosState::new()),
        Arc::new(NoopAutomation::new()),
        Arc::new(FsDetector::new()),
        overlay,
        state,
        Arc::new(Notify::new()),
        8,
    ))
}

fn new_conn() -> ConnState {
    ConnState {
        id: 1,
        session_code: None,
        owns_session: false,
    }
}

async fn send(
    line: &str,
    conn: &mut ConnState,
    ctx: &Arc<ListenCtx>,
) -> Result<Reply, WireError> {
    let framed = format!("{line}\n");
    let mut reader = tokio::io::BufReader::new(framed.as_bytes());
    let cmd = protocol::read_command(&mut reader)
        .await
        .expect("parse")
        .expect("command");
    dispatch(cmd, conn, ctx).await
}

fn as_json(reply: Reply) -> serde_json::Value {
    match reply {
        Reply::Json(value) => value,
        other => panic!(
            "expected JSON reply, got {}",
            match other {
                Reply::Ok(_) => "OK",
                Reply::Pong => "PONG",
                Reply::Chunks(_) => "CHUNKS",
                Reply::Json(_) => unreachable!(),
            }
        ),
    }
}

#[tokio::test]
async fn ping_pongs() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let reply = send("PING", &mut new_conn(), &ctx).await.unwrap();
    assert!(matches!(reply, Reply::Pong));
}

#[tokio::test]
async fn unknown_verb_lists_valid_commands() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let err = send("FROBNICATE", &mut new_conn(), &ctx).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCommand);
    let payload = err.structured().unwrap();
    assert_eq!(payload.command.as_deref(), Some("FROBNICATE"));
    assert!(payload.valid_actions.contains(&"SESSION".to_string()));
}

#[tokio::test]
async fn unknown_action_lists_valid_actions() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let err = send("PROC FROB x", &mut new_conn(), &ctx).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidAction);
    let payload = err.structured().unwrap();
    assert_eq!(payload.command.as_deref(), Some("PROC"));
    assert_eq!(payload.action.as_deref(), Some("FROB"));
    assert!(payload.valid_actions.contains(&"STATUS".to_string()));
}

#[tokio::test]
async fn missing_action_is_missing_param() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let err = send("SESSION", &mut new_conn(), &ctx).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingParam);
}

#[tokio::test]
async fn info_reports_counters() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let info = as_json(send("INFO", &mut new_conn(), &ctx).await.unwrap());

    assert!(info["version"].is_string());
    assert!(info["uptime_secs"].is_u64());
    assert_eq!(info["sessions"]["active_count"], 0);
    assert_eq!(info["processes"]["total_started"], 0);
    assert_eq!(info["scheduler"]["pending"], 0);
    assert_eq!(info["connections"]["max_clients"], 8);
}

#[tokio::test]
async fn session_register_get_unregister_flow() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut conn = new_conn();

    let reply = send(
        r#"SESSION REGISTER sess1 /tmp/ovl.sock {"project_path":"/p1","command":"claude"}"#,
        &mut conn,
        &ctx,
    )
    .await
    .unwrap();
    let session = as_json(reply);
    assert_eq!(session["session"]["code"], "sess1");
    assert_eq!(session["session"]["project_path"], "/p1");
    assert_eq!(session["session"]["overlay_path"], "/tmp/ovl.sock");
    assert_eq!(session["session"]["status"], "active");

    // Registration binds and owns the session on this connection
    assert_eq!(conn.session_code.as_deref(), Some("sess1"));
    assert!(conn.owns_session);

    let got = as_json(send("SESSION GET sess1", &mut conn, &ctx).await.unwrap());
    assert_eq!(got["session"]["command"], "claude");

    // Duplicate code rejected
    let err = send("SESSION REGISTER sess1 /tmp/x.sock", &mut conn, &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);

    send("SESSION UNREGISTER sess1", &mut conn, &ctx).await.unwrap();
    assert!(conn.session_code.is_none());
    let err = send("SESSION GET sess1", &mut conn, &ctx).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn session_register_generates_codes() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);

    let reply = send(
        r#"SESSION REGISTER - /tmp/o.sock {"command":"claude"}"#,
        &mut new_conn(),
        &ctx,
    )
    .await
    .unwrap();
    assert_eq!(as_json(reply)["session"]["code"], "claude-1");

    let reply = send(
        r#"SESSION REGISTER - /tmp/o.sock {"command":"claude"}"#,
        &mut new_conn(),
        &ctx,
    )
    .await
    .unwrap();
    assert_eq!(as_json(reply)["session"]["code"], "claude-2");
}

#[tokio::test]
async fn session_find_honors_directory_ancestry() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut conn = new_conn();
    send(
        r#"SESSION REGISTER sess1 /tmp/o.sock {"project_path":"/home/u/p"}"#,
        &mut conn,
        &ctx,
    )
    .await
    .unwrap();

    let found = as_json(
        send("SESSION FIND /home/u/p/src/x", &mut conn, &ctx)
            .await
            .unwrap(),
    );
    assert_eq!(found["session"]["code"], "sess1");

    let err = send("SESSION FIND /home/u/p-backup", &mut conn, &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn session_send_to_disconnected_session_is_invalid_state() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx_with_heartbeat(&dir, Duration::from_millis(10));
    let mut conn = new_conn();
    send(
        r#"SESSION REGISTER sess1 /tmp/missing-ovl.sock {"project_path":"/p1"}"#,
        &mut conn,
        &ctx,
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    ctx.registry.check_heartbeats();

    let err = send("SESSION SEND sess1 hello", &mut conn, &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);

    // Heartbeat revives it; delivery then fails on the missing overlay
    // socket instead (internal, not invalid_state).
    send("SESSION HEARTBEAT sess1", &mut conn, &ctx).await.unwrap();
    let err = send("SESSION SEND sess1 hello", &mut conn, &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
}

#[tokio::test]
async fn schedule_tasks_and_cancel() {
    let dir = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut conn = new_conn();
    send(
        &format!(
            r#"SESSION REGISTER sess1 /tmp/o.sock {{"project_path":"{}"}}"#,
            project.path().display()
        ),
        &mut conn,
        &ctx,
    )
    .await
    .unwrap();

    let scheduled = as_json(
        send("SESSION SCHEDULE sess1 1h reminder text", &mut conn, &ctx)
            .await
            .unwrap(),
    );
    let task_id = scheduled["task_id"].as_str().unwrap().to_string();
    assert_eq!(scheduled["status"], "pending");

    let tasks = as_json(send("SESSION TASKS", &mut conn, &ctx).await.unwrap());
    assert_eq!(tasks["tasks"].as_array().unwrap().len(), 1);
    assert_eq!(tasks["tasks"][0]["message"], "reminder text");

    let cancelled = as_json(
        send(&format!("SESSION CANCEL {task_id}"), &mut conn, &ctx)
            .await
            .unwrap(),
    );
    assert_eq!(cancelled["task"]["status"], "cancelled");

    let err = send(&format!("SESSION CANCEL {task_id}"), &mut conn, &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn schedule_with_bad_duration_is_invalid_args() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut conn = new_conn();
    send(
        r#"SESSION REGISTER sess1 /tmp/o.sock {"project_path":"/p1"}"#,
        &mut conn,
        &ctx,
    )
    .await
    .unwrap();

    let err = send("SESSION SCHEDULE sess1 soon hello", &mut conn, &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgs);
}

#[tokio::test]
async fn store_is_scoped_to_the_sessions_project() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);

    let mut conn_a = new_conn();
    send(
        r#"SESSION REGISTER a /tmp/o.sock {"project_path":"/p1"}"#,
        &mut conn_a,
        &ctx,
    )
    .await
    .unwrap();
    let mut conn_b = new_conn();
    send(
        r#"SESSION REGISTER b /tmp/o.sock {"project_path":"/p2"}"#,
        &mut conn_b,
        &ctx,
    )
    .await
    .unwrap();

    send("STORE SET theme dark", &mut conn_a, &ctx).await.unwrap();

    let value = as_json(send("STORE GET theme", &mut conn_a, &ctx).await.unwrap());
    assert_eq!(value, serde_json::json!("dark"));

    // Sibling project does not see it
    let err = send("STORE GET theme", &mut conn_b, &ctx).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    let keys = as_json(send("STORE LIST", &mut conn_a, &ctx).await.unwrap());
    assert_eq!(keys["keys"], serde_json::json!(["theme"]));
}

#[tokio::test]
async fn proc_cleanup_port_validates_bounds() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);

    for port in ["0", "65536", "70000"] {
        let err = send(&format!("PROC CLEANUP-PORT {port}"), &mut new_conn(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgs, "port {port}");
    }

    let err = send("PROC CLEANUP-PORT nope", &mut new_conn(), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgs);
}

#[tokio::test]
async fn run_and_proc_lifecycle() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut conn = new_conn();

    let started = as_json(
        send("RUN sleep 30 id=proc1 path=/p1 mode=background", &mut conn, &ctx)
            .await
            .unwrap(),
    );
    assert_eq!(started["process"]["id"], "proc1");
    assert_eq!(started["process"]["state"], "running");
    assert_eq!(started["reused"], false);

    // Idempotent restart
    let again = as_json(
        send("RUN sleep 30 id=proc1 path=/p1 mode=background", &mut conn, &ctx)
            .await
            .unwrap(),
    );
    assert_eq!(again["reused"], true);

    let listed = as_json(send("PROC LIST", &mut conn, &ctx).await.unwrap());
    assert_eq!(listed["processes"].as_array().unwrap().len(), 1);

    let status = as_json(send("PROC STATUS proc1", &mut conn, &ctx).await.unwrap());
    assert_eq!(status["process"]["state"], "running");

    let stopped = as_json(send("PROC STOP proc1 force", &mut conn, &ctx).await.unwrap());
    assert_eq!(stopped["process"]["state"], "stopped");
}

#[tokio::test]
async fn foreground_run_waits_for_exit() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let done = as_json(
        send(
            "RUN sh -c true id=once path=/p1 mode=foreground",
            &mut new_conn(),
            &ctx,
        )
        .await
        .unwrap(),
    );
    assert_eq!(done["process"]["state"], "stopped");
    assert_eq!(done["process"]["exit_code"], 0);
}

#[tokio::test]
async fn proc_output_returns_chunks() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut conn = new_conn();

    send("RUN echo hello-output id=say path=/p1 mode=foreground", &mut conn, &ctx)
        .await
        .unwrap();

    let reply = send("PROC OUTPUT say stdout", &mut conn, &ctx).await.unwrap();
    match reply {
        Reply::Chunks(chunks) => {
            let text = String::from_utf8(chunks.concat()).unwrap();
            assert!(text.contains("hello-output"));
        }
        _ => panic!("expected chunks"),
    }
}

#[tokio::test]
async fn overlay_set_get_clear_persists() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut conn = new_conn();

    send("OVERLAY SET /tmp/ovl.sock", &mut conn, &ctx).await.unwrap();
    let got = as_json(send("OVERLAY GET", &mut conn, &ctx).await.unwrap());
    assert_eq!(got["endpoint"], "/tmp/ovl.sock");
    assert_eq!(ctx.state.overlay_endpoint(), Some("/tmp/ovl.sock".into()));

    send("OVERLAY ACTIVITY", &mut conn, &ctx).await.unwrap();
    let got = as_json(send("OVERLAY GET", &mut conn, &ctx).await.unwrap());
    assert!(got["last_activity_ms"].as_u64().unwrap() > 0);

    send("OVERLAY CLEAR", &mut conn, &ctx).await.unwrap();
    assert_eq!(ctx.state.overlay_endpoint(), None);
}

#[tokio::test]
async fn proxy_commands_flow_through_the_facade() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut conn = new_conn();
    send(
        r#"SESSION REGISTER s /tmp/o.sock {"project_path":"/p1"}"#,
        &mut conn,
        &ctx,
    )
    .await
    .unwrap();

    send("PROXY START px-dev", &mut conn, &ctx).await.unwrap();

    // Fuzzy resolution picks up the session-scoped entry
    let status = as_json(send("PROXY STATUS px", &mut conn, &ctx).await.unwrap());
    assert_eq!(status["status"], "running");
    assert_eq!(status["project_path"], "/p1");

    let listed = as_json(send("PROXY LIST", &mut conn, &ctx).await.unwrap());
    assert_eq!(listed["proxies"].as_array().unwrap().len(), 1);

    send("PROXY STOP px-dev", &mut conn, &ctx).await.unwrap();
    let err = send("PROXY STATUS px-dev", &mut conn, &ctx).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn chaos_commands_flow_through_the_controller() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut conn = new_conn();

    send("CHAOS ENABLE", &mut conn, &ctx).await.unwrap();
    let status = as_json(send("CHAOS STATUS", &mut conn, &ctx).await.unwrap());
    assert_eq!(status["enabled"], true);

    let presets = as_json(send("CHAOS LIST-PRESETS", &mut conn, &ctx).await.unwrap());
    assert!(!presets["presets"].as_array().unwrap().is_empty());

    send("CHAOS PRESET flaky-network", &mut conn, &ctx).await.unwrap();
    send("CHAOS CLEAR", &mut conn, &ctx).await.unwrap();
    let status = as_json(send("CHAOS STATUS", &mut conn, &ctx).await.unwrap());
    assert_eq!(status["enabled"], false);
}

#[tokio::test]
async fn automate_without_processor_is_invalid_state() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut reader = tokio::io::BufReader::new(&b"AUTOMATE PROCESS -- 2\n{}"[..]);
    let cmd = protocol::read_command(&mut reader).await.unwrap().unwrap();
    let err = dispatch(cmd, &mut new_conn(), &ctx).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
}

struct TestClient {
    reader: tokio::io::BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(ctx: &Arc<ListenCtx>) -> Self {
        let (client, server) = UnixStream::pair().unwrap();
        let ctx = Arc::clone(ctx);
        tokio::spawn(async move {
            handle_connection(server, &ctx).await;
        });
        let (read_half, writer) = client.into_split();
        Self {
            reader: tokio::io::BufReader::new(read_half),
            writer,
        }
    }

    async fn request(&mut self, line: &str) -> Response {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
        read_response(&mut self.reader).await.unwrap()
    }
}

#[tokio::test]
async fn closing_a_registering_connection_cleans_up_its_session() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);

    // Client A registers a session in /p1 and starts proc1 there
    let mut client_a = TestClient::connect(&ctx).await;
    client_a
        .request(r#"SESSION REGISTER sess1 /tmp/ovl.sock {"project_path":"/p1"}"#)
        .await;
    client_a
        .request("RUN sleep 100 id=proc1 path=/p1 mode=background")
        .await;

    // Client B starts proc2 in /p2
    let mut client_b = TestClient::connect(&ctx).await;
    client_b
        .request("RUN sleep 100 id=proc2 path=/p2 mode=background")
        .await;

    let proc1 = ctx.supervisor.get("proc1", None).unwrap();
    assert_eq!(proc1.state(), ProcessState::Running);

    // Drop A's connection; its session and processes go away
    drop(client_a);
    proc1.wait_done().await;
    assert_eq!(proc1.state(), ProcessState::Stopped);
    assert!(ctx.registry.get("sess1").is_none());

    // B's process is untouched
    let proc2 = ctx.supervisor.get("proc2", None).unwrap();
    assert_eq!(proc2.state(), ProcessState::Running);

    client_b.request("PROC STOP proc2 force").await;
}

#[tokio::test]
async fn shutdown_command_acknowledges_then_notifies() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut client = TestClient::connect(&ctx).await;

    let notified = {
        let shutdown = Arc::clone(&ctx.shutdown);
        tokio::spawn(async move { shutdown.notified().await })
    };

    let resp = client.request("SHUTDOWN").await;
    assert!(matches!(resp, Response::Ok { .. }));

    tokio::time::timeout(Duration::from_secs(1), notified)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn parser_errors_keep_the_connection_alive() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut client = TestClient::connect(&ctx).await;

    // Malformed payload length is a recoverable parse error
    let resp = client.request("SESSION SEND s -- nope").await;
    assert!(matches!(
        resp,
        Response::Err {
            code: ErrorCode::InvalidArgs,
            ..
        }
    ));

    // The same connection still serves commands
    let resp = client.request("PING").await;
    assert_eq!(resp, Response::Pong);
}
