// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task: accepts connections and dispatches commands.
//!
//! One spawned task per accepted connection, bounded by `max_clients`. A
//! connection that registered a session owns it: when the connection goes
//! away, the session's processes and proxies are stopped and the session is
//! unregistered, so a crashed client never leaves resources behind.

mod facade_cmds;
mod proc_cmds;
mod session_cmds;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use agnt_core::{ProjectPath, WireError};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::facades::{
    Automation, ChaosController, PageSessionStore, ProjectDetector, ProxyLogStore, ProxyManager,
    TunnelManager,
};
use crate::overlay::OverlayEndpoint;
use crate::protocol::{self, Command, ProtocolError};
use crate::scheduler::Scheduler;
use crate::sessions::SessionRegistry;
use crate::state::StateStore;
use crate::supervisor::ProcessSupervisor;

/// Shared daemon context for all request handlers.
pub struct ListenCtx {
    pub registry: Arc<SessionRegistry>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub scheduler: Arc<Scheduler>,
    pub proxies: Arc<dyn ProxyManager>,
    pub proxy_logs: Arc<ProxyLogStore>,
    pub pages: Arc<PageSessionStore>,
    pub tunnels: Arc<dyn TunnelManager>,
    pub chaos: Arc<dyn ChaosController>,
    pub automation: Arc<dyn Automation>,
    pub detector: Arc<dyn ProjectDetector>,
    pub overlay: Arc<OverlayEndpoint>,
    pub state: Arc<StateStore>,
    pub start_time: Instant,
    pub shutdown: Arc<Notify>,
    pub max_clients: usize,
    pub connections: AtomicU64,
    next_conn_id: AtomicU64,
}

impl ListenCtx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SessionRegistry>,
        supervisor: Arc<ProcessSupervisor>,
        scheduler: Arc<Scheduler>,
        proxies: Arc<dyn ProxyManager>,
        proxy_logs: Arc<ProxyLogStore>,
        pages: Arc<PageSessionStore>,
        tunnels: Arc<dyn TunnelManager>,
        chaos: Arc<dyn ChaosController>,
        automation: Arc<dyn Automation>,
        detector: Arc<dyn ProjectDetector>,
        overlay: Arc<OverlayEndpoint>,
        state: Arc<StateStore>,
        shutdown: Arc<Notify>,
        max_clients: usize,
    ) -> Self {
        Self {
            registry,
            supervisor,
            scheduler,
            proxies,
            proxy_logs,
            pages,
            tunnels,
            chaos,
            automation,
            detector,
            overlay,
            state,
            start_time: Instant::now(),
            shutdown,
            max_clients,
            connections: AtomicU64::new(0),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// The project scope of a connection's bound session, if any.
    fn conn_project(&self, conn: &ConnState) -> Option<ProjectPath> {
        let code = conn.session_code.as_deref()?;
        self.registry.get(code).map(|s| s.project_path.clone())
    }
}

/// Per-connection state.
pub struct ConnState {
    pub id: u64,
    /// Session this connection is bound to (REGISTER or ATTACH).
    pub session_code: Option<String>,
    /// Registered (owned) sessions are cleaned up on teardown; attached
    /// sessions only bias lookups.
    pub owns_session: bool,
}

/// A successful handler result, ready to be framed.
#[derive(Debug)]
pub enum Reply {
    Ok(Option<String>),
    Pong,
    Json(serde_json::Value),
    Chunks(Vec<Vec<u8>>),
}

/// Listener task for accepting socket connections.
pub struct Listener {
    socket: UnixListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(socket: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { socket, ctx }
    }

    /// Accept loop; runs until the daemon shuts down.
    pub async fn run(self) {
        let semaphore = Arc::new(Semaphore::new(self.ctx.max_clients));
        loop {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            match self.socket.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        ctx.connections.fetch_add(1, Ordering::SeqCst);
                        handle_connection(stream, &ctx).await;
                        ctx.connections.fetch_sub(1, Ordering::SeqCst);
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Serve one client connection until it closes or poisons its stream.
pub async fn handle_connection(stream: UnixStream, ctx: &Arc<ListenCtx>) {
    let conn_id = ctx.next_conn_id.fetch_add(1, Ordering::SeqCst);
    let mut conn = ConnState {
        id: conn_id,
        session_code: None,
        owns_session: false,
    };
    debug!(conn = conn_id, "client connected");

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        match protocol::read_command(&mut reader).await {
            Ok(Some(cmd)) => {
                debug!(conn = conn_id, verb = %cmd.verb, action = ?cmd.action, "command");

                // SHUTDOWN acknowledges before stopping anything.
                if cmd.verb == "SHUTDOWN" {
                    let _ = protocol::write_ok(&mut write_half, Some("shutting down")).await;
                    info!(conn = conn_id, "shutdown requested");
                    ctx.shutdown.notify_one();
                    continue;
                }

                let written = match dispatch(cmd, &mut conn, ctx).await {
                    Ok(Reply::Ok(message)) => {
                        protocol::write_ok(&mut write_half, message.as_deref()).await
                    }
                    Ok(Reply::Pong) => protocol::write_pong(&mut write_half).await,
                    Ok(Reply::Json(value)) => protocol::write_json(&mut write_half, &value).await,
                    Ok(Reply::Chunks(chunks)) => {
                        protocol::write_chunks(&mut write_half, &chunks).await
                    }
                    Err(err) => protocol::write_err(&mut write_half, &err).await,
                };
                if written.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(conn = conn_id, "client disconnected");
                break;
            }
            Err(e) if e.is_recoverable() => {
                // Parser errors: report and keep reading the next command.
                if protocol::write_err(&mut write_half, &e.to_wire()).await.is_err() {
                    break;
                }
            }
            Err(e @ (ProtocolError::LineTooLong { .. } | ProtocolError::PayloadTooLarge { .. })) => {
                // Over-limit input: framing is lost, report and close.
                let _ = protocol::write_err(&mut write_half, &e.to_wire()).await;
                break;
            }
            Err(ProtocolError::ConnectionClosed) => break,
            Err(e) => {
                warn!(conn = conn_id, error = %e, "connection error");
                break;
            }
        }
    }

    // Teardown: a connection that registered a session takes its resources
    // down with it.
    if conn.owns_session {
        if let Some(code) = conn.session_code.take() {
            cleanup_session_resources(ctx, &code).await;
        }
    }
}

/// Stop every process and proxy scoped to the session's project, then
/// unregister the session itself.
pub async fn cleanup_session_resources(ctx: &ListenCtx, code: &str) {
    let Some(session) = ctx.registry.get(code) else {
        return;
    };
    let project = session.project_path.clone();

    if !project.is_unbound() {
        let stopped = ctx.supervisor.stop_by_project_path(&project).await;
        if !stopped.is_empty() {
            info!(session = code, processes = stopped.len(), "stopped session processes");
        }
        let proxies = ctx.proxies.stop_by_project(&project).await;
        if !proxies.is_empty() {
            info!(session = code, proxies = proxies.len(), "stopped session proxies");
        }
        let tunnels = ctx.tunnels.stop_by_project(&project).await;
        if !tunnels.is_empty() {
            info!(session = code, tunnels = tunnels.len(), "stopped session tunnels");
        }
    }

    match ctx.registry.unregister(code) {
        Ok(_) => info!(session = code, "session cleaned up"),
        Err(e) => warn!(session = code, error = %e, "session cleanup failed"),
    }
}

/// Route one command to its handler.
pub async fn dispatch(
    cmd: Command,
    conn: &mut ConnState,
    ctx: &ListenCtx,
) -> Result<Reply, WireError> {
    match cmd.verb.as_str() {
        "PING" => Ok(Reply::Pong),
        "INFO" => Ok(Reply::Json(info_payload(ctx))),
        "DETECT" => proc_cmds::handle_detect(&cmd, conn, ctx),
        "RUN" => proc_cmds::handle_run(&cmd, conn, ctx).await,
        "RUN-JSON" => proc_cmds::handle_run_json(&cmd, conn, ctx).await,
        "PROC" => proc_cmds::handle_proc(&cmd, conn, ctx).await,
        "SESSION" => session_cmds::handle_session(&cmd, conn, ctx).await,
        "OVERLAY" => facade_cmds::handle_overlay(&cmd, ctx),
        "PROXY" => facade_cmds::handle_proxy(&cmd, conn, ctx).await,
        "PROXYLOG" => facade_cmds::handle_proxylog(&cmd, ctx),
        "CURRENTPAGE" => facade_cmds::handle_currentpage(&cmd, ctx),
        "TUNNEL" => facade_cmds::handle_tunnel(&cmd, conn, ctx).await,
        "CHAOS" => facade_cmds::handle_chaos(&cmd, ctx),
        "STORE" => facade_cmds::handle_store(&cmd, conn, ctx),
        "AUTOMATE" => facade_cmds::handle_automate(&cmd, ctx).await,
        other => Err(WireError::unknown_command(other, &protocol::verb_names())),
    }
}

/// Resolve the sub-verb for a grouped command, with a structured error for
/// unknown or missing actions.
fn require_action<'a>(cmd: &'a Command) -> Result<&'a str, WireError> {
    let action = cmd
        .action
        .as_deref()
        .ok_or_else(|| WireError::missing_param(&cmd.verb, "action"))?;
    if !protocol::actions_for(&cmd.verb).contains(&action) {
        return Err(WireError::unknown_action(
            &cmd.verb,
            action,
            protocol::actions_for(&cmd.verb),
        ));
    }
    Ok(action)
}

fn info_payload(ctx: &ListenCtx) -> serde_json::Value {
    serde_json::json!({
        "version": protocol::PROTOCOL_VERSION,
        "uptime_secs": ctx.start_time.elapsed().as_secs(),
        "sessions": ctx.registry.counters(),
        "processes": ctx.supervisor.counters(),
        "scheduler": ctx.scheduler.counters(),
        "connections": {
            "current": ctx.connections.load(Ordering::SeqCst),
            "max_clients": ctx.max_clients,
        },
        "overlay": {
            "endpoint": ctx.overlay.get(),
            "last_activity_ms": ctx.overlay.last_activity_ms(),
        },
    })
}

#[cfg(test)]
#[path = "../listener_tests.rs"]
mod tests;
