// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `RUN`, `RUN-JSON`, `PROC`, and `DETECT` commands.

use std::collections::HashMap;

use agnt_core::{ErrorCode, ProjectPath, WireError};
use serde::Deserialize;
use serde_json::json;

use crate::facades::resolve_fuzzy;
use crate::protocol::Command;
use crate::supervisor::{
    OutputStream, ProcessConfig, StartOutcome, SupervisorError,
};

use super::{require_action, ConnState, ListenCtx, Reply};

impl From<SupervisorError> for WireError {
    fn from(e: SupervisorError) -> Self {
        match &e {
            SupervisorError::NotFound(_) => WireError::not_found(e.to_string()),
            SupervisorError::EmptyId => WireError::invalid_args(e.to_string()),
            SupervisorError::InvalidPort(_) => WireError::invalid_args(e.to_string()),
            SupervisorError::Spawn { .. } => WireError::internal(e.to_string()),
            SupervisorError::Startup(startup) => WireError::new(
                ErrorCode::InvalidState,
                serde_json::to_string(startup).unwrap_or_else(|_| e.to_string()),
            ),
        }
    }
}

/// Wire shape for `RUN-JSON` payloads.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_path: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub expected_port: Option<u16>,
    /// `background` (default) or `foreground`.
    #[serde(default)]
    pub mode: String,
}

/// `RUN <command> [args...] id=<id> [path=<project>] [mode=background|foreground] [port=N]`
pub(super) async fn handle_run(
    cmd: &Command,
    conn: &ConnState,
    ctx: &ListenCtx,
) -> Result<Reply, WireError> {
    let mut request = RunRequest::default();
    let mut argv: Vec<String> = Vec::new();

    for arg in &cmd.args {
        if let Some(value) = arg.strip_prefix("id=") {
            request.id = value.to_string();
        } else if let Some(value) = arg.strip_prefix("path=") {
            request.project_path = value.to_string();
        } else if let Some(value) = arg.strip_prefix("project=") {
            request.project_path = value.to_string();
        } else if let Some(value) = arg.strip_prefix("mode=") {
            request.mode = value.to_string();
        } else if let Some(value) = arg.strip_prefix("cwd=") {
            request.cwd = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("port=") {
            request.expected_port = value.parse().ok();
        } else if let Some(value) = arg.strip_prefix("env.") {
            if let Some((key, val)) = value.split_once('=') {
                request.env.insert(key.to_string(), val.to_string());
            }
        } else {
            argv.push(arg.clone());
        }
    }

    let mut argv = argv.into_iter();
    request.command = argv
        .next()
        .ok_or_else(|| WireError::missing_param("RUN", "command"))?;
    request.args = argv.collect();

    run(request, conn, ctx).await
}

/// `RUN-JSON -- <json request>`
pub(super) async fn handle_run_json(
    cmd: &Command,
    conn: &ConnState,
    ctx: &ListenCtx,
) -> Result<Reply, WireError> {
    let request: RunRequest = cmd
        .data_json()?
        .ok_or_else(|| WireError::missing_param("RUN-JSON", "request"))?;
    if request.command.is_empty() {
        return Err(WireError::missing_param("RUN-JSON", "command"));
    }
    run(request, conn, ctx).await
}

async fn run(
    mut request: RunRequest,
    conn: &ConnState,
    ctx: &ListenCtx,
) -> Result<Reply, WireError> {
    if request.id.is_empty() {
        return Err(WireError::missing_param("RUN", "id"));
    }
    if request.project_path.is_empty() {
        if let Some(project) = ctx.conn_project(conn) {
            request.project_path = project.into_inner();
        }
    }

    let foreground = request.mode.eq_ignore_ascii_case("foreground");
    let config = ProcessConfig {
        id: request.id,
        project_path: request.project_path,
        command: request.command,
        args: request.args,
        env: request.env,
        cwd: request.cwd,
        expected_port: request.expected_port,
    };

    let outcome = ctx.supervisor.start_or_reuse(config).await?;
    if foreground {
        tokio::select! {
            _ = outcome.process.wait_done() => {}
            _ = ctx.shutdown.notified() => {
                // Shutting down; report what we have.
                ctx.shutdown.notify_one();
            }
        }
    }
    Ok(Reply::Json(outcome_json(&outcome)))
}

fn outcome_json(outcome: &StartOutcome) -> serde_json::Value {
    let mut value = json!({"process": outcome.process.info()});
    value["reused"] = json!(outcome.reused);
    value["cleaned"] = json!(outcome.cleaned);
    value["retried"] = json!(outcome.retried);
    value["port_conflict_resolved"] = json!(outcome.port_conflict_resolved);
    value
}

pub(super) async fn handle_proc(
    cmd: &Command,
    conn: &ConnState,
    ctx: &ListenCtx,
) -> Result<Reply, WireError> {
    let bias = ctx.conn_project(conn);
    match require_action(cmd)? {
        "STATUS" => {
            let id = resolve_id(cmd.require_arg(0, "id")?, ctx, bias.as_ref())?;
            let process = ctx
                .supervisor
                .get(&id, bias.as_ref())
                .ok_or_else(|| WireError::not_found(format!("process not found: {id}")))?;
            Ok(Reply::Json(json!({"process": process.info()})))
        }
        "OUTPUT" => {
            let id = resolve_id(cmd.require_arg(0, "id")?, ctx, bias.as_ref())?;
            let stream = match cmd.arg(1) {
                Some(name) => OutputStream::parse(name).ok_or_else(|| {
                    WireError::invalid_args(format!("unknown stream: {name}"))
                })?,
                None => OutputStream::Combined,
            };
            let process = ctx
                .supervisor
                .get(&id, bias.as_ref())
                .ok_or_else(|| WireError::not_found(format!("process not found: {id}")))?;
            let output = process.output(stream);
            let chunks = if output.is_empty() {
                Vec::new()
            } else {
                vec![output]
            };
            Ok(Reply::Chunks(chunks))
        }
        "STOP" => {
            let id = resolve_id(cmd.require_arg(0, "id")?, ctx, bias.as_ref())?;
            let force = cmd.args.iter().any(|a| a == "force" || a == "--force");
            let process = ctx.supervisor.stop(&id, bias.as_ref(), force).await?;
            Ok(Reply::Json(json!({"process": process.info()})))
        }
        "LIST" => Ok(Reply::Json(json!({"processes": ctx.supervisor.list()}))),
        "CLEANUP-PORT" => {
            let port_arg = cmd.require_arg(0, "port")?;
            let port: u64 = port_arg
                .parse()
                .map_err(|_| WireError::invalid_args(format!("invalid port: {port_arg}")))?;
            let pids = ctx.supervisor.kill_process_by_port(port).await?;
            Ok(Reply::Json(json!({"port": port, "pids": pids})))
        }
        _ => unreachable!("require_action validated the sub-verb"),
    }
}

/// `DETECT [dir]` — project type and scripts for a directory.
pub(super) fn handle_detect(
    cmd: &Command,
    conn: &ConnState,
    ctx: &ListenCtx,
) -> Result<Reply, WireError> {
    let dir = match cmd.arg(0) {
        Some(dir) => ProjectPath::new(dir),
        None => ctx
            .conn_project(conn)
            .ok_or_else(|| WireError::missing_param("DETECT", "dir"))?,
    };
    Ok(Reply::Json(ctx.detector.detect(dir.as_ref())))
}

/// Fuzzy id resolution over supervisor entries. Exact ids pass through.
fn resolve_id(
    partial: &str,
    ctx: &ListenCtx,
    bias: Option<&ProjectPath>,
) -> Result<String, WireError> {
    let entries = ctx.supervisor.entries();
    resolve_fuzzy(&entries, partial, bias)
}
