// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `SESSION` command family.

use agnt_core::{ErrorCode, ProjectPath, WireError};
use serde_json::json;

use crate::protocol::Command;
use crate::scheduler::parse_duration;
use crate::sessions::{RegistryError, SessionConfig, SessionStatus};

use super::{require_action, ConnState, ListenCtx, Reply};

impl From<RegistryError> for WireError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::EmptyCode => WireError::invalid_args(e.to_string()),
            RegistryError::AlreadyExists(_) => WireError::already_exists(e.to_string()),
            RegistryError::NotFound(_) => WireError::not_found(e.to_string()),
        }
    }
}

pub(super) async fn handle_session(
    cmd: &Command,
    conn: &mut ConnState,
    ctx: &ListenCtx,
) -> Result<Reply, WireError> {
    match require_action(cmd)? {
        "REGISTER" => register(cmd, conn, ctx),
        "UNREGISTER" => {
            let code = cmd.require_arg(0, "code")?;
            ctx.registry.unregister(code)?;
            if conn.session_code.as_deref() == Some(code) {
                conn.session_code = None;
                conn.owns_session = false;
            }
            Ok(Reply::Ok(Some(format!("unregistered {code}"))))
        }
        "HEARTBEAT" => {
            let code = cmd.require_arg(0, "code")?;
            ctx.registry.heartbeat(code)?;
            Ok(Reply::Ok(None))
        }
        "LIST" => {
            let (project, global) = scope_args(cmd, conn, ctx);
            let sessions = ctx.registry.list(&project, global);
            Ok(Reply::Json(json!({"sessions": sessions})))
        }
        "GET" => {
            let code = cmd.require_arg(0, "code")?;
            let session = ctx
                .registry
                .get(code)
                .ok_or_else(|| WireError::not_found(format!("session not found: {code}")))?;
            Ok(Reply::Json(json!({"session": session.info()})))
        }
        "SEND" => send(cmd, ctx).await,
        "SCHEDULE" => schedule(cmd, ctx),
        "CANCEL" => {
            let id = cmd.require_arg(0, "task_id")?;
            let task = ctx.scheduler.cancel(id).map_err(scheduler_err)?;
            Ok(Reply::Json(json!({"task": task})))
        }
        "TASKS" => {
            let (project, global) = scope_args(cmd, conn, ctx);
            let tasks = ctx.scheduler.list_tasks(&project, global);
            Ok(Reply::Json(json!({"tasks": tasks})))
        }
        "FIND" => {
            let dir = cmd.require_arg(0, "dir")?;
            let session = ctx
                .registry
                .find_by_directory(dir)
                .ok_or_else(|| WireError::not_found(format!("no session for directory: {dir}")))?;
            Ok(Reply::Json(json!({"session": session.info()})))
        }
        "ATTACH" => {
            let dir = cmd.require_arg(0, "dir")?;
            let session = ctx
                .registry
                .find_by_directory(dir)
                .ok_or_else(|| WireError::not_found(format!("no session for directory: {dir}")))?;
            // Attach only biases lookups; ownership (and teardown cleanup)
            // stays with the registering connection.
            conn.session_code = Some(session.code.as_str().to_string());
            conn.owns_session = false;
            Ok(Reply::Json(json!({"session": session.info()})))
        }
        "URL" => {
            let code = cmd.require_arg(0, "code")?;
            let session = ctx
                .registry
                .get(code)
                .ok_or_else(|| WireError::not_found(format!("session not found: {code}")))?;
            Ok(Reply::Json(json!({
                "code": session.code,
                "overlay_path": session.overlay_path,
                "project_path": session.project_path.to_string(),
            })))
        }
        _ => unreachable!("require_action validated the sub-verb"),
    }
}

/// `SESSION REGISTER <code> [overlay_path] [json|-- payload]`
///
/// A code of `-` asks the registry to generate one from the command name.
fn register(cmd: &Command, conn: &mut ConnState, ctx: &ListenCtx) -> Result<Reply, WireError> {
    let code_arg = cmd.require_arg(0, "code")?.to_string();

    // Config from an inline JSON arg or the payload, args winning over it.
    let mut config: SessionConfig = inline_json(cmd, 2)
        .or_else(|| inline_json(cmd, 1))
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| WireError::invalid_args(format!("invalid session config: {e}")))?
        .or(cmd.data_json()?)
        .unwrap_or_default();

    if let Some(overlay) = cmd.arg(1).filter(|a| !a.starts_with('{')) {
        config.overlay_path = overlay.to_string();
    }
    config.code = if code_arg == "-" {
        let command = if config.command.is_empty() {
            "session"
        } else {
            &config.command
        };
        ctx.registry.generate_session_code(command)
    } else {
        code_arg
    };

    let project = ProjectPath::new(&config.project_path);
    let session = ctx.registry.register(config)?;

    // The registering connection owns the session.
    conn.session_code = Some(session.code.as_str().to_string());
    conn.owns_session = true;

    // Make the project discoverable for scheduler replay on later starts.
    if !project.is_unbound() {
        ctx.state.register_project(&project);
        ctx.scheduler.register_project(&project);
    }

    Ok(Reply::Json(json!({"session": session.info()})))
}

/// `SESSION SEND <code> [text...]` (or text in the payload)
async fn send(cmd: &Command, ctx: &ListenCtx) -> Result<Reply, WireError> {
    let code = cmd.require_arg(0, "code")?;
    let session = ctx
        .registry
        .get(code)
        .ok_or_else(|| WireError::not_found(format!("session not found: {code}")))?;
    if session.status() != SessionStatus::Active {
        return Err(WireError::invalid_state(format!(
            "session is disconnected: {code}"
        )));
    }

    let message = message_from(cmd, 1)?;
    crate::overlay::post_text(&session.overlay_path, &message)
        .await
        .map_err(|e| WireError::internal(format!("overlay delivery failed: {e}")))?;
    Ok(Reply::Ok(None))
}

/// `SESSION SCHEDULE <code> <duration> [message...]` (or message payload)
fn schedule(cmd: &Command, ctx: &ListenCtx) -> Result<Reply, WireError> {
    let code = cmd.require_arg(0, "code")?;
    let duration = cmd.require_arg(1, "duration")?;
    let delay = parse_duration(duration)
        .ok_or_else(|| WireError::invalid_args(format!("invalid duration: {duration}")))?;

    let session = ctx
        .registry
        .get(code)
        .ok_or_else(|| WireError::not_found(format!("session not found: {code}")))?;

    let message = message_from(cmd, 2)?;
    let task = ctx
        .scheduler
        .schedule(code, delay, &message, &session.project_path)
        .map_err(scheduler_err)?;

    Ok(Reply::Json(json!({
        "task_id": task.id,
        "deliver_at_ms": task.deliver_at_ms,
        "status": task.status,
    })))
}

fn scheduler_err(e: crate::scheduler::SchedulerError) -> WireError {
    use crate::scheduler::SchedulerError;
    match e {
        SchedulerError::NotFound(_) => WireError::not_found(e.to_string()),
        SchedulerError::NotPending(_) => WireError::invalid_state(e.to_string()),
        SchedulerError::EmptyMessage => WireError::new(ErrorCode::MissingParam, e.to_string()),
    }
}

/// Message text: the payload when present, else the remaining args joined.
fn message_from(cmd: &Command, from_arg: usize) -> Result<String, WireError> {
    if cmd.data.is_some() {
        return cmd.require_data_utf8("message");
    }
    let joined = cmd.args[from_arg.min(cmd.args.len())..].join(" ");
    if joined.is_empty() {
        return Err(WireError::missing_param(&cmd.display_name(), "message"));
    }
    Ok(joined)
}

/// `[project] [global]` scope arguments, defaulting to the connection's
/// session project.
fn scope_args(cmd: &Command, conn: &ConnState, ctx: &ListenCtx) -> (ProjectPath, bool) {
    let global = cmd
        .args
        .iter()
        .any(|a| a == "global" || a == "--global");
    let project = cmd
        .args
        .iter()
        .find(|a| *a != "global" && *a != "--global")
        .map(|a| ProjectPath::new(a))
        .or_else(|| ctx.conn_project(conn))
        .unwrap_or_default();
    (project, global)
}

fn inline_json(cmd: &Command, idx: usize) -> Option<serde_json::Value> {
    cmd.arg(idx)
        .filter(|a| a.starts_with('{'))
        .and_then(|a| serde_json::from_str(a).ok())
}
