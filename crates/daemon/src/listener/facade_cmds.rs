// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Facade command families: `OVERLAY`, `PROXY`, `PROXYLOG`, `CURRENTPAGE`,
//! `TUNNEL`, `CHAOS`, `STORE`, and `AUTOMATE`.

use std::time::Duration;

use agnt_core::{ProjectPath, WireError};
use serde_json::{json, Value};

use crate::facades::resolve_fuzzy;
use crate::protocol::Command;

use super::{require_action, ConnState, ListenCtx, Reply};

/// Cap on `PROXY EXEC` script execution.
const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

pub(super) fn handle_overlay(cmd: &Command, ctx: &ListenCtx) -> Result<Reply, WireError> {
    match require_action(cmd)? {
        "SET" => {
            let endpoint = cmd.require_arg(0, "endpoint")?.to_string();
            ctx.overlay.set(endpoint.clone());
            ctx.state.set_overlay_endpoint(Some(endpoint));
            Ok(Reply::Ok(None))
        }
        "GET" => Ok(Reply::Json(json!({
            "endpoint": ctx.overlay.get(),
            "last_activity_ms": ctx.overlay.last_activity_ms(),
        }))),
        "CLEAR" => {
            ctx.overlay.clear();
            ctx.state.set_overlay_endpoint(None);
            Ok(Reply::Ok(None))
        }
        "ACTIVITY" => {
            ctx.overlay.touch_activity();
            Ok(Reply::Ok(None))
        }
        _ => unreachable!("require_action validated the sub-verb"),
    }
}

pub(super) async fn handle_proxy(
    cmd: &Command,
    conn: &ConnState,
    ctx: &ListenCtx,
) -> Result<Reply, WireError> {
    let bias = ctx.conn_project(conn);
    match require_action(cmd)? {
        "START" => {
            let id = cmd.require_arg(0, "id")?;
            let config: Value = cmd.data_json()?.unwrap_or_else(|| json!({}));
            let project = config
                .get("project_path")
                .and_then(|v| v.as_str())
                .map(ProjectPath::new)
                .or_else(|| bias.clone())
                .unwrap_or_default();
            Ok(Reply::Json(ctx.proxies.start(id, &project, config).await?))
        }
        "STOP" => {
            let id = resolve(ctx.proxies.entries(), cmd.require_arg(0, "id")?, &bias)?;
            Ok(Reply::Json(ctx.proxies.stop(&id).await?))
        }
        "STATUS" => {
            let id = resolve(ctx.proxies.entries(), cmd.require_arg(0, "id")?, &bias)?;
            Ok(Reply::Json(ctx.proxies.status(&id).await?))
        }
        "LIST" => Ok(Reply::Json(json!({"proxies": ctx.proxies.list().await}))),
        "EXEC" => {
            let id = resolve(ctx.proxies.entries(), cmd.require_arg(0, "id")?, &bias)?;
            let script = script_or_args(cmd, 1)?;
            match tokio::time::timeout(EXEC_TIMEOUT, ctx.proxies.exec(&id, &script)).await {
                Ok(result) => Ok(Reply::Json(result?)),
                Err(_) => Err(WireError::timeout("proxy exec timed out")),
            }
        }
        "TOAST" => {
            let id = resolve(ctx.proxies.entries(), cmd.require_arg(0, "id")?, &bias)?;
            let message = script_or_args(cmd, 1)?;
            ctx.proxies.toast(&id, &message).await?;
            Ok(Reply::Ok(None))
        }
        _ => unreachable!("require_action validated the sub-verb"),
    }
}

pub(super) fn handle_proxylog(cmd: &Command, ctx: &ListenCtx) -> Result<Reply, WireError> {
    match require_action(cmd)? {
        "QUERY" => {
            let limit = match cmd.arg(0) {
                Some(raw) => raw
                    .parse::<usize>()
                    .map_err(|_| WireError::invalid_args(format!("invalid limit: {raw}")))?,
                None => 0,
            };
            Ok(Reply::Json(json!({"entries": ctx.proxy_logs.query(limit)})))
        }
        "CLEAR" => Ok(Reply::Json(json!({"cleared": ctx.proxy_logs.clear()}))),
        "STATS" => Ok(Reply::Json(ctx.proxy_logs.stats())),
        _ => unreachable!("require_action validated the sub-verb"),
    }
}

pub(super) fn handle_currentpage(cmd: &Command, ctx: &ListenCtx) -> Result<Reply, WireError> {
    match require_action(cmd)? {
        "LIST" => Ok(Reply::Json(json!({"pages": ctx.pages.list()}))),
        "GET" => {
            let id = cmd.require_arg(0, "id")?;
            let page = ctx
                .pages
                .get(id)
                .ok_or_else(|| WireError::not_found(format!("page not found: {id}")))?;
            Ok(Reply::Json(page))
        }
        "CLEAR" => Ok(Reply::Json(json!({"cleared": ctx.pages.clear()}))),
        _ => unreachable!("require_action validated the sub-verb"),
    }
}

pub(super) async fn handle_tunnel(
    cmd: &Command,
    conn: &ConnState,
    ctx: &ListenCtx,
) -> Result<Reply, WireError> {
    let bias = ctx.conn_project(conn);
    match require_action(cmd)? {
        "START" => {
            let id = cmd.require_arg(0, "id")?;
            let config: Value = cmd.data_json()?.unwrap_or_else(|| json!({}));
            let project = config
                .get("project_path")
                .and_then(|v| v.as_str())
                .map(ProjectPath::new)
                .or_else(|| bias.clone())
                .unwrap_or_default();
            Ok(Reply::Json(ctx.tunnels.start(id, &project, config).await?))
        }
        "STOP" => {
            let id = resolve(ctx.tunnels.entries(), cmd.require_arg(0, "id")?, &bias)?;
            Ok(Reply::Json(ctx.tunnels.stop(&id).await?))
        }
        "STATUS" => {
            let id = resolve(ctx.tunnels.entries(), cmd.require_arg(0, "id")?, &bias)?;
            Ok(Reply::Json(ctx.tunnels.status(&id).await?))
        }
        "LIST" => Ok(Reply::Json(json!({"tunnels": ctx.tunnels.list().await}))),
        _ => unreachable!("require_action validated the sub-verb"),
    }
}

pub(super) fn handle_chaos(cmd: &Command, ctx: &ListenCtx) -> Result<Reply, WireError> {
    match require_action(cmd)? {
        "ENABLE" => {
            ctx.chaos.enable();
            Ok(Reply::Ok(None))
        }
        "DISABLE" => {
            ctx.chaos.disable();
            Ok(Reply::Ok(None))
        }
        "STATUS" => Ok(Reply::Json(ctx.chaos.status())),
        "PRESET" => {
            let name = cmd.require_arg(0, "preset")?;
            Ok(Reply::Json(ctx.chaos.apply_preset(name)?))
        }
        "SET" => {
            let config: Value = cmd
                .data_json()?
                .ok_or_else(|| WireError::missing_param("CHAOS SET", "config"))?;
            ctx.chaos.set_config(config);
            Ok(Reply::Ok(None))
        }
        "ADD-RULE" => {
            let rule: Value = cmd
                .data_json()?
                .ok_or_else(|| WireError::missing_param("CHAOS ADD-RULE", "rule"))?;
            let id = ctx.chaos.add_rule(rule);
            Ok(Reply::Json(json!({"rule_id": id})))
        }
        "REMOVE-RULE" => {
            let raw = cmd.require_arg(0, "rule_id")?;
            let id: u64 = raw
                .parse()
                .map_err(|_| WireError::invalid_args(format!("invalid rule id: {raw}")))?;
            ctx.chaos.remove_rule(id)?;
            Ok(Reply::Ok(None))
        }
        "LIST-RULES" => Ok(Reply::Json(json!({"rules": ctx.chaos.list_rules()}))),
        "STATS" => Ok(Reply::Json(ctx.chaos.stats())),
        "CLEAR" => {
            ctx.chaos.clear();
            Ok(Reply::Ok(None))
        }
        "LIST-PRESETS" => Ok(Reply::Json(
            json!({"presets": crate::facades::chaos::presets()}),
        )),
        _ => unreachable!("require_action validated the sub-verb"),
    }
}

pub(super) fn handle_store(
    cmd: &Command,
    conn: &ConnState,
    ctx: &ListenCtx,
) -> Result<Reply, WireError> {
    // The store is keyed by the caller's session project; unbound callers
    // share the anonymous bucket.
    let project = ctx.conn_project(conn).unwrap_or_default();
    let bucket: &str = &project;

    match require_action(cmd)? {
        "GET" => {
            let key = cmd.require_arg(0, "key")?;
            let value = ctx
                .state
                .store_get(bucket, key)
                .ok_or_else(|| WireError::not_found(format!("key not found: {key}")))?;
            Ok(Reply::Json(value))
        }
        "SET" => {
            let key = cmd.require_arg(0, "key")?;
            let value: Value = match cmd.data_json()? {
                Some(value) => value,
                None => {
                    let raw = cmd.args[1..].join(" ");
                    if raw.is_empty() {
                        return Err(WireError::missing_param("STORE SET", "value"));
                    }
                    Value::String(raw)
                }
            };
            ctx.state.store_set(bucket, key, value);
            Ok(Reply::Ok(None))
        }
        "DELETE" => {
            let key = cmd.require_arg(0, "key")?;
            if !ctx.state.store_delete(bucket, key) {
                return Err(WireError::not_found(format!("key not found: {key}")));
            }
            Ok(Reply::Ok(None))
        }
        "LIST" => Ok(Reply::Json(json!({"keys": ctx.state.store_keys(bucket)}))),
        "CLEAR" => Ok(Reply::Json(json!({"cleared": ctx.state.store_clear(bucket)}))),
        "GET-ALL" => Ok(Reply::Json(json!(ctx.state.store_all(bucket)))),
        _ => unreachable!("require_action validated the sub-verb"),
    }
}

pub(super) async fn handle_automate(cmd: &Command, ctx: &ListenCtx) -> Result<Reply, WireError> {
    match require_action(cmd)? {
        "PROCESS" => {
            let task: Value = cmd
                .data_json()?
                .ok_or_else(|| WireError::missing_param("AUTOMATE PROCESS", "task"))?;
            Ok(Reply::Json(ctx.automation.process(task).await?))
        }
        "BATCH" => {
            let tasks: Vec<Value> = cmd
                .data_json()?
                .ok_or_else(|| WireError::missing_param("AUTOMATE BATCH", "tasks"))?;
            Ok(Reply::Json(json!({
                "results": ctx.automation.batch(tasks).await?
            })))
        }
        _ => unreachable!("require_action validated the sub-verb"),
    }
}

fn resolve(
    entries: Vec<(String, ProjectPath)>,
    partial: &str,
    bias: &Option<ProjectPath>,
) -> Result<String, WireError> {
    resolve_fuzzy(&entries, partial, bias.as_ref())
}

/// Payload text when present, else remaining args joined.
fn script_or_args(cmd: &Command, from_arg: usize) -> Result<String, WireError> {
    if cmd.data.is_some() {
        return cmd.require_data_utf8("payload");
    }
    let joined = cmd.args[from_arg.min(cmd.args.len())..].join(" ");
    if joined.is_empty() {
        return Err(WireError::missing_param(&cmd.display_name(), "payload"));
    }
    Ok(joined)
}
