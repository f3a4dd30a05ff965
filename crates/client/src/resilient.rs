// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resilient client: background heartbeat, version check, reconnect hooks.
//!
//! Long-lived tool clients (editors, agent harnesses) wrap a [`Client`] in
//! this to keep their session alive and learn about daemon restarts without
//! polling themselves.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Client, ClientError};

/// Callback type for connection-state notifications.
pub type Hook = Box<dyn Fn() + Send + Sync>;
/// Callback for a daemon/client version mismatch: `(daemon, expected)`.
pub type VersionHook = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Configuration for [`ResilientClient`].
pub struct ResilientOptions {
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// Session code to heartbeat (`SESSION HEARTBEAT <code>`); plain pings
    /// otherwise.
    pub session_code: Option<String>,
    /// Client version to compare against the daemon's `INFO` version.
    pub expected_version: Option<String>,
    /// Consecutive heartbeat failures before `on_reconnect_failed` fires.
    pub max_failures: u32,
    pub on_disconnect: Option<Hook>,
    pub on_reconnect: Option<Hook>,
    pub on_reconnect_failed: Option<Hook>,
    pub on_version_mismatch: Option<VersionHook>,
}

impl Default for ResilientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            session_code: None,
            expected_version: None,
            max_failures: 3,
            on_disconnect: None,
            on_reconnect: None,
            on_reconnect_failed: None,
            on_version_mismatch: None,
        }
    }
}

/// A [`Client`] with a background heartbeat task.
pub struct ResilientClient {
    client: Arc<Client>,
    stop: Arc<Notify>,
    heartbeat: JoinHandle<()>,
}

impl ResilientClient {
    /// Wrap a client and start the heartbeat task.
    pub fn start(socket_path: impl Into<PathBuf>, options: ResilientOptions) -> Self {
        let client = Arc::new(Client::new(socket_path));
        let stop = Arc::new(Notify::new());
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&client),
            options,
            Arc::clone(&stop),
        ));
        Self {
            client,
            stop,
            heartbeat,
        }
    }

    /// The wrapped client, for issuing requests.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Stop the heartbeat task.
    pub async fn stop(self) {
        self.stop.notify_one();
        let _ = self.heartbeat.await;
    }
}

async fn heartbeat_loop(client: Arc<Client>, options: ResilientOptions, stop: Arc<Notify>) {
    let mut interval = tokio::time::interval(options.heartbeat_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut connected = true;
    let mut failures: u32 = 0;
    let mut version_checked = false;

    loop {
        tokio::select! {
            _ = stop.notified() => return,
            _ = interval.tick() => {}
        }

        match beat(&client, &options).await {
            Ok(()) => {
                if !connected {
                    debug!("daemon reconnected");
                    if let Some(hook) = &options.on_reconnect {
                        hook();
                    }
                }
                connected = true;
                failures = 0;

                if !version_checked {
                    version_checked = true;
                    check_version(&client, &options).await;
                }
            }
            Err(e) => {
                failures += 1;
                debug!(error = %e, failures, "heartbeat failed");
                if connected {
                    connected = false;
                    version_checked = false;
                    if let Some(hook) = &options.on_disconnect {
                        hook();
                    }
                }
                if failures == options.max_failures {
                    warn!(failures, "daemon unreachable");
                    if let Some(hook) = &options.on_reconnect_failed {
                        hook();
                    }
                }
            }
        }
    }
}

async fn beat(client: &Client, options: &ResilientOptions) -> Result<(), ClientError> {
    match &options.session_code {
        Some(code) => client
            .cmd("SESSION")
            .arg("HEARTBEAT")
            .arg(code)
            .ok()
            .await
            .map(|_| ()),
        None => client.ping().await,
    }
}

async fn check_version(client: &Client, options: &ResilientOptions) {
    let Some(expected) = &options.expected_version else {
        return;
    };
    let Ok(info) = client.info().await else { return };
    let daemon_version = info
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if daemon_version != *expected {
        warn!(daemon = %daemon_version, client = %expected, "version mismatch");
        if let Some(hook) = &options.on_version_mismatch {
            hook(&daemon_version, expected);
        }
    }
}

#[cfg(test)]
#[path = "resilient_tests.rs"]
mod tests;
