// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! agnt-client: shared daemon client for the CLI and tool clients.
//!
//! One [`Client`] serialises concurrent requests over a single connection
//! (the wire is strictly request/response) and transparently reconnects
//! after transport errors. [`auto_start`] adds launch-on-demand for the
//! daemon binary; [`resilient`] adds a background heartbeat with
//! disconnect/reconnect callbacks.

pub mod auto_start;
pub mod request;
pub mod resilient;

pub use auto_start::connect_or_start;
pub use request::RequestBuilder;
pub use resilient::{ResilientClient, ResilientOptions};

use std::path::{Path, PathBuf};
use std::time::Duration;

use agnt_core::WireError;
use agnt_daemon::protocol::{self, ProtocolError, Response};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

/// Default timeout for one request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon not running (no socket at {0})")]
    SocketNotFound(PathBuf),

    #[error("Failed to start daemon: {0}")]
    DaemonStartFailed(String),

    #[error("Connection timeout waiting for daemon to start")]
    DaemonStartTimeout,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Daemon error: {0}")]
    Daemon(#[from] WireError),

    #[error("Unexpected response from daemon")]
    UnexpectedResponse,

    #[error("Request timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Daemon client: one connection, serialized requests, auto-reconnect.
#[derive(Debug)]
pub struct Client {
    socket_path: PathBuf,
    timeout: Duration,
    conn: tokio::sync::Mutex<Option<Connection>>,
}

impl Client {
    /// Client for an explicit socket path. Does not connect yet.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            conn: tokio::sync::Mutex::new(None),
        }
    }

    /// Client for the default daemon socket.
    pub fn from_env() -> Self {
        Self::new(agnt_daemon::env::socket_path())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start building a request: `client.cmd("SESSION").arg("LIST")...`
    pub fn cmd(&self, verb: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, verb.into())
    }

    /// Health check.
    pub async fn ping(&self) -> Result<(), ClientError> {
        match self.send_line("PING", None).await? {
            Response::Pong => Ok(()),
            Response::Err { code, message } => Err(WireError::new(code, message).into()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Daemon info (version, uptime, counters).
    pub async fn info(&self) -> Result<serde_json::Value, ClientError> {
        self.cmd("INFO").json().await
    }

    /// Request daemon shutdown.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.cmd("SHUTDOWN").ok().await.map(|_| ())
    }

    async fn open(&self) -> Result<Connection, ClientError> {
        if !self.socket_path.exists() {
            return Err(ClientError::SocketNotFound(self.socket_path.clone()));
        }
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, writer) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    /// Send one framed command and read its response.
    ///
    /// Holds the connection mutex for the whole exchange, serialising
    /// concurrent callers. On a transport error the connection is dropped
    /// and the request retried once over a fresh one.
    pub(crate) async fn send_line(
        &self,
        line: &str,
        payload: Option<&[u8]>,
    ) -> Result<Response, ClientError> {
        let mut guard = self.conn.lock().await;

        for attempt in 0..2 {
            if guard.is_none() {
                *guard = Some(self.open().await?);
            }
            let conn = guard.as_mut().ok_or(ClientError::UnexpectedResponse)?;

            match tokio::time::timeout(self.timeout, exchange(conn, line, payload)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => {
                    // Transport failure: reconnect once, then give up.
                    debug!(error = %e, attempt, "request failed, reconnecting");
                    *guard = None;
                    if attempt == 1 {
                        return Err(e.into());
                    }
                }
                Err(_) => {
                    *guard = None;
                    return Err(ClientError::Timeout);
                }
            }
        }

        Err(ClientError::UnexpectedResponse)
    }
}

async fn exchange(
    conn: &mut Connection,
    line: &str,
    payload: Option<&[u8]>,
) -> Result<Response, ProtocolError> {
    let frame = match payload {
        Some(data) => format!("{line} -- {}\n", data.len()),
        None => format!("{line}\n"),
    };
    conn.writer.write_all(frame.as_bytes()).await?;
    if let Some(data) = payload {
        conn.writer.write_all(data).await?;
    }
    conn.writer.flush().await?;

    protocol::read_response(&mut conn.reader).await
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
