// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Overlay endpoint: process-wide holder plus text delivery.
//!
//! The overlay is a separate local UI process listening for HTTP over a
//! Unix socket. The daemon holds one process-wide endpoint that proxies
//! subscribe to (they pull the current value instead of holding
//! back-references), and the scheduler posts deferred messages to each
//! session's own overlay path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agnt_core::{Clock, SystemClock};
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::watch;

/// Timeout for one overlay delivery.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Overlay delivery errors
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("overlay returned HTTP {0}")]
    Status(u16),

    #[error("malformed overlay response: {0}")]
    Malformed(String),

    #[error("overlay delivery timed out")]
    Timeout,
}

/// Process-wide overlay endpoint holder.
///
/// Updates are broadcast through a watch channel; proxies subscribe and
/// read the current value at call time.
pub struct OverlayEndpoint {
    tx: watch::Sender<Option<String>>,
    last_activity_ms: AtomicU64,
}

impl OverlayEndpoint {
    pub fn new(initial: Option<String>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn set(&self, endpoint: String) {
        let _ = self.tx.send(Some(endpoint));
    }

    pub fn clear(&self) {
        let _ = self.tx.send(None);
    }

    /// Subscribe for change notifications (proxies).
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }

    /// Record overlay activity (the `OVERLAY ACTIVITY` verb).
    pub fn touch_activity(&self) {
        self.last_activity_ms
            .store(SystemClock.epoch_ms(), Ordering::SeqCst);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::SeqCst)
    }
}

/// Deliver a text message to an overlay listener.
///
/// `POST http://unix/type` with `{"text": ..., "enter": true, "instant": true}`;
/// any non-200 response is a delivery failure.
pub async fn post_text(socket_path: &str, text: &str) -> Result<(), OverlayError> {
    let body = json!({"text": text, "enter": true, "instant": true});
    match tokio::time::timeout(DELIVERY_TIMEOUT, post(socket_path, "/type", &body)).await {
        Ok(result) => result,
        Err(_) => Err(OverlayError::Timeout),
    }
}

/// One HTTP/1.1 POST over a Unix socket.
///
/// The overlay contract is a single fixed request/response, framed here the
/// same way the control protocol frames its own lines.
async fn post(
    socket_path: &str,
    path: &str,
    body: &serde_json::Value,
) -> Result<(), OverlayError> {
    let mut stream = UnixStream::connect(socket_path).await?;

    let payload = serde_json::to_vec(body).map_err(|e| OverlayError::Malformed(e.to_string()))?;
    let head = format!(
        "POST {path} HTTP/1.1\r\n\
         Host: unix\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        payload.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;

    // Only the status line matters; drain until the header terminator or EOF.
    let mut response = Vec::with_capacity(256);
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
        if response.windows(4).any(|w| w == b"\r\n\r\n") || response.len() > 8192 {
            break;
        }
    }

    let status_line = response
        .split(|&b| b == b'\n')
        .next()
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .unwrap_or_default();
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| OverlayError::Malformed(status_line.clone()))?;

    if status == 200 {
        Ok(())
    } else {
        Err(OverlayError::Status(status))
    }
}

#[cfg(test)]
#[path = "overlay_tests.rs"]
mod tests;
