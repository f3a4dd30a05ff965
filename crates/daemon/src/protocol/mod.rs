// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control protocol for daemon communication.
//!
//! Wire format: one ASCII command line, optionally followed by a raw payload:
//!
//! ```text
//! <VERB> [SUB-VERB] [ARG ...] [-- <payload-length>]\n
//! <payload-length bytes of raw data>
//! ```
//!
//! Responses are `OK [message]`, `ERR <code> <message>`, `PONG`,
//! `JSON <length>` + body, or a `CHUNK <length>` stream terminated by `END`.

mod codec;
mod verbs;

pub use codec::{
    read_command, read_line_bounded, read_response, write_chunks, write_err, write_json,
    write_ok, write_pong, write_raw_chunk,
};
pub use verbs::{actions_for, takes_action, verb_names, VerbSpec, VERBS};

use agnt_core::{ErrorCode, WireError};
use thiserror::Error;

/// Maximum length of a command line (verb + args), in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Maximum length of a command or response payload, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 10 * 1024 * 1024;

/// Default IPC timeout for a single frame write.
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Protocol version (from Cargo.toml)
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command line too long: {len} bytes (max {max})")]
    LineTooLong { len: usize, max: usize },

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,
}

impl ProtocolError {
    /// Whether the connection can keep serving commands after this error.
    ///
    /// Over-limit input and transport failures poison the stream (the reader
    /// has lost framing); malformed-but-complete lines do not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Malformed(_) | ProtocolError::Json(_)
        )
    }

    /// Map onto the wire error taxonomy for the `ERR` frame.
    pub fn to_wire(&self) -> WireError {
        match self {
            ProtocolError::Timeout => WireError::new(ErrorCode::Timeout, self.to_string()),
            ProtocolError::Io(_) | ProtocolError::ConnectionClosed => {
                WireError::internal(self.to_string())
            }
            _ => WireError::invalid_args(self.to_string()),
        }
    }
}

/// A parsed command frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Canonical (uppercase) verb.
    pub verb: String,
    /// Canonical (uppercase) sub-verb, for verbs that take one.
    pub action: Option<String>,
    /// Remaining whitespace-separated arguments, verbatim.
    pub args: Vec<String>,
    /// Raw payload bytes, when the line carried a `-- <length>` marker.
    pub data: Option<Vec<u8>>,
}

impl Command {
    /// The nth positional argument.
    pub fn arg(&self, n: usize) -> Option<&str> {
        self.args.get(n).map(|s| s.as_str())
    }

    /// The nth positional argument, or a `missing_param` error naming it.
    pub fn require_arg(&self, n: usize, name: &str) -> Result<&str, WireError> {
        self.arg(n)
            .ok_or_else(|| WireError::missing_param(&self.display_name(), name))
    }

    /// Payload decoded as UTF-8, or a `missing_param` error naming it.
    pub fn require_data_utf8(&self, name: &str) -> Result<String, WireError> {
        let bytes = self
            .data
            .as_ref()
            .ok_or_else(|| WireError::missing_param(&self.display_name(), name))?;
        String::from_utf8(bytes.clone())
            .map_err(|_| WireError::invalid_args(format!("{name} payload is not valid UTF-8")))
    }

    /// Payload decoded as JSON, tolerating unknown fields.
    pub fn data_json<T: serde::de::DeserializeOwned>(&self) -> Result<Option<T>, WireError> {
        match &self.data {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| WireError::invalid_args(format!("invalid JSON payload: {e}"))),
        }
    }

    /// `"VERB"` or `"VERB ACTION"` for error messages.
    pub fn display_name(&self) -> String {
        match &self.action {
            Some(action) => format!("{} {}", self.verb, action),
            None => self.verb.clone(),
        }
    }
}

/// A parsed response frame (client side).
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `OK [message]`
    Ok { message: Option<String> },
    /// `ERR <code> <message>`
    Err { code: ErrorCode, message: String },
    /// `PONG`
    Pong,
    /// `JSON <length>` + body
    Json(Vec<u8>),
    /// `CHUNK` stream, assembled in arrival order.
    Chunks(Vec<Vec<u8>>),
}

impl Response {
    /// Flatten an error response into a [`WireError`].
    pub fn into_result(self) -> Result<Response, WireError> {
        match self {
            Response::Err { code, message } => Err(WireError::new(code, message)),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
