// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-level error taxonomy.
//!
//! Every failure a handler can produce maps onto one of the codes below and
//! is emitted as an `ERR <code> <message>` frame. The message is either a
//! bare string or a JSON [`StructuredError`] carrying the offending command,
//! action, and the valid set, so that tool clients can discover the surface
//! programmatically.

use serde::{Deserialize, Serialize};

/// Error codes carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unknown verb
    InvalidCommand,
    /// Unknown sub-verb
    InvalidAction,
    /// Required arg absent
    MissingParam,
    /// Arg present but malformed
    InvalidArgs,
    /// Identifier does not resolve
    NotFound,
    /// Uniqueness violated
    AlreadyExists,
    /// Operation not valid in current state
    InvalidState,
    /// Caller-visible timeout
    Timeout,
    /// Anything else
    Internal,
}

impl ErrorCode {
    /// Wire spelling of the code (lowercase snake_case).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCommand => "invalid_command",
            ErrorCode::InvalidAction => "invalid_action",
            ErrorCode::MissingParam => "missing_param",
            ErrorCode::InvalidArgs => "invalid_args",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Internal => "internal",
        }
    }

    /// Parse a wire code; unknown spellings map to `Internal`.
    pub fn parse(s: &str) -> Self {
        match s {
            "invalid_command" => ErrorCode::InvalidCommand,
            "invalid_action" => ErrorCode::InvalidAction,
            "missing_param" => ErrorCode::MissingParam,
            "invalid_args" => ErrorCode::InvalidArgs,
            "not_found" => ErrorCode::NotFound,
            "already_exists" => ErrorCode::AlreadyExists,
            "invalid_state" => ErrorCode::InvalidState,
            "timeout" => ErrorCode::Timeout,
            _ => ErrorCode::Internal,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON error payload for discoverability.
///
/// Unknown fields are tolerated on input for forward compatibility; `None`
/// fields are omitted on output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A failure ready to be written as an `ERR` frame.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl WireError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, message)
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgs, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// Required argument absent.
    pub fn missing_param(command: &str, param: &str) -> Self {
        let payload = StructuredError {
            command: Some(command.to_string()),
            param: Some(param.to_string()),
            message: Some(format!("missing required parameter: {param}")),
            ..Default::default()
        };
        Self::new(ErrorCode::MissingParam, encode_structured(&payload))
    }

    /// Unknown verb, listing the known verbs.
    pub fn unknown_command(command: &str, valid: &[&str]) -> Self {
        let payload = StructuredError {
            command: Some(command.to_string()),
            valid_actions: valid.iter().map(|s| s.to_string()).collect(),
            message: Some(format!("unknown command: {command}")),
            ..Default::default()
        };
        Self::new(ErrorCode::InvalidCommand, encode_structured(&payload))
    }

    /// Unknown sub-verb for a known verb, listing the valid set.
    pub fn unknown_action(command: &str, action: &str, valid: &[&str]) -> Self {
        let payload = StructuredError {
            command: Some(command.to_string()),
            action: Some(action.to_string()),
            valid_actions: valid.iter().map(|s| s.to_string()).collect(),
            message: Some(format!("unknown action: {command} {action}")),
            ..Default::default()
        };
        Self::new(ErrorCode::InvalidAction, encode_structured(&payload))
    }

    /// Parse the message as a [`StructuredError`], when it is one.
    pub fn structured(&self) -> Option<StructuredError> {
        serde_json::from_str(&self.message).ok()
    }
}

fn encode_structured(payload: &StructuredError) -> String {
    // A StructuredError of plain strings cannot fail to serialize; fall back
    // to the bare message if it somehow does.
    serde_json::to_string(payload)
        .unwrap_or_else(|_| payload.message.clone().unwrap_or_default())
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
