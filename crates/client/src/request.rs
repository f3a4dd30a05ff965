// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fluent request builder.
//!
//! Requests are assembled as `VERB [ACTION] [ARGS...]` plus an optional raw
//! payload, then finished with one of the terminal methods (`ok`, `json`,
//! `json_into`, `bytes`, `chunked`, `text`).

use agnt_core::WireError;
use agnt_daemon::protocol::Response;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Client, ClientError};

/// Builder for one request. Created by [`Client::cmd`].
pub struct RequestBuilder<'a> {
    client: &'a Client,
    parts: Vec<String>,
    payload: Option<Vec<u8>>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a Client, verb: String) -> Self {
        Self {
            client,
            parts: vec![verb],
            payload: None,
        }
    }

    /// Append one token (sub-verb or argument).
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.parts.push(arg.into());
        self
    }

    /// Append several tokens.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parts.extend(args.into_iter().map(Into::into));
        self
    }

    /// Attach a raw payload.
    pub fn payload(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(data.into());
        self
    }

    /// Attach a JSON payload.
    pub fn payload_json<T: Serialize>(mut self, value: &T) -> Result<Self, ClientError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| ClientError::Daemon(WireError::invalid_args(e.to_string())))?;
        self.payload = Some(bytes);
        Ok(self)
    }

    async fn send(self) -> Result<Response, ClientError> {
        let line = self.parts.join(" ");
        self.client
            .send_line(&line, self.payload.as_deref())
            .await
    }

    /// Expect `OK`; returns its optional message.
    pub async fn ok(self) -> Result<Option<String>, ClientError> {
        match self.send().await?.into_result()? {
            Response::Ok { message } => Ok(message),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Expect a `JSON` body, parsed as a dynamic value.
    pub async fn json(self) -> Result<serde_json::Value, ClientError> {
        let bytes = self.body_bytes().await?;
        Ok(serde_json::from_slice(&bytes).map_err(agnt_daemon::ProtocolError::Json)?)
    }

    /// Expect a `JSON` body, deserialized into `T`.
    pub async fn json_into<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let bytes = self.body_bytes().await?;
        Ok(serde_json::from_slice(&bytes).map_err(agnt_daemon::ProtocolError::Json)?)
    }

    /// Expect a body (`JSON` or chunked), returned as raw bytes.
    pub async fn bytes(self) -> Result<Vec<u8>, ClientError> {
        self.body_bytes().await
    }

    /// Expect a chunked body; returns the chunks in arrival order.
    pub async fn chunked(self) -> Result<Vec<Vec<u8>>, ClientError> {
        match self.send().await?.into_result()? {
            Response::Chunks(chunks) => Ok(chunks),
            Response::Json(body) => Ok(vec![body]),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Any successful response, flattened to text: an `OK` message, a JSON
    /// body, or chunked output decoded lossily.
    pub async fn text(self) -> Result<String, ClientError> {
        match self.send().await?.into_result()? {
            Response::Ok { message } => Ok(message.unwrap_or_default()),
            Response::Pong => Ok("PONG".to_string()),
            Response::Json(body) => Ok(String::from_utf8_lossy(&body).into_owned()),
            Response::Chunks(chunks) => {
                Ok(String::from_utf8_lossy(&chunks.concat()).into_owned())
            }
            Response::Err { .. } => Err(ClientError::UnexpectedResponse),
        }
    }

    async fn body_bytes(self) -> Result<Vec<u8>, ClientError> {
        match self.send().await?.into_result()? {
            Response::Json(body) => Ok(body),
            Response::Chunks(chunks) => Ok(chunks.concat()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}
