// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame encoding/decoding for the control protocol.

use agnt_core::{ErrorCode, WireError};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{verbs, Command, ProtocolError, Response, DEFAULT_TIMEOUT, MAX_LINE_LEN, MAX_PAYLOAD_LEN};

/// Read one `\n`-terminated line, enforcing a byte limit.
///
/// Returns `Ok(None)` on clean EOF at a line boundary. EOF mid-line is a
/// [`ProtocolError::ConnectionClosed`].
pub async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<Option<String>, ProtocolError> {
    let mut line: Vec<u8> = Vec::new();
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            return Err(ProtocolError::ConnectionClosed);
        }

        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if line.len() + pos > max {
                    return Err(ProtocolError::LineTooLong {
                        len: line.len() + pos,
                        max,
                    });
                }
                line.extend_from_slice(&buf[..pos]);
                reader.consume(pos + 1);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return String::from_utf8(line)
                    .map(Some)
                    .map_err(|_| ProtocolError::Malformed("line is not valid UTF-8".into()));
            }
            None => {
                let n = buf.len();
                if line.len() + n > max {
                    return Err(ProtocolError::LineTooLong {
                        len: line.len() + n,
                        max,
                    });
                }
                line.extend_from_slice(buf);
                reader.consume(n);
            }
        }
    }
}

/// Read and parse one command frame.
///
/// Returns `Ok(None)` when the client closed the connection cleanly. Blank
/// lines are skipped. The second token is canonicalised as a sub-verb only
/// for verbs that take one (see [`verbs`]); everything else is an argument.
pub async fn read_command<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Command>, ProtocolError> {
    loop {
        let Some(line) = read_line_bounded(reader, MAX_LINE_LEN).await? else {
            return Ok(None);
        };
        if line.trim().is_empty() {
            continue;
        }

        let mut tokens: Vec<String> = line.split_whitespace().map(String::from).collect();

        // Trailing "-- <length>" marks a raw payload after the line.
        let mut data = None;
        if tokens.len() >= 2 && tokens[tokens.len() - 2] == "--" {
            let len: usize = tokens[tokens.len() - 1]
                .parse()
                .map_err(|_| ProtocolError::Malformed("invalid payload length".into()))?;
            if len > MAX_PAYLOAD_LEN {
                return Err(ProtocolError::PayloadTooLarge {
                    size: len,
                    max: MAX_PAYLOAD_LEN,
                });
            }
            tokens.truncate(tokens.len() - 2);
            data = Some(read_exact_payload(reader, len).await?);
        }

        if tokens.is_empty() {
            return Err(ProtocolError::Malformed("missing verb".into()));
        }

        let verb = tokens[0].to_ascii_uppercase();
        let (action, args) = if verbs::takes_action(&verb) && tokens.len() > 1 {
            (Some(tokens[1].to_ascii_uppercase()), tokens[2..].to_vec())
        } else {
            (None, tokens[1..].to_vec())
        };

        return Ok(Some(Command {
            verb,
            action,
            args,
            data,
        }));
    }
}

async fn read_exact_payload<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    len: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = vec![0u8; len];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

async fn timed<F, T>(fut: F) -> Result<T, ProtocolError>
where
    F: std::future::Future<Output = Result<T, std::io::Error>>,
{
    tokio::time::timeout(DEFAULT_TIMEOUT, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)?
        .map_err(ProtocolError::Io)
}

/// Write an `OK [message]` frame.
pub async fn write_ok<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: Option<&str>,
) -> Result<(), ProtocolError> {
    let frame = match message {
        Some(msg) => format!("OK {}\n", sanitize_line(msg)),
        None => "OK\n".to_string(),
    };
    timed(async {
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await
    })
    .await
}

/// Write an `ERR <code> <message>` frame.
pub async fn write_err<W: AsyncWrite + Unpin>(
    writer: &mut W,
    err: &WireError,
) -> Result<(), ProtocolError> {
    let frame = format!("ERR {} {}\n", err.code.as_str(), sanitize_line(&err.message));
    timed(async {
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await
    })
    .await
}

/// Write a `PONG` frame.
pub async fn write_pong<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), ProtocolError> {
    timed(async {
        writer.write_all(b"PONG\n").await?;
        writer.flush().await
    })
    .await
}

/// Write a `JSON <length>` frame with a serialized body.
pub async fn write_json<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), ProtocolError> {
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            size: body.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    let header = format!("JSON {}\n", body.len());
    timed(async {
        writer.write_all(header.as_bytes()).await?;
        writer.write_all(&body).await?;
        writer.flush().await
    })
    .await
}

/// Write a single `CHUNK <length>` frame without the terminating `END`.
pub async fn write_raw_chunk<W: AsyncWrite + Unpin>(
    writer: &mut W,
    chunk: &[u8],
) -> Result<(), ProtocolError> {
    if chunk.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            size: chunk.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    let header = format!("CHUNK {}\n", chunk.len());
    timed(async {
        writer.write_all(header.as_bytes()).await?;
        writer.write_all(chunk).await?;
        writer.flush().await
    })
    .await
}

/// Write a full chunked response: each chunk framed, then `END`.
pub async fn write_chunks<W: AsyncWrite + Unpin>(
    writer: &mut W,
    chunks: &[Vec<u8>],
) -> Result<(), ProtocolError> {
    for chunk in chunks {
        write_raw_chunk(writer, chunk).await?;
    }
    timed(async {
        writer.write_all(b"END\n").await?;
        writer.flush().await
    })
    .await
}

/// Read and parse one response frame (client side).
pub async fn read_response<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Response, ProtocolError> {
    let line = read_line_bounded(reader, MAX_LINE_LEN)
        .await?
        .ok_or(ProtocolError::ConnectionClosed)?;

    let (head, rest) = match line.split_once(' ') {
        Some((head, rest)) => (head, rest),
        None => (line.as_str(), ""),
    };

    match head {
        "PONG" => Ok(Response::Pong),
        "OK" => Ok(Response::Ok {
            message: if rest.is_empty() {
                None
            } else {
                Some(rest.to_string())
            },
        }),
        "ERR" => {
            let (code, message) = match rest.split_once(' ') {
                Some((code, message)) => (code, message),
                None => (rest, ""),
            };
            Ok(Response::Err {
                code: ErrorCode::parse(code),
                message: message.to_string(),
            })
        }
        "JSON" => {
            let len = parse_body_len(rest)?;
            Ok(Response::Json(read_exact_payload(reader, len).await?))
        }
        "CHUNK" => {
            let mut chunks = vec![read_exact_payload(reader, parse_body_len(rest)?).await?];
            loop {
                let line = read_line_bounded(reader, MAX_LINE_LEN)
                    .await?
                    .ok_or(ProtocolError::ConnectionClosed)?;
                match line.split_once(' ') {
                    Some(("CHUNK", len)) => {
                        chunks.push(read_exact_payload(reader, parse_body_len(len)?).await?);
                    }
                    None if line == "END" => return Ok(Response::Chunks(chunks)),
                    _ => {
                        return Err(ProtocolError::Malformed(format!(
                            "unexpected frame in chunk stream: {line}"
                        )))
                    }
                }
            }
        }
        "END" => Ok(Response::Chunks(Vec::new())),
        other => Err(ProtocolError::Malformed(format!(
            "unknown response frame: {other}"
        ))),
    }
}

fn parse_body_len(s: &str) -> Result<usize, ProtocolError> {
    let len: usize = s
        .trim()
        .parse()
        .map_err(|_| ProtocolError::Malformed("invalid body length".into()))?;
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(len)
}

/// Newlines inside a single-line frame would break framing.
fn sanitize_line(s: &str) -> String {
    if s.contains('\n') || s.contains('\r') {
        s.replace(['\n', '\r'], " ")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
