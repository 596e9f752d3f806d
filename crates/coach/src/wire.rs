// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat wire protocol.
//!
//! Chat frames are JSON text frames. Inbound frames are internally tagged by
//! `type`; outbound chat sends are a bare `{"content": ...}` envelope. The
//! liveness ping and its reply are the plain strings `ping` / `pong`.

use serde::{Deserialize, Serialize};

use crate::heartbeat::PONG;
use crate::message::ChatMessage;

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    History { messages: Vec<ChatMessage> },
    User { message: ChatMessage },
    Ai { message: ChatMessage },
    Error { message: String },
}

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Pong,
    Frame(ServerFrame),
    /// Valid JSON with an unknown or missing `type`.
    Unrecognized(Option<String>),
    /// Not JSON, or a known `type` with the wrong shape.
    Malformed(String),
}

const KNOWN_TYPES: &[&str] = &["history", "user", "ai", "error"];

pub fn decode(text: &str) -> Inbound {
    if text == PONG {
        return Inbound::Pong;
    }
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Inbound::Malformed(e.to_string()),
    };
    let kind = value.get("type").and_then(|t| t.as_str()).map(str::to_owned);
    match kind {
        Some(ref k) if KNOWN_TYPES.contains(&k.as_str()) => {
            match serde_json::from_value::<ServerFrame>(value) {
                Ok(frame) => Inbound::Frame(frame),
                Err(e) => Inbound::Malformed(e.to_string()),
            }
        }
        other => Inbound::Unrecognized(other),
    }
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSend {
    pub content: String,
}

/// Encode a chat send. `content` is expected to be trimmed already.
pub fn encode_send(content: &str) -> String {
    // A single string field cannot fail to serialize.
    serde_json::to_string(&ChatSend { content: content.to_owned() })
        .unwrap_or_else(|_| String::from("{}"))
}

// ---------------------------------------------------------------------------
// Connection URL
// ---------------------------------------------------------------------------

/// Build the WebSocket URL for `endpoint`, carrying `token` as a query credential.
///
/// `http`/`https` endpoints are mapped to `ws`/`wss`. Existing query
/// parameters are kept; the token is percent-encoded.
pub fn connection_url(endpoint: &str, token: &str) -> anyhow::Result<String> {
    let mut url = reqwest::Url::parse(endpoint.trim())
        .map_err(|e| anyhow::anyhow!("invalid chat endpoint {endpoint:?}: {e}"))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => anyhow::bail!("unsupported chat endpoint scheme: {other}"),
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        anyhow::bail!("cannot use {scheme} scheme for {endpoint:?}");
    }
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.into())
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
