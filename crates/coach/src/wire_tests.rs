// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::message::Role;

const MSG: &str =
    r#"{"id":5,"userId":"u-1","sessionId":"s-1","role":"ai","content":"hi","timestamp":"2026-03-01T10:00:00Z"}"#;

#[test]
fn bare_pong() {
    assert_eq!(decode("pong"), Inbound::Pong);
}

#[test]
fn history_frame() {
    let text = format!(r#"{{"type":"history","messages":[{MSG},{MSG}]}}"#);
    match decode(&text) {
        Inbound::Frame(ServerFrame::History { messages }) => {
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0].id, 5);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn user_and_ai_frames() {
    match decode(&format!(r#"{{"type":"user","message":{MSG}}}"#)) {
        Inbound::Frame(ServerFrame::User { message }) => assert_eq!(message.content, "hi"),
        other => panic!("unexpected: {other:?}"),
    }
    match decode(&format!(r#"{{"type":"ai","message":{MSG}}}"#)) {
        Inbound::Frame(ServerFrame::Ai { message }) => assert_eq!(message.role, Role::Ai),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn error_frame() {
    assert_eq!(
        decode(r#"{"type":"error","message":"quota exceeded"}"#),
        Inbound::Frame(ServerFrame::Error { message: "quota exceeded".into() })
    );
}

#[yare::parameterized(
    truncated = { "{not json" },
    empty = { "" },
    bare_ping = { "ping" },
    history_wrong_shape = { r#"{"type":"history","messages":"nope"}"# },
    ai_missing_message = { r#"{"type":"ai"}"# },
)]
fn malformed(text: &str) {
    assert!(matches!(decode(text), Inbound::Malformed(_)), "{text:?}");
}

#[test]
fn unknown_type_is_unrecognized() {
    assert_eq!(
        decode(r#"{"type":"typing","userId":"u-1"}"#),
        Inbound::Unrecognized(Some("typing".into()))
    );
}

#[test]
fn missing_type_is_unrecognized() {
    assert_eq!(decode(r#"{"content":"x"}"#), Inbound::Unrecognized(None));
    assert_eq!(decode("[1,2]"), Inbound::Unrecognized(None));
}

#[test]
fn send_envelope_is_content_only() -> anyhow::Result<()> {
    let text = encode_send("hello \"coach\"");
    let value: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(value, serde_json::json!({ "content": "hello \"coach\"" }));
    Ok(())
}

#[yare::parameterized(
    ws = { "ws://127.0.0.1:8000/ws/chat", "ws://127.0.0.1:8000/ws/chat?token=abc" },
    wss = { "wss://api.example.com/ws/chat", "wss://api.example.com/ws/chat?token=abc" },
    http = { "http://localhost:8000/ws/chat", "ws://localhost:8000/ws/chat?token=abc" },
    https = { "https://api.example.com/ws/chat", "wss://api.example.com/ws/chat?token=abc" },
    keeps_query = { "ws://h/ws?lang=en", "ws://h/ws?lang=en&token=abc" },
)]
fn url_embeds_token(endpoint: &str, expected: &str) {
    assert_eq!(connection_url(endpoint, "abc").ok().as_deref(), Some(expected));
}

#[test]
fn url_percent_encodes_token() -> anyhow::Result<()> {
    let url = connection_url("ws://h/ws", "a b&c=d")?;
    assert_eq!(url, "ws://h/ws?token=a+b%26c%3Dd");
    Ok(())
}

#[yare::parameterized(
    ftp = { "ftp://h/ws", "unsupported" },
    garbage = { "not a url", "invalid chat endpoint" },
)]
fn url_rejects(endpoint: &str, expected: &str) {
    crate::assert_err_contains!(connection_url(endpoint, "t"), expected);
}
