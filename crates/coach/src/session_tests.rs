// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::error::SessionError;
use crate::message::Role;
use crate::state::ConnectionState;
use crate::test_support::{
    chat_message, spawn_mute_listener, wait_for, CountingToken, MockChatServer, ServerEvent,
};
use crate::token::TokenFn;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config(endpoint: String) -> SessionConfig {
    SessionConfig {
        user_id: "user-1".to_owned(),
        reconnect: ReconnectPolicy {
            base: Duration::from_millis(20),
            cap: Duration::from_millis(100),
            max_attempts: 3,
        },
        connect_timeout: Duration::from_millis(200),
        ..SessionConfig::new(endpoint)
    }
}

#[tokio::test]
async fn connects_and_shows_history_after_welcome() -> anyhow::Result<()> {
    let server = MockChatServer::new()
        .history(vec![chat_message(1, Role::User, "hi"), chat_message(2, Role::Ai, "hello")])
        .spawn()
        .await?;
    let session = ChatSession::spawn(fast_config(server.endpoint()), Arc::new(CountingToken::new(Some("t"))));
    let mut rx = session.watch();

    let snap = wait_for(&mut rx, WAIT, |s| s.messages.len() == 3).await?;
    assert_eq!(snap.connection, ConnectionState::Open);
    assert!(snap.messages[0].is_welcome());
    assert_eq!(snap.messages[0].user_id, "user-1");
    let ids: Vec<i64> = snap.messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn send_round_trip_clears_loading() -> anyhow::Result<()> {
    let server = MockChatServer::new().spawn().await?;
    let session = ChatSession::spawn(fast_config(server.endpoint()), Arc::new(CountingToken::new(Some("t"))));
    let mut rx = session.watch();
    wait_for(&mut rx, WAIT, |s| s.connection == ConnectionState::Open).await?;

    session.set_draft("how am I doing?").await?;
    session.send("  how am I doing?  ").await?;

    server.expect_event(WAIT, |e| matches!(e, ServerEvent::Received(t) if t.contains("content"))).await?;
    let snap = wait_for(&mut rx, WAIT, |s| s.messages.len() == 3 && !s.loading).await?;
    assert_eq!(snap.messages[1].role, Role::User);
    assert_eq!(snap.messages[1].content, "how am I doing?");
    assert_eq!(snap.messages[2].role, Role::Ai);
    assert_eq!(snap.draft, "");

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn close_sends_normal_close_once() -> anyhow::Result<()> {
    let server = MockChatServer::new().spawn().await?;
    let tokens = CountingToken::new(Some("t"));
    let session = ChatSession::spawn(fast_config(server.endpoint()), Arc::new(tokens.clone()));
    let mut rx = session.watch();
    wait_for(&mut rx, WAIT, |s| s.connection == ConnectionState::Open).await?;

    session.close().await;

    let closed = server.expect_event(WAIT, |e| matches!(e, ServerEvent::Closed(_))).await?;
    assert_eq!(closed, ServerEvent::Closed(Some(1000)));
    let snap = rx.borrow().clone();
    assert_eq!(snap.connection, ConnectionState::Closed);
    assert!(snap.suppressed);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let later = server.drain_events().await;
    assert!(!later.iter().any(|e| matches!(e, ServerEvent::Connected { .. })), "{later:?}");
    assert_eq!(tokens.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn missing_token_never_dials() -> anyhow::Result<()> {
    let server = MockChatServer::new().spawn().await?;
    let session = ChatSession::spawn(fast_config(server.endpoint()), Arc::new(CountingToken::new(None)));
    let mut rx = session.watch();

    let snap = wait_for(&mut rx, WAIT, |s| s.error.is_some()).await?;
    assert_eq!(snap.error, Some(SessionError::AuthFailed));
    assert_eq!(snap.connection, ConnectionState::Closed);
    assert_eq!(server.next_event(Duration::from_millis(100)).await, None);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_endpoint_gives_up_after_max_attempts() -> anyhow::Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let tokens = CountingToken::new(Some("t"));
    let session =
        ChatSession::spawn(fast_config(format!("ws://{addr}/ws")), Arc::new(tokens.clone()));
    let mut rx = session.watch();

    let snap = wait_for(&mut rx, WAIT, |s| s.error == Some(SessionError::RetriesExhausted)).await?;
    assert_eq!(snap.attempt, 3);
    assert_eq!(snap.connection, ConnectionState::Closed);
    // One initial attempt plus three reconnects.
    assert_eq!(tokens.calls(), 4);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn retry_after_exhaustion_reconnects() -> anyhow::Result<()> {
    let server = MockChatServer::new().token("right").spawn().await?;
    let session = ChatSession::spawn(fast_config(server.endpoint()), Arc::new(CountingToken::new(Some("wrong"))));
    let mut rx = session.watch();
    wait_for(&mut rx, WAIT, |s| s.error == Some(SessionError::RetriesExhausted)).await?;

    session.retry().await?;
    let snap = wait_for(&mut rx, WAIT, |s| s.error != Some(SessionError::RetriesExhausted)).await?;
    assert!(snap.attempt <= 1, "attempts restart from zero: {snap:?}");
    server.expect_event(WAIT, |e| matches!(e, ServerEvent::Rejected { .. })).await?;

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn server_normal_close_stays_closed_but_keeps_handle() -> anyhow::Result<()> {
    let server = MockChatServer::new().spawn().await?;
    let session = ChatSession::spawn(fast_config(server.endpoint()), Arc::new(CountingToken::new(Some("t"))));
    let mut rx = session.watch();
    wait_for(&mut rx, WAIT, |s| s.connection == ConnectionState::Open).await?;

    server.hang_up(1000);
    let snap = wait_for(&mut rx, WAIT, |s| s.connection == ConnectionState::Closed).await?;
    assert_eq!(snap.error, None);
    assert!(snap.suppressed);

    session.send("anyone there?").await?;
    let snap = wait_for(&mut rx, WAIT, |s| s.error.is_some()).await?;
    assert_eq!(snap.error, Some(SessionError::ConnectionUnavailable));

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn dropping_handle_closes_connection() -> anyhow::Result<()> {
    let server = MockChatServer::new().spawn().await?;
    let session = ChatSession::spawn(fast_config(server.endpoint()), Arc::new(CountingToken::new(Some("t"))));
    let mut rx = session.watch();
    wait_for(&mut rx, WAIT, |s| s.connection == ConnectionState::Open).await?;

    drop(session);

    let closed = server.expect_event(WAIT, |e| matches!(e, ServerEvent::Closed(_))).await?;
    assert_eq!(closed, ServerEvent::Closed(Some(1000)));
    Ok(())
}

#[tokio::test]
async fn stalled_handshake_times_out_and_reconnects() -> anyhow::Result<()> {
    let mute = spawn_mute_listener().await?;
    let tokens = CountingToken::new(Some("t"));
    let session = ChatSession::spawn(fast_config(format!("ws://{}/ws", mute.addr)), Arc::new(tokens.clone()));
    let mut rx = session.watch();

    let snap = wait_for(&mut rx, WAIT, |s| matches!(s.error, Some(SessionError::Reconnecting { .. }))).await?;
    assert_eq!(snap.attempt, 1);

    let snap = wait_for(&mut rx, WAIT, |s| s.error == Some(SessionError::RetriesExhausted)).await?;
    assert_eq!(snap.connection, ConnectionState::Closed);
    assert_eq!(tokens.calls(), 4);
    assert!(mute.accepted() >= 4);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn token_provider_that_never_answers_fails_auth() -> anyhow::Result<()> {
    let server = MockChatServer::new().spawn().await?;
    let stuck = TokenFn::new(std::future::pending::<anyhow::Result<Option<String>>>);
    let session = ChatSession::spawn(fast_config(server.endpoint()), Arc::new(stuck));
    let mut rx = session.watch();

    let snap = wait_for(&mut rx, WAIT, |s| s.error.is_some()).await?;
    assert_eq!(snap.error, Some(SessionError::AuthFailed));
    assert_eq!(snap.connection, ConnectionState::Closed);
    assert_eq!(server.next_event(Duration::from_millis(100)).await, None);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn retry_escapes_hung_connect() -> anyhow::Result<()> {
    let mute = spawn_mute_listener().await?;
    let config = SessionConfig {
        connect_timeout: Duration::from_secs(30),
        ..fast_config(format!("ws://{}/ws", mute.addr))
    };
    let tokens = CountingToken::new(Some("t"));
    let session = ChatSession::spawn(config, Arc::new(tokens.clone()));
    let mut rx = session.watch();
    wait_for(&mut rx, WAIT, |s| s.connection == ConnectionState::Connecting).await?;
    mute.wait_accepted(1, WAIT).await?;

    session.retry().await?;
    mute.wait_accepted(2, WAIT).await?;
    assert_eq!(tokens.calls(), 2);
    assert_eq!(session.snapshot().connection, ConnectionState::Connecting);

    session.close().await;
    assert_eq!(rx.borrow().connection, ConnectionState::Closed);
    Ok(())
}

#[tokio::test]
async fn wss_endpoints_attempt_a_tls_handshake() -> anyhow::Result<()> {
    let mute = spawn_mute_listener().await?;
    let url = format!("wss://{}/ws?token=t", mute.addr);

    let err = match dial(&url, Duration::from_millis(200)).await {
        Ok(_) => anyhow::bail!("mute listener cannot complete a handshake"),
        Err(e) => e,
    };
    assert!(err.contains("timed out"), "{err}");
    assert_eq!(mute.accepted(), 1);
    Ok(())
}
