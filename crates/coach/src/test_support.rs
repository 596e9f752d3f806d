// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders, a mock chat server, and assertion helpers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex};

use crate::message::{ChatMessage, Role};
use crate::state::Snapshot;
use crate::token::{TokenFuture, TokenProvider};

/// A chat message with fixed session and timestamp.
pub fn chat_message(id: i64, role: Role, content: &str) -> ChatMessage {
    ChatMessage {
        id,
        user_id: "user-1".to_owned(),
        session_id: "session-1".to_owned(),
        role,
        content: content.to_owned(),
        timestamp: "2026-01-01T00:00:00Z".to_owned(),
    }
}

/// A single-message server frame (`user`, `ai`).
pub fn frame_json(kind: &str, message: &ChatMessage) -> String {
    serde_json::json!({ "type": kind, "message": message }).to_string()
}

/// A `history` server frame.
pub fn history_json(messages: &[ChatMessage]) -> String {
    serde_json::json!({ "type": "history", "messages": messages }).to_string()
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = format!("{err:#}");
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// Token provider that hands out a fixed token and counts how often it was asked.
#[derive(Debug, Clone)]
pub struct CountingToken {
    token: Option<String>,
    calls: Arc<AtomicU32>,
}

impl CountingToken {
    pub fn new(token: Option<&str>) -> Self {
        Self { token: token.map(str::to_owned), calls: Arc::new(AtomicU32::new(0)) }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl TokenProvider for CountingToken {
    fn token(&self) -> TokenFuture<'_> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let token = self.token.clone();
        Box::pin(async move { Ok(token) })
    }
}

/// Wait until the session snapshot satisfies `pred`.
pub async fn wait_for(
    rx: &mut watch::Receiver<Snapshot>,
    timeout: Duration,
    pred: impl FnMut(&Snapshot) -> bool,
) -> anyhow::Result<Snapshot> {
    let outcome =
        tokio::time::timeout(timeout, rx.wait_for(pred)).await.map(|r| r.map(|s| Snapshot::clone(&s)));
    match outcome {
        Ok(Ok(snapshot)) => Ok(snapshot),
        Ok(Err(_)) => anyhow::bail!("chat session dropped"),
        Err(_) => {
            let last = rx.borrow().clone();
            anyhow::bail!("timed out waiting for session state, last: {last:?}")
        }
    }
}

/// A TCP listener that accepts connections and never says a word.
pub struct MuteListener {
    pub addr: SocketAddr,
    accepted: watch::Receiver<usize>,
    task: tokio::task::JoinHandle<()>,
}

/// Bind a [`MuteListener`] on a random local port.
pub async fn spawn_mute_listener() -> anyhow::Result<MuteListener> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (count_tx, accepted) = watch::channel(0usize);
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
            count_tx.send_replace(held.len());
        }
    });
    Ok(MuteListener { addr, accepted, task })
}

impl MuteListener {
    pub fn accepted(&self) -> usize {
        *self.accepted.borrow()
    }

    /// Wait until at least `n` connections were accepted.
    pub async fn wait_accepted(&self, n: usize, timeout: Duration) -> anyhow::Result<()> {
        let mut rx = self.accepted.clone();
        let result = match tokio::time::timeout(timeout, rx.wait_for(|count| *count >= n)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => anyhow::bail!("mute listener stopped"),
            Err(_) => anyhow::bail!("expected {n} connections, saw {}", self.accepted()),
        };
        result
    }
}

impl Drop for MuteListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// What the mock server observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connected { token: Option<String> },
    /// Upgrade refused because the token did not match.
    Rejected { token: Option<String> },
    Received(String),
    /// Client closed the connection, with its close code if one was sent.
    Closed(Option<u16>),
    /// Server dropped the connection without a closing handshake.
    Kicked,
    /// Server closed the connection with this code.
    Hangup(u16),
}

/// Builder for an in-process chat server speaking the coach wire protocol.
///
/// On connect it sends a `history` frame. A `{"content": ..}` message is
/// answered with the echoed `user` message followed by an `ai` reply.
pub struct MockChatServer {
    token: Option<String>,
    history: Vec<ChatMessage>,
    answer_pings: bool,
}

impl Default for MockChatServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChatServer {
    pub fn new() -> Self {
        Self { token: None, history: Vec::new(), answer_pings: true }
    }

    /// Refuse upgrades that do not carry this token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn history(mut self, messages: Vec<ChatMessage>) -> Self {
        self.history = messages;
        self
    }

    /// Never answer `ping`.
    pub fn silent(mut self) -> Self {
        self.answer_pings = false;
        self
    }

    /// Bind to a random local port and start serving.
    pub async fn spawn(self) -> anyhow::Result<ChatServerHandle> {
        let next_id = self.history.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (kick_tx, _) = broadcast::channel(4);
        let (push_tx, _) = broadcast::channel(16);
        let shared = Arc::new(Shared {
            token: self.token,
            history: self.history,
            answer_pings: self.answer_pings,
            next_id: AtomicI64::new(next_id),
            events_tx,
            kick_tx: kick_tx.clone(),
            push_tx: push_tx.clone(),
        });

        let router = Router::new().route("/ws", get(chat_handler)).with_state(shared);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(ChatServerHandle { addr, events: Mutex::new(events_rx), kick_tx, push_tx, task })
    }
}

/// A running [`MockChatServer`].
pub struct ChatServerHandle {
    pub addr: SocketAddr,
    events: Mutex<mpsc::UnboundedReceiver<ServerEvent>>,
    kick_tx: broadcast::Sender<Option<u16>>,
    push_tx: broadcast::Sender<String>,
    task: tokio::task::JoinHandle<()>,
}

impl ChatServerHandle {
    /// Endpoint to hand to the session (without the token).
    pub fn endpoint(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Drop every open connection without a close frame.
    pub fn kick(&self) {
        let _ = self.kick_tx.send(None);
    }

    /// Close every open connection with a close frame carrying `code`.
    pub fn hang_up(&self, code: u16) {
        let _ = self.kick_tx.send(Some(code));
    }

    /// Send a raw text frame to every open connection.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.push_tx.send(text.into());
    }

    /// Next recorded event, or `None` if nothing arrives within `timeout`.
    pub async fn next_event(&self, timeout: Duration) -> Option<ServerEvent> {
        let mut events = self.events.lock().await;
        tokio::time::timeout(timeout, events.recv()).await.ok().flatten()
    }

    /// Skip events until one matches `pred`.
    pub async fn expect_event(
        &self,
        timeout: Duration,
        mut pred: impl FnMut(&ServerEvent) -> bool,
    ) -> anyhow::Result<ServerEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_event(remaining).await {
                Some(event) if pred(&event) => return Ok(event),
                Some(event) => seen.push(event),
                None => anyhow::bail!("no matching server event, saw: {seen:?}"),
            }
        }
    }

    /// Everything recorded so far that has not been consumed.
    pub async fn drain_events(&self) -> Vec<ServerEvent> {
        let mut events = self.events.lock().await;
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }
}

impl Drop for ChatServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Shared {
    token: Option<String>,
    history: Vec<ChatMessage>,
    answer_pings: bool,
    next_id: AtomicI64,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    kick_tx: broadcast::Sender<Option<u16>>,
    push_tx: broadcast::Sender<String>,
}

impl Shared {
    fn record(&self, event: ServerEvent) {
        let _ = self.events_tx.send(event);
    }

    fn message(&self, role: Role, content: &str) -> ChatMessage {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        chat_message(id, role, content)
    }
}

#[derive(Debug, Deserialize)]
struct ChatQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatSendBody {
    content: String,
}

async fn chat_handler(
    State(shared): State<Arc<Shared>>,
    Query(query): Query<ChatQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if shared.token.is_some() && query.token != shared.token {
        shared.record(ServerEvent::Rejected { token: query.token });
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    shared.record(ServerEvent::Connected { token: query.token });
    ws.on_upgrade(move |socket| handle_chat(shared, socket)).into_response()
}

async fn handle_chat(shared: Arc<Shared>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut kick_rx = shared.kick_tx.subscribe();
    let mut push_rx = shared.push_tx.subscribe();

    if ws_tx.send(Message::Text(history_json(&shared.history).into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            kick = kick_rx.recv() => {
                match kick {
                    Ok(Some(code)) => {
                        let frame = CloseFrame { code, reason: "bye".into() };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                        shared.record(ServerEvent::Hangup(code));
                    }
                    _ => shared.record(ServerEvent::Kicked),
                }
                return;
            }
            pushed = push_rx.recv() => {
                let Ok(text) = pushed else { continue };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => {
                        shared.record(ServerEvent::Closed(None));
                        return;
                    }
                };
                match msg {
                    Message::Text(text) => {
                        let text = text.as_str().to_owned();
                        shared.record(ServerEvent::Received(text.clone()));
                        for reply in replies(&shared, &text) {
                            if ws_tx.send(Message::Text(reply.into())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Message::Close(frame) => {
                        shared.record(ServerEvent::Closed(frame.map(|f| f.code)));
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}

fn replies(shared: &Shared, text: &str) -> Vec<String> {
    if text == crate::heartbeat::PING {
        return if shared.answer_pings { vec![crate::heartbeat::PONG.to_owned()] } else { vec![] };
    }
    match serde_json::from_str::<ChatSendBody>(text) {
        Ok(body) => {
            let user = shared.message(Role::User, &body.content);
            let ai = shared.message(Role::Ai, &format!("coach says: {}", body.content));
            vec![frame_json("user", &user), frame_json("ai", &ai)]
        }
        Err(_) => vec![serde_json::json!({ "type": "error", "message": "invalid request" }).to_string()],
    }
}
