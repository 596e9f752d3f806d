// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat session driver.
//!
//! [`ChatSession::spawn`] starts one task that owns the [`SessionState`], the
//! live WebSocket sink, the reconnect timer and the heartbeat wake-up. Token
//! fetches, dials and socket reads run in helper tasks that report back over
//! a channel, each message tagged with the generation of the connection
//! attempt that produced it. The state machine decides what to do with them.
//!
//! Dropping the handle (or calling [`ChatSession::close`]) suppresses
//! reconnects and closes the live connection with code 1000. The driver
//! task exits once the connection is closed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::heartbeat::HeartbeatConfig;
use crate::message::{ChatMessage, DEFAULT_WELCOME_TEXT};
use crate::policy::{ReconnectPolicy, ABNORMAL_CLOSURE, NO_STATUS_RECEIVED};
use crate::state::{ConnectionState, Effect, Event, SessionState, Snapshot};
use crate::token::TokenProvider;
use crate::wire::connection_url;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Inputs for one chat session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base WebSocket endpoint; the token is added as a query parameter.
    pub endpoint: String,
    /// Owner of the welcome message.
    pub user_id: String,
    pub welcome_text: String,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: HeartbeatConfig,
    /// Upper bound for each of the token fetch and the WebSocket handshake.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            user_id: String::new(),
            welcome_text: DEFAULT_WELCOME_TEXT.to_owned(),
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// UI requests.
enum Command {
    Send(String),
    Draft(String),
    Retry,
}

/// Reports from helper tasks, tagged with their connection generation.
enum Link {
    Token { generation: u64, result: anyhow::Result<Option<String>> },
    Dialed { generation: u64, result: Result<WsStream, String> },
    Frame { generation: u64, text: String },
    Error { generation: u64, detail: String },
    Closed { generation: u64, code: u16 },
}

/// Handle to a running chat session.
pub struct ChatSession {
    cmd_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<Snapshot>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Start a session and begin connecting. Must be called inside a tokio runtime.
    pub fn spawn(config: SessionConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        let welcome = ChatMessage::welcome(&config.user_id, &config.welcome_text);
        let state = SessionState::new(welcome, config.reconnect, config.heartbeat);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (link_tx, link_rx) = mpsc::channel(256);
        let shutdown = CancellationToken::new();

        let driver = Driver {
            endpoint: config.endpoint,
            connect_timeout: config.connect_timeout,
            tokens,
            state,
            snapshot_tx,
            link_tx,
            sink: None,
            reader: None,
            reconnect_at: None,
        };
        let task = tokio::spawn(driver.run(cmd_rx, link_rx, shutdown.clone()));

        Self { cmd_tx, snapshot_rx, shutdown, task: Some(task) }
    }

    /// Send a chat message. Gating (open connection, pending reply, blank
    /// content) is applied by the session and reflected in the snapshot.
    pub async fn send(&self, content: impl Into<String>) -> anyhow::Result<()> {
        self.command(Command::Send(content.into())).await
    }

    /// Update the input buffer.
    pub async fn set_draft(&self, text: impl Into<String>) -> anyhow::Result<()> {
        self.command(Command::Draft(text.into())).await
    }

    /// Reconnect now, starting the backoff over. Ignored unless closed.
    pub async fn retry(&self) -> anyhow::Result<()> {
        self.command(Command::Retry).await
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that is notified after every state change.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Tear down the session and wait until the connection is closed.
    pub async fn close(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    async fn command(&self, cmd: Command) -> anyhow::Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| anyhow::anyhow!("chat session has shut down"))
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Driver {
    endpoint: String,
    connect_timeout: Duration,
    tokens: Arc<dyn TokenProvider>,
    state: SessionState,
    snapshot_tx: watch::Sender<Snapshot>,
    link_tx: mpsc::Sender<Link>,
    /// Write half of the live connection and its generation.
    sink: Option<(u64, WsSink)>,
    reader: Option<JoinHandle<()>>,
    reconnect_at: Option<Instant>,
}

impl Driver {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut link_rx: mpsc::Receiver<Link>,
        shutdown: CancellationToken,
    ) {
        self.dispatch(Event::Connect).await;

        // A server-initiated normal close also suppresses the session; the
        // driver keeps serving the handle until it is closed or dropped.
        let mut stopping = false;
        while !(stopping && self.state.is_finished()) {
            let reconnect_at = self.reconnect_at;
            let heartbeat_at = self.state.heartbeat_deadline();

            tokio::select! {
                biased;

                _ = shutdown.cancelled(), if !stopping => {
                    stopping = true;
                    self.dispatch(Event::Close).await;
                }

                cmd = cmd_rx.recv(), if !stopping => {
                    match cmd {
                        Some(Command::Send(text)) => self.dispatch(Event::Send(text)).await,
                        Some(Command::Draft(text)) => self.dispatch(Event::Draft(text)).await,
                        Some(Command::Retry) => self.dispatch(Event::Retry).await,
                        None => {
                            stopping = true;
                            self.dispatch(Event::Close).await;
                        }
                    }
                }

                Some(link) = link_rx.recv() => {
                    self.on_link(link).await;
                }

                _ = sleep_until_opt(reconnect_at) => {
                    self.reconnect_at = None;
                    self.dispatch(Event::ReconnectDue).await;
                }

                _ = sleep_until_opt(heartbeat_at) => {
                    self.dispatch(Event::Tick { now: Instant::now() }).await;
                }
            }
        }

        self.release();
        debug!("chat session finished");
    }

    /// Apply `event` and everything that follows from it, then publish.
    async fn dispatch(&mut self, event: Event) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            for effect in self.state.apply(event) {
                if let Some(next) = self.perform(effect).await {
                    pending.push_back(next);
                }
            }
        }
        self.snapshot_tx.send_replace(self.state.snapshot());
    }

    async fn perform(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::FetchToken { generation } => {
                let tokens = Arc::clone(&self.tokens);
                let link_tx = self.link_tx.clone();
                let limit = self.connect_timeout;
                tokio::spawn(async move {
                    let result = match tokio::time::timeout(limit, tokens.token()).await {
                        Ok(result) => result,
                        Err(_) => Err(anyhow::anyhow!("token provider timed out after {limit:?}")),
                    };
                    let _ = link_tx.send(Link::Token { generation, result }).await;
                });
                None
            }
            Effect::Dial { generation, token } => {
                let url = connection_url(&self.endpoint, &token);
                let link_tx = self.link_tx.clone();
                let limit = self.connect_timeout;
                tokio::spawn(async move {
                    let result = match url {
                        Ok(url) => dial(&url, limit).await,
                        Err(e) => Err(e.to_string()),
                    };
                    let _ = link_tx.send(Link::Dialed { generation, result }).await;
                });
                None
            }
            Effect::Transmit { generation, text } => {
                let Some((live, sink)) = self.sink.as_mut() else {
                    return None;
                };
                if *live != generation {
                    return None;
                }
                match sink.send(Message::Text(text.into())).await {
                    Ok(()) => None,
                    Err(e) => Some(Event::TransportError { generation, detail: e.to_string() }),
                }
            }
            Effect::ScheduleReconnect { delay } => {
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            Effect::CancelReconnect => {
                self.reconnect_at = None;
                None
            }
            Effect::CloseTransport { generation } => {
                if let Some((live, mut sink)) = self.sink.take() {
                    if live == generation {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: Utf8Bytes::from_static("session closed"),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                            debug!(generation, err = %e, "close frame not delivered");
                        }
                    } else {
                        self.sink = Some((live, sink));
                    }
                }
                self.stop_reader();
                info!(generation, "chat session closed");
                Some(Event::TeardownComplete)
            }
            Effect::DropTransport { generation } => {
                if self.sink.as_ref().is_some_and(|(live, _)| *live == generation) {
                    self.sink = None;
                    self.stop_reader();
                }
                None
            }
        }
    }

    async fn on_link(&mut self, link: Link) {
        match link {
            Link::Token { generation, result } => {
                let event = match result {
                    Ok(Some(token)) => Event::TokenIssued { generation, token },
                    Ok(None) => Event::TokenFailed { generation, reason: "no token available".into() },
                    Err(e) => Event::TokenFailed { generation, reason: format!("{e:#}") },
                };
                self.dispatch(event).await;
            }
            Link::Dialed { generation, result: Ok(stream) } => {
                let expected = generation == self.state.generation()
                    && self.state.connection() == ConnectionState::Connecting
                    && !self.state.is_suppressed();
                if !expected {
                    debug!(generation, "discarding connection from superseded attempt");
                    close_detached(stream);
                    return;
                }
                let (sink, source) = stream.split();
                self.sink = Some((generation, sink));
                self.stop_reader();
                self.reader = Some(tokio::spawn(read_frames(generation, source, self.link_tx.clone())));
                self.dispatch(Event::Opened { generation, now: Instant::now() }).await;
            }
            Link::Dialed { generation, result: Err(detail) } => {
                warn!(generation, err = %detail, "chat connection failed");
                self.dispatch(Event::Closed { generation, code: ABNORMAL_CLOSURE }).await;
            }
            Link::Frame { generation, text } => {
                self.dispatch(Event::Frame { generation, text }).await;
            }
            Link::Error { generation, detail } => {
                self.dispatch(Event::TransportError { generation, detail }).await;
            }
            Link::Closed { generation, code } => {
                self.dispatch(Event::Closed { generation, code }).await;
            }
        }
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn release(&mut self) {
        self.sink = None;
        self.stop_reader();
        self.reconnect_at = None;
    }
}

/// Open a WebSocket to `url` (plain or TLS), giving up after `limit`.
async fn dial(url: &str, limit: Duration) -> Result<WsStream, String> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    match tokio::time::timeout(limit, tokio_tungstenite::connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("handshake timed out after {limit:?}")),
    }
}

/// Forward frames from one connection until it closes.
async fn read_frames(generation: u64, mut source: WsSource, link_tx: mpsc::Sender<Link>) {
    let code = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                let link = Link::Frame { generation, text: text.as_str().to_owned() };
                if link_tx.send(link).await.is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break frame.map(|f| u16::from(f.code)).unwrap_or(NO_STATUS_RECEIVED);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let _ = link_tx.send(Link::Error { generation, detail: e.to_string() }).await;
                break ABNORMAL_CLOSURE;
            }
            None => break ABNORMAL_CLOSURE,
        }
    };
    let _ = link_tx.send(Link::Closed { generation, code }).await;
}

/// Politely close a connection nobody is going to use.
fn close_detached(mut stream: WsStream) {
    tokio::spawn(async move {
        let _ = stream.close(None).await;
    });
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
