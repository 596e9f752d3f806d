// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat session state machine.
//!
//! [`SessionState::apply`] is the only place the message log, connection
//! status, loading flag and error slot change. It takes one [`Event`] and
//! returns the [`Effect`]s the driver must perform. Every connection attempt
//! gets a fresh generation; transport events carrying another generation, or
//! arriving after the session was suppressed, are dropped.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::heartbeat::{Beat, Heartbeat, HeartbeatConfig, PING};
use crate::message::ChatMessage;
use crate::policy::{should_reconnect, ReconnectPolicy, RetryContext, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use crate::reconcile::{reconcile, Incoming};
use crate::wire::{self, Inbound, ServerFrame};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    #[default]
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the UI observes about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub connection: ConnectionState,
    pub messages: Vec<ChatMessage>,
    /// A send is in flight; further sends are ignored.
    pub loading: bool,
    pub draft: String,
    pub error: Option<SessionError>,
    pub attempt: u32,
    pub suppressed: bool,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Session mounted.
    Connect,
    /// User asked to reconnect.
    Retry,
    /// Backoff timer fired.
    ReconnectDue,
    TokenIssued { generation: u64, token: String },
    TokenFailed { generation: u64, reason: String },
    Opened { generation: u64, now: Instant },
    Frame { generation: u64, text: String },
    TransportError { generation: u64, detail: String },
    Closed { generation: u64, code: u16 },
    /// Heartbeat wake-up.
    Tick { now: Instant },
    Draft(String),
    Send(String),
    /// Session unmounted.
    Close,
    /// The driver finished closing the transport.
    TeardownComplete,
}

/// Work the driver performs on behalf of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchToken { generation: u64 },
    Dial { generation: u64, token: String },
    Transmit { generation: u64, text: String },
    ScheduleReconnect { delay: Duration },
    CancelReconnect,
    /// Close the transport with a normal (1000) close frame.
    CloseTransport { generation: u64 },
    /// Release the transport without a closing handshake.
    DropTransport { generation: u64 },
}

pub struct SessionState {
    welcome: ChatMessage,
    messages: Vec<ChatMessage>,
    connection: ConnectionState,
    loading: bool,
    draft: String,
    error: Option<SessionError>,
    retry: RetryContext,
    generation: u64,
    heartbeat: Option<Heartbeat>,
    /// Live messages appended since the current connection opened.
    live_since_open: usize,
    policy: ReconnectPolicy,
    heartbeat_config: HeartbeatConfig,
}

impl SessionState {
    pub fn new(welcome: ChatMessage, policy: ReconnectPolicy, heartbeat_config: HeartbeatConfig) -> Self {
        Self {
            messages: vec![welcome.clone()],
            welcome,
            connection: ConnectionState::Closed,
            loading: false,
            draft: String::new(),
            error: None,
            retry: RetryContext::default(),
            generation: 0,
            heartbeat: None,
            live_since_open: 0,
            policy,
            heartbeat_config,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connection: self.connection,
            messages: self.messages.clone(),
            loading: self.loading,
            draft: self.draft.clone(),
            error: self.error.clone(),
            attempt: self.retry.attempt_number,
            suppressed: self.retry.suppressed,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn retry(&self) -> &RetryContext {
        &self.retry
    }

    pub fn is_suppressed(&self) -> bool {
        self.retry.suppressed
    }

    /// When the heartbeat next needs a [`Event::Tick`], if it is running.
    pub fn heartbeat_deadline(&self) -> Option<Instant> {
        match self.connection {
            ConnectionState::Open => self.heartbeat.as_ref().map(Heartbeat::next_wake),
            _ => None,
        }
    }

    /// The session has fully shut down and will never act again.
    pub fn is_finished(&self) -> bool {
        self.retry.suppressed && self.connection == ConnectionState::Closed
    }

    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Connect => self.begin_attempt(),
            Event::Retry => self.manual_retry(),
            Event::ReconnectDue => self.begin_attempt(),
            Event::TokenIssued { generation, token } => {
                if !self.is_live(generation) {
                    return self.stale(generation, "token");
                }
                if token.trim().is_empty() {
                    warn!(generation, "token provider returned an empty token");
                    return self.auth_failed();
                }
                vec![Effect::Dial { generation, token }]
            }
            Event::TokenFailed { generation, reason } => {
                if !self.is_live(generation) {
                    return self.stale(generation, "token failure");
                }
                warn!(generation, err = %reason, "token acquisition failed");
                self.auth_failed()
            }
            Event::Opened { generation, now } => {
                if !self.is_live(generation) || self.connection != ConnectionState::Connecting {
                    return self.stale(generation, "open");
                }
                info!(generation, attempts = self.retry.attempt_number, "chat connection open");
                self.connection = ConnectionState::Open;
                self.error = None;
                self.retry.reset();
                self.live_since_open = 0;
                self.heartbeat = Some(Heartbeat::start(self.heartbeat_config, now));
                vec![]
            }
            Event::Frame { generation, text } => {
                if !self.is_live(generation) {
                    return self.stale(generation, "frame");
                }
                self.on_frame(&text);
                vec![]
            }
            Event::TransportError { generation, detail } => {
                if !self.is_live(generation) {
                    return self.stale(generation, "transport error");
                }
                warn!(generation, err = %detail, "chat transport error");
                self.error = Some(SessionError::Transport(detail));
                vec![]
            }
            Event::Closed { generation, code } => {
                if !self.is_live(generation) {
                    return self.stale(generation, "close");
                }
                self.on_close(code)
            }
            Event::Tick { now } => self.on_tick(now),
            Event::Draft(text) => {
                self.draft = text;
                vec![]
            }
            Event::Send(content) => self.on_send(&content),
            Event::Close => self.on_unmount(),
            Event::TeardownComplete => {
                if self.connection == ConnectionState::Closing {
                    self.connection = ConnectionState::Closed;
                }
                vec![]
            }
        }
    }

    /// Events for `generation` may still mutate state.
    fn is_live(&self, generation: u64) -> bool {
        !self.retry.suppressed
            && generation == self.generation
            && matches!(self.connection, ConnectionState::Connecting | ConnectionState::Open)
    }

    fn stale(&self, generation: u64, what: &str) -> Vec<Effect> {
        debug!(generation, current = self.generation, suppressed = self.retry.suppressed, "ignoring stale {what}");
        vec![]
    }

    fn begin_attempt(&mut self) -> Vec<Effect> {
        if self.retry.suppressed || self.connection != ConnectionState::Closed {
            debug!(state = %self.connection, suppressed = self.retry.suppressed, "connect skipped");
            return vec![];
        }
        self.generation += 1;
        self.connection = ConnectionState::Connecting;
        debug!(generation = self.generation, attempt = self.retry.attempt_number, "connecting");
        vec![Effect::FetchToken { generation: self.generation }]
    }

    /// A retry while an attempt is still pending abandons that attempt; its
    /// token, dial and frames become stale under the new generation.
    fn manual_retry(&mut self) -> Vec<Effect> {
        let retryable = matches!(self.connection, ConnectionState::Closed | ConnectionState::Connecting);
        if self.retry.suppressed || !retryable {
            debug!(state = %self.connection, suppressed = self.retry.suppressed, "retry skipped");
            return vec![];
        }
        if self.connection == ConnectionState::Connecting {
            info!(generation = self.generation, "abandoning pending connection attempt");
            self.connection = ConnectionState::Closed;
        }
        self.retry.reset();
        self.error = None;
        let mut effects = vec![Effect::CancelReconnect];
        effects.extend(self.begin_attempt());
        effects
    }

    fn auth_failed(&mut self) -> Vec<Effect> {
        self.connection = ConnectionState::Closed;
        self.loading = false;
        self.error = Some(SessionError::AuthFailed);
        // Outside a reconnect chain the user has to retry.
        if self.retry.attempt_number == 0 {
            return vec![];
        }
        match self.retry.schedule(&self.policy) {
            Some(delay) => vec![Effect::ScheduleReconnect { delay }],
            None => {
                warn!(attempts = self.retry.attempt_number, "giving up after authentication failures");
                self.error = Some(SessionError::RetriesExhausted);
                vec![]
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        match wire::decode(text) {
            Inbound::Pong => {
                if let Some(hb) = self.heartbeat.as_mut() {
                    hb.on_pong();
                }
            }
            Inbound::Malformed(reason) => {
                warn!(err = %reason, "received invalid chat frame");
                self.error = Some(SessionError::MalformedFrame);
                self.loading = false;
            }
            Inbound::Unrecognized(kind) => {
                debug!(kind = ?kind, "ignoring chat frame");
            }
            Inbound::Frame(ServerFrame::History { messages }) => {
                if self.live_since_open > 0 {
                    warn!(
                        dropped = self.live_since_open,
                        "history snapshot replaced messages received before it"
                    );
                }
                self.live_since_open = 0;
                let log = std::mem::take(&mut self.messages);
                self.messages = reconcile(log, &self.welcome, Incoming::History(&messages));
            }
            Inbound::Frame(ServerFrame::User { message }) | Inbound::Frame(ServerFrame::Ai { message }) => {
                if self.messages.iter().any(|m| m.id == message.id && !m.is_welcome()) {
                    debug!(id = message.id, "duplicate message id appended");
                }
                let log = std::mem::take(&mut self.messages);
                self.messages = reconcile(log, &self.welcome, Incoming::Live(&message));
                self.live_since_open += 1;
                self.loading = false;
            }
            Inbound::Frame(ServerFrame::Error { message }) => {
                warn!(err = %message, "server reported an error");
                self.error = Some(SessionError::Server(message));
                self.loading = false;
            }
        }
    }

    fn on_close(&mut self, code: u16) -> Vec<Effect> {
        let generation = self.generation;
        self.retry.last_close_code = Some(code);
        self.connection = ConnectionState::Closed;
        self.loading = false;
        self.heartbeat = None;
        let mut effects = vec![Effect::DropTransport { generation }];

        if code == NORMAL_CLOSURE {
            info!(generation, "chat connection closed normally");
            self.retry.suppress();
            return effects;
        }
        if !should_reconnect(code, self.retry.suppressed) {
            return effects;
        }
        match self.retry.schedule(&self.policy) {
            Some(delay) => {
                warn!(
                    generation,
                    code,
                    attempt = self.retry.attempt_number,
                    delay_ms = delay.as_millis() as u64,
                    "chat connection lost, reconnecting"
                );
                self.error = Some(SessionError::Reconnecting { attempt: self.retry.attempt_number, delay });
                effects.push(Effect::ScheduleReconnect { delay });
            }
            None => {
                warn!(generation, code, attempts = self.retry.attempt_number, "giving up on reconnect");
                self.error = Some(SessionError::RetriesExhausted);
            }
        }
        effects
    }

    fn on_tick(&mut self, now: Instant) -> Vec<Effect> {
        if self.connection != ConnectionState::Open {
            return vec![];
        }
        let Some(hb) = self.heartbeat.as_mut() else {
            return vec![];
        };
        match hb.poll(now) {
            Beat::Idle => vec![],
            Beat::Ping => vec![Effect::Transmit { generation: self.generation, text: PING.to_owned() }],
            Beat::TimedOut => {
                warn!(generation = self.generation, "heartbeat timed out, dropping connection");
                self.on_close(ABNORMAL_CLOSURE)
            }
        }
    }

    fn on_send(&mut self, content: &str) -> Vec<Effect> {
        if self.loading {
            debug!("send ignored while a reply is pending");
            return vec![];
        }
        let content = content.trim();
        if content.is_empty() {
            return vec![];
        }
        if self.connection != ConnectionState::Open {
            self.error = Some(SessionError::ConnectionUnavailable);
            return vec![];
        }
        self.loading = true;
        self.draft.clear();
        vec![Effect::Transmit { generation: self.generation, text: wire::encode_send(content) }]
    }

    fn on_unmount(&mut self) -> Vec<Effect> {
        self.retry.suppress();
        self.heartbeat = None;
        self.loading = false;
        let mut effects = vec![Effect::CancelReconnect];
        match self.connection {
            ConnectionState::Open => {
                self.connection = ConnectionState::Closing;
                effects.push(Effect::CloseTransport { generation: self.generation });
            }
            ConnectionState::Connecting => self.connection = ConnectionState::Closed,
            ConnectionState::Closing | ConnectionState::Closed => {}
        }
        effects
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
