// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::time::Duration;

/// The session's single user-visible error slot. Latest error wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Token provider failed or returned no token.
    AuthFailed,
    /// Send attempted while the connection is not open.
    ConnectionUnavailable,
    /// Generic socket error. The close that follows decides about retries.
    Transport(String),
    /// Abnormal close; a reconnect is scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect attempts used up; needs a manual retry.
    RetriesExhausted,
    /// Inbound frame was not valid JSON or had the wrong shape.
    MalformedFrame,
    /// `error` frame from the server.
    Server(String),
}

impl SessionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailed => "AUTH_FAILED",
            Self::ConnectionUnavailable => "CONNECTION_UNAVAILABLE",
            Self::Transport(_) => "TRANSPORT",
            Self::Reconnecting { .. } => "RECONNECTING",
            Self::RetriesExhausted => "RETRIES_EXHAUSTED",
            Self::MalformedFrame => "MALFORMED_FRAME",
            Self::Server(_) => "SERVER",
        }
    }

    /// Terminal errors stop automatic recovery; the user has to retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RetriesExhausted)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthFailed => f.write_str("Authentication failed"),
            Self::ConnectionUnavailable => {
                f.write_str("Connection not available. Please try again in a moment.")
            }
            Self::Transport(_) => f.write_str("Connection error"),
            Self::Reconnecting { .. } => f.write_str("Connection lost. Reconnecting..."),
            Self::RetriesExhausted => {
                f.write_str("Unable to reconnect. Retry manually or reload the chat.")
            }
            Self::MalformedFrame => f.write_str("Received invalid message format"),
            Self::Server(message) => f.write_str(message),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
