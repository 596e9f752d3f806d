// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat message model shared by the wire codec, the reconciler and the UI.

use serde::{Deserialize, Serialize};

/// Id reserved for the client-side welcome message.
pub const WELCOME_ID: i64 = 0;

/// Session id reserved for the client-side welcome message.
pub const WELCOME_SESSION_ID: &str = "welcome";

/// Greeting used when the embedder does not supply one.
pub const DEFAULT_WELCOME_TEXT: &str =
    "Hi! I'm your AI coach. Ask me anything about your habits, goals or progress.";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of the conversation. Immutable once created.
///
/// Ordering within a session is append order, never `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    /// ISO-8601, possibly client-generated.
    pub timestamp: String,
}

impl ChatMessage {
    /// Build the synthetic greeting that heads every session's log.
    pub fn welcome(user_id: &str, text: &str) -> Self {
        Self {
            id: WELCOME_ID,
            user_id: user_id.to_owned(),
            session_id: WELCOME_SESSION_ID.to_owned(),
            role: Role::Ai,
            content: text.to_owned(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_welcome(&self) -> bool {
        self.id == WELCOME_ID && self.session_id == WELCOME_SESSION_ID
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
