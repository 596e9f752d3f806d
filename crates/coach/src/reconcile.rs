// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Merging server history and live messages into the session log.

use crate::message::ChatMessage;

/// Something the server delivered that affects the log.
#[derive(Debug, Clone, Copy)]
pub enum Incoming<'a> {
    /// Authoritative snapshot of past turns, oldest first.
    History(&'a [ChatMessage]),
    /// One newly produced turn.
    Live(&'a ChatMessage),
}

/// Produce the next log from `log` and `incoming`.
///
/// History replaces everything after the welcome message; any welcome copies
/// inside the snapshot are skipped. Live messages are appended as-is, with
/// no deduplication. Relative order of inputs is always preserved.
pub fn reconcile(
    mut log: Vec<ChatMessage>,
    welcome: &ChatMessage,
    incoming: Incoming<'_>,
) -> Vec<ChatMessage> {
    match incoming {
        Incoming::History(messages) => {
            let mut next = Vec::with_capacity(messages.len() + 1);
            next.push(welcome.clone());
            next.extend(messages.iter().filter(|m| !m.is_welcome()).cloned());
            next
        }
        Incoming::Live(message) => {
            log.push(message.clone());
            log
        }
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
