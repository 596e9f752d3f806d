// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness ping/pong tracking for an open connection.
//!
//! The monitor is a plain value driven by explicit instants: the session asks
//! it when to wake up next and what to do at that point. Dropping it stops
//! the heartbeat.

use std::time::Duration;

use tokio::time::Instant;

/// Liveness ping sent to the server.
pub const PING: &str = "ping";

/// Liveness reply expected from the server.
pub const PONG: &str = "pong";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings.
    pub interval: Duration,
    /// How long a ping may go unanswered.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(25), timeout: Duration::from_secs(30) }
    }
}

/// What the caller should do after polling the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    Idle,
    Ping,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    next_ping: Instant,
    /// Deadline of the oldest unanswered ping.
    pong_deadline: Option<Instant>,
}

impl Heartbeat {
    /// Start monitoring a connection that opened at `now`.
    pub fn start(config: HeartbeatConfig, now: Instant) -> Self {
        Self { config, next_ping: now + config.interval, pong_deadline: None }
    }

    /// Earliest instant at which `poll` has something to do.
    pub fn next_wake(&self) -> Instant {
        match self.pong_deadline {
            Some(deadline) => deadline.min(self.next_ping),
            None => self.next_ping,
        }
    }

    pub fn poll(&mut self, now: Instant) -> Beat {
        if self.pong_deadline.is_some_and(|deadline| now >= deadline) {
            return Beat::TimedOut;
        }
        if now < self.next_ping {
            return Beat::Idle;
        }
        self.next_ping = now + self.config.interval;
        if self.pong_deadline.is_none() {
            self.pong_deadline = Some(now + self.config.timeout);
        }
        Beat::Ping
    }

    /// A pong answers every outstanding ping.
    pub fn on_pong(&mut self) {
        self.pong_deadline = None;
    }

    pub fn awaiting_pong(&self) -> bool {
        self.pong_deadline.is_some()
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
