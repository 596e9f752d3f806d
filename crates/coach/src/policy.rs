// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect decisions: whether a closed connection should be retried, and
//! how long to wait before the next attempt.

use std::time::Duration;

/// Intentional close. Never retried.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close frame carried no status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Transport went away without a close frame (reset, EOF, dead peer).
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Default cap on scheduled reconnect attempts before the error is terminal.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Whether a close with `close_code` should be followed by a reconnect.
pub fn should_reconnect(close_code: u16, suppressed: bool) -> bool {
    !suppressed && close_code != NORMAL_CLOSURE
}

/// Default backoff: 1s, 2s, 4s, 8s, then 10s for every later attempt.
pub fn next_delay(attempt: u32) -> Duration {
    ReconnectPolicy::default().delay(attempt)
}

/// Exponential backoff parameters plus the attempt cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            cap: Duration::from_millis(10_000),
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^attempt, cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(20);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Retry bookkeeping for one session. Survives reconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    pub attempt_number: u32,
    pub last_close_code: Option<u16>,
    pub suppressed: bool,
}

impl RetryContext {
    /// Delay for the next attempt, advancing the counter.
    ///
    /// Returns `None` once `policy.max_attempts` attempts have been scheduled.
    pub fn schedule(&mut self, policy: &ReconnectPolicy) -> Option<Duration> {
        if self.attempt_number >= policy.max_attempts {
            return None;
        }
        let delay = policy.delay(self.attempt_number);
        self.attempt_number += 1;
        Some(delay)
    }

    /// A connection reached Open.
    pub fn reset(&mut self) {
        self.attempt_number = 0;
    }

    pub fn suppress(&mut self) {
        self.suppressed = true;
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
