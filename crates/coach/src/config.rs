// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::heartbeat::HeartbeatConfig;
use crate::message::DEFAULT_WELCOME_TEXT;
use crate::policy::{ReconnectPolicy, MAX_RECONNECT_ATTEMPTS};
use crate::session::SessionConfig;
use crate::token::{CommandToken, StaticToken, TokenProvider};

/// Terminal client for the AI coach chat.
#[derive(Debug, Clone, Parser)]
#[command(name = "coach", version, about)]
pub struct Config {
    /// Chat WebSocket endpoint (ws:// or wss://, http(s) is mapped).
    #[arg(long, env = "COACH_WS_URL")]
    pub url: Option<String>,

    /// Fixed auth token.
    #[arg(long, env = "COACH_TOKEN")]
    pub token: Option<String>,

    /// Shell command whose stdout is a fresh auth token. Run on every connect.
    #[arg(long, env = "COACH_TOKEN_CMD")]
    pub token_cmd: Option<String>,

    /// User id shown on the welcome message.
    #[arg(long, env = "COACH_USER_ID", default_value = "")]
    pub user_id: String,

    /// Override the welcome message text.
    #[arg(long, env = "COACH_WELCOME")]
    pub welcome: Option<String>,

    /// Automatic reconnect attempts before giving up.
    #[arg(long, env = "COACH_MAX_RECONNECTS", default_value_t = MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnects: u32,

    /// Log format (json or text).
    #[arg(long, env = "COACH_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level.
    #[arg(long, env = "COACH_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    // -- Timing overrides (not CLI-exposed; set in tests) ---------------------
    #[clap(skip)]
    pub heartbeat_interval_ms: Option<u64>,
    #[clap(skip)]
    pub pong_timeout_ms: Option<u64>,
    #[clap(skip)]
    pub reconnect_base_ms: Option<u64>,
    #[clap(skip)]
    pub reconnect_cap_ms: Option<u64>,
    #[clap(skip)]
    pub connect_timeout_ms: Option<u64>,
}

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            anyhow::bail!("--url (or COACH_WS_URL) must be specified");
        }
        if self.token.is_some() && self.token_cmd.is_some() {
            anyhow::bail!("cannot specify both --token and --token-cmd");
        }

        let knobs = [
            ("heartbeat interval", self.heartbeat_interval()),
            ("pong timeout", self.pong_timeout()),
            ("reconnect base delay", self.reconnect_base()),
            ("reconnect cap", self.reconnect_cap()),
            ("connect timeout", self.connect_timeout()),
        ];
        for (name, value) in knobs {
            if value.is_zero() {
                anyhow::bail!("{name} must be greater than zero");
            }
        }
        if self.reconnect_cap() < self.reconnect_base() {
            anyhow::bail!("reconnect cap must not be below the base delay");
        }

        Ok(())
    }

    // -- Tuning knobs (field override → env var → compiled default) --------

    duration_field!(heartbeat_interval, heartbeat_interval_ms, "COACH_HEARTBEAT_MS", 25_000);
    duration_field!(pong_timeout, pong_timeout_ms, "COACH_PONG_TIMEOUT_MS", 30_000);
    duration_field!(reconnect_base, reconnect_base_ms, "COACH_RECONNECT_BASE_MS", 1_000);
    duration_field!(reconnect_cap, reconnect_cap_ms, "COACH_RECONNECT_CAP_MS", 10_000);
    duration_field!(connect_timeout, connect_timeout_ms, "COACH_CONNECT_TIMEOUT_MS", 10_000);

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.url.clone().unwrap_or_default(),
            user_id: self.user_id.clone(),
            welcome_text: self.welcome.clone().unwrap_or_else(|| DEFAULT_WELCOME_TEXT.to_owned()),
            reconnect: ReconnectPolicy {
                base: self.reconnect_base(),
                cap: self.reconnect_cap(),
                max_attempts: self.max_reconnects,
            },
            heartbeat: HeartbeatConfig {
                interval: self.heartbeat_interval(),
                timeout: self.pong_timeout(),
            },
            connect_timeout: self.connect_timeout(),
        }
    }

    /// `--token-cmd` wins over `--token`; with neither, connects fail with an auth error.
    pub fn token_provider(&self) -> Arc<dyn TokenProvider> {
        match (&self.token_cmd, &self.token) {
            (Some(cmd), _) => Arc::new(CommandToken::new(cmd.clone())),
            (None, Some(token)) => Arc::new(StaticToken::new(token.clone())),
            (None, None) => Arc::new(StaticToken::none()),
        }
    }

    /// Build a minimal `Config` for tests with fast timings.
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            url: Some("ws://127.0.0.1:0/ws".into()),
            token: Some("test-token".into()),
            token_cmd: None,
            user_id: "user-1".into(),
            welcome: None,
            max_reconnects: 3,
            log_format: "json".into(),
            log_level: "debug".into(),
            heartbeat_interval_ms: Some(50),
            pong_timeout_ms: Some(150),
            reconnect_base_ms: Some(20),
            reconnect_cap_ms: Some(200),
            connect_timeout_ms: Some(500),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
