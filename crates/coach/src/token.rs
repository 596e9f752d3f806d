// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer token providers.
//!
//! The session asks its provider for a fresh token before every connection
//! attempt. `Ok(None)`, an empty token and `Err` all count as an
//! authentication failure for that attempt.

use std::future::Future;
use std::pin::Pin;

pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send + 'a>>;

pub trait TokenProvider: Send + Sync + 'static {
    fn token(&self) -> TokenFuture<'_>;
}

/// A fixed credential (or none at all).
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> TokenFuture<'_> {
        let token = self.0.clone();
        Box::pin(async move { Ok(token) })
    }
}

/// Runs a shell command per attempt and uses its trimmed stdout.
///
/// Lets short-lived tokens come from an external helper (a keychain lookup,
/// a refresh script).
#[derive(Debug, Clone)]
pub struct CommandToken {
    cmd: String,
}

impl CommandToken {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

impl TokenProvider for CommandToken {
    fn token(&self) -> TokenFuture<'_> {
        Box::pin(async move {
            let output = tokio::process::Command::new("sh")
                .args(["-c", &self.cmd])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .output()
                .await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                anyhow::bail!("token command failed ({}): {}", output.status, stderr.trim());
            }
            let token = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            Ok((!token.is_empty()).then_some(token))
        })
    }
}

/// Adapts an async closure into a [`TokenProvider`].
pub struct TokenFn<F>(F);

impl<F> TokenFn<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> TokenProvider for TokenFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
{
    fn token(&self) -> TokenFuture<'_> {
        Box::pin((self.0)())
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
