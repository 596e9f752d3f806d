// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use coach::config::Config;
use coach::error::SessionError;
use coach::message::ChatMessage;
use coach::session::ChatSession;
use coach::state::{ConnectionState, Snapshot};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    if let Err(e) = run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let session = ChatSession::spawn(config.session_config(), config.token_provider());
    info!(endpoint = config.url.as_deref().unwrap_or_default(), "chat session started");

    let mut updates = session.watch();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut transcript = Transcript::default();
    transcript.render(&session.snapshot())?;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                transcript.render(&snapshot)?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/retry" => session.retry().await?,
                    _ => {
                        session.set_draft(line.clone()).await?;
                        session.send(line).await?;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close().await;
    Ok(())
}

/// Plain-text rendering of the session onto stdout.
#[derive(Default)]
struct Transcript {
    shown: Vec<i64>,
    connection: Option<ConnectionState>,
    error: Option<SessionError>,
}

impl Transcript {
    fn render(&mut self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();

        if self.connection != Some(snapshot.connection) {
            writeln!(out, "-- {} --", snapshot.connection)?;
            self.connection = Some(snapshot.connection);
        }

        // A history snapshot replaces the log; redraw it from the top.
        let prefix_kept = self.shown.len() <= snapshot.messages.len()
            && self.shown.iter().zip(&snapshot.messages).all(|(id, m)| *id == m.id);
        if !prefix_kept {
            writeln!(out, "-- history --")?;
            self.shown.clear();
        }
        for message in snapshot.messages.iter().skip(self.shown.len()) {
            print_message(&mut out, message)?;
            self.shown.push(message.id);
        }

        if snapshot.error != self.error {
            if let Some(err) = &snapshot.error {
                writeln!(out, "!! {err}")?;
                if err.is_terminal() {
                    writeln!(out, "!! type /retry to reconnect")?;
                }
            }
            self.error = snapshot.error.clone();
        }

        out.flush()?;
        Ok(())
    }
}

fn print_message(out: &mut impl Write, message: &ChatMessage) -> std::io::Result<()> {
    writeln!(out, "[{}] {}", message.role, message.content)
}
