// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[test]
fn defaults_match_protocol() {
    let cfg = HeartbeatConfig::default();
    assert_eq!(cfg.interval, secs(25));
    assert_eq!(cfg.timeout, secs(30));
}

#[test]
fn idle_before_first_interval() {
    let t0 = Instant::now();
    let mut hb = Heartbeat::start(HeartbeatConfig::default(), t0);
    assert_eq!(hb.next_wake(), t0 + secs(25));
    assert_eq!(hb.poll(t0 + secs(24)), Beat::Idle);
    assert!(!hb.awaiting_pong());
}

#[test]
fn pings_on_interval_and_pong_clears_deadline() {
    let t0 = Instant::now();
    let mut hb = Heartbeat::start(HeartbeatConfig::default(), t0);

    assert_eq!(hb.poll(t0 + secs(25)), Beat::Ping);
    assert!(hb.awaiting_pong());
    assert_eq!(hb.next_wake(), t0 + secs(50));

    hb.on_pong();
    assert!(!hb.awaiting_pong());
    assert_eq!(hb.poll(t0 + secs(49)), Beat::Idle);
    assert_eq!(hb.poll(t0 + secs(50)), Beat::Ping);
}

#[test]
fn times_out_thirty_seconds_after_unanswered_ping() {
    let t0 = Instant::now();
    let mut hb = Heartbeat::start(HeartbeatConfig::default(), t0);

    assert_eq!(hb.poll(t0 + secs(25)), Beat::Ping);
    // A second ping goes out before the first one expires.
    assert_eq!(hb.poll(t0 + secs(50)), Beat::Ping);
    // Deadline still belongs to the first ping.
    assert_eq!(hb.next_wake(), t0 + secs(55));
    assert_eq!(hb.poll(t0 + secs(54)), Beat::Idle);
    assert_eq!(hb.poll(t0 + secs(55)), Beat::TimedOut);
}

#[test]
fn timeout_wins_over_due_ping() {
    let t0 = Instant::now();
    let cfg = HeartbeatConfig { interval: secs(10), timeout: secs(10) };
    let mut hb = Heartbeat::start(cfg, t0);
    assert_eq!(hb.poll(t0 + secs(10)), Beat::Ping);
    assert_eq!(hb.poll(t0 + secs(20)), Beat::TimedOut);
}
