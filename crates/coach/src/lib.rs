// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod policy;
pub mod reconcile;
pub mod session;
pub mod state;
pub mod test_support;
pub mod token;
pub mod wire;
