// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session issuance/validation and the sliding-window rate limiter (C6).
//!
//! Sessions are continuity tokens, not authentication: validity is purely
//! syntactic (see DESIGN.md's Open Question #1). The password-gated plane
//! is the agent plane (C3), not the browser plane.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;

const SESSION_PREFIX: &str = "session_";
const SUFFIX_LEN: usize = 10;
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Issues opaque session ids of shape `session_<ms-epoch>_<10 lowercase alnum>`.
pub fn issue_session() -> String {
    let epoch_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{SESSION_PREFIX}{epoch_ms}_{suffix}")
}

/// Syntactic validation only: a `session_` prefix followed by a non-empty
/// suffix. No server-side session table is consulted.
pub fn validate_session(id: &str) -> bool {
    id.strip_prefix(SESSION_PREFIX).is_some_and(|rest| !rest.is_empty())
}

#[derive(Debug, Clone, Copy)]
pub enum RateLimitDecision {
    Admitted,
    Denied { retry_after: Duration },
}

pub struct RateLimiter {
    max_commands: usize,
    window: Duration,
    history: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_commands: u32, window: Duration) -> Self {
        Self { max_commands: max_commands as usize, window, history: Mutex::new(HashMap::new()) }
    }

    /// Evicts timestamps older than `window`, then admits if the remaining
    /// count is below `max_commands`.
    pub async fn check(&self, session_id: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut history = self.history.lock().await;
        let timestamps = history.entry(session_id.to_owned()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_commands {
            let oldest = timestamps[0];
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            return RateLimitDecision::Denied { retry_after };
        }

        timestamps.push(now);
        RateLimitDecision::Admitted
    }
}
