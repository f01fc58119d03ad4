use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversational sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timing rules for conversational sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// How long a single `text()` / `get()` style call waits for the user
    /// when the caller does not pass an explicit timeout.
    #[serde(default = "d_default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Idle time after which a session reports itself closed.  Independent
    /// of any single call's timeout.
    #[serde(default = "d_expiration_secs")]
    pub expiration_secs: u64,

    /// How long a receiver waits for its previous invocation to open a
    /// session before treating an event as fresh input.
    #[serde(default = "d_grace_period_ms")]
    pub grace_period_ms: u64,

    /// When `true`, events are only captured while the handler is actively
    /// waiting for one.  When `false`, early replies are buffered.
    #[serde(default = "d_true")]
    pub skip_responder: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: d_default_timeout_secs(),
            expiration_secs: d_expiration_secs(),
            grace_period_ms: d_grace_period_ms(),
            skip_responder: true,
        }
    }
}

impl SessionsConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_default_timeout_secs() -> u64 {
    30
}
fn d_expiration_secs() -> u64 {
    10 * 60
}
fn d_grace_period_ms() -> u64 {
    2_000
}
fn d_true() -> bool {
    true
}
