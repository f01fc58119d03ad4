use serde::Serialize;

/// Structured trace events emitted across all botline crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SelfEventIgnored {
        receiver: String,
        bot_id: u64,
    },
    SessionStarted {
        receiver: String,
        session_id: String,
    },
    SessionCollected {
        receiver: String,
        session_id: String,
        /// `"dropped"` or `"closed"`.
        reason: String,
    },
    SessionFinished {
        receiver: String,
        session_id: String,
        farewell: bool,
    },
    SessionRejected {
        receiver: String,
        session_id: String,
    },
    EventDelivered {
        receiver: String,
        session_id: String,
        kind: String,
    },
    GracePeriodElapsed {
        receiver: String,
        waited_ms: u64,
    },
    InvocationStarted {
        receiver: String,
        invocation_id: String,
        blocking: bool,
    },
    InvocationFailed {
        receiver: String,
        invocation_id: String,
        error: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "bl_event");
    }
}
