use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fan-out and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of synchronous handler invocations running at once.
    /// Async handlers are not limited by this pool.
    #[serde(default = "d_blocking_workers")]
    pub blocking_workers: usize,

    /// Bot account ID stamped on events that arrive without one.
    #[serde(default)]
    pub bot_id: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            blocking_workers: d_blocking_workers(),
            bot_id: None,
        }
    }
}

fn d_blocking_workers() -> usize {
    8
}
