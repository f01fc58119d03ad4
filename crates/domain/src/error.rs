/// Shared error type used across all botline crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic (non-message) events carry no stable conversation identity.
    #[error("unsupported scope: {0}")]
    UnsupportedScope(String),

    #[error("session already exists: {session_id}")]
    DuplicateSession { session_id: String },

    #[error("the bot cannot open a session with itself")]
    SelfSession,

    #[error("session {session_id} does not capture {kind} events")]
    KindNotCaptured { session_id: String, kind: String },

    #[error("outbound: {0}")]
    Outbound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
