//! Control-flow signals raised from inside a handler.
//!
//! A handler returns [`Flow`].  `Ok(())` is a normal completion; the
//! [`Interrupt`] variants abort the invocation and are interpreted by the
//! [`Receiver`](crate::Receiver), never beyond it.

use std::fmt;
use std::sync::Arc;

use bl_domain::event::ReplyTarget;

/// Result type returned by handlers and session accessors that may end the
/// conversation.
pub type Flow<T = ()> = Result<T, Interrupt>;

#[derive(thiserror::Error, Debug)]
pub enum Interrupt {
    /// Drop whatever the session was waiting for; the next event is treated
    /// as fresh input.  The session stays open.
    #[error("session {session_id} rejected input")]
    Reject { session_id: String },

    /// Close the session, optionally sending a farewell.
    #[error("session finished")]
    Finish {
        session_id: Option<String>,
        farewell: Option<Farewell>,
    },

    /// Any other failure.  Logged at the receiver boundary and swallowed.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<bl_domain::Error> for Interrupt {
    fn from(e: bl_domain::Error) -> Self {
        Self::Failed(anyhow::Error::new(e))
    }
}

impl Interrupt {
    /// End the invocation without a session or farewell.
    pub fn finish() -> Self {
        Self::Finish {
            session_id: None,
            farewell: None,
        }
    }
}

/// A farewell ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Farewell {
    pub target: ReplyTarget,
    pub text: String,
}

/// Where a session's default farewell comes from.
#[derive(Clone)]
pub enum FarewellSource {
    Text(String),
    Producer(Arc<dyn Fn() -> String + Send + Sync>),
}

impl FarewellSource {
    pub fn producer(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self::Producer(Arc::new(f))
    }

    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Producer(f) => f(),
        }
    }
}

impl From<&str> for FarewellSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for FarewellSource {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl fmt::Debug for FarewellSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_become_failures() {
        let flow: Flow = Err(bl_domain::Error::SelfSession.into());
        match flow {
            Err(Interrupt::Failed(e)) => assert!(e.to_string().contains("itself")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn producer_is_evaluated_lazily() {
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = counter.clone();
        let source = FarewellSource::producer(move || {
            let n = c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            format!("bye #{n}")
        });
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(source.render(), "bye #0");
        assert_eq!(source.render(), "bye #1");
    }
}
