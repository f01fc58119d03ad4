//! Per-invocation context handed to a handler.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bl_domain::error::{Error, Result};
use bl_domain::event::{InboundEvent, ReplyTarget};
use bl_domain::trace::TraceEvent;

use crate::handle::SessionHandle;
use crate::outbound::deliver_text;
use crate::receiver::ReceiverShared;
use crate::session::Session;
use crate::session_id::{compute_session_id, SessionId, SessionScope};

/// The event that triggered a fresh invocation, plus the entry points a
/// handler needs to reply or open a conversation.
pub struct Context {
    event: Arc<InboundEvent>,
    invocation_id: String,
    shared: Arc<ReceiverShared>,
    runtime: tokio::runtime::Handle,
}

impl Context {
    pub(crate) fn new(
        event: Arc<InboundEvent>,
        invocation_id: String,
        shared: Arc<ReceiverShared>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            event,
            invocation_id,
            shared,
            runtime,
        }
    }

    pub fn event(&self) -> &InboundEvent {
        &self.event
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn receiver_name(&self) -> &str {
        &self.shared.name
    }

    /// Reply to the triggering event.  Generic events have no reply
    /// address; the text is dropped with a warning.
    pub async fn reply(&self, text: &str) {
        match ReplyTarget::from_event(&self.event) {
            Some(target) => deliver_text(self.shared.outbound.as_ref(), target, text).await,
            None => tracing::warn!(
                receiver = %self.shared.name,
                invocation_id = %self.invocation_id,
                "no reply address for generic event"
            ),
        }
    }

    /// Open a session for the current event under `scope`.
    pub fn start_session(&self, scope: SessionScope) -> Result<SessionHandle> {
        if self.event.is_from_self() {
            return Err(Error::SelfSession);
        }
        let id = compute_session_id(&self.event, scope)?;
        self.open(id)
    }

    /// Open a session under an explicit ID, e.g. to continue the
    /// conversation in a user's private chat.
    pub fn start_session_for(&self, id: SessionId) -> Result<SessionHandle> {
        if self.event.is_from_self() {
            return Err(Error::SelfSession);
        }
        self.open(id)
    }

    fn open(&self, id: SessionId) -> Result<SessionHandle> {
        let session = Arc::new(Session::new(id, &self.shared.settings));
        self.shared.registry.insert(&session)?;
        self.shared.uses_sessions.store(true, Ordering::Release);

        tracing::debug!(
            receiver = %self.shared.name,
            invocation_id = %self.invocation_id,
            session_id = %id,
            "session started"
        );
        TraceEvent::SessionStarted {
            receiver: self.shared.name.clone(),
            session_id: id.to_string(),
        }
        .emit();

        Ok(SessionHandle::new(session, self.shared.outbound.clone()))
    }

    /// Drive an async session call from a blocking handler.
    ///
    /// Only valid inside [`BlockingHandler::handle`](crate::BlockingHandler);
    /// calling it from an async handler panics.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("receiver", &self.shared.name)
            .field("invocation_id", &self.invocation_id)
            .field("kind", &self.event.kind)
            .finish()
    }
}
