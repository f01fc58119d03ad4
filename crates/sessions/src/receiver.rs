//! One registered handler plus the sessions its invocations own.
//!
//! For every inbound event the receiver:
//!
//! 1. ignores events sent by the bot itself;
//! 2. sweeps dropped and closed sessions from its registry;
//! 3. if no session is live but the handler is known to use sessions and
//!    its last invocation is still running, waits a bounded grace period
//!    for that invocation to open a session or finish;
//! 4. offers the event to the first live session it correlates with;
//! 5. otherwise starts a fresh handler invocation.
//!
//! [`Interrupt`]s and failures raised by the handler stop here.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bl_domain::config::{DispatchConfig, SessionsConfig};
use bl_domain::event::InboundEvent;
use bl_domain::trace::TraceEvent;

use crate::context::Context;
use crate::flow::{Flow, Interrupt};
use crate::outbound::{deliver_text, NoopOutbound, Outbound};
use crate::registry::SessionRegistry;
use crate::session::SessionInfo;
use crate::session_id::SessionId;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A cooperative handler.  Runs as an ordinary task on the runtime.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, cx: Context) -> Flow;
}

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Flow> + Send + 'static,
{
    async fn handle(&self, cx: Context) -> Flow {
        (self)(cx).await
    }
}

/// A synchronous handler.  Runs on the bounded blocking pool; use
/// [`Context::block_on`] to await session calls.
pub trait BlockingHandler: Send + Sync + 'static {
    fn handle(&self, cx: Context) -> Flow;
}

impl<F> BlockingHandler for F
where
    F: Fn(Context) -> Flow + Send + Sync + 'static,
{
    fn handle(&self, cx: Context) -> Flow {
        (self)(cx)
    }
}

enum Callback {
    Async(Arc<dyn Handler>),
    Blocking(Arc<dyn BlockingHandler>),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Receiver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Descriptive metadata, used in logs and listings.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReceiverInfo {
    pub name: String,
    pub author: String,
    pub usage: String,
}

/// State shared between a receiver and the contexts it hands out.
pub(crate) struct ReceiverShared {
    pub(crate) name: String,
    pub(crate) registry: SessionRegistry,
    pub(crate) settings: SessionsConfig,
    pub(crate) outbound: Arc<dyn Outbound>,
    /// Set up front, or learned the first time an invocation opens a session.
    pub(crate) uses_sessions: AtomicBool,
}

/// A running (or finished) fresh invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: String,
    done: CancellationToken,
}

impl Invocation {
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once the handler has returned and its outcome was handled.
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }
}

/// What [`Receiver::receive`] did with an event.
#[derive(Debug, Clone)]
pub enum Outcome {
    IgnoredSelf,
    Delivered(SessionId),
    Invoked(Invocation),
}

impl Outcome {
    pub fn invocation(&self) -> Option<&Invocation> {
        match self {
            Self::Invoked(inv) => Some(inv),
            _ => None,
        }
    }

    pub fn delivered_to(&self) -> Option<SessionId> {
        match self {
            Self::Delivered(id) => Some(*id),
            _ => None,
        }
    }
}

pub struct Receiver {
    info: ReceiverInfo,
    callback: Callback,
    shared: Arc<ReceiverShared>,
    last_invocation: Mutex<Option<CancellationToken>>,
    pool: Arc<Semaphore>,
}

impl Receiver {
    pub fn builder(name: impl Into<String>) -> ReceiverBuilder {
        ReceiverBuilder::new(name)
    }

    pub fn info(&self) -> &ReceiverInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn uses_sessions(&self) -> bool {
        self.shared.uses_sessions.load(Ordering::Acquire)
    }

    /// Snapshot of the sessions currently open on this receiver.
    pub fn live_sessions(&self) -> Vec<SessionInfo> {
        self.shared.registry.live()
    }

    /// Route one inbound event.  Returns as soon as the event was
    /// delivered or a fresh invocation was spawned.
    pub async fn receive(&self, event: Arc<InboundEvent>) -> Outcome {
        if event.is_from_self() {
            tracing::trace!(receiver = %self.info.name, "ignoring own event");
            TraceEvent::SelfEventIgnored {
                receiver: self.info.name.clone(),
                bot_id: event.bot_id,
            }
            .emit();
            return Outcome::IgnoredSelf;
        }

        for (id, reason) in self.shared.registry.collect() {
            tracing::debug!(receiver = %self.info.name, session_id = %id, reason = reason.as_str(), "session collected");
            TraceEvent::SessionCollected {
                receiver: self.info.name.clone(),
                session_id: id.to_string(),
                reason: reason.as_str().into(),
            }
            .emit();
        }

        self.wait_for_pending_session().await;

        if let Some(session) = self.shared.registry.correlate(&event) {
            if session.add_event(&event) {
                let id = session.id();
                tracing::debug!(receiver = %self.info.name, session_id = %id, kind = %event.kind, "event delivered");
                TraceEvent::EventDelivered {
                    receiver: self.info.name.clone(),
                    session_id: id.to_string(),
                    kind: event.kind.to_string(),
                }
                .emit();
                return Outcome::Delivered(id);
            }
        }

        Outcome::Invoked(self.invoke(event))
    }

    /// Best-effort grace period: an invocation that has not yet opened its
    /// session would otherwise see its own follow-up start a second
    /// invocation.
    async fn wait_for_pending_session(&self) {
        if !self.uses_sessions() || !self.shared.registry.is_empty() {
            return;
        }
        let Some(last) = self.last_invocation.lock().clone() else {
            return;
        };
        if last.is_cancelled() {
            return;
        }

        let created = self.shared.registry.created();
        tokio::pin!(created);
        created.as_mut().enable();
        if !self.shared.registry.is_empty() {
            return;
        }

        let grace = self.shared.settings.grace_period();
        let started = Instant::now();
        tokio::select! {
            _ = last.cancelled() => {}
            _ = created => {}
            _ = tokio::time::sleep(grace) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::debug!(receiver = %self.info.name, waited_ms, "grace period elapsed");
                TraceEvent::GracePeriodElapsed {
                    receiver: self.info.name.clone(),
                    waited_ms,
                }
                .emit();
            }
        }
    }

    fn invoke(&self, event: Arc<InboundEvent>) -> Invocation {
        let invocation_id = uuid::Uuid::new_v4().to_string();
        let done = CancellationToken::new();
        *self.last_invocation.lock() = Some(done.clone());

        let blocking = matches!(self.callback, Callback::Blocking(_));
        TraceEvent::InvocationStarted {
            receiver: self.info.name.clone(),
            invocation_id: invocation_id.clone(),
            blocking,
        }
        .emit();

        let cx = Context::new(
            event,
            invocation_id.clone(),
            self.shared.clone(),
            tokio::runtime::Handle::current(),
        );
        let shared = self.shared.clone();
        let guard = done.clone().drop_guard();
        let span = tracing::info_span!(
            "invocation",
            receiver = %self.info.name,
            %invocation_id,
            blocking,
        );
        let id = invocation_id.clone();

        match &self.callback {
            Callback::Async(handler) => {
                let handler = handler.clone();
                tokio::spawn(tracing::Instrument::instrument(
                    async move {
                        let _guard = guard;
                        let result = AssertUnwindSafe(Handler::handle(handler.as_ref(), cx))
                            .catch_unwind()
                            .await;
                        settle(&shared, &id, result).await;
                    },
                    span,
                ));
            }
            Callback::Blocking(handler) => {
                let handler = handler.clone();
                let pool = self.pool.clone();
                let blocking_span = span.clone();
                tokio::spawn(tracing::Instrument::instrument(
                    async move {
                        let _guard = guard;
                        let _permit = match pool.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => {
                                tracing::error!("blocking pool closed, dropping invocation");
                                return;
                            }
                        };
                        let joined = tokio::task::spawn_blocking(move || {
                            blocking_span.in_scope(|| {
                                std::panic::catch_unwind(AssertUnwindSafe(|| {
                                    BlockingHandler::handle(handler.as_ref(), cx)
                                }))
                            })
                        })
                        .await;
                        match joined {
                            Ok(result) => settle(&shared, &id, result).await,
                            Err(e) => tracing::error!(error = %e, "blocking invocation join failed"),
                        }
                    },
                    span,
                ));
            }
        }

        Invocation {
            id: invocation_id,
            done,
        }
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("name", &self.info.name)
            .field("sessions", &self.shared.registry.len())
            .finish()
    }
}

/// Interpret how an invocation ended.  Nothing escapes from here.
async fn settle(shared: &ReceiverShared, invocation_id: &str, result: std::thread::Result<Flow>) {
    match result {
        Ok(Ok(())) => tracing::debug!("invocation finished"),
        Ok(Err(Interrupt::Reject { session_id })) => {
            tracing::debug!(%session_id, "session rejected input");
            TraceEvent::SessionRejected {
                receiver: shared.name.clone(),
                session_id,
            }
            .emit();
        }
        Ok(Err(Interrupt::Finish {
            session_id,
            farewell,
        })) => {
            let sent = farewell.is_some();
            if let Some(farewell) = farewell {
                deliver_text(shared.outbound.as_ref(), farewell.target, &farewell.text).await;
            }
            if let Some(session_id) = session_id {
                tracing::debug!(%session_id, farewell = sent, "session finished");
                TraceEvent::SessionFinished {
                    receiver: shared.name.clone(),
                    session_id,
                    farewell: sent,
                }
                .emit();
            }
        }
        Ok(Err(Interrupt::Failed(e))) => {
            let error = format!("{e:#}");
            tracing::error!(error = %error, "handler failed");
            TraceEvent::InvocationFailed {
                receiver: shared.name.clone(),
                invocation_id: invocation_id.to_owned(),
                error,
            }
            .emit();
        }
        Err(panic) => {
            let error = panic_message(panic.as_ref());
            tracing::error!(error = %error, "handler panicked");
            TraceEvent::InvocationFailed {
                receiver: shared.name.clone(),
                invocation_id: invocation_id.to_owned(),
                error,
            }
            .emit();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".into()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ReceiverBuilder {
    info: ReceiverInfo,
    uses_sessions: bool,
    settings: SessionsConfig,
    outbound: Arc<dyn Outbound>,
    pool: Option<Arc<Semaphore>>,
}

impl ReceiverBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            info: ReceiverInfo {
                name: name.into(),
                ..Default::default()
            },
            uses_sessions: false,
            settings: SessionsConfig::default(),
            outbound: Arc::new(NoopOutbound),
            pool: None,
        }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.info.author = author.into();
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.info.usage = usage.into();
        self
    }

    /// Declare up front that the handler opens sessions, enabling the
    /// grace period before its first session exists.
    pub fn uses_sessions(mut self, uses: bool) -> Self {
        self.uses_sessions = uses;
        self
    }

    pub fn settings(mut self, settings: SessionsConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn outbound(mut self, outbound: Arc<dyn Outbound>) -> Self {
        self.outbound = outbound;
        self
    }

    /// Share a blocking pool between receivers.
    pub fn blocking_pool(mut self, pool: Arc<Semaphore>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn handler(self, handler: impl Handler) -> Receiver {
        self.build(Callback::Async(Arc::new(handler)))
    }

    pub fn blocking_handler(self, handler: impl BlockingHandler) -> Receiver {
        self.build(Callback::Blocking(Arc::new(handler)))
    }

    fn build(self, callback: Callback) -> Receiver {
        let pool = self
            .pool
            .unwrap_or_else(|| Arc::new(Semaphore::new(DispatchConfig::default().blocking_workers)));
        Receiver {
            shared: Arc::new(ReceiverShared {
                name: self.info.name.clone(),
                registry: SessionRegistry::new(),
                settings: self.settings,
                outbound: self.outbound,
                uses_sessions: AtomicBool::new(self.uses_sessions),
            }),
            info: self.info,
            callback,
            last_invocation: Mutex::new(None),
            pool,
        }
    }
}
