//! Fan-out of inbound events to every registered receiver.
//!
//! Each receiver gets its own task per event, so a receiver waiting out a
//! grace period never delays the others.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use bl_domain::config::{Config, SessionsConfig};
use bl_domain::event::InboundEvent;

use crate::outbound::Outbound;
use crate::receiver::{Outcome, Receiver, ReceiverBuilder};

pub struct Dispatcher {
    settings: SessionsConfig,
    outbound: Arc<dyn Outbound>,
    pool: Arc<Semaphore>,
    receivers: RwLock<Vec<Arc<Receiver>>>,
}

impl Dispatcher {
    pub fn new(config: &Config, outbound: Arc<dyn Outbound>) -> Self {
        tracing::debug!(
            blocking_workers = config.dispatch.blocking_workers,
            grace_period_ms = config.sessions.grace_period_ms,
            "dispatcher created"
        );
        Self {
            settings: config.sessions.clone(),
            outbound,
            pool: Arc::new(Semaphore::new(config.dispatch.blocking_workers)),
            receivers: RwLock::new(Vec::new()),
        }
    }

    /// A receiver builder pre-wired with this dispatcher's settings,
    /// outbound client and blocking pool.
    pub fn receiver(&self, name: impl Into<String>) -> ReceiverBuilder {
        Receiver::builder(name)
            .settings(self.settings.clone())
            .outbound(self.outbound.clone())
            .blocking_pool(self.pool.clone())
    }

    pub fn register(&self, receiver: Receiver) -> Arc<Receiver> {
        let receiver = Arc::new(receiver);
        tracing::info!(
            receiver = %receiver.name(),
            author = %receiver.info().author,
            "receiver registered"
        );
        self.receivers.write().push(receiver.clone());
        receiver
    }

    pub fn receivers(&self) -> Vec<Arc<Receiver>> {
        self.receivers.read().clone()
    }

    /// Hand `event` to every receiver concurrently.
    pub fn dispatch(&self, event: InboundEvent) -> Vec<JoinHandle<Outcome>> {
        let event = Arc::new(event);
        self.receivers()
            .into_iter()
            .map(|receiver| {
                let event = event.clone();
                tokio::spawn(async move { receiver.receive(event).await })
            })
            .collect()
    }

    /// [`dispatch`](Self::dispatch), then wait until every receiver has
    /// routed the event.  Spawned invocations keep running.
    pub async fn dispatch_and_wait(&self, event: InboundEvent) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        for handle in self.dispatch(event) {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "receiver task failed"),
            }
        }
        outcomes
    }
}
