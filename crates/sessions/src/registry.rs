//! Per-receiver map from session ID to live session.
//!
//! The registry holds weak references only: a session lives exactly as long
//! as the handler invocation (and any handle clones) that own it.  Dropped
//! and closed entries are swept by [`SessionRegistry::collect`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use bl_domain::error::{Error, Result};
use bl_domain::event::{EventKind, InboundEvent};

use crate::session::{Session, SessionInfo};
use crate::session_id::{candidate_ids, SessionId};

/// Why an entry was removed by [`SessionRegistry::collect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collected {
    /// The owning invocation is gone.
    Dropped,
    /// Explicitly closed or idle past its expiration.
    Closed,
}

impl Collected {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dropped => "dropped",
            Self::Closed => "closed",
        }
    }
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Weak<Session>>>,
    created: Notify,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            created: Notify::new(),
        }
    }

    /// Register `session` under its ID.
    ///
    /// Fails if a live, unclosed session already holds the ID.  A dead or
    /// closed entry is replaced.
    pub fn insert(&self, session: &Arc<Session>) -> Result<()> {
        let id = session.id();
        {
            let mut sessions = self.sessions.lock();
            if let Some(existing) = sessions.get(&id).and_then(Weak::upgrade) {
                if !existing.closed() {
                    return Err(Error::DuplicateSession {
                        session_id: id.to_string(),
                    });
                }
            }
            sessions.insert(id, Arc::downgrade(session));
        }
        self.created.notify_waiters();
        Ok(())
    }

    /// Live, unclosed session under `id`.
    pub fn get_live(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .get(id)
            .and_then(Weak::upgrade)
            .filter(|s| !s.closed())
    }

    /// Remove dropped and closed entries, returning what was removed.
    pub fn collect(&self) -> Vec<(SessionId, Collected)> {
        let mut removed = Vec::new();
        self.sessions.lock().retain(|id, weak| match weak.upgrade() {
            None => {
                removed.push((*id, Collected::Dropped));
                false
            }
            Some(s) if s.closed() => {
                removed.push((*id, Collected::Closed));
                false
            }
            Some(_) => true,
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Snapshot of every live session.
    pub fn live(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|s| !s.closed())
            .map(|s| s.info())
            .collect()
    }

    /// Resolves the next time a session is inserted.  Arm it (via
    /// `Notified::enable`) before checking state to avoid missing an insert.
    pub fn created(&self) -> Notified<'_> {
        self.created.notified()
    }

    /// The live session `event` continues, if any.
    ///
    /// Exact IDs are tried most specific first.  A private message also
    /// reaches a per-user-in-group session started by the same user; with
    /// several of those, one waiting on a private reply wins, then the most
    /// recently active.
    pub fn correlate(&self, event: &InboundEvent) -> Option<Arc<Session>> {
        if let Some(found) = candidate_ids(event).iter().find_map(|id| self.get_live(id)) {
            return Some(found);
        }
        if event.kind != EventKind::Friend {
            return None;
        }
        self.sessions
            .lock()
            .iter()
            .filter(|(id, _)| matches!(id, SessionId::Member { .. }) && id.accepts(event))
            .filter_map(|(_, weak)| weak.upgrade())
            .filter(|s| !s.closed())
            .min_by_key(|s| (!s.waiting_friend(), s.idle()))
    }
}
