//! The suspended-conversation state machine.
//!
//! A [`Session`] bridges several inbound events for one handler invocation.
//! It owns a keyed data store, a FIFO queue of delivered events, the
//! waiting flags the receiver consults during correlation, and an idle
//! clock that decides when the session counts as closed.
//!
//! All mutable state lives behind one mutex.  Two [`Notify`]s wake
//! suspended callers: one for keyed data (`get`/`pop`), one for the event
//! queue (`next_*_event`).  Waiters always arm their notification before
//! checking state, so a concurrent `set`/`add_event` is never missed.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;

use bl_domain::config::SessionsConfig;
use bl_domain::error::{Error, Result};
use bl_domain::event::{EventKind, InboundEvent, ReplyTarget};

use crate::flow::FarewellSource;
use crate::session_id::SessionId;

/// Conversation state shared between a handler and its receiver.
pub struct Session {
    id: SessionId,
    started_at: DateTime<Utc>,
    expiration: Duration,
    state: Mutex<SessionState>,
    data_changed: Notify,
    event_queued: Notify,
}

struct SessionState {
    data: HashMap<String, Value>,
    /// Keys a caller is suspended on, oldest first.
    awaited: Vec<String>,
    /// Live `get`/`pop` callers per key.
    waiters: HashMap<String, usize>,
    queue: VecDeque<InboundEvent>,
    waiting_group: bool,
    waiting_friend: bool,
    last_activity: Instant,
    closed: bool,
    default_timeout: Duration,
    skip_responder: bool,
    farewell: Option<FarewellSource>,
    reply_target: ReplyTarget,
}

impl SessionState {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn add_waiter(&mut self, key: &str) {
        *self.waiters.entry(key.to_owned()).or_insert(0) += 1;
        self.arm(key);
    }

    fn arm(&mut self, key: &str) {
        if !self.awaited.iter().any(|k| k == key) {
            self.awaited.push(key.to_owned());
        }
    }

    fn release_waiter(&mut self, key: &str) {
        let remaining = match self.waiters.get_mut(key) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining == 0 {
            self.waiters.remove(key);
            self.awaited.retain(|k| k != key);
        }
    }

    /// Pop the oldest queued event of a wanted kind.
    fn take_queued(&mut self, group: bool, friend: bool) -> Option<InboundEvent> {
        let pos = self.queue.iter().position(|ev| match ev.kind {
            EventKind::Group => group,
            EventKind::Friend => friend,
            EventKind::Generic => false,
        })?;
        let event = self.queue.remove(pos)?;
        if let Some(target) = ReplyTarget::from_event(&event) {
            self.reply_target = target;
        }
        self.touch();
        Some(event)
    }
}

/// Point-in-time view of a session, for logs and admin listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub idle_ms: u64,
    pub waiting: bool,
    pub closed: bool,
}

impl Session {
    pub fn new(id: SessionId, settings: &SessionsConfig) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            expiration: settings.expiration(),
            state: Mutex::new(SessionState {
                data: HashMap::new(),
                awaited: Vec::new(),
                waiters: HashMap::new(),
                queue: VecDeque::new(),
                waiting_group: false,
                waiting_friend: false,
                last_activity: Instant::now(),
                closed: false,
                default_timeout: settings.default_timeout(),
                skip_responder: settings.skip_responder,
                farewell: None,
                reply_target: id.reply_target(),
            }),
            data_changed: Notify::new(),
            event_queued: Notify::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// `true` once explicitly closed or idle for at least the expiration.
    pub fn closed(&self) -> bool {
        let st = self.state.lock();
        st.closed || st.last_activity.elapsed() >= self.expiration
    }

    /// Mark the session closed.  In-flight waits are not cancelled; they
    /// resolve through their own timeouts.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Time since the last read, write or delivered event.
    pub(crate) fn idle(&self) -> Duration {
        self.state.lock().last_activity.elapsed()
    }

    pub fn info(&self) -> SessionInfo {
        let st = self.state.lock();
        SessionInfo {
            session_id: self.id.to_string(),
            started_at: self.started_at,
            idle_ms: st.last_activity.elapsed().as_millis() as u64,
            waiting: st.waiting_group || st.waiting_friend || !st.awaited.is_empty(),
            closed: st.closed || st.last_activity.elapsed() >= self.expiration,
        }
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub fn default_timeout(&self) -> Duration {
        self.state.lock().default_timeout
    }

    pub fn set_default_timeout(&self, timeout: Duration) {
        self.state.lock().default_timeout = timeout;
    }

    pub fn set_skip_responder(&self, skip: bool) {
        self.state.lock().skip_responder = skip;
    }

    pub fn set_farewell(&self, farewell: impl Into<FarewellSource>) {
        self.state.lock().farewell = Some(farewell.into());
    }

    /// Render the configured farewell, if any and non-empty.
    pub fn farewell_text(&self) -> Option<String> {
        let source = self.state.lock().farewell.clone()?;
        let text = source.render();
        (!text.is_empty()).then_some(text)
    }

    /// Where replies go: the origin of the last received event, or the
    /// session's own address before any event arrived.
    pub fn reply_target(&self) -> ReplyTarget {
        self.state.lock().reply_target
    }

    // ── Keyed data ───────────────────────────────────────────────────

    /// Read `key`.  With `wait`, suspend until it is set or `timeout`
    /// (default: the session's default timeout) elapses.
    pub async fn get(&self, key: &str, wait: bool, timeout: Option<Duration>) -> Option<Value> {
        if !wait {
            let mut st = self.state.lock();
            st.touch();
            return st.data.get(key).cloned();
        }
        let timeout = timeout.unwrap_or_else(|| self.default_timeout());
        self.wait_for_key(key, timeout, false).await
    }

    /// Like [`get`](Self::get), then delete the key.
    pub async fn pop(&self, key: &str, wait: bool, timeout: Option<Duration>) -> Option<Value> {
        if !wait {
            let mut st = self.state.lock();
            st.touch();
            return st.data.remove(key);
        }
        let timeout = timeout.unwrap_or_else(|| self.default_timeout());
        self.wait_for_key(key, timeout, true).await
    }

    /// Store `value`, clear the awaited status of `key` and wake waiters.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        {
            let mut st = self.state.lock();
            st.data.insert(key.to_owned(), value.into());
            st.awaited.retain(|k| k != key);
            st.touch();
        }
        self.data_changed.notify_waiters();
    }

    pub fn has(&self, key: &str) -> bool {
        let mut st = self.state.lock();
        st.touch();
        st.data.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut st = self.state.lock();
        st.touch();
        st.data.remove(key)
    }

    pub fn clear(&self) {
        let mut st = self.state.lock();
        st.touch();
        st.data.clear();
    }

    async fn wait_for_key(&self, key: &str, timeout: Duration, take: bool) -> Option<Value> {
        let deadline = Instant::now() + timeout;
        {
            let mut st = self.state.lock();
            st.touch();
            st.add_waiter(key);
        }
        let _waiter = WaiterGuard { session: self, key };

        loop {
            let notified = self.data_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut st = self.state.lock();
                let found = if take {
                    st.data.remove(key)
                } else {
                    st.data.get(key).cloned()
                };
                if found.is_some() {
                    st.touch();
                    return found;
                }
                // Another waiter popped the value first; keep advertising.
                st.arm(key);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    // ── Waiting state ────────────────────────────────────────────────

    pub fn waiting_group(&self) -> bool {
        self.state.lock().waiting_group
    }

    pub fn waiting_friend(&self) -> bool {
        self.state.lock().waiting_friend
    }

    /// Keys a caller is currently suspended on, oldest first.
    pub fn awaited_keys(&self) -> Vec<String> {
        self.state.lock().awaited.clone()
    }

    /// Whether the session currently wants an event of any kind.
    pub fn is_waiting(&self) -> bool {
        let st = self.state.lock();
        st.waiting_group || st.waiting_friend || !st.awaited.is_empty()
    }

    /// Forget everything the session is waiting for, so the next event is
    /// treated as fresh input.  Suspended callers stay suspended until
    /// their own timeout.
    pub fn clear_waits(&self) {
        let mut st = self.state.lock();
        st.awaited.clear();
        st.waiting_group = false;
        st.waiting_friend = false;
    }

    // ── Event queue ──────────────────────────────────────────────────

    /// Next group message.  Fails if this session cannot capture group
    /// messages.
    pub async fn next_group_event(&self, timeout: Option<Duration>) -> Result<Option<InboundEvent>> {
        self.ensure_captures(EventKind::Group)?;
        Ok(self.next_event(true, false, timeout).await)
    }

    /// Next private message.  Fails if this session cannot capture private
    /// messages.
    pub async fn next_friend_event(&self, timeout: Option<Duration>) -> Result<Option<InboundEvent>> {
        self.ensure_captures(EventKind::Friend)?;
        Ok(self.next_event(false, true, timeout).await)
    }

    /// Next message of any kind this session captures.
    pub async fn next_generic_event(&self, timeout: Option<Duration>) -> Option<InboundEvent> {
        let group = self.id.captures(EventKind::Group);
        let friend = self.id.captures(EventKind::Friend);
        self.next_event(group, friend, timeout).await
    }

    fn ensure_captures(&self, kind: EventKind) -> Result<()> {
        if self.id.captures(kind) {
            Ok(())
        } else {
            Err(Error::KindNotCaptured {
                session_id: self.id.to_string(),
                kind: kind.to_string(),
            })
        }
    }

    async fn next_event(
        &self,
        group: bool,
        friend: bool,
        timeout: Option<Duration>,
    ) -> Option<InboundEvent> {
        let timeout = timeout.unwrap_or_else(|| self.default_timeout());
        let deadline = Instant::now() + timeout;
        {
            let mut st = self.state.lock();
            st.touch();
            if let Some(event) = st.take_queued(group, friend) {
                return Some(event);
            }
            st.waiting_group |= group;
            st.waiting_friend |= friend;
        }
        let _flags = FlagGuard {
            session: self,
            group,
            friend,
        };

        loop {
            let notified = self.event_queued.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.state.lock().take_queued(group, friend) {
                return Some(event);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Offer an event to this session.  Called by the receiver's
    /// correlation step only.
    ///
    /// Returns `true` when the session took the event: it was waiting for
    /// that kind, a caller was suspended on a key (the event text is stored
    /// under the oldest awaited key), or early replies are buffered.
    /// Otherwise the event is not for this session and nothing changes.
    pub fn add_event(&self, event: &InboundEvent) -> bool {
        if !self.id.captures(event.kind) {
            return false;
        }
        let mut st = self.state.lock();
        let wanted = match event.kind {
            EventKind::Group => st.waiting_group,
            EventKind::Friend => st.waiting_friend,
            EventKind::Generic => false,
        };

        if wanted {
            st.queue.push_back(event.clone());
            st.waiting_group = false;
            st.waiting_friend = false;
            st.touch();
            drop(st);
            self.event_queued.notify_waiters();
            return true;
        }

        if !st.awaited.is_empty() {
            let key = st.awaited.remove(0);
            st.data.insert(key, Value::String(event.text.clone()));
            if let Some(target) = ReplyTarget::from_event(event) {
                st.reply_target = target;
            }
            st.touch();
            drop(st);
            self.data_changed.notify_waiters();
            return true;
        }

        if !st.skip_responder {
            st.queue.push_back(event.clone());
            st.touch();
            drop(st);
            self.event_queued.notify_waiters();
            return true;
        }

        false
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session[{}]", self.id)
    }
}

/// Drops a `get`/`pop` caller's registration, including on cancellation.
struct WaiterGuard<'a> {
    session: &'a Session,
    key: &'a str,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.session.state.lock().release_waiter(self.key);
    }
}

/// Clears the waiting flags a `next_*_event` call raised.
struct FlagGuard<'a> {
    session: &'a Session,
    group: bool,
    friend: bool,
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.session.state.lock();
        if self.group {
            st.waiting_group = false;
        }
        if self.friend {
            st.waiting_friend = false;
        }
    }
}
