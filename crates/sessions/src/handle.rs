//! Handler-facing façade over one [`Session`].
//!
//! Every accessor composes the session's keyed store and event queue with
//! the [`Outbound`] seam; none bypasses the timeout or correlation rules.
//! The `must_*` variants turn a timeout into [`Interrupt::Finish`] so a
//! handler can `?` its way out of an abandoned conversation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use bl_domain::event::{Image, InboundEvent, ReplyTarget};

use crate::flow::{Farewell, FarewellSource, Flow, Interrupt};
use crate::outbound::{deliver_image, deliver_text, Outbound};
use crate::session::Session;
use crate::session_id::SessionId;

/// How [`SessionHandle::select`] prompts and retries.
#[derive(Debug, Clone)]
pub struct SelectOptions {
    /// Line shown above the menu.
    pub prompt: String,
    /// Total replies accepted before giving up.  Zero never prompts.
    pub retry_times: u32,
    /// Resend the whole menu on every retry instead of a short hint.
    pub always_prompt: bool,
    /// Per-reply timeout.  `None` uses the session default.
    pub timeout: Option<Duration>,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            prompt: "Reply with a number:".into(),
            retry_times: 1,
            always_prompt: true,
            timeout: None,
        }
    }
}

#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<Session>,
    outbound: Arc<dyn Outbound>,
}

impl SessionHandle {
    pub(crate) fn new(session: Arc<Session>, outbound: Arc<dyn Outbound>) -> Self {
        Self { session, outbound }
    }

    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn reply_target(&self) -> ReplyTarget {
        self.session.reply_target()
    }

    // ── Senders ──────────────────────────────────────────────────────

    /// Reply to wherever the conversation last spoke from.
    pub async fn send_text(&self, text: &str) {
        deliver_text(self.outbound.as_ref(), self.session.reply_target(), text).await;
    }

    pub async fn send_image(&self, image: &Image, caption: &str) {
        deliver_image(self.outbound.as_ref(), self.session.reply_target(), image, caption).await;
    }

    async fn prompt(&self, prompt: &str) {
        if !prompt.is_empty() {
            self.send_text(prompt).await;
        }
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub fn set_default_timeout(&self, timeout: Duration) {
        self.session.set_default_timeout(timeout);
    }

    pub fn set_farewell(&self, farewell: impl Into<FarewellSource>) {
        self.session.set_farewell(farewell);
    }

    pub fn set_skip_responder(&self, skip: bool) {
        self.session.set_skip_responder(skip);
    }

    // ── Keyed data ───────────────────────────────────────────────────

    pub async fn get(&self, key: &str, wait: bool, timeout: Option<Duration>) -> Option<Value> {
        self.session.get(key, wait, timeout).await
    }

    pub async fn pop(&self, key: &str, wait: bool, timeout: Option<Duration>) -> Option<Value> {
        self.session.pop(key, wait, timeout).await
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.session.set(key, value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.session.has(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.session.remove(key)
    }

    pub fn clear(&self) {
        self.session.clear();
    }

    // ── Event getters ────────────────────────────────────────────────

    /// Send `prompt` (if non-empty) and wait for the next captured message.
    pub async fn generic_event(&self, prompt: &str, timeout: Option<Duration>) -> Option<InboundEvent> {
        self.prompt(prompt).await;
        self.session.next_generic_event(timeout).await
    }

    pub async fn must_generic_event(&self, prompt: &str, timeout: Option<Duration>) -> Flow<InboundEvent> {
        let event = self.generic_event(prompt, timeout).await;
        self.or_finish(event)
    }

    pub async fn group_event(&self, prompt: &str, timeout: Option<Duration>) -> Flow<Option<InboundEvent>> {
        self.prompt(prompt).await;
        Ok(self.session.next_group_event(timeout).await?)
    }

    pub async fn must_group_event(&self, prompt: &str, timeout: Option<Duration>) -> Flow<InboundEvent> {
        let event = self.group_event(prompt, timeout).await?;
        self.or_finish(event)
    }

    pub async fn friend_event(&self, prompt: &str, timeout: Option<Duration>) -> Flow<Option<InboundEvent>> {
        self.prompt(prompt).await;
        Ok(self.session.next_friend_event(timeout).await?)
    }

    pub async fn must_friend_event(&self, prompt: &str, timeout: Option<Duration>) -> Flow<InboundEvent> {
        let event = self.friend_event(prompt, timeout).await?;
        self.or_finish(event)
    }

    /// Text of the next captured message.
    pub async fn text(&self, prompt: &str, timeout: Option<Duration>) -> Option<String> {
        self.generic_event(prompt, timeout).await.map(|ev| ev.text)
    }

    pub async fn must_text(&self, prompt: &str, timeout: Option<Duration>) -> Flow<String> {
        let text = self.text(prompt, timeout).await;
        self.or_finish(text)
    }

    /// First image of the next captured message that carries one.
    /// Messages without images are skipped until the timeout.
    pub async fn image(&self, prompt: &str, timeout: Option<Duration>) -> Option<Image> {
        self.prompt(prompt).await;
        let deadline = Instant::now() + timeout.unwrap_or_else(|| self.session.default_timeout());
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let event = self.session.next_generic_event(Some(remaining)).await?;
            if let Some(image) = event.images.into_iter().next() {
                return Some(image);
            }
        }
    }

    pub async fn must_image(&self, prompt: &str, timeout: Option<Duration>) -> Flow<Image> {
        let image = self.image(prompt, timeout).await;
        self.or_finish(image)
    }

    fn or_finish<T>(&self, value: Option<T>) -> Flow<T> {
        value.ok_or_else(|| self.finish(""))
    }

    // ── Dialogues ────────────────────────────────────────────────────

    /// Ask a yes/no question.  Unparseable replies re-ask; a timeout
    /// returns `default`.
    pub async fn confirm(&self, question: &str, default: bool, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or_else(|| self.session.default_timeout());
        let deadline = Instant::now() + timeout;
        let choices = if default { "[Y/n]" } else { "[y/N]" };
        let fallback = if default { "yes" } else { "no" };
        let mut prompt = format!(
            "{question} {choices} ({} timeout, defaults to {fallback})",
            render_secs(timeout)
        );

        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return default;
            };
            let Some(reply) = self.text(&prompt, Some(remaining)).await else {
                return default;
            };
            if let Some(answer) = parse_yes_no(&reply) {
                return answer;
            }
            prompt = format!("Please answer y or n. {choices}");
        }
    }

    /// Show a numbered menu and wait for a valid choice.
    ///
    /// Returns the chosen candidate and its zero-based index, or `None` on
    /// timeout or once the retries are used up.
    pub async fn select<T, F>(&self, candidates: &[T], label: F, opts: SelectOptions) -> Option<(T, usize)>
    where
        T: Clone,
        F: Fn(&T) -> String,
    {
        if candidates.is_empty() || opts.retry_times == 0 {
            return None;
        }
        let menu = render_menu(&opts.prompt, candidates.iter().map(&label));
        let mut prompt = menu.clone();

        for attempt in 1..=opts.retry_times {
            let reply = self.text(&prompt, opts.timeout).await?;
            if let Some(index) = parse_choice(&reply, candidates.len()) {
                return Some((candidates[index].clone(), index));
            }
            if attempt == opts.retry_times {
                break;
            }
            prompt = if opts.always_prompt {
                format!("Invalid number, try again.\n{menu}")
            } else {
                format!("Invalid number, reply 1-{}.", candidates.len())
            };
        }

        self.send_text("Invalid number, selection cancelled.").await;
        None
    }

    // ── Control flow ─────────────────────────────────────────────────

    /// Close the session and end the invocation.  An empty `info` falls
    /// back to the configured farewell.
    ///
    /// ```ignore
    /// return Err(session.finish("bye"));
    /// ```
    pub fn finish(&self, info: impl Into<String>) -> Interrupt {
        let info = info.into();
        let text = if info.is_empty() {
            self.session.farewell_text()
        } else {
            Some(info)
        };
        self.session.close();
        Interrupt::Finish {
            session_id: Some(self.session.id().to_string()),
            farewell: text.map(|text| Farewell {
                target: self.session.reply_target(),
                text,
            }),
        }
    }

    /// Forget what the session was waiting for and end the invocation.
    /// The session stays open, so the next message starts over.
    pub fn reject(&self) -> Interrupt {
        self.session.clear_waits();
        Interrupt::Reject {
            session_id: self.session.id().to_string(),
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session.id().to_string())
            .finish()
    }
}

fn parse_yes_no(reply: &str) -> Option<bool> {
    match reply.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// One-based reply to zero-based index.
fn parse_choice(reply: &str, len: usize) -> Option<usize> {
    let n: usize = reply.trim().parse().ok()?;
    (1..=len).contains(&n).then(|| n - 1)
}

fn render_secs(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}s", d.as_secs_f64())
    }
}

fn render_menu(prompt: &str, labels: impl Iterator<Item = String>) -> String {
    let mut out = String::from(prompt);
    for (i, label) in labels.enumerate() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("【{}】 {label}", i + 1));
    }
    out
}
