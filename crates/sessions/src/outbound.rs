//! Outbound action seam.  The API client that actually sends replies lives
//! outside this crate.

use parking_lot::Mutex;

use bl_domain::error::Result;
use bl_domain::event::{Image, ReplyTarget};

/// Implement this trait to send messages on behalf of sessions.
#[async_trait::async_trait]
pub trait Outbound: Send + Sync + 'static {
    async fn send_text(&self, target: ReplyTarget, text: &str) -> Result<()>;

    async fn send_image(&self, target: ReplyTarget, image: &Image, caption: &str) -> Result<()>;
}

/// Send text, logging and swallowing failures.
pub(crate) async fn deliver_text(outbound: &dyn Outbound, target: ReplyTarget, text: &str) {
    if let Err(e) = outbound.send_text(target, text).await {
        tracing::warn!(reply_to = %target, error = %e, "failed to send text");
    }
}

/// Send an image, logging and swallowing failures.
pub(crate) async fn deliver_image(
    outbound: &dyn Outbound,
    target: ReplyTarget,
    image: &Image,
    caption: &str,
) {
    if let Err(e) = outbound.send_image(target, image, caption).await {
        tracing::warn!(reply_to = %target, url = %image.url, error = %e, "failed to send image");
    }
}

/// Outbound that only logs.  Used when no client is wired in.
pub struct NoopOutbound;

#[async_trait::async_trait]
impl Outbound for NoopOutbound {
    async fn send_text(&self, target: ReplyTarget, text: &str) -> Result<()> {
        tracing::debug!(reply_to = %target, chars = text.chars().count(), "dropping outbound text");
        Ok(())
    }

    async fn send_image(&self, target: ReplyTarget, image: &Image, _caption: &str) -> Result<()> {
        tracing::debug!(reply_to = %target, url = %image.url, "dropping outbound image");
        Ok(())
    }
}

/// A message captured by [`RecordingOutbound`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        target: ReplyTarget,
        text: String,
    },
    Image {
        target: ReplyTarget,
        url: String,
        caption: String,
    },
}

impl Sent {
    pub fn text(&self) -> &str {
        match self {
            Self::Text { text, .. } => text,
            Self::Image { caption, .. } => caption,
        }
    }
}

/// In-memory outbound for tests and dry runs.
#[derive(Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    /// Text bodies sent so far, in order.
    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|s| s.text().to_owned()).collect()
    }
}

#[async_trait::async_trait]
impl Outbound for RecordingOutbound {
    async fn send_text(&self, target: ReplyTarget, text: &str) -> Result<()> {
        self.sent.lock().push(Sent::Text {
            target,
            text: text.to_owned(),
        });
        Ok(())
    }

    async fn send_image(&self, target: ReplyTarget, image: &Image, caption: &str) -> Result<()> {
        self.sent.lock().push(Sent::Image {
            target,
            url: image.url.clone(),
            caption: caption.to_owned(),
        });
        Ok(())
    }
}
