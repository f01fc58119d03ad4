//! Outbound client that prints every action as a JSON line on stdout.

use std::io::Write;

use parking_lot::Mutex;
use serde::Serialize;

use bl_domain::error::{Error, Result};
use bl_domain::event::{Image, ReplyTarget};
use bl_sessions::Outbound;

/// One outbound action, as printed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundAction<'a> {
    SendText {
        target: ReplyTarget,
        text: &'a str,
    },
    SendImage {
        target: ReplyTarget,
        url: &'a str,
        caption: &'a str,
    },
}

pub struct StdoutOutbound {
    // Serializes whole lines across concurrent invocations.
    lock: Mutex<()>,
}

impl Default for StdoutOutbound {
    fn default() -> Self {
        Self::new()
    }
}

impl StdoutOutbound {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    fn emit(&self, action: &OutboundAction<'_>) -> Result<()> {
        let line = serde_json::to_string(action)?;
        let _guard = self.lock.lock();
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")
            .and_then(|()| stdout.flush())
            .map_err(|e| Error::Outbound(format!("stdout: {e}")))
    }
}

#[async_trait::async_trait]
impl Outbound for StdoutOutbound {
    async fn send_text(&self, target: ReplyTarget, text: &str) -> Result<()> {
        self.emit(&OutboundAction::SendText { target, text })
    }

    async fn send_image(&self, target: ReplyTarget, image: &Image, caption: &str) -> Result<()> {
        self.emit(&OutboundAction::SendImage {
            target,
            url: &image.url,
            caption,
        })
    }
}
