//! Inbound events as decoded by the wire transport, and the reply address
//! derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which channel an inbound event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A message posted in a group chat.
    Group,
    /// A private (friend) message.
    Friend,
    /// Anything else: notices, joins, recalls, …
    Generic,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => write!(f, "group"),
            Self::Friend => write!(f, "friend"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// An image attached to a message, or sent by the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

impl Image {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            md5: None,
        }
    }
}

/// A decoded inbound event, tagged with the identity of the bot account
/// that received it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Account ID of the bot that received the event.  `0` when the
    /// transport did not say; the front end stamps its own.
    #[serde(default)]
    pub bot_id: u64,
    pub kind: EventKind,
    /// Sender account ID (`0` for generic events without a sender).
    #[serde(default)]
    pub sender_id: u64,
    #[serde(default)]
    pub sender_name: String,
    /// Group the message was posted in (group messages only).
    #[serde(default)]
    pub group_id: Option<u64>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub images: Vec<Image>,
    /// Event type name for generic events (e.g. `"group_join"`).
    #[serde(default)]
    pub event_name: Option<String>,
}

impl InboundEvent {
    pub fn group(bot_id: u64, group_id: u64, sender_id: u64, text: impl Into<String>) -> Self {
        Self {
            bot_id,
            kind: EventKind::Group,
            sender_id,
            sender_name: String::new(),
            group_id: Some(group_id),
            text: text.into(),
            images: Vec::new(),
            event_name: None,
        }
    }

    pub fn friend(bot_id: u64, sender_id: u64, text: impl Into<String>) -> Self {
        Self {
            bot_id,
            kind: EventKind::Friend,
            sender_id,
            sender_name: String::new(),
            group_id: None,
            text: text.into(),
            images: Vec::new(),
            event_name: None,
        }
    }

    pub fn generic(bot_id: u64, event_name: impl Into<String>) -> Self {
        Self {
            bot_id,
            kind: EventKind::Generic,
            sender_id: 0,
            sender_name: String::new(),
            group_id: None,
            text: String::new(),
            images: Vec::new(),
            event_name: Some(event_name.into()),
        }
    }

    pub fn with_images(mut self, images: Vec<Image>) -> Self {
        self.images = images;
        self
    }

    /// `true` when the bot itself sent this message (echoes of its own
    /// outbound traffic).
    pub fn is_from_self(&self) -> bool {
        self.is_message() && self.sender_id == self.bot_id
    }

    /// `true` for group and friend messages.
    pub fn is_message(&self) -> bool {
        matches!(self.kind, EventKind::Group | EventKind::Friend)
    }
}

/// Where an outbound message should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyTarget {
    Group { group_id: u64 },
    Friend { user_id: u64 },
}

impl ReplyTarget {
    /// Reply to the place the event came from.  Generic events have no
    /// natural reply address.
    pub fn from_event(event: &InboundEvent) -> Option<Self> {
        match event.kind {
            EventKind::Group => event.group_id.map(|group_id| Self::Group { group_id }),
            EventKind::Friend => Some(Self::Friend {
                user_id: event.sender_id,
            }),
            EventKind::Generic => None,
        }
    }
}

impl fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group { group_id } => write!(f, "group:{group_id}"),
            Self::Friend { user_id } => write!(f, "friend:{user_id}"),
        }
    }
}
