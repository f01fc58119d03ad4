//! Shared types for botline: inbound events, configuration, errors and
//! structured trace events.

pub mod config;
pub mod error;
pub mod event;
pub mod trace;

pub use error::{Error, Result};
pub use event::{EventKind, Image, InboundEvent, ReplyTarget};
