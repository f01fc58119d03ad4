//! Session ID derivation.
//!
//! ID templates:
//! - `<groupId>-<userId>`  (scope = per-user-in-group)
//! - `<groupId>`           (scope = whole-group)
//! - `<userId>`            (scope = private)
//!
//! Friend messages always resolve to the private form.  Generic events have
//! no stable conversation identity and cannot be scoped.

use std::fmt;

use serde::{Deserialize, Serialize};

use bl_domain::error::{Error, Result};
use bl_domain::event::{EventKind, InboundEvent, ReplyTarget};

/// How a session started from a group message is scoped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    /// One session per user per group.  Also follows that user into private
    /// chat.
    #[default]
    PerUserInGroup,
    /// One session shared by everybody in the group.
    WholeGroup,
    /// Move the conversation into the user's private chat.
    Private,
}

/// Correlation key of a session.  `Display` renders the wire form used in
/// logs and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionId {
    Member { group_id: u64, user_id: u64 },
    Group { group_id: u64 },
    User { user_id: u64 },
}

impl SessionId {
    /// Whether a session under this ID may receive events of `kind`.
    pub fn captures(&self, kind: EventKind) -> bool {
        match (self, kind) {
            (Self::Member { .. }, EventKind::Group | EventKind::Friend) => true,
            (Self::Group { .. }, EventKind::Group) => true,
            (Self::User { .. }, EventKind::Friend) => true,
            _ => false,
        }
    }

    /// Whether `event` belongs to the conversation this ID names.
    pub fn accepts(&self, event: &InboundEvent) -> bool {
        match (self, event.kind) {
            (Self::Member { group_id, user_id }, EventKind::Group) => {
                event.group_id == Some(*group_id) && event.sender_id == *user_id
            }
            (Self::Member { user_id, .. }, EventKind::Friend) => event.sender_id == *user_id,
            (Self::Group { group_id }, EventKind::Group) => event.group_id == Some(*group_id),
            (Self::User { user_id }, EventKind::Friend) => event.sender_id == *user_id,
            _ => false,
        }
    }

    /// Default address for prompts before the session has seen a reply.
    pub fn reply_target(&self) -> ReplyTarget {
        match *self {
            Self::Member { group_id, .. } | Self::Group { group_id } => {
                ReplyTarget::Group { group_id }
            }
            Self::User { user_id } => ReplyTarget::Friend { user_id },
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member { group_id, user_id } => write!(f, "{group_id}-{user_id}"),
            Self::Group { group_id } => write!(f, "{group_id}"),
            Self::User { user_id } => write!(f, "{user_id}"),
        }
    }
}

/// Compute the session ID for `event` under `scope`.
pub fn compute_session_id(event: &InboundEvent, scope: SessionScope) -> Result<SessionId> {
    match event.kind {
        EventKind::Group => {
            let group_id = event.group_id.ok_or_else(|| {
                Error::UnsupportedScope("group message without a group id".into())
            })?;
            let user_id = event.sender_id;
            Ok(match scope {
                SessionScope::PerUserInGroup => SessionId::Member { group_id, user_id },
                SessionScope::WholeGroup => SessionId::Group { group_id },
                SessionScope::Private => SessionId::User { user_id },
            })
        }
        EventKind::Friend => Ok(SessionId::User {
            user_id: event.sender_id,
        }),
        EventKind::Generic => Err(Error::UnsupportedScope(format!(
            "generic event {:?} has no conversation identity",
            event.event_name.as_deref().unwrap_or("unknown")
        ))),
    }
}

/// Exact IDs a live session would have to carry to continue the
/// conversation `event` belongs to, most specific first.
pub fn candidate_ids(event: &InboundEvent) -> Vec<SessionId> {
    match (event.kind, event.group_id) {
        (EventKind::Group, Some(group_id)) => vec![
            SessionId::Member {
                group_id,
                user_id: event.sender_id,
            },
            SessionId::Group { group_id },
        ],
        (EventKind::Friend, _) => vec![SessionId::User {
            user_id: event.sender_id,
        }],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(group_id: u64, user_id: u64) -> InboundEvent {
        InboundEvent::group(1, group_id, user_id, "hi")
    }

    #[test]
    fn per_user_in_group() {
        let id = compute_session_id(&group(42, 7), SessionScope::PerUserInGroup).unwrap();
        assert_eq!(id.to_string(), "42-7");
    }

    #[test]
    fn whole_group() {
        let id = compute_session_id(&group(42, 7), SessionScope::WholeGroup).unwrap();
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn private_from_group() {
        let id = compute_session_id(&group(42, 7), SessionScope::Private).unwrap();
        assert_eq!(id.to_string(), "7");
    }

    #[test]
    fn friend_ignores_scope() {
        let ev = InboundEvent::friend(1, 7, "hi");
        for scope in [
            SessionScope::PerUserInGroup,
            SessionScope::WholeGroup,
            SessionScope::Private,
        ] {
            assert_eq!(compute_session_id(&ev, scope).unwrap().to_string(), "7");
        }
    }

    #[test]
    fn generic_is_unsupported() {
        let err = compute_session_id(&InboundEvent::generic(1, "group_join"), SessionScope::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedScope(_)));
    }

    #[test]
    fn deterministic_and_user_sensitive() {
        let a = compute_session_id(&group(42, 7), SessionScope::PerUserInGroup).unwrap();
        let b = compute_session_id(&group(42, 7), SessionScope::PerUserInGroup).unwrap();
        let c = compute_session_id(&group(42, 8), SessionScope::PerUserInGroup).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        // Whole-group scope ignores the sender.
        assert_eq!(
            compute_session_id(&group(42, 7), SessionScope::WholeGroup).unwrap(),
            compute_session_id(&group(42, 8), SessionScope::WholeGroup).unwrap()
        );
    }

    #[test]
    fn member_follows_user_into_private_chat() {
        let id = SessionId::Member {
            group_id: 42,
            user_id: 7,
        };
        assert!(id.accepts(&group(42, 7)));
        assert!(id.accepts(&InboundEvent::friend(1, 7, "hi")));
        assert!(!id.accepts(&group(42, 8)));
        assert!(!id.accepts(&group(43, 7)));
    }

    #[test]
    fn whole_group_does_not_capture_private_chat() {
        let id = SessionId::Group { group_id: 42 };
        assert!(id.captures(EventKind::Group));
        assert!(!id.captures(EventKind::Friend));
        assert!(!id.accepts(&InboundEvent::friend(1, 7, "hi")));
    }

    #[test]
    fn candidates_most_specific_first() {
        let ids: Vec<String> = candidate_ids(&group(42, 7))
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, vec!["42-7", "42"]);
        assert!(candidate_ids(&InboundEvent::generic(1, "x")).is_empty());
    }
}
