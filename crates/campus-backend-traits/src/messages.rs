//! Message rows, conversation scopes and query filters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message type used when the backend does not report one
pub const DEFAULT_MESSAGE_TYPE: &str = "text";

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_string()
}

/// A confirmed message row as stored by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    /// Backend-assigned id, globally unique
    pub id: String,
    /// Author
    pub sender_id: String,
    /// Recipient of a private message
    #[serde(default)]
    pub recipient_id: Option<String>,
    /// Club of a group message
    #[serde(default)]
    pub club_id: Option<String>,
    /// Text content
    pub body: String,
    /// Passthrough type tag (`text`, `image`, ...)
    #[serde(default = "default_message_type")]
    pub message_type: String,
    /// Authoritative ordering key
    pub created_at: DateTime<Utc>,
    /// Sender display name when the backend embeds it
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Sender avatar when the backend embeds it
    #[serde(default)]
    pub sender_avatar_url: Option<String>,
}

impl MessageRow {
    /// `created_at` as milliseconds since the Unix epoch
    pub fn created_at_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}

/// The dimension that bounds a timeline and its realtime channel
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub enum ConversationScope {
    /// One-to-one conversation. The pair is unordered; build it with
    /// [`ConversationScope::private`] so equal pairs compare equal.
    Private {
        /// Lexicographically smaller participant
        peer_a: String,
        /// Lexicographically larger participant
        peer_b: String,
    },
    /// Group conversation of a club
    Club {
        /// Club id
        club_id: String,
    },
}

impl PartialEq for ConversationScope {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Private { peer_a, peer_b },
                Self::Private {
                    peer_a: other_a,
                    peer_b: other_b,
                },
            ) => {
                (peer_a == other_a && peer_b == other_b) || (peer_a == other_b && peer_b == other_a)
            }
            (Self::Club { club_id }, Self::Club { club_id: other }) => club_id == other,
            _ => false,
        }
    }
}

impl ConversationScope {
    /// Private scope for two participants, in either order
    pub fn private(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Self::Private {
                peer_a: a,
                peer_b: b,
            }
        } else {
            Self::Private {
                peer_a: b,
                peer_b: a,
            }
        }
    }

    /// Club scope
    pub fn club(club_id: impl Into<String>) -> Self {
        Self::Club {
            club_id: club_id.into(),
        }
    }

    /// Whether this is a club conversation
    pub fn is_club(&self) -> bool {
        matches!(self, Self::Club { .. })
    }

    /// Stable key, also used as the realtime topic suffix
    pub fn key(&self) -> String {
        match self {
            Self::Private { peer_a, peer_b } => {
                let (lo, hi) = if peer_a <= peer_b {
                    (peer_a, peer_b)
                } else {
                    (peer_b, peer_a)
                };
                format!("private:{lo}:{hi}")
            }
            Self::Club { club_id } => format!("club:{club_id}"),
        }
    }

    /// The other participant of a private scope
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        match self {
            Self::Private { peer_a, peer_b } if peer_a == user_id => Some(peer_b.as_str()),
            Self::Private { peer_a, peer_b } if peer_b == user_id => Some(peer_a.as_str()),
            _ => None,
        }
    }

    /// Whether `row` belongs to this conversation
    pub fn matches(&self, row: &MessageRow) -> bool {
        match self {
            Self::Private { peer_a, peer_b } => {
                if row.club_id.is_some() {
                    return false;
                }
                let Some(recipient) = row.recipient_id.as_deref() else {
                    return false;
                };
                (row.sender_id == *peer_a && recipient == peer_b)
                    || (row.sender_id == *peer_b && recipient == peer_a)
            }
            Self::Club { club_id } => row.club_id.as_deref() == Some(club_id.as_str()),
        }
    }
}

/// History query shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    /// Private messages sent by `sender_id` to `recipient_id`, excluding club rows
    Direct {
        /// Author
        sender_id: String,
        /// Recipient
        recipient_id: String,
    },
    /// Every message of a club, newest first
    Club {
        /// Club id
        club_id: String,
    },
}

impl MessageFilter {
    /// Whether `row` satisfies the filter
    pub fn matches(&self, row: &MessageRow) -> bool {
        match self {
            Self::Direct {
                sender_id,
                recipient_id,
            } => {
                row.club_id.is_none()
                    && row.sender_id == *sender_id
                    && row.recipient_id.as_deref() == Some(recipient_id.as_str())
            }
            Self::Club { club_id } => row.club_id.as_deref() == Some(club_id.as_str()),
        }
    }
}

/// A message to insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    /// Author
    pub sender_id: String,
    /// Recipient of a private message
    pub recipient_id: Option<String>,
    /// Club of a group message
    pub club_id: Option<String>,
    /// Text content
    pub body: String,
    /// Passthrough type tag
    pub message_type: String,
}

impl NewMessage {
    /// Text message from `sender_id` into `scope`.
    ///
    /// Returns `None` for a private scope the sender is not part of.
    pub fn text(scope: &ConversationScope, sender_id: &str, body: impl Into<String>) -> Option<Self> {
        let (recipient_id, club_id) = match scope {
            ConversationScope::Private { .. } => (Some(scope.peer_of(sender_id)?.to_string()), None),
            ConversationScope::Club { club_id } => (None, Some(club_id.clone())),
        };
        Some(Self {
            sender_id: sender_id.to_string(),
            recipient_id,
            club_id,
            body: body.into(),
            message_type: default_message_type(),
        })
    }
}
