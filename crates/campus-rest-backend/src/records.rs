//! Wire shapes of the hosted backend's tables and auth responses

use campus_backend_traits::messages::DEFAULT_MESSAGE_TYPE;
use campus_backend_traits::{AuthSession, MessageRow, NewMessage, UserDisplayInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Row of the `messages` table
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessageRecord {
    #[serde(deserialize_with = "id_as_string")]
    pub(crate) id: String,
    pub(crate) sender_id: String,
    #[serde(default)]
    pub(crate) receiver_id: Option<String>,
    #[serde(default)]
    pub(crate) club_id: Option<String>,
    #[serde(default)]
    pub(crate) content: String,
    #[serde(rename = "type", default)]
    pub(crate) message_type: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
}

impl From<MessageRecord> for MessageRow {
    fn from(r: MessageRecord) -> Self {
        MessageRow {
            id: r.id,
            sender_id: r.sender_id,
            recipient_id: r.receiver_id,
            club_id: r.club_id,
            body: r.content,
            message_type: r
                .message_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_MESSAGE_TYPE.to_string()),
            created_at: r.created_at,
            sender_name: None,
            sender_avatar_url: None,
        }
    }
}

/// Insert body for the `messages` table
#[derive(Debug, Serialize)]
pub(crate) struct NewMessageRecord<'a> {
    sender_id: &'a str,
    receiver_id: Option<&'a str>,
    club_id: Option<&'a str>,
    content: &'a str,
    #[serde(rename = "type")]
    message_type: &'a str,
}

impl<'a> From<&'a NewMessage> for NewMessageRecord<'a> {
    fn from(m: &'a NewMessage) -> Self {
        Self {
            sender_id: &m.sender_id,
            receiver_id: m.recipient_id.as_deref(),
            club_id: m.club_id.as_deref(),
            content: &m.body,
            message_type: &m.message_type,
        }
    }
}

/// Projection of the `profiles` table
#[derive(Debug, Deserialize)]
pub(crate) struct ProfileRecord {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

impl From<ProfileRecord> for UserDisplayInfo {
    fn from(p: ProfileRecord) -> Self {
        UserDisplayInfo {
            name: p.full_name.filter(|n| !n.trim().is_empty()),
            avatar_url: p.avatar_url.filter(|u| !u.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthUser {
    pub(crate) id: String,
}

/// Response of the password grant
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: AuthUser,
}

impl From<TokenResponse> for AuthSession {
    fn from(t: TokenResponse) -> Self {
        AuthSession {
            user_id: t.user.id,
            access_token: t.access_token,
            refresh_token: t.refresh_token,
        }
    }
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
