//! Auth sessions and user display attributes

use serde::{Deserialize, Serialize};

/// Session issued by the backend's built-in auth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    /// Signed-in user
    pub user_id: String,
    /// Bearer token for subsequent calls
    pub access_token: String,
    /// Token for refreshing the session, when issued
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Display attributes of a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDisplayInfo {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Avatar URL
    #[serde(default)]
    pub avatar_url: Option<String>,
}
