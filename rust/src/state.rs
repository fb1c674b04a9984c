use campus_backend_traits::ConversationScope;

#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub router: Router,
    pub auth: AuthState,
    pub busy: BusyState,
    pub current_chat: Option<ChatViewState>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            router: Router {
                default_screen: Screen::Login,
                screen_stack: vec![],
            },
            auth: AuthState::LoggedOut,
            busy: BusyState::idle(),
            current_chat: None,
            toast: None,
        }
    }
}

/// "In flight" flags for long-ish operations that the UI should reflect.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub logging_in: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self { logging_in: false }
    }
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct Router {
    pub default_screen: Screen,
    pub screen_stack: Vec<Screen>,
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq)]
pub enum Screen {
    Login,
    Home,
    Conversation { target: ConversationTarget },
}

/// Which conversation a screen shows. The viewer is implicit: a private
/// conversation is identified by the other participant only.
#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum ConversationTarget {
    Private { peer_id: String },
    Club { club_id: String },
}

impl ConversationTarget {
    pub fn scope_for(&self, viewer_id: &str) -> ConversationScope {
        match self {
            Self::Private { peer_id } => ConversationScope::private(viewer_id, peer_id.as_str()),
            Self::Club { club_id } => ConversationScope::club(club_id.as_str()),
        }
    }

    pub fn is_club(&self) -> bool {
        matches!(self, Self::Club { .. })
    }

    /// Stable key for the view, known before the viewer is resolved.
    pub fn key(&self) -> String {
        match self {
            Self::Private { peer_id } => format!("private:{peer_id}"),
            Self::Club { club_id } => format!("club:{club_id}"),
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    LoggedIn { user_id: String },
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Identity or first subscribe still in flight.
    Connecting,
    Live,
    Reconnecting { attempt: u32 },
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct ChatViewState {
    pub conversation_key: String,
    pub target: ConversationTarget,
    pub title: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub draft: String,
    pub loading_history: bool,
    pub connection: ConnectionStatus,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub sender_avatar_url: Option<String>,
    pub body: String,
    pub message_type: String,
    pub created_at_ms: i64,
    pub is_mine: bool,
    pub is_pending: bool,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_target_scope_includes_viewer() {
        let target = ConversationTarget::Private {
            peer_id: "bob".into(),
        };
        assert_eq!(
            target.scope_for("alice"),
            ConversationScope::private("bob", "alice")
        );
        assert!(!target.is_club());
    }

    #[test]
    fn club_target_scope_ignores_viewer() {
        let target = ConversationTarget::Club {
            club_id: "chess".into(),
        };
        assert_eq!(target.scope_for("alice"), ConversationScope::club("chess"));
        assert!(target.is_club());
    }
}
