use crate::state::{ConversationTarget, Screen};

#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Auth
    Login {
        email: String,
        password: String,
    },
    RestoreSession {
        access_token: String,
    },
    Logout,

    // Navigation
    PushScreen {
        screen: Screen,
    },
    UpdateScreenStack {
        stack: Vec<Screen>,
    },

    // Chat
    OpenConversation {
        target: ConversationTarget,
    },
    CloseConversation,
    UpdateDraft {
        text: String,
    },
    SendMessage {
        content: String,
    },

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes credentials or message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            // Auth
            AppAction::Login { .. } => "Login",
            AppAction::RestoreSession { .. } => "RestoreSession",
            AppAction::Logout => "Logout",

            // Navigation
            AppAction::PushScreen { .. } => "PushScreen",
            AppAction::UpdateScreenStack { .. } => "UpdateScreenStack",

            // Chat
            AppAction::OpenConversation { .. } => "OpenConversation",
            AppAction::CloseConversation => "CloseConversation",
            AppAction::UpdateDraft { .. } => "UpdateDraft",
            AppAction::SendMessage { .. } => "SendMessage",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
