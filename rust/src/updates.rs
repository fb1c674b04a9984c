use campus_backend_traits::{
    AuthSession, BackendError, MessageRow, SubscriptionHandle, UserDisplayInfo,
};

use crate::state::AppState;
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
    /// One-shot effect: the timeline should scroll to its newest entry.
    ScrollToNewest {
        rev: u64,
        conversation_key: String,
        animated: bool,
    },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
            AppUpdate::ScrollToNewest { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Results of async work, posted back to the actor. Everything scoped to a
/// conversation view carries the view `token` it was started for; results for
/// a stale token are dropped.
#[derive(Debug)]
pub enum InternalEvent {
    // Auth
    SessionStarted {
        result: Result<AuthSession, BackendError>,
    },

    // Conversation mount
    ViewerResolved {
        token: u64,
        result: Result<String, BackendError>,
    },
    ProfileResolved {
        // Session the lookup was started under; results from older sessions are dropped.
        generation: u64,
        user_id: String,
        info: Option<UserDisplayInfo>,
    },

    // History
    HistoryLoaded {
        token: u64,
        load_seq: u64,
        resync: bool,
        result: Result<Vec<MessageRow>, BackendError>,
    },

    // Send path
    SendFinished {
        token: u64,
        pending_id: String,
        content: String,
        result: Result<MessageRow, BackendError>,
    },

    // Realtime
    SubscriptionOpened {
        token: u64,
        handle: SubscriptionHandle,
        resumed: bool,
    },
    SubscriptionLost {
        token: u64,
        attempt: u32,
        reason: String,
    },
    RealtimeInsert {
        token: u64,
        row: MessageRow,
    },
    RealtimeSenderResolved {
        token: u64,
        row: MessageRow,
        info: Option<UserDisplayInfo>,
    },
}
