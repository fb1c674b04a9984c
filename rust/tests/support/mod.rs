#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use campus_core::{
    AppAction, AppReconciler, AppUpdate, AuthState, ChatMessage, ConnectionStatus,
    ConversationTarget, FfiApp,
};
use campus_memory_backend::MemoryBackend;
use tempfile::TempDir;

pub const TIMEOUT: Duration = Duration::from_secs(3);

pub fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

pub struct TestReconciler {
    updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl TestReconciler {
    pub fn new() -> (Self, Arc<Mutex<Vec<AppUpdate>>>) {
        let updates = Arc::new(Mutex::new(vec![]));
        (
            Self {
                updates: updates.clone(),
            },
            updates,
        )
    }
}

impl AppReconciler for TestReconciler {
    fn reconcile(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

pub fn write_config(data_dir: &str, reconcile_policy: &str) {
    let path = std::path::Path::new(data_dir).join("campus_config.json");
    let v = serde_json::json!({
        "disable_network": true,
        "request_timeout_ms": 2000,
        "reconcile_policy": reconcile_policy,
        "reconnect_initial_ms": 20,
        "reconnect_max_ms": 100,
    });
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

/// An app wired to an in-memory backend with two registered students.
pub struct Harness {
    pub app: Arc<FfiApp>,
    pub backend: MemoryBackend,
    pub updates: Arc<Mutex<Vec<AppUpdate>>>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy("match_send")
    }

    pub fn with_policy(reconcile_policy: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_string_lossy().to_string();
        write_config(&data_dir, reconcile_policy);

        let backend = MemoryBackend::new();
        backend.register_user("alice", "alice@campus.test", "pw", Some("Alice"));
        backend.register_user("bob", "bob@campus.test", "pw", Some("Bob"));

        let app = FfiApp::with_backend(data_dir, Arc::new(backend.clone()));
        let (reconciler, updates) = TestReconciler::new();
        app.listen_for_updates(Box::new(reconciler));
        Self {
            app,
            backend,
            updates,
            _dir: dir,
        }
    }

    pub fn login_alice(&self) {
        self.app.dispatch(AppAction::Login {
            email: "alice@campus.test".into(),
            password: "pw".into(),
        });
        wait_until("logged in", TIMEOUT, || {
            matches!(self.app.state().auth, AuthState::LoggedIn { .. })
        });
    }

    /// Open `target` and wait until the feed is live and history has settled.
    pub fn open(&self, target: ConversationTarget) {
        self.app.dispatch(AppAction::OpenConversation { target });
        wait_until("conversation live", TIMEOUT, || {
            self.app
                .state()
                .current_chat
                .map(|c| c.connection == ConnectionStatus::Live && !c.loading_history)
                .unwrap_or(false)
        });
    }

    pub fn open_club(&self, club_id: &str) {
        self.open(ConversationTarget::Club {
            club_id: club_id.into(),
        });
    }

    pub fn open_private(&self, peer_id: &str) {
        self.open(ConversationTarget::Private {
            peer_id: peer_id.into(),
        });
    }

    pub fn send(&self, content: &str) {
        self.app.dispatch(AppAction::SendMessage {
            content: content.into(),
        });
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.app
            .state()
            .current_chat
            .map(|c| c.messages)
            .unwrap_or_default()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.body).collect()
    }
}
