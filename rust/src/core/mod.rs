mod config;
mod history;
mod outbox;
mod reconcile;
mod session;
mod store;
mod subscription;

pub(crate) use config::default_app_config_json;

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use campus_backend_traits::{BackendError, ChatBackend, UserDisplayInfo};
use campus_memory_backend::MemoryBackend;
use campus_rest_backend::{RestBackend, RestConfig};
use flume::Sender;

use crate::actions::AppAction;
use crate::state::{BusyState, ChatViewState, Screen};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

use session::Session;
use store::StoredMessage;
use subscription::ConversationView;

/// Bound a backend call by the configured request timeout.
pub(super) async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(timeout.as_millis() as u64)),
    }
}

fn build_backend(config: &config::AppConfig) -> Arc<dyn ChatBackend> {
    if !config.network_enabled() {
        tracing::info!("network disabled; using in-memory backend");
        return Arc::new(MemoryBackend::new());
    }
    let (Some(url), Some(key)) = (config.backend_url.as_deref(), config.anon_key.as_deref())
    else {
        tracing::warn!("backend_url or anon_key missing; using in-memory backend");
        return Arc::new(MemoryBackend::new());
    };
    match RestBackend::new(RestConfig::new(url, key)) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            tracing::error!(%e, "backend init failed; using in-memory backend");
            Arc::new(MemoryBackend::new())
        }
    }
}

pub struct AppCore {
    pub state: crate::state::AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<crate::state::AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,
    backend: Arc<dyn ChatBackend>,

    session: Option<Session>,
    // Bumped on every sign-in.
    session_generation: u64,
    // Lookups in flight, so a burst of rows from one sender costs one request.
    profiles_in_flight: HashSet<String>,

    // Bumped on every mount; async results carry the token they were started for.
    view_token: u64,
    conversation: Option<ConversationView>,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<crate::state::AppState>>,
        backend: Option<Arc<dyn ChatBackend>>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let backend = backend.unwrap_or_else(|| build_backend(&config));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: crate::state::AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            backend,
            session: None,
            session_generation: 0,
            profiles_in_flight: HashSet::new(),
            view_token: 0,
            conversation: None,
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &crate::state::AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn emit_router(&mut self) {
        self.emit_state();
    }

    fn emit_busy(&mut self) {
        self.emit_state();
    }

    fn emit_toast(&mut self) {
        self.emit_state();
    }

    /// Re-project the mounted view into `state.current_chat` and emit.
    fn emit_current_chat(&mut self) {
        self.state.current_chat = self.project_current_chat();
        self.emit_state();
    }

    fn project_current_chat(&self) -> Option<ChatViewState> {
        let view = self.conversation.as_ref()?;
        let viewer = view.viewer_id.as_deref().unwrap_or_default();
        Some(ChatViewState {
            conversation_key: view.target.key(),
            target: view.target.clone(),
            title: self.conversation_title(view),
            messages: view.store.to_chat_messages(viewer),
            draft: view.draft.clone(),
            loading_history: view.loading_history,
            connection: view.connection.clone(),
        })
    }

    /// Scroll effects ride their own update so the UI can animate them.
    fn emit_scroll_to_newest(&mut self, animated: bool) {
        let Some(key) = self.conversation.as_ref().map(|v| v.target.key()) else {
            return;
        };
        let rev = self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::ScrollToNewest {
            rev,
            conversation_key: key,
            animated,
        });
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Stays in state until the UI clears it, so rev-gap resyncs still show it.
        self.state.toast = Some(msg.into());
        self.emit_toast();
    }

    fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        let mut next = self.state.busy.clone();
        f(&mut next);
        if next != self.state.busy {
            self.state.busy = next;
            self.emit_busy();
        }
    }

    fn clear_busy(&mut self) {
        self.set_busy(|b| *b = BusyState::idle());
    }

    /// Fill missing sender attributes from the session's profile cache.
    fn decorate(&self, record: &mut StoredMessage) {
        let Some(info) = self
            .session
            .as_ref()
            .and_then(|s| s.profiles.get(&record.sender_id))
        else {
            return;
        };
        if record.sender_name.is_none() {
            record.sender_name = info.name.clone();
        }
        if record.sender_avatar_url.is_none() {
            record.sender_avatar_url = info.avatar_url.clone();
        }
    }

    fn cached_profile(&self, user_id: &str) -> Option<&UserDisplayInfo> {
        self.session.as_ref()?.profiles.get(user_id)
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: it can carry passwords and message bodies.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::SessionStarted { result } => self.handle_session_started(result),
            InternalEvent::ViewerResolved { token, result } => {
                self.handle_viewer_resolved(token, result)
            }
            InternalEvent::ProfileResolved {
                generation,
                user_id,
                info,
            } => self.handle_profile_resolved(generation, user_id, info),
            InternalEvent::HistoryLoaded {
                token,
                load_seq,
                resync,
                result,
            } => self.handle_history_loaded(token, load_seq, resync, result),
            InternalEvent::SendFinished {
                token,
                pending_id,
                content,
                result,
            } => self.handle_send_finished(token, pending_id, content, result),
            InternalEvent::SubscriptionOpened {
                token,
                handle,
                resumed,
            } => self.handle_subscription_opened(token, handle, resumed),
            InternalEvent::SubscriptionLost {
                token,
                attempt,
                reason,
            } => self.handle_subscription_lost(token, attempt, reason),
            InternalEvent::RealtimeInsert { token, row } => self.handle_realtime_insert(token, row),
            InternalEvent::RealtimeSenderResolved { token, row, info } => {
                self.handle_realtime_sender_resolved(token, row, info)
            }
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::Login { email, password } => self.login(email, password),
            AppAction::RestoreSession { access_token } => self.restore_session(access_token),
            AppAction::Logout => self.logout(),
            AppAction::PushScreen { screen } => {
                if !self.is_logged_in() && !matches!(screen, Screen::Login) {
                    self.toast("Please log in first");
                    return;
                }
                self.state.router.screen_stack.push(screen);
                self.sync_conversation_to_router();
                self.emit_router();
            }
            AppAction::UpdateScreenStack { stack } => {
                self.state.router.screen_stack = stack;
                self.sync_conversation_to_router();
                self.emit_router();
            }
            AppAction::OpenConversation { target } => {
                if !self.is_logged_in() {
                    self.toast("Please log in first");
                    return;
                }
                let screen = Screen::Conversation { target };
                if self.state.router.screen_stack.last() != Some(&screen) {
                    self.state.router.screen_stack.push(screen);
                }
                self.sync_conversation_to_router();
                self.emit_router();
            }
            AppAction::CloseConversation => {
                if matches!(
                    self.state.router.screen_stack.last(),
                    Some(Screen::Conversation { .. })
                ) {
                    self.state.router.screen_stack.pop();
                }
                self.sync_conversation_to_router();
                self.emit_router();
            }
            AppAction::UpdateDraft { text } => {
                let Some(view) = self.conversation.as_mut() else {
                    return;
                };
                if view.draft != text {
                    view.draft = text;
                    self.emit_current_chat();
                }
            }
            AppAction::SendMessage { content } => self.send_message(content),
            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_toast();
                }
            }
            AppAction::Foregrounded => {
                // Feeds may have silently stalled in the background.
                if self.conversation.as_ref().is_some_and(|v| v.scope.is_some()) {
                    self.request_history(true);
                }
            }
        }
    }
}
