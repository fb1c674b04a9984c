// Conversation mount/unmount and the realtime feed task.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use campus_backend_traits::{ConversationScope, FeedEvent, SubscriptionHandle};
use tokio::sync::mpsc;

use super::outbox::QueuedSend;
use super::store::MessageStore;
use super::*;
use crate::state::{ConnectionStatus, ConversationTarget};

/// Everything owned by the mounted conversation. Dropped on unmount.
pub(super) struct ConversationView {
    pub(super) token: u64,
    pub(super) target: ConversationTarget,
    pub(super) viewer_id: Option<String>,
    pub(super) scope: Option<ConversationScope>,
    pub(super) store: MessageStore,
    pub(super) draft: String,
    pub(super) connection: ConnectionStatus,
    pub(super) loading_history: bool,
    pub(super) history_requested: bool,
    pub(super) load_seq: u64,
    // Confirmed ids folded in since the last history load was issued.
    pub(super) live_since_load: HashSet<String>,
    pub(super) last_outgoing_ms: i64,
    pub(super) outbox: mpsc::UnboundedSender<QueuedSend>,
    alive: Arc<AtomicBool>,
    subscription: Option<SubscriptionHandle>,
}

impl ConversationView {
    fn new(
        token: u64,
        target: ConversationTarget,
        outbox: mpsc::UnboundedSender<QueuedSend>,
    ) -> Self {
        Self {
            token,
            target,
            viewer_id: None,
            scope: None,
            store: MessageStore::new(),
            draft: String::new(),
            connection: ConnectionStatus::Connecting,
            loading_history: false,
            history_requested: false,
            load_seq: 0,
            live_since_load: HashSet::new(),
            last_outgoing_ms: 0,
            outbox,
            alive: Arc::new(AtomicBool::new(true)),
            subscription: None,
        }
    }

    pub(super) fn peer_id(&self) -> Option<&str> {
        match &self.target {
            ConversationTarget::Private { peer_id } => Some(peer_id),
            ConversationTarget::Club { .. } => None,
        }
    }
}

/// Delay before reconnect `attempt` (1-based): doubles from `initial`, capped at `max`.
pub(super) fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    initial.saturating_mul(1u32 << shift).min(max)
}

impl AppCore {
    pub(super) fn live_view_mut(&mut self, token: u64) -> Option<&mut ConversationView> {
        self.conversation.as_mut().filter(|v| v.token == token)
    }

    pub(super) fn conversation_title(&self, view: &ConversationView) -> Option<String> {
        match &view.target {
            ConversationTarget::Private { peer_id } => self
                .cached_profile(peer_id)
                .and_then(|p| p.name.clone())
                .or_else(|| Some(peer_id.clone())),
            ConversationTarget::Club { club_id } => Some(club_id.clone()),
        }
    }

    pub(super) fn sync_conversation_to_router(&mut self) {
        let top = self.state.router.screen_stack.last().cloned();
        match top {
            Some(Screen::Conversation { target }) => {
                let mounted = self
                    .conversation
                    .as_ref()
                    .is_some_and(|v| v.target == target);
                if !mounted {
                    self.unmount_conversation();
                    self.mount_conversation(target);
                }
            }
            _ => {
                if self.conversation.is_some() {
                    self.unmount_conversation();
                }
            }
        }
    }

    fn mount_conversation(&mut self, target: ConversationTarget) {
        self.view_token = self.view_token.wrapping_add(1);
        let token = self.view_token;
        tracing::info!(token, key = %target.key(), "mount conversation");
        let outbox = self.start_outbox(token);
        self.conversation = Some(ConversationView::new(token, target, outbox));
        self.state.current_chat = self.project_current_chat();

        // Identity is re-checked against the backend on every mount.
        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.request_timeout();
        self.runtime.spawn(async move {
            let result = bounded(timeout, backend.current_user()).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ViewerResolved {
                token,
                result,
            })));
        });
    }

    pub(super) fn unmount_conversation(&mut self) {
        if let Some(view) = self.conversation.take() {
            view.alive.store(false, Ordering::SeqCst);
            if let Some(handle) = view.subscription {
                handle.unsubscribe();
            }
            tracing::info!(token = view.token, "unmount conversation");
        }
        self.state.current_chat = None;
    }

    /// Leave the conversation screen; used when the view cannot be shown safely.
    fn abort_conversation(&mut self, msg: String) {
        self.unmount_conversation();
        if matches!(
            self.state.router.screen_stack.last(),
            Some(Screen::Conversation { .. })
        ) {
            self.state.router.screen_stack.pop();
        }
        self.sync_conversation_to_router();
        self.state.toast = Some(msg);
        self.emit_router();
    }

    pub(super) fn handle_viewer_resolved(
        &mut self,
        token: u64,
        result: Result<String, BackendError>,
    ) {
        if self.live_view_mut(token).is_none() {
            tracing::debug!(token, "stale viewer result");
            return;
        }
        let viewer = match result {
            Ok(viewer) => viewer,
            Err(e) => {
                tracing::warn!(%e, "identity check failed; leaving conversation");
                self.abort_conversation(format!("Could not verify your account: {e}"));
                return;
            }
        };
        let session_user = self.session.as_ref().map(|s| s.user_id.clone());
        if session_user.as_deref() != Some(viewer.as_str()) {
            tracing::warn!("backend identity does not match session; leaving conversation");
            self.abort_conversation("Your session changed. Please log in again.".to_string());
            return;
        }

        let Some(view) = self.live_view_mut(token) else {
            return;
        };
        let scope = view.target.scope_for(&viewer);
        view.viewer_id = Some(viewer.clone());
        view.scope = Some(scope.clone());
        let alive = view.alive.clone();
        let peer = view.peer_id().map(ToString::to_string);
        tracing::info!(token, scope = %scope.key(), "viewer resolved");

        self.start_feed(token, scope, alive);
        self.prefetch_profile(&viewer);
        if let Some(peer) = peer {
            self.prefetch_profile(&peer);
        }
        self.emit_current_chat();
    }

    /// One task per view: subscribe, forward inserts, and re-subscribe with
    /// backoff whenever the feed drops, until the view is unmounted.
    fn start_feed(&mut self, token: u64, scope: ConversationScope, alive: Arc<AtomicBool>) {
        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.request_timeout();
        let (initial, max) = self.config.reconnect_backoff();
        self.runtime.spawn(async move {
            let send = |event: InternalEvent| {
                let _ = tx.send(CoreMsg::Internal(Box::new(event)));
            };
            let mut attempt: u32 = 0;
            // Set once a loss has been reported: every later open must resync,
            // including the first successful one after failed subscribes.
            let mut lost = false;
            while alive.load(Ordering::SeqCst) {
                let reason = match bounded(timeout, backend.subscribe(&scope)).await {
                    Ok(mut sub) => {
                        if !alive.load(Ordering::SeqCst) {
                            sub.unsubscribe();
                            break;
                        }
                        send(InternalEvent::SubscriptionOpened {
                            token,
                            handle: sub.handle(),
                            resumed: lost,
                        });
                        attempt = 0;
                        let reason = loop {
                            match sub.next().await {
                                Some(FeedEvent::Insert(row)) => {
                                    if scope.matches(&row) {
                                        send(InternalEvent::RealtimeInsert { token, row });
                                    }
                                }
                                Some(FeedEvent::Closed { reason }) => break reason,
                                None => break "feed ended".to_string(),
                            }
                        };
                        sub.unsubscribe();
                        reason
                    }
                    Err(e) => e.to_string(),
                };
                if !alive.load(Ordering::SeqCst) {
                    break;
                }
                attempt = attempt.saturating_add(1);
                lost = true;
                send(InternalEvent::SubscriptionLost {
                    token,
                    attempt,
                    reason,
                });
                tokio::time::sleep(backoff_delay(initial, max, attempt)).await;
            }
            tracing::debug!(token, "feed task finished");
        });
    }

    pub(super) fn handle_subscription_opened(
        &mut self,
        token: u64,
        handle: SubscriptionHandle,
        resumed: bool,
    ) {
        let Some(view) = self.live_view_mut(token) else {
            // Opened after unmount: close it right away.
            handle.unsubscribe();
            return;
        };
        if let Some(prev) = view.subscription.replace(handle) {
            prev.unsubscribe();
        }
        let was_down = matches!(view.connection, ConnectionStatus::Reconnecting { .. });
        view.connection = ConnectionStatus::Live;
        let resync = resumed || was_down;
        let needs_history = resync || !view.history_requested;
        tracing::info!(token, resumed, was_down, "subscription live");
        if needs_history {
            self.request_history(resync);
        }
        self.emit_current_chat();
    }

    pub(super) fn handle_subscription_lost(&mut self, token: u64, attempt: u32, reason: String) {
        let Some(view) = self.live_view_mut(token) else {
            return;
        };
        if let Some(prev) = view.subscription.take() {
            prev.unsubscribe();
        }
        view.connection = ConnectionStatus::Reconnecting { attempt };
        let needs_history = !view.history_requested;
        tracing::warn!(token, attempt, %reason, "subscription lost");
        // Show history even while realtime is down.
        if needs_history {
            self.request_history(false);
        }
        self.emit_current_chat();
    }
}
