// History loading: one query per direction for private conversations, one for clubs.

use std::collections::HashSet;

use campus_backend_traits::{ConversationScope, MessageFilter, MessageRow};

use super::*;

/// Merge both directions of a private conversation: dedupe by id, oldest first.
pub(super) fn merge_private(sent: Vec<MessageRow>, received: Vec<MessageRow>) -> Vec<MessageRow> {
    let mut seen = HashSet::new();
    let mut merged: Vec<MessageRow> = sent
        .into_iter()
        .chain(received)
        .filter(|r| seen.insert(r.id.clone()))
        .collect();
    merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    merged
}

/// Club rows come back newest first; present them oldest first.
pub(super) fn order_club(mut rows: Vec<MessageRow>) -> Vec<MessageRow> {
    rows.reverse();
    let mut seen = HashSet::new();
    rows.retain(|r| seen.insert(r.id.clone()));
    // Stable, so rows with equal timestamps keep the reversed backend order.
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    rows
}

async fn load_history(
    backend: Arc<dyn ChatBackend>,
    scope: ConversationScope,
    viewer_id: String,
    timeout: Duration,
) -> Result<Vec<MessageRow>, BackendError> {
    match &scope {
        ConversationScope::Private { .. } => {
            let peer_id = scope
                .peer_of(&viewer_id)
                .ok_or_else(|| BackendError::NotFound(format!("conversation {}", scope.key())))?
                .to_string();
            let sent = MessageFilter::Direct {
                sender_id: viewer_id.clone(),
                recipient_id: peer_id.clone(),
            };
            let received = MessageFilter::Direct {
                sender_id: peer_id,
                recipient_id: viewer_id,
            };
            let (sent, received) = tokio::try_join!(
                bounded(timeout, backend.query_messages(&sent)),
                bounded(timeout, backend.query_messages(&received)),
            )?;
            Ok(merge_private(sent, received))
        }
        ConversationScope::Club { club_id } => {
            let filter = MessageFilter::Club {
                club_id: club_id.clone(),
            };
            let rows = bounded(timeout, backend.query_messages(&filter)).await?;
            Ok(order_club(rows))
        }
    }
}

impl AppCore {
    /// Issue a history load for the mounted view. `resync` marks reloads of an
    /// already-populated timeline (reconnects, foregrounding).
    pub(super) fn request_history(&mut self, resync: bool) {
        let Some(view) = self.conversation.as_mut() else {
            return;
        };
        let (Some(scope), Some(viewer)) = (view.scope.clone(), view.viewer_id.clone()) else {
            return;
        };
        view.history_requested = true;
        view.loading_history = true;
        view.load_seq += 1;
        view.live_since_load.clear();
        let (token, load_seq) = (view.token, view.load_seq);
        tracing::debug!(token, load_seq, resync, "history load issued");

        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.request_timeout();
        self.runtime.spawn(async move {
            let result = load_history(backend, scope, viewer, timeout).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::HistoryLoaded {
                token,
                load_seq,
                resync,
                result,
            })));
        });
        self.emit_current_chat();
    }

    pub(super) fn handle_history_loaded(
        &mut self,
        token: u64,
        load_seq: u64,
        resync: bool,
        result: Result<Vec<MessageRow>, BackendError>,
    ) {
        let Some(view) = self.live_view_mut(token) else {
            return;
        };
        if view.load_seq != load_seq {
            tracing::debug!(token, load_seq, "superseded history load dropped");
            return;
        }
        view.loading_history = false;
        match result {
            Ok(rows) => {
                tracing::info!(token, count = rows.len(), "history loaded");
                let keep = std::mem::take(&mut view.live_since_load);
                view.store.replace_history(rows, &keep);
                let mut senders: Vec<String> = view
                    .store
                    .records()
                    .iter()
                    .filter(|r| r.sender_name.is_none())
                    .map(|r| r.sender_id.clone())
                    .collect();
                senders.sort();
                senders.dedup();

                for sender in &senders {
                    if let Some(info) = self.cached_profile(sender).cloned() {
                        if let Some(view) = self.conversation.as_mut() {
                            view.store.apply_sender_info(
                                sender,
                                info.name.as_deref(),
                                info.avatar_url.as_deref(),
                            );
                        }
                    } else {
                        self.prefetch_profile(sender);
                    }
                }
                self.emit_current_chat();
                self.emit_scroll_to_newest(false);
            }
            Err(e) => {
                tracing::warn!(%e, token, resync, "history load failed");
                // A failed first load shows an empty timeline apart from pending
                // sends and rows folded in live; a failed resync keeps what is
                // already on screen.
                let keep = std::mem::take(&mut view.live_since_load);
                if !resync {
                    view.store.replace_history(Vec::new(), &keep);
                }
                self.emit_current_chat();
            }
        }
    }
}
