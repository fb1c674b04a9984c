// Folding confirmed realtime rows into the store.

use campus_backend_traits::{MessageRow, UserDisplayInfo};
use serde::Deserialize;

use super::store::{MessageStore, StoredMessage};
use super::*;

/// Which pending records a confirmed arrival clears.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(super) enum ReconcilePolicy {
    /// Clear the oldest pending record from the same sender with the same
    /// trimmed body, sent within the match window.
    #[default]
    MatchSend,
    /// Clear every pending record of the viewer on any confirmed arrival.
    ClearAll,
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum FoldOutcome {
    Duplicate,
    Appended { cleared_pending: Vec<String> },
}

pub(super) fn fold_confirmed(
    store: &mut MessageStore,
    record: StoredMessage,
    viewer_id: &str,
    policy: ReconcilePolicy,
    window_ms: i64,
) -> FoldOutcome {
    let Some(id) = record.server_id() else {
        return FoldOutcome::Duplicate;
    };
    if store.contains_server_id(id) {
        return FoldOutcome::Duplicate;
    }

    let cleared_pending = match policy {
        ReconcilePolicy::ClearAll => {
            let ids = store.pending_ids_for(viewer_id);
            for id in &ids {
                store.remove_pending(id);
            }
            ids
        }
        ReconcilePolicy::MatchSend if record.sender_id == viewer_id => {
            let body = record.body.trim();
            // Records are sorted, so the first match is the oldest.
            let matched = store
                .records()
                .iter()
                .find(|p| {
                    p.is_pending()
                        && p.sender_id == viewer_id
                        && p.body.trim() == body
                        && (p.created_at_ms - record.created_at_ms).abs() <= window_ms
                })
                .map(|p| p.id().to_string());
            match matched {
                Some(pending_id) => {
                    store.remove_pending(&pending_id);
                    vec![pending_id]
                }
                None => Vec::new(),
            }
        }
        ReconcilePolicy::MatchSend => Vec::new(),
    };

    store.insert_confirmed(record);
    FoldOutcome::Appended { cleared_pending }
}

impl AppCore {
    pub(super) fn handle_realtime_insert(&mut self, token: u64, row: MessageRow) {
        let Some(view) = self.live_view_mut(token) else {
            return;
        };
        if view.store.contains_server_id(&row.id) {
            tracing::debug!(id = %row.id, "duplicate delivery dropped");
            return;
        }
        if row.sender_name.is_some() || self.cached_profile(&row.sender_id).is_some() {
            self.fold_realtime(token, row);
            return;
        }

        // Sender unknown: resolve before showing, then fold.
        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.request_timeout();
        self.runtime.spawn(async move {
            let info = match bounded(timeout, backend.resolve_user_display_info(&row.sender_id))
                .await
            {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::debug!(%e, sender = %row.sender_id, "sender lookup failed");
                    None
                }
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::RealtimeSenderResolved { token, row, info },
            )));
        });
    }

    pub(super) fn handle_realtime_sender_resolved(
        &mut self,
        token: u64,
        row: MessageRow,
        info: Option<UserDisplayInfo>,
    ) {
        if self.live_view_mut(token).is_none() {
            return;
        }
        if let (Some(info), Some(sess)) = (info, self.session.as_mut()) {
            sess.profiles.insert(row.sender_id.clone(), info.clone());
            // Earlier rows from this sender may still be unresolved.
            if let Some(view) = self.conversation.as_mut() {
                view.store.apply_sender_info(
                    &row.sender_id,
                    info.name.as_deref(),
                    info.avatar_url.as_deref(),
                );
            }
        }
        self.fold_realtime(token, row);
    }

    fn fold_realtime(&mut self, token: u64, row: MessageRow) {
        let mut record = StoredMessage::confirmed(row);
        self.decorate(&mut record);
        if record.sender_name.is_none() {
            record.sender_unresolved = true;
        }
        let policy = self.config.reconcile_policy();
        let window_ms = self.config.pending_match_window_ms();

        let Some(view) = self.live_view_mut(token) else {
            return;
        };
        let Some(viewer) = view.viewer_id.clone() else {
            return;
        };
        let id = record.id().to_string();
        match fold_confirmed(&mut view.store, record, &viewer, policy, window_ms) {
            FoldOutcome::Duplicate => {
                tracing::debug!(%id, "duplicate delivery dropped");
                return;
            }
            FoldOutcome::Appended { cleared_pending } => {
                tracing::debug!(%id, cleared = cleared_pending.len(), "realtime row folded");
                view.live_since_load.insert(id);
            }
        }
        self.emit_current_chat();
        self.emit_scroll_to_newest(true);
    }
}
