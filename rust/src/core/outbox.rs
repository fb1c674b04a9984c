// Optimistic sends: show a pending record immediately, settle it when the insert returns.

use campus_backend_traits::{MessageRow, NewMessage};
use tokio::sync::mpsc;

use super::store::{new_pending_id, StoredMessage};
use super::*;
use crate::state::now_millis;

/// One insert waiting in a view's outbox.
#[derive(Debug)]
pub(super) struct QueuedSend {
    pending_id: String,
    body: String,
    message: NewMessage,
}

/// Strictly increasing local timestamps so rapid sends never tie.
pub(super) fn next_outgoing_ms(last: i64, now: i64) -> i64 {
    if now <= last {
        last + 1
    } else {
        now
    }
}

impl AppCore {
    /// Inserts from one view run one at a time, in send order, so the backend
    /// assigns timestamps in the order the user sent them.
    pub(super) fn start_outbox(&self, token: u64) -> mpsc::UnboundedSender<QueuedSend> {
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<QueuedSend>();
        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.request_timeout();
        self.runtime.spawn(async move {
            while let Some(send) = outbox_rx.recv().await {
                let result = bounded(timeout, backend.insert_message(send.message)).await;
                let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SendFinished {
                    token,
                    pending_id: send.pending_id,
                    content: send.body,
                    result,
                })));
            }
            tracing::debug!(token, "outbox drained");
        });
        outbox_tx
    }

    pub(super) fn send_message(&mut self, content: String) {
        if !self.is_logged_in() {
            self.toast("Please log in first");
            return;
        }
        let body = content.trim().to_string();
        if body.is_empty() {
            return;
        }
        let Some(view) = self.conversation.as_mut() else {
            self.toast("Open a conversation first");
            return;
        };
        let (Some(scope), Some(viewer)) = (view.scope.clone(), view.viewer_id.clone()) else {
            self.toast("Still connecting, try again in a moment");
            return;
        };
        let Some(message) = NewMessage::text(&scope, &viewer, body.clone()) else {
            self.toast("You are not part of this conversation");
            return;
        };

        view.last_outgoing_ms = next_outgoing_ms(view.last_outgoing_ms, now_millis());
        let pending_id = new_pending_id();
        view.store.append_pending(StoredMessage::pending(
            pending_id.clone(),
            viewer,
            body.clone(),
            view.last_outgoing_ms,
        ));
        view.draft.clear();
        let queued = QueuedSend {
            pending_id: pending_id.clone(),
            body,
            message,
        };
        if let Err(mpsc::error::SendError(queued)) = view.outbox.send(queued) {
            tracing::error!(pending_id = %queued.pending_id, "outbox closed");
            view.store.remove_pending(&queued.pending_id);
            view.draft = queued.body;
            self.state.current_chat = self.project_current_chat();
            self.toast("Message not sent");
            return;
        }
        tracing::info!(%pending_id, "message queued");

        self.emit_current_chat();
        self.emit_scroll_to_newest(true);
    }

    pub(super) fn handle_send_finished(
        &mut self,
        token: u64,
        pending_id: String,
        content: String,
        result: Result<MessageRow, BackendError>,
    ) {
        match result {
            Ok(row) => {
                let mut record = StoredMessage::confirmed(row);
                self.decorate(&mut record);
                let Some(view) = self.live_view_mut(token) else {
                    return;
                };
                let id = record.id().to_string();
                tracing::info!(%pending_id, %id, "message confirmed");
                view.live_since_load.insert(id);
                if view.store.confirm_pending(&pending_id, record) {
                    self.emit_current_chat();
                }
            }
            Err(e) => {
                tracing::warn!(%e, %pending_id, "send failed");
                if let Some(view) = self.live_view_mut(token) {
                    view.store.remove_pending(&pending_id);
                    if view.draft.is_empty() {
                        view.draft = content;
                    }
                    self.state.current_chat = self.project_current_chat();
                }
                self.toast(format!("Message not sent: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_timestamps_are_strictly_increasing() {
        let mut last = 0;
        let mut seen = Vec::new();
        for now in [1_000, 1_000, 999, 1_005, 1_005] {
            last = next_outgoing_ms(last, now);
            seen.push(last);
        }
        assert_eq!(seen, vec![1_000, 1_001, 1_002, 1_005, 1_006]);
    }
}
