// Per-conversation message store: the merged, ordered timeline.

use std::collections::HashSet;

use campus_backend_traits::MessageRow;
use uuid::Uuid;

use super::config::UNKNOWN_SENDER_NAME;
use crate::state::ChatMessage;

/// Reserved namespace for locally generated ids. Backend ids never carry it.
pub(super) const PENDING_ID_PREFIX: &str = "pending:";

pub(super) fn new_pending_id() -> String {
    format!("{PENDING_ID_PREFIX}{}", Uuid::new_v4())
}

pub(super) fn is_pending_id(id: &str) -> bool {
    id.starts_with(PENDING_ID_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum MessageKey {
    Confirmed(String),
    Pending(String),
}

#[derive(Debug, Clone)]
pub(super) struct StoredMessage {
    pub(super) key: MessageKey,
    pub(super) sender_id: String,
    pub(super) sender_name: Option<String>,
    pub(super) sender_avatar_url: Option<String>,
    pub(super) body: String,
    pub(super) message_type: String,
    pub(super) created_at_ms: i64,
    /// Display-info lookup failed; shown with a placeholder name until resolved.
    pub(super) sender_unresolved: bool,
    // Insertion order; breaks created_at ties so equal timestamps never reshuffle.
    seq: u64,
}

impl StoredMessage {
    pub(super) fn confirmed(row: MessageRow) -> Self {
        debug_assert!(!is_pending_id(&row.id));
        let created_at_ms = row.created_at_ms();
        Self {
            key: MessageKey::Confirmed(row.id),
            sender_id: row.sender_id,
            sender_name: row.sender_name,
            sender_avatar_url: row.sender_avatar_url,
            body: row.body,
            message_type: row.message_type,
            created_at_ms,
            sender_unresolved: false,
            seq: 0,
        }
    }

    pub(super) fn pending(
        pending_id: String,
        sender_id: String,
        body: String,
        created_at_ms: i64,
    ) -> Self {
        debug_assert!(is_pending_id(&pending_id));
        Self {
            key: MessageKey::Pending(pending_id),
            sender_id,
            sender_name: None,
            sender_avatar_url: None,
            body,
            message_type: campus_backend_traits::messages::DEFAULT_MESSAGE_TYPE.to_string(),
            created_at_ms,
            sender_unresolved: false,
            seq: 0,
        }
    }

    pub(super) fn id(&self) -> &str {
        match &self.key {
            MessageKey::Confirmed(id) | MessageKey::Pending(id) => id,
        }
    }

    pub(super) fn server_id(&self) -> Option<&str> {
        match &self.key {
            MessageKey::Confirmed(id) => Some(id),
            MessageKey::Pending(_) => None,
        }
    }

    pub(super) fn is_pending(&self) -> bool {
        matches!(self.key, MessageKey::Pending(_))
    }

    fn to_chat_message(&self, viewer_id: &str) -> ChatMessage {
        ChatMessage {
            id: self.id().to_string(),
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone().or_else(|| {
                self.sender_unresolved
                    .then(|| UNKNOWN_SENDER_NAME.to_string())
            }),
            sender_avatar_url: self.sender_avatar_url.clone(),
            body: self.body.clone(),
            message_type: self.message_type.clone(),
            created_at_ms: self.created_at_ms,
            is_mine: self.sender_id == viewer_id,
            is_pending: self.is_pending(),
        }
    }
}

/// Ordered timeline of one conversation.
///
/// Invariants, re-established after every mutation:
/// - no two records share a server id;
/// - records are sorted ascending by `created_at_ms`, ties in insertion order.
#[derive(Debug, Default)]
pub(super) struct MessageStore {
    records: Vec<StoredMessage>,
    next_seq: u64,
}

impl MessageStore {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn records(&self) -> &[StoredMessage] {
        &self.records
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub(super) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(super) fn contains_server_id(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.server_id() == Some(id))
    }

    #[cfg(test)]
    pub(super) fn contains_pending(&self, pending_id: &str) -> bool {
        self.records
            .iter()
            .any(|r| matches!(&r.key, MessageKey::Pending(id) if id == pending_id))
    }

    #[cfg(test)]
    pub(super) fn pending_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_pending()).count()
    }

    /// Replace the confirmed content with `rows`.
    ///
    /// Pending records survive, as do confirmed records whose ids are in `keep`
    /// (records that arrived live while the history query was in flight).
    pub(super) fn replace_history(&mut self, rows: Vec<MessageRow>, keep: &HashSet<String>) {
        self.records.retain(|r| match r.server_id() {
            None => true,
            Some(id) => keep.contains(id),
        });
        for row in rows {
            if self.contains_server_id(&row.id) {
                continue;
            }
            self.push(StoredMessage::confirmed(row));
        }
        self.sort();
    }

    pub(super) fn append_pending(&mut self, record: StoredMessage) {
        debug_assert!(record.is_pending());
        self.push(record);
        self.sort();
    }

    /// Append a confirmed record unless its server id is already present.
    /// Returns `false` for duplicates.
    pub(super) fn insert_confirmed(&mut self, record: StoredMessage) -> bool {
        let Some(id) = record.server_id() else {
            return false;
        };
        if self.contains_server_id(id) {
            return false;
        }
        self.push(record);
        self.sort();
        true
    }

    pub(super) fn remove_pending(&mut self, pending_id: &str) -> Option<StoredMessage> {
        let pos = self
            .records
            .iter()
            .position(|r| matches!(&r.key, MessageKey::Pending(id) if id == pending_id))?;
        Some(self.records.remove(pos))
    }

    /// Ids of `sender_id`'s pending records, oldest first.
    pub(super) fn pending_ids_for(&self, sender_id: &str) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.is_pending() && r.sender_id == sender_id)
            .map(|r| r.id().to_string())
            .collect()
    }

    /// Temporary-id reconciliation: the pending record becomes `confirmed`.
    ///
    /// When the confirmed id is already present (the realtime echo won the
    /// race) the pending record is simply dropped. Returns `true` if the store
    /// changed.
    pub(super) fn confirm_pending(&mut self, pending_id: &str, confirmed: StoredMessage) -> bool {
        let removed = self.remove_pending(pending_id);
        let inserted = self.insert_confirmed(confirmed);
        removed.is_some() || inserted
    }

    /// Fill in display attributes for every record from `sender_id` that lacks them.
    pub(super) fn apply_sender_info(
        &mut self,
        sender_id: &str,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> bool {
        let mut changed = false;
        for r in self.records.iter_mut().filter(|r| r.sender_id == sender_id) {
            if r.sender_name.is_none() && name.is_some() {
                r.sender_name = name.map(ToString::to_string);
                r.sender_unresolved = false;
                changed = true;
            }
            if r.sender_avatar_url.is_none() && avatar_url.is_some() {
                r.sender_avatar_url = avatar_url.map(ToString::to_string);
                changed = true;
            }
        }
        changed
    }

    pub(super) fn to_chat_messages(&self, viewer_id: &str) -> Vec<ChatMessage> {
        self.records
            .iter()
            .map(|r| r.to_chat_message(viewer_id))
            .collect()
    }

    fn push(&mut self, mut record: StoredMessage) {
        self.next_seq += 1;
        record.seq = self.next_seq;
        self.records.push(record);
    }

    fn sort(&mut self) {
        self.records.sort_by_key(|r| (r.created_at_ms, r.seq));
    }
}

#[cfg(test)]
pub(in crate::core) mod tests {
    use chrono::DateTime;

    use super::*;

    pub(in crate::core) fn row(id: &str, sender: &str, body: &str, ms: i64) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            sender_id: sender.to_string(),
            recipient_id: None,
            club_id: Some("chess".to_string()),
            body: body.to_string(),
            message_type: "text".to_string(),
            created_at: DateTime::from_timestamp_millis(ms).unwrap(),
            sender_name: None,
            sender_avatar_url: None,
        }
    }

    fn ids(store: &MessageStore) -> Vec<&str> {
        store.records().iter().map(StoredMessage::id).collect()
    }

    fn assert_sorted(store: &MessageStore) {
        let ts: Vec<i64> = store.records().iter().map(|r| r.created_at_ms).collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]), "not sorted: {ts:?}");
    }

    #[test]
    fn pending_ids_live_in_reserved_namespace() {
        let a = new_pending_id();
        let b = new_pending_id();
        assert_ne!(a, b);
        assert!(is_pending_id(&a));
        assert!(!is_pending_id("m1"));
    }

    #[test]
    fn insert_confirmed_rejects_duplicate_server_ids() {
        let mut store = MessageStore::new();
        assert!(store.insert_confirmed(StoredMessage::confirmed(row("m1", "a", "x", 10))));
        assert!(!store.insert_confirmed(StoredMessage::confirmed(row("m1", "a", "x", 10))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn records_stay_sorted_with_stable_ties() {
        let mut store = MessageStore::new();
        store.insert_confirmed(StoredMessage::confirmed(row("m3", "a", "3", 30)));
        store.insert_confirmed(StoredMessage::confirmed(row("m1", "a", "1", 10)));
        store.append_pending(StoredMessage::pending(
            "pending:x".into(),
            "a".into(),
            "p".into(),
            20,
        ));
        store.insert_confirmed(StoredMessage::confirmed(row("m2", "a", "2", 20)));
        assert_eq!(ids(&store), vec!["m1", "pending:x", "m2", "m3"]);
        assert_sorted(&store);
    }

    #[test]
    fn replace_history_keeps_pending_and_live_records() {
        let mut store = MessageStore::new();
        store.insert_confirmed(StoredMessage::confirmed(row("old", "a", "gone", 5)));
        store.insert_confirmed(StoredMessage::confirmed(row("live", "b", "kept", 50)));
        store.append_pending(StoredMessage::pending(
            "pending:1".into(),
            "a".into(),
            "hi".into(),
            60,
        ));

        let keep: HashSet<String> = ["live".to_string()].into_iter().collect();
        store.replace_history(
            vec![
                row("h2", "b", "two", 20),
                row("h1", "a", "one", 10),
                row("h1", "a", "one", 10),
            ],
            &keep,
        );
        assert_eq!(ids(&store), vec!["h1", "h2", "live", "pending:1"]);
        assert_sorted(&store);
    }

    #[test]
    fn confirm_pending_replaces_or_drops() {
        let mut store = MessageStore::new();
        store.append_pending(StoredMessage::pending(
            "pending:1".into(),
            "a".into(),
            "hi".into(),
            100,
        ));
        assert!(store.confirm_pending(
            "pending:1",
            StoredMessage::confirmed(row("m1", "a", "hi", 90))
        ));
        assert_eq!(ids(&store), vec!["m1"]);

        // Echo already present: the pending record is dropped, nothing duplicated.
        store.append_pending(StoredMessage::pending(
            "pending:2".into(),
            "a".into(),
            "again".into(),
            200,
        ));
        store.insert_confirmed(StoredMessage::confirmed(row("m2", "a", "again", 190)));
        assert!(store.confirm_pending(
            "pending:2",
            StoredMessage::confirmed(row("m2", "a", "again", 190))
        ));
        assert_eq!(ids(&store), vec!["m1", "m2"]);
        assert_eq!(store.pending_count(), 0);

        // Nothing left to change.
        assert!(!store.confirm_pending(
            "pending:2",
            StoredMessage::confirmed(row("m2", "a", "again", 190))
        ));
    }

    #[test]
    fn apply_sender_info_fills_missing_attributes_only() {
        let mut store = MessageStore::new();
        let mut named = row("m1", "b", "x", 1);
        named.sender_name = Some("Bobby".into());
        store.insert_confirmed(StoredMessage::confirmed(named));
        store.insert_confirmed(StoredMessage::confirmed(row("m2", "b", "y", 2)));

        assert!(store.apply_sender_info("b", Some("Bob"), None));
        let names: Vec<Option<&str>> = store
            .records()
            .iter()
            .map(|r| r.sender_name.as_deref())
            .collect();
        assert_eq!(names, vec![Some("Bobby"), Some("Bob")]);
        assert!(!store.apply_sender_info("b", Some("Bob"), None));
    }

    #[test]
    fn projection_marks_ownership_and_pending() {
        let mut store = MessageStore::new();
        store.insert_confirmed(StoredMessage::confirmed(row("m1", "bob", "yo", 1)));
        store.append_pending(StoredMessage::pending(
            "pending:1".into(),
            "alice".into(),
            "hey".into(),
            2,
        ));
        let msgs = store.to_chat_messages("alice");
        assert!(!msgs[0].is_mine && !msgs[0].is_pending);
        assert!(msgs[1].is_mine && msgs[1].is_pending);
    }

    #[test]
    fn pending_ids_for_lists_one_senders_pending_records() {
        let pending = |id: &str, sender: &str, ms: i64| {
            StoredMessage::pending(id.into(), sender.into(), "hi".into(), ms)
        };
        let mut store = MessageStore::new();
        store.append_pending(pending("pending:b", "a", 20));
        store.append_pending(pending("pending:a", "a", 10));
        store.append_pending(pending("pending:c", "b", 15));
        store.insert_confirmed(StoredMessage::confirmed(row("m1", "a", "0", 5)));

        assert_eq!(store.pending_ids_for("a"), vec!["pending:a", "pending:b"]);
        assert_eq!(store.pending_ids_for("b"), vec!["pending:c"]);
        assert!(store.pending_ids_for("nobody").is_empty());
    }

    #[test]
    fn unresolved_sender_shows_placeholder_until_info_arrives() {
        let mut store = MessageStore::new();
        let mut record = StoredMessage::confirmed(row("m1", "b", "x", 1));
        record.sender_unresolved = true;
        store.insert_confirmed(record);
        store.insert_confirmed(StoredMessage::confirmed(row("m2", "c", "y", 2)));

        let msgs = store.to_chat_messages("a");
        assert_eq!(msgs[0].sender_name.as_deref(), Some(UNKNOWN_SENDER_NAME));
        // Not yet looked up: no placeholder.
        assert_eq!(msgs[1].sender_name, None);

        assert!(store.apply_sender_info("b", Some("Bob"), None));
        let msgs = store.to_chat_messages("a");
        assert_eq!(msgs[0].sender_name.as_deref(), Some("Bob"));
        assert!(!store.records()[0].sender_unresolved);
    }
}
