//! Memory-based implementation of [`ChatBackend`].
//!
//! Non-persistent: users, messages and realtime subscribers live for as long as
//! the [`MemoryBackend`] (or any clone of it) does. Useful for tests and for
//! running the app core offline.
//!
//! ## Fault injection
//!
//! Tests drive the unhappy paths through [`Faults`]: failing identity lookups,
//! history queries, inserts or profile lookups, delaying inserts or their
//! acknowledgements, suppressing or duplicating realtime echoes, and refusing
//! new subscriptions. [`MemoryBackend::drop_subscriptions`] simulates a realtime
//! outage.
//!
//! ```rust
//! use campus_memory_backend::MemoryBackend;
//!
//! let backend = MemoryBackend::new();
//! backend.register_user("u-alice", "alice@campus.test", "secret", Some("Alice"));
//! backend.update_faults(|f| f.duplicate_delivery = true);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use campus_backend_traits::{
    AuthSession, BackendError, BackendResult, ChatBackend, ConversationScope, FeedEvent,
    MessageFilter, MessageRow, NewMessage, Subscription, UserDisplayInfo,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Switches for simulating backend misbehaviour
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `current_user` fails even with a valid session
    pub fail_current_user: bool,
    /// `query_messages` fails
    pub fail_history: bool,
    /// Wait this long before answering (or failing) a history query
    pub history_delay: Option<Duration>,
    /// `insert_message` is rejected
    pub fail_inserts: bool,
    /// Wait this long before storing (or rejecting) an insert
    pub insert_delay: Option<Duration>,
    /// Wait this long after storing (and echoing) an insert before acknowledging it
    pub ack_delay: Option<Duration>,
    /// Inserts are stored and acknowledged but never pushed to subscribers
    pub suppress_echo: bool,
    /// Every realtime event is delivered twice
    pub duplicate_delivery: bool,
    /// `resolve_user_display_info` fails
    pub fail_display_info: bool,
    /// `subscribe` fails
    pub fail_subscribe: bool,
}

#[derive(Debug, Clone)]
struct UserRecord {
    email: String,
    password: String,
    info: UserDisplayInfo,
}

#[derive(Debug)]
struct Subscriber {
    scope: ConversationScope,
    tx: mpsc::UnboundedSender<FeedEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, UserRecord>,
    tokens: HashMap<String, String>,
    session: Option<String>,
    messages: Vec<MessageRow>,
    next_message_id: u64,
    next_token_id: u64,
    next_subscription_id: u64,
    last_created_ms: i64,
    subscribers: HashMap<u64, Subscriber>,
    faults: Faults,
}

impl Inner {
    fn next_created_at(&mut self) -> DateTime<Utc> {
        // Keep server timestamps strictly increasing so rapid inserts never tie.
        let now = Utc::now().timestamp_millis();
        self.last_created_ms = now.max(self.last_created_ms + 1);
        DateTime::from_timestamp_millis(self.last_created_ms).unwrap_or_else(Utc::now)
    }

    fn display_info(&self, user_id: &str) -> UserDisplayInfo {
        self.users
            .get(user_id)
            .map(|u| u.info.clone())
            .unwrap_or_default()
    }

    fn store(&mut self, message: NewMessage) -> MessageRow {
        self.next_message_id += 1;
        let info = self.display_info(&message.sender_id);
        let row = MessageRow {
            id: format!("m{}", self.next_message_id),
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            club_id: message.club_id,
            body: message.body,
            message_type: message.message_type,
            created_at: self.next_created_at(),
            sender_name: info.name,
            sender_avatar_url: info.avatar_url,
        };
        self.messages.push(row.clone());
        row
    }

    fn fan_out(&mut self, row: &MessageRow) {
        let copies = if self.faults.duplicate_delivery { 2 } else { 1 };
        self.subscribers.retain(|id, sub| {
            if !sub.scope.matches(row) {
                return true;
            }
            for _ in 0..copies {
                if sub.tx.send(FeedEvent::Insert(row.clone())).is_err() {
                    tracing::debug!(subscription = id, "dropping subscriber with closed receiver");
                    return false;
                }
            }
            true
        });
    }
}

/// In-memory backend. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryBackend {
    /// Empty backend with no users
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a user that can sign in with `email`/`password`
    pub fn register_user(&self, user_id: &str, email: &str, password: &str, name: Option<&str>) {
        self.inner.write().users.insert(
            user_id.to_string(),
            UserRecord {
                email: email.to_string(),
                password: password.to_string(),
                info: UserDisplayInfo {
                    name: name.map(ToString::to_string),
                    avatar_url: None,
                },
            },
        );
    }

    /// Replace the fault switches
    pub fn set_faults(&self, faults: Faults) {
        self.inner.write().faults = faults;
    }

    /// Edit the fault switches in place
    pub fn update_faults(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.inner.write().faults);
    }

    /// Store a row as-is without notifying subscribers (history fixtures)
    pub fn seed_message(&self, row: MessageRow) {
        let mut inner = self.inner.write();
        inner.last_created_ms = inner.last_created_ms.max(row.created_at_ms());
        inner.messages.push(row);
    }

    /// Simulate a write by another client: store the message and push it to
    /// matching subscribers
    pub fn push_message(&self, message: NewMessage) -> MessageRow {
        let mut inner = self.inner.write();
        let row = inner.store(message);
        inner.fan_out(&row);
        row
    }

    /// Push an existing row to matching subscribers again (redelivery)
    pub fn deliver(&self, row: &MessageRow) {
        self.inner.write().fan_out(row);
    }

    /// Close every open feed with `reason`, simulating a realtime outage
    pub fn drop_subscriptions(&self, reason: &str) {
        let subscribers: Vec<Subscriber> = {
            let mut inner = self.inner.write();
            inner.subscribers.drain().map(|(_, sub)| sub).collect()
        };
        for sub in subscribers {
            let _ = sub.tx.send(FeedEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }

    /// Number of feeds currently open
    pub fn active_subscriptions(&self) -> usize {
        self.inner.read().subscribers.len()
    }

    /// Snapshot of every stored row, in insertion order
    pub fn messages(&self) -> Vec<MessageRow> {
        self.inner.read().messages.clone()
    }

    fn open_session(&self, user_id: &str) -> AuthSession {
        let mut inner = self.inner.write();
        inner.next_token_id += 1;
        let token = format!("token-{}-{}", user_id, inner.next_token_id);
        inner.tokens.insert(token.clone(), user_id.to_string());
        inner.session = Some(user_id.to_string());
        AuthSession {
            user_id: user_id.to_string(),
            access_token: token,
            refresh_token: None,
        }
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthSession> {
        let user_id = {
            let inner = self.inner.read();
            inner
                .users
                .iter()
                .find(|(_, u)| u.email.eq_ignore_ascii_case(email) && u.password == password)
                .map(|(id, _)| id.clone())
        };
        let Some(user_id) = user_id else {
            return Err(BackendError::Unauthenticated);
        };
        Ok(self.open_session(&user_id))
    }

    async fn restore_session(&self, access_token: &str) -> BackendResult<AuthSession> {
        let user_id = self.inner.read().tokens.get(access_token).cloned();
        let Some(user_id) = user_id else {
            return Err(BackendError::Unauthenticated);
        };
        let mut inner = self.inner.write();
        inner.session = Some(user_id.clone());
        Ok(AuthSession {
            user_id,
            access_token: access_token.to_string(),
            refresh_token: None,
        })
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.inner.write().session = None;
        Ok(())
    }

    async fn current_user(&self) -> BackendResult<String> {
        let inner = self.inner.read();
        if inner.faults.fail_current_user {
            return Err(BackendError::Transport("identity lookup failed".into()));
        }
        inner.session.clone().ok_or(BackendError::Unauthenticated)
    }

    async fn query_messages(&self, filter: &MessageFilter) -> BackendResult<Vec<MessageRow>> {
        let history_delay = self.inner.read().faults.history_delay;
        if let Some(delay) = history_delay {
            tokio::time::sleep(delay).await;
        }
        let inner = self.inner.read();
        if inner.faults.fail_history {
            return Err(BackendError::Rejected {
                status: 500,
                message: "history unavailable".into(),
            });
        }
        let mut rows: Vec<MessageRow> = inner
            .messages
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        if matches!(filter, MessageFilter::Club { .. }) {
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        Ok(rows)
    }

    async fn insert_message(&self, message: NewMessage) -> BackendResult<MessageRow> {
        let insert_delay = {
            let inner = self.inner.read();
            if inner.session.as_deref() != Some(message.sender_id.as_str()) {
                return Err(BackendError::Unauthenticated);
            }
            inner.faults.insert_delay
        };
        if let Some(delay) = insert_delay {
            tokio::time::sleep(delay).await;
        }
        let (row, ack_delay) = {
            let mut inner = self.inner.write();
            if inner.faults.fail_inserts {
                return Err(BackendError::Rejected {
                    status: 500,
                    message: "insert rejected".into(),
                });
            }
            let row = inner.store(message);
            if !inner.faults.suppress_echo {
                inner.fan_out(&row);
            }
            (row, inner.faults.ack_delay)
        };
        if let Some(delay) = ack_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(row)
    }

    async fn subscribe(&self, scope: &ConversationScope) -> BackendResult<Subscription> {
        let mut inner = self.inner.write();
        if inner.faults.fail_subscribe {
            return Err(BackendError::ChannelClosed("realtime unavailable".into()));
        }
        inner.next_subscription_id += 1;
        let id = inner.next_subscription_id;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.insert(
            id,
            Subscriber {
                scope: scope.clone(),
                tx,
            },
        );
        tracing::debug!(subscription = id, scope = %scope.key(), "memory subscribe");

        let shared = self.inner.clone();
        Ok(Subscription::new(id, rx, move || {
            shared.write().subscribers.remove(&id);
        }))
    }

    async fn resolve_user_display_info(&self, user_id: &str) -> BackendResult<UserDisplayInfo> {
        let inner = self.inner.read();
        if inner.faults.fail_display_info {
            return Err(BackendError::Transport("profile lookup failed".into()));
        }
        inner
            .users
            .get(user_id)
            .map(|u| u.info.clone())
            .ok_or_else(|| BackendError::NotFound(user_id.to_string()))
    }
}
