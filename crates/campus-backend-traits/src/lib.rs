//! Campus backend - the contract between the chat core and the hosted backend.
//!
//! The chat core never talks to a concrete backend directly. Everything it needs
//! (auth delegation, history queries, inserts, realtime feeds and profile lookups)
//! goes through [`ChatBackend`], so tests can substitute the in-memory backend and
//! production builds can use the REST/websocket one.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use async_trait::async_trait;

pub mod error;
pub mod messages;
pub mod subscription;
pub mod users;

pub use error::BackendError;
pub use messages::{ConversationScope, MessageFilter, MessageRow, NewMessage};
pub use subscription::{FeedEvent, Subscription, SubscriptionHandle};
pub use users::{AuthSession, UserDisplayInfo};

/// Result alias used by every backend operation
pub type BackendResult<T> = Result<T, BackendError>;

/// Operations the chat core requires from the hosted backend.
///
/// Implementations must be cheap to share (`Arc<dyn ChatBackend>`); every method
/// may be called concurrently from the core's runtime.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Exchange email/password for a session using the backend's built-in auth
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthSession>;

    /// Re-establish a session from a previously issued access token
    async fn restore_session(&self, access_token: &str) -> BackendResult<AuthSession>;

    /// End the current session. Succeeds when no session exists.
    async fn sign_out(&self) -> BackendResult<()>;

    /// Identity of the signed-in viewer
    async fn current_user(&self) -> BackendResult<String>;

    /// Fetch rows matching `filter`.
    ///
    /// Direct filters return rows in no particular order. Club filters return rows
    /// ordered by `created_at` descending.
    async fn query_messages(&self, filter: &MessageFilter) -> BackendResult<Vec<MessageRow>>;

    /// Insert a message and return the stored row with its backend-assigned id
    /// and canonical `created_at`
    async fn insert_message(&self, message: NewMessage) -> BackendResult<MessageRow>;

    /// Open a realtime feed of inserts for `scope`.
    ///
    /// Delivery is at-least-once: consumers must tolerate the same row twice.
    async fn subscribe(&self, scope: &ConversationScope) -> BackendResult<Subscription>;

    /// Best-effort lookup of a user's display attributes
    async fn resolve_user_display_info(&self, user_id: &str) -> BackendResult<UserDisplayInfo>;
}
