//! Realtime feed handles
//!
//! A [`Subscription`] is the consumer side of a realtime channel. Backends hand
//! out a subscription together with a close callback; the [`SubscriptionHandle`]
//! can be cloned and moved to whoever owns the channel's lifetime. Closing is
//! idempotent and, once closed, the subscription yields nothing more even if the
//! backend still has events buffered.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, mpsc};

use crate::messages::MessageRow;

/// Event delivered on a realtime feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A new row matching the subscribed scope
    Insert(MessageRow),
    /// The channel dropped; no further events will arrive
    Closed {
        /// Human-readable cause
        reason: String,
    },
}

type CloseFn = dyn Fn() + Send + Sync;

/// Cloneable owner handle of a subscription
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: u64,
    closed: Arc<AtomicBool>,
    wake: Arc<Notify>,
    on_close: Arc<CloseFn>,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SubscriptionHandle {
    /// Backend-local id of the channel
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether [`SubscriptionHandle::unsubscribe`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the channel. Safe to call any number of times; the backend's close
    /// callback runs only once.
    pub fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        (self.on_close)();
        self.wake.notify_one();
    }
}

/// Consumer side of a realtime channel
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    events: mpsc::UnboundedReceiver<FeedEvent>,
}

impl Subscription {
    /// Wrap a backend channel. `on_close` runs once, on the first unsubscribe.
    pub fn new(
        id: u64,
        events: mpsc::UnboundedReceiver<FeedEvent>,
        on_close: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            handle: SubscriptionHandle {
                id,
                closed: Arc::new(AtomicBool::new(false)),
                wake: Arc::new(Notify::new()),
                on_close: Arc::new(on_close),
            },
            events,
        }
    }

    /// A cloneable handle for closing this subscription from elsewhere
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Close the channel (idempotent)
    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }

    /// Next event, or `None` once the subscription is closed or the backend
    /// dropped its sender
    pub async fn next(&mut self) -> Option<FeedEvent> {
        if self.handle.is_closed() {
            return None;
        }
        let wake = self.handle.wake.clone();
        let event = tokio::select! {
            _ = wake.notified() => None,
            event = self.events.recv() => event,
        };
        if self.handle.is_closed() {
            return None;
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::DateTime;

    use super::*;

    fn row(id: &str) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            sender_id: "alice".to_string(),
            recipient_id: None,
            club_id: Some("chess".to_string()),
            body: "hi".to_string(),
            message_type: "text".to_string(),
            created_at: DateTime::from_timestamp_millis(1).unwrap(),
            sender_name: None,
            sender_avatar_url: None,
        }
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        let counter = closes.clone();
        let sub = Subscription::new(1, rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let handle = sub.handle();
        handle.unsubscribe();
        handle.unsubscribe();
        sub.unsubscribe();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn closed_subscription_yields_nothing_even_with_buffered_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(7, rx, || {});
        tx.send(FeedEvent::Insert(row("m1"))).unwrap();
        assert_eq!(sub.next().await, Some(FeedEvent::Insert(row("m1"))));

        tx.send(FeedEvent::Insert(row("m2"))).unwrap();
        sub.unsubscribe();
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn unsubscribe_wakes_a_pending_reader() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(3, rx, || {});
        let handle = sub.handle();
        let reader = tokio::spawn(async move { sub.next().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        handle.unsubscribe();
        assert_eq!(reader.await.unwrap(), None);
    }
}
