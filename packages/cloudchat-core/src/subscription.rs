//! # Subscriptions
//!
//! A [`Subscription`] is a live feed of full snapshots for one store path.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SUBSCRIPTION LIFETIME                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  store.subscribe(path)                                                 │
//! │         │                                                               │
//! │         ├──► SubscriptionSink (kept by the store / SSE task)           │
//! │         │        sends Snapshot on open and on every change            │
//! │         │                                                               │
//! │         └──► Subscription (kept by the caller)                         │
//! │                  next().await → Some(Ok(snapshot))                     │
//! │                                                                         │
//! │  drop(subscription) / subscription.cancel()                            │
//! │         └──► token cancelled ──► sink reports closed ──► store forgets │
//! │                                                                         │
//! │  After disposal nothing is delivered: the receiver is gone with the    │
//! │  handle, so a stale feed can never reach local state.                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::error::Result;
use crate::store::{Snapshot, StorePath};

/// Unique id of one subscription.
pub type SubscriptionId = Uuid;

/// Caller side of a live subscription.
///
/// Dropping the handle disposes the subscription.
pub struct Subscription {
    id: SubscriptionId,
    path: StorePath,
    rx: mpsc::UnboundedReceiver<Result<Snapshot>>,
    token: CancellationToken,
    _guard: DropGuard,
}

/// Store side of a live subscription.
#[derive(Clone)]
pub struct SubscriptionSink {
    id: SubscriptionId,
    path: StorePath,
    tx: mpsc::UnboundedSender<Result<Snapshot>>,
    token: CancellationToken,
}

impl Subscription {
    /// Create a connected handle/sink pair for `path`.
    pub fn channel(path: StorePath) -> (Subscription, SubscriptionSink) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let handle = Subscription {
            id,
            path: path.clone(),
            rx,
            token: token.clone(),
            _guard: token.clone().drop_guard(),
        };
        let sink = SubscriptionSink { id, path, tx, token };
        (handle, sink)
    }

    /// Subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Path this subscription watches.
    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Wait for the next snapshot.
    ///
    /// Returns `None` once the subscription is cancelled or the store has
    /// stopped feeding it.
    pub async fn next(&mut self) -> Option<Result<Snapshot>> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Take an already-delivered snapshot without waiting.
    pub fn try_next(&mut self) -> Option<Result<Snapshot>> {
        if self.token.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Dispose the subscription now.
    pub fn cancel(self) {
        tracing::debug!(subscription = %self.id, path = %self.path, "Subscription cancelled");
        self.token.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl SubscriptionSink {
    /// Subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Path this subscription watches.
    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// True once the caller has disposed the subscription.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the caller disposes the subscription.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    /// Deliver an item. Returns `false` if the subscription is gone.
    pub fn send(&self, item: Result<Snapshot>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(item).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    fn path() -> StorePath {
        StorePath::parse("users/u1/friends").unwrap()
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let (mut sub, sink) = Subscription::channel(path());
        assert!(sink.send(Ok(Snapshot::new(path(), None))));
        assert!(sink.send(Ok(Snapshot::new(path(), Some(json!({"u2": "Bob"}))))));

        let first = sub.next().await.unwrap().unwrap();
        assert!(!first.exists());
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.value(), Some(&json!({"u2": "Bob"})));
    }

    #[test]
    fn test_next_waits_for_sink() {
        let (mut sub, sink) = Subscription::channel(path());
        let mut next = tokio_test::task::spawn(sub.next());
        tokio_test::assert_pending!(next.poll());

        sink.send(Ok(Snapshot::new(path(), None)));
        assert!(next.is_woken());
        let item = tokio_test::assert_ready!(next.poll());
        assert!(matches!(item, Some(Ok(_))));
    }

    #[tokio::test]
    async fn test_cancel_closes_sink() {
        let (sub, sink) = Subscription::channel(path());
        assert!(!sink.is_closed());

        sub.cancel();
        assert!(sink.is_closed());
        assert!(!sink.send(Ok(Snapshot::new(path(), None))));
        sink.closed().await;
    }

    #[tokio::test]
    async fn test_drop_closes_sink() {
        let (sub, sink) = Subscription::channel(path());
        drop(sub);
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_ends_when_sink_dropped() {
        let (mut sub, sink) = Subscription::channel(path());
        sink.send(Err(Error::PermissionDenied("rules".into())));
        drop(sink);

        assert!(matches!(sub.next().await, Some(Err(Error::PermissionDenied(_)))));
        assert!(sub.next().await.is_none());
    }
}
