//! Per-call publish/subscribe handle.
//!
//! Every dispatch gets a fresh [`Notifier`]. The caller subscribes to it; the
//! handler emits progress and results on it. The pool itself never looks at
//! the events.
//!
//! Events emitted before anyone has subscribed are held back and replayed to
//! the first subscriber, so a handler that starts on another worker thread
//! cannot race ahead of a caller that subscribes right after `invoke` returns.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

/// Unique identifier of one dispatched call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CallId(uuid::Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Channel<E> {
    subscribers: Vec<mpsc::UnboundedSender<E>>,
    /// Events emitted before the first subscription.
    backlog: Vec<E>,
    subscribed: bool,
}

/// Publish/subscribe handle for a single call.
///
/// Cloning is cheap; all clones share the same subscribers. Subscriptions end
/// once every clone has been dropped.
pub struct Notifier<E> {
    call: CallId,
    channel: Arc<Mutex<Channel<E>>>,
}

impl<E> Clone for Notifier<E> {
    fn clone(&self) -> Self {
        Self {
            call: self.call,
            channel: Arc::clone(&self.channel),
        }
    }
}

impl<E> std::fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").field("call", &self.call).finish()
    }
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Notifier<E> {
    pub fn new() -> Self {
        Self {
            call: CallId::new(),
            channel: Arc::new(Mutex::new(Channel {
                subscribers: Vec::new(),
                backlog: Vec::new(),
                subscribed: false,
            })),
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call
    }

    fn lock(&self) -> MutexGuard<'_, Channel<E>> {
        match self.channel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(call = %self.call, "Notifier mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Attach a new listener. The first listener also receives every event
    /// emitted so far.
    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channel = self.lock();

        if !channel.subscribed {
            channel.subscribed = true;
            for event in channel.backlog.drain(..) {
                let _ = tx.send(event);
            }
        }
        channel.subscribers.push(tx);

        Subscription { rx }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut channel = self.lock();
        channel.subscribers.retain(|tx| !tx.is_closed());
        channel.subscribers.len()
    }
}

impl<E: Clone> Notifier<E> {
    /// Publish an event to every live subscriber.
    ///
    /// Returns how many subscribers received it. Before the first
    /// subscription the event is buffered and `0` is returned.
    pub fn emit(&self, event: E) -> usize {
        let mut channel = self.lock();

        if !channel.subscribed {
            channel.backlog.push(event);
            return 0;
        }

        channel.subscribers.retain(|tx| !tx.is_closed());
        let mut delivered = 0;
        for tx in &channel.subscribers {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Receiving end of a [`Notifier`] subscription.
#[derive(Debug)]
pub struct Subscription<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    /// Next event, or `None` once every notifier clone is gone and the
    /// buffered events have been drained.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently buffered without waiting.
    pub fn drain(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl<E> Unpin for Subscription<E> {}

impl<E> Stream for Subscription<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn call_ids_are_unique() {
        let a: Notifier<()> = Notifier::new();
        let b: Notifier<()> = Notifier::new();
        assert_ne!(a.call_id(), b.call_id());
        assert_eq!(a.clone().call_id(), a.call_id());
    }

    #[test]
    fn events_before_subscription_replay_to_first_subscriber() {
        let notifier = Notifier::new();
        assert_eq!(notifier.emit("start"), 0);
        assert_eq!(notifier.emit("progress"), 0);

        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();
        assert_eq!(notifier.emit("done"), 2);

        assert_eq!(first.drain(), vec!["start", "progress", "done"]);
        assert_eq!(second.drain(), vec!["done"]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let notifier = Notifier::new();
        let keep = notifier.subscribe();
        let gone = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 2);

        drop(gone);
        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(notifier.emit(1), 1);
        drop(keep);
    }

    #[test]
    fn events_after_all_subscribers_leave_are_dropped() {
        let notifier = Notifier::new();
        drop(notifier.subscribe());

        assert_eq!(notifier.emit(7), 0);

        let mut late = notifier.subscribe();
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn stream_ends_when_every_clone_is_dropped() {
        let notifier = Notifier::new();
        let handler_side = notifier.clone();
        let mut events = notifier.subscribe();
        drop(notifier);

        handler_side.emit("a");
        handler_side.emit("b");
        drop(handler_side);

        let collected: Vec<_> = events.by_ref().collect().await;
        assert_eq!(collected, vec!["a", "b"]);
        assert!(events.recv().await.is_none());
    }
}
