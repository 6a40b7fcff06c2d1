//! Change notification fan-out
//!
//! One writer (the engine) and any number of independent readers. Every
//! subscriber owns an unbounded queue, so publishing never waits on a slow
//! reader and never fails because a reader went away.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

use crate::recipes::machine::{Snapshot, TransitionObserver, TransitionReport};

/// A published snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Position in the notifier's publish order, starting at 1
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    pub snapshot: Snapshot,
}

impl Notification {
    /// Snapshot serialized the way subscribers receive it
    pub fn state_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.snapshot)
    }
}

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<Arc<Notification>>,
}

#[derive(Default)]
struct NotifierShared {
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber: AtomicU64,
    sequence: AtomicU64,
}

impl NotifierShared {
    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        self.subscribers().retain(|subscriber| subscriber.id != id);
    }
}

/// Multi-consumer broadcast of engine snapshots
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    shared: Arc<NotifierShared>,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.shared.sequence.load(Ordering::Relaxed))
            .finish()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a snapshot to every live subscriber
    ///
    /// Returns how many subscribers received it. Subscribers whose receiving
    /// side is gone are dropped from the list.
    pub fn publish(&self, snapshot: Snapshot) -> usize {
        let mut subscribers = self.shared.subscribers();
        let notification = Arc::new(Notification {
            sequence: self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            emitted_at: Utc::now(),
            snapshot,
        });

        subscribers.retain(|subscriber| {
            let delivered = subscriber.sender.send(Arc::clone(&notification)).is_ok();
            if !delivered {
                debug!(subscriber = subscriber.id, "Removing disconnected subscriber");
            }
            delivered
        });
        subscribers.len()
    }

    /// Start observing from this moment on; nothing published earlier is replayed
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers().push(Subscriber { id, sender });
        debug!(subscriber = id, "Subscriber registered");

        Subscription {
            id,
            receiver,
            notifier: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers().len()
    }
}

impl TransitionObserver for ChangeNotifier {
    fn on_transition(&self, report: &TransitionReport) {
        if report.changed {
            self.publish(report.snapshot.clone());
        }
    }
}

/// One observer's cursor into the notification stream
///
/// Ends when the notifier is dropped. Dropping the subscription unregisters it.
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Arc<Notification>>,
    notifier: Weak<NotifierShared>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next notification
    pub async fn recv(&mut self) -> Option<Arc<Notification>> {
        self.receiver.recv().await
    }

    /// Take an already-delivered notification without waiting
    pub fn try_recv(&mut self) -> Option<Arc<Notification>> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Arc<Notification>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.notifier.upgrade() {
            shared.remove(self.id);
            debug!(subscriber = self.id, "Subscriber disconnected");
        }
    }
}
