//! Subscriber registry with bounded-lifetime handles.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Buffered events per subscriber before new ones are dropped for it.
pub const DEFAULT_CAPACITY: usize = 64;

struct Entry<T> {
    key: Option<String>,
    sender: mpsc::Sender<T>,
}

struct Inner<T> {
    topic: &'static str,
    capacity: usize,
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Entry<T>>>,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Entry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out of one kind of event to every open [`Subscription`].
///
/// Publishing never blocks: a subscriber whose buffer is full misses the
/// event. Nothing is persisted, so a subscriber only sees events published
/// while it is registered.
pub struct Subscribers<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Subscribers<T> {
    /// Creates a registry for `topic` (used in logs and metric labels).
    pub fn new(topic: &'static str) -> Self {
        Self::with_capacity(topic, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(topic: &'static str, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topic,
                capacity: capacity.max(1),
                next_id: AtomicU64::new(0),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn topic(&self) -> &'static str {
        self.inner.topic
    }

    /// Registers an anonymous subscriber.
    pub fn subscribe(&self) -> Subscription<T> {
        self.register(None)
    }

    /// Registers a subscriber under `key`. Several subscribers may share a key.
    pub fn subscribe_key(&self, key: impl Into<String>) -> Subscription<T> {
        self.register(Some(key.into()))
    }

    fn register(&self, key: Option<String>) -> Subscription<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        self.inner.lock().insert(id, Entry { key, sender });
        tracing::debug!(topic = self.inner.topic, id, "subscriber registered");
        Subscription {
            id,
            receiver,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Sends `event` to every subscriber. Returns how many received it.
    pub fn publish(&self, event: T) -> usize {
        self.send_matching(event, |_| true)
    }

    /// Sends `event` to the subscribers registered under `key`.
    pub fn publish_to(&self, key: &str, event: T) -> usize {
        self.send_matching(event, |entry| entry.key.as_deref() == Some(key))
    }

    fn send_matching(&self, event: T, wanted: impl Fn(&Entry<T>) -> bool) -> usize {
        let topic = self.inner.topic;
        let mut delivered = 0;
        let mut entries = self.inner.lock();
        entries.retain(|id, entry| {
            if !wanted(entry) {
                return !entry.sender.is_closed();
            }
            match entry.sender.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    metrics::counter!("pubsub_events_dropped_total", "topic" => topic)
                        .increment(1);
                    tracing::warn!(topic, id, "subscriber lagging, event dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
        drop(entries);

        metrics::counter!("pubsub_events_published_total", "topic" => topic).increment(1);
        delivered
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> std::fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("topic", &self.inner.topic)
            .field("subscribers", &self.inner.lock().len())
            .finish()
    }
}

/// An open subscription. Dropping it unregisters the subscriber.
pub struct Subscription<T> {
    id: u64,
    receiver: mpsc::Receiver<T>,
    registry: Weak<Inner<T>>,
}

impl<T> Subscription<T> {
    /// Waits for the next event. Returns `None` once the registry is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns a buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.lock().remove(&self.id);
            tracing::debug!(topic = inner.topic, id = self.id, "subscriber removed");
        }
    }
}
