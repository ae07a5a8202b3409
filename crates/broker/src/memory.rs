//! In-process broker.
//!
//! Queues are unbounded mpsc channels. Several consumers on the same queue
//! compete for messages, each message going to exactly one of them. Reply
//! queues declared exclusive are deleted when the owning channel closes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::{Broker, BrokerError, Channel, Deliveries, Message, QueueOptions, Result};

struct QueueSlot {
    options: QueueOptions,
    owner: Option<u64>,
    sender: mpsc::UnboundedSender<Message>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>>,
}

struct Inner {
    queues: Mutex<HashMap<String, QueueSlot>>,
    next_channel: AtomicU64,
    unroutable: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Inner {
    fn queues(&self) -> MutexGuard<'_, HashMap<String, QueueSlot>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_connected(&self) -> bool {
        !*self.shutdown.borrow()
    }

    fn remove_owned(&self, channel_id: u64) {
        let mut queues = self.queues();
        queues.retain(|name, slot| {
            let drop_it = slot.owner == Some(channel_id);
            if drop_it {
                tracing::trace!(queue = %name, "deleting exclusive queue");
            }
            !drop_it
        });
    }
}

/// A broker living entirely in this process.
///
/// Clones share the same queues.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Creates a broker with no queues.
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                next_channel: AtomicU64::new(1),
                unroutable: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Simulates losing the broker connection.
    ///
    /// Every open delivery stream ends and further operations fail with
    /// [`BrokerError::ConnectionClosed`].
    pub fn disconnect(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Returns true if a queue with this name is currently declared.
    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.queues().contains_key(name)
    }

    /// Number of messages dropped because their queue did not exist.
    pub fn unroutable_count(&self) -> u64 {
        self.inner.unroutable.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("queues", &self.inner.queues().len())
            .field("connected", &self.inner.is_connected())
            .finish()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    type Channel = InMemoryChannel;

    async fn open_channel(&self) -> Result<InMemoryChannel> {
        if !self.inner.is_connected() {
            return Err(BrokerError::ConnectionClosed);
        }
        let id = self.inner.next_channel.fetch_add(1, Ordering::Relaxed);
        let (closed, _) = watch::channel(false);
        Ok(InMemoryChannel {
            inner: Arc::clone(&self.inner),
            id,
            closed,
            is_closed: AtomicBool::new(false),
        })
    }
}

/// A channel on an [`InMemoryBroker`].
pub struct InMemoryChannel {
    inner: Arc<Inner>,
    id: u64,
    closed: watch::Sender<bool>,
    is_closed: AtomicBool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if !self.inner.is_connected() {
            return Err(BrokerError::ConnectionClosed);
        }
        if self.is_closed.load(Ordering::Acquire) {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }

    fn shut(&self) {
        if !self.is_closed.swap(true, Ordering::AcqRel) {
            self.closed.send_replace(true);
            self.inner.remove_owned(self.id);
        }
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String> {
        self.ensure_open()?;

        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            name.to_string()
        };

        let mut queues = self.inner.queues();
        if let Some(existing) = queues.get(&name) {
            if existing.options != options {
                return Err(BrokerError::QueueMismatch(name));
            }
            if existing.owner.is_some_and(|owner| owner != self.id) {
                return Err(BrokerError::ExclusiveQueue(name));
            }
            return Ok(name);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        queues.insert(
            name.clone(),
            QueueSlot {
                options,
                owner: options.is_ephemeral().then_some(self.id),
                sender,
                receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            },
        );
        tracing::trace!(queue = %name, durable = options.durable, "queue declared");
        Ok(name)
    }

    async fn publish(&self, queue: &str, message: Message) -> Result<()> {
        self.ensure_open()?;

        let queues = self.inner.queues();
        match queues.get(queue) {
            Some(slot) => {
                // The slot owns the receiver, so the send cannot fail while it exists.
                let _ = slot.sender.send(message);
            }
            None => {
                self.inner.unroutable.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("broker_unroutable_messages_total").increment(1);
                tracing::debug!(queue, "dropping message for undeclared queue");
            }
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Deliveries> {
        self.ensure_open()?;

        let receiver = {
            let queues = self.inner.queues();
            let slot = queues
                .get(queue)
                .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
            if slot.owner.is_some_and(|owner| owner != self.id) {
                return Err(BrokerError::ExclusiveQueue(queue.to_string()));
            }
            Arc::clone(&slot.receiver)
        };

        let state = (receiver, self.closed.subscribe(), self.inner.shutdown.subscribe());
        let stream = futures_util::stream::unfold(
            state,
            |(receiver, mut closed, mut shutdown)| async move {
                let next = tokio::select! {
                    biased;
                    _ = closed.wait_for(|c| *c) => None,
                    _ = shutdown.wait_for(|s| *s) => None,
                    message = async { receiver.lock().await.recv().await } => message,
                };
                next.map(|message| (Ok::<_, BrokerError>(message), (receiver, closed, shutdown)))
            },
        );
        Ok(Box::pin(stream))
    }

    async fn close(self) -> Result<()> {
        self.shut();
        Ok(())
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        self.shut();
    }
}
