use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{Message, QueueOptions, Result};

/// A stream of messages delivered from a queue.
///
/// Deliveries are acknowledged on receipt. The stream ends when the channel,
/// the queue or the broker connection goes away.
pub type Deliveries = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// A connection to a message broker.
///
/// The connection is long-lived and shared; every unit of work opens its own
/// [`Channel`] so a failure on one channel cannot poison another.
#[async_trait]
pub trait Broker: Send + Sync {
    type Channel: Channel + 'static;

    /// Opens a fresh channel on the shared connection.
    async fn open_channel(&self) -> Result<Self::Channel>;
}

/// A channel on a broker connection.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declares a queue, or reuses it if it already exists with the same options.
    ///
    /// An empty `name` asks the broker to generate one. Returns the actual name.
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String>;

    /// Publishes a message to the named queue through the default exchange.
    ///
    /// Publishing to a queue nobody declared is not an error: the broker
    /// drops the message, as AMQP does for unroutable messages.
    async fn publish(&self, queue: &str, message: Message) -> Result<()>;

    /// Starts consuming the named queue.
    async fn consume(&self, queue: &str) -> Result<Deliveries>;

    /// Closes the channel, tearing down any exclusive queues it declared.
    async fn close(self) -> Result<()>;
}
