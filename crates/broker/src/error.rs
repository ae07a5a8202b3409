use thiserror::Error;

/// Errors that can occur when talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker connection is gone.
    #[error("Broker connection closed")]
    ConnectionClosed,

    /// The channel was closed before the operation completed.
    #[error("Broker channel closed")]
    ChannelClosed,

    /// Consuming from a queue that was never declared.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// A queue was re-declared with options that differ from the original.
    #[error("Queue {0} already declared with different options")]
    QueueMismatch(String),

    /// The queue is exclusive to another channel.
    #[error("Queue {0} is exclusive to another channel")]
    ExclusiveQueue(String),

    /// The broker negatively acknowledged a published message.
    #[error("Broker rejected publish to {0}")]
    PublishRejected(String),

    /// An AMQP protocol or connection error.
    #[cfg(feature = "amqp")]
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
