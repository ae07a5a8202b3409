//! Queue declaration options.

/// How a queue should be declared.
///
/// Mirrors the AMQP flags the platform relies on: request queues are durable
/// and shared, reply queues are exclusive to the declaring channel and go away
/// with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueOptions {
    /// Survives a broker restart.
    pub durable: bool,
    /// Only the declaring channel may consume it.
    pub exclusive: bool,
    /// Deleted once its owner goes away.
    pub auto_delete: bool,
}

impl QueueOptions {
    /// A durable, shared request queue.
    pub fn durable() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// A private, auto-deleting reply queue.
    pub fn reply() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }

    /// Returns true if the queue is torn down together with its owner.
    pub fn is_ephemeral(&self) -> bool {
        self.exclusive || self.auto_delete
    }
}
