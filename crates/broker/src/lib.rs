//! Message broker abstraction for the library platform.
//!
//! Services talk to each other through named queues on a broker. This crate
//! provides the narrow surface they need:
//! - [`Broker`]: a shared connection that hands out fresh channels
//! - [`Channel`]: declare queues, publish messages, consume deliveries
//! - [`InMemoryBroker`]: the reference implementation used by tests and
//!   single-process deployments
//! - `AmqpBroker` (feature `amqp`): RabbitMQ via `lapin`

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod broker;
pub mod error;
pub mod memory;
pub mod message;
pub mod queue;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpBroker, AmqpChannel};
pub use broker::{Broker, Channel, Deliveries};
pub use error::{BrokerError, Result};
pub use memory::{InMemoryBroker, InMemoryChannel};
pub use message::{Message, MessageProperties};
pub use queue::QueueOptions;
