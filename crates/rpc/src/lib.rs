//! Synchronous call/response semantics on top of the message broker.
//!
//! A caller publishes a [`RequestEnvelope`] to a service's durable request
//! queue, tagged with a fresh [`CorrelationId`] and the name of a private
//! reply queue. The service's [`Dispatcher`] routes the request to the handler
//! registered for the operation and publishes a [`ReplyEnvelope`] back with the
//! same correlation id.
//!
//! Two clients are provided:
//! - [`RpcClient`] opens a fresh channel and reply queue for every call
//! - [`MultiplexedRpcClient`] shares one reply queue between concurrent calls
//!   and routes replies through a pending-call table

pub mod args;
pub mod client;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod multiplexed;
pub mod queues;

pub use broker::BrokerError;
pub use client::{DEFAULT_TIMEOUT, RpcCaller, RpcClient};
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use envelope::{
    Arguments, CONTENT_TYPE_JSON, CorrelationId, ReplyEnvelope, ReplyError, RequestEnvelope,
    arguments, decode_result,
};
pub use error::{HandlerError, Result, RpcError};
pub use handler::{HandlerRegistry, OperationHandler};
pub use multiplexed::MultiplexedRpcClient;
