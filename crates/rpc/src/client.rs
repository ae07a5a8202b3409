//! Channel-per-call RPC client.

use std::time::Duration;

use async_trait::async_trait;
use broker::{Broker, BrokerError, Channel, Message, QueueOptions};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::time::Instant;

use crate::envelope::{Arguments, CONTENT_TYPE_JSON, CorrelationId, ReplyEnvelope, RequestEnvelope};
use crate::error::{Result, RpcError};

/// How long a caller waits for its reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Anything that can perform calls and fire-and-forget publishes.
///
/// The saga and the HTTP gateway depend on this rather than on a concrete
/// client so either client (or a test double) can be plugged in.
#[async_trait]
pub trait RpcCaller: Send + Sync {
    /// Calls `operation` on the service consuming `queue` and waits for its result.
    async fn call(&self, queue: &str, operation: &str, arguments: Arguments) -> Result<Value>;

    /// Publishes a persistent request that expects no reply.
    async fn publish(&self, queue: &str, operation: &str, arguments: Arguments) -> Result<()>;
}

/// Builds the message for a request envelope.
pub(crate) fn request_message(operation: &str, arguments: Arguments) -> Result<Message> {
    let body = RequestEnvelope::new(operation, arguments).encode()?;
    Ok(Message::new(body).with_content_type(CONTENT_TYPE_JSON))
}

/// RPC client that isolates every call on its own channel.
///
/// The broker connection is shared; each call opens a channel, declares a
/// private reply queue, waits for the matching reply and closes the channel
/// again, taking the reply queue with it. A failed call cannot leave state
/// behind for the next one.
#[derive(Debug, Clone)]
pub struct RpcClient<B> {
    broker: B,
    timeout: Duration,
}

impl<B: Broker> RpcClient<B> {
    /// Creates a client with the default 5 second timeout.
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Calls `operation` with an explicit deadline.
    #[tracing::instrument(skip(self, arguments), fields(correlation_id = tracing::field::Empty))]
    pub async fn call_with_timeout(
        &self,
        queue: &str,
        operation: &str,
        arguments: Arguments,
        timeout: Duration,
    ) -> Result<Value> {
        metrics::counter!("rpc_calls_total", "operation" => operation.to_string()).increment(1);
        let start = std::time::Instant::now();

        let channel = self.broker.open_channel().await?;
        let result = exchange(&channel, queue, operation, arguments, timeout).await;
        if let Err(e) = channel.close().await {
            tracing::debug!(error = %e, "failed to close rpc channel");
        }

        metrics::histogram!("rpc_call_duration_seconds", "operation" => operation.to_string())
            .record(start.elapsed().as_secs_f64());
        result
    }
}

async fn exchange<C: Channel>(
    channel: &C,
    queue: &str,
    operation: &str,
    arguments: Arguments,
    timeout: Duration,
) -> Result<Value> {
    let deadline = Instant::now() + timeout;

    channel.declare_queue(queue, QueueOptions::durable()).await?;
    let reply_queue = channel.declare_queue("", QueueOptions::reply()).await?;
    // Consume before publishing so a fast reply cannot be missed.
    let mut replies = channel.consume(&reply_queue).await?;

    let correlation_id = CorrelationId::new();
    let correlation = correlation_id.to_string();
    tracing::Span::current().record("correlation_id", correlation.as_str());

    let message = request_message(operation, arguments)?
        .with_correlation_id(correlation.clone())
        .with_reply_to(reply_queue);
    channel.publish(queue, message).await?;
    tracing::debug!(queue, operation, "request published");

    loop {
        let next = match tokio::time::timeout_at(deadline, replies.next()).await {
            Ok(next) => next,
            Err(_) => {
                metrics::counter!("rpc_call_timeouts_total", "operation" => operation.to_string())
                    .increment(1);
                tracing::warn!(queue, operation, ?timeout, "timed out waiting for reply");
                return Err(RpcError::Timeout {
                    queue: queue.to_string(),
                    timeout,
                });
            }
        };

        let reply = match next {
            Some(delivery) => delivery?,
            None => return Err(RpcError::Transport(BrokerError::ChannelClosed)),
        };

        if reply.correlation_id() != Some(correlation.as_str()) {
            tracing::debug!(
                expected = %correlation,
                got = ?reply.correlation_id(),
                "discarding reply for another call"
            );
            continue;
        }

        return ReplyEnvelope::decode(&reply.body)?.into_result(operation);
    }
}

#[async_trait]
impl<B: Broker> RpcCaller for RpcClient<B> {
    async fn call(&self, queue: &str, operation: &str, arguments: Arguments) -> Result<Value> {
        self.call_with_timeout(queue, operation, arguments, self.timeout)
            .await
    }

    #[tracing::instrument(skip(self, arguments))]
    async fn publish(&self, queue: &str, operation: &str, arguments: Arguments) -> Result<()> {
        let channel = self.broker.open_channel().await?;
        let result = async {
            channel.declare_queue(queue, QueueOptions::durable()).await?;
            let message = request_message(operation, arguments)?.persistent();
            channel.publish(queue, message).await?;
            Ok::<(), RpcError>(())
        }
        .await;
        if let Err(e) = channel.close().await {
            tracing::debug!(error = %e, "failed to close publish channel");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use broker::InMemoryBroker;
    use serde_json::json;

    use super::*;
    use crate::arguments;

    async fn echo_once(broker: &InMemoryBroker, queue: &'static str, wrong_first: bool) {
        let channel = broker.open_channel().await.unwrap();
        channel
            .declare_queue(queue, QueueOptions::durable())
            .await
            .unwrap();
        let mut requests = channel.consume(queue).await.unwrap();
        tokio::spawn(async move {
            let request = requests.next().await.unwrap().unwrap();
            let envelope = RequestEnvelope::decode(&request.body).unwrap();
            let reply_to = request.reply_to().unwrap().to_string();
            let op = envelope.operation().to_string();
            if wrong_first {
                let stray = ReplyEnvelope::success(&op, json!("stray"));
                channel
                    .publish(
                        &reply_to,
                        Message::new(stray.encode().unwrap())
                            .with_correlation_id(CorrelationId::new().to_string()),
                    )
                    .await
                    .unwrap();
            }
            let reply = ReplyEnvelope::success(&op, Value::Object(envelope.variables));
            channel
                .publish(
                    &reply_to,
                    Message::new(reply.encode().unwrap())
                        .with_correlation_id(request.correlation_id().unwrap()),
                )
                .await
                .unwrap();
        });
    }

    #[tokio::test]
    async fn test_call_returns_matching_reply() {
        let broker = InMemoryBroker::new();
        echo_once(&broker, "echo", false).await;

        let client = RpcClient::new(broker.clone());
        let result = client
            .call("echo", "echo", arguments(json!({ "x": 1 })))
            .await
            .unwrap();
        assert_eq!(result, json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn test_call_skips_replies_with_other_correlation_ids() {
        let broker = InMemoryBroker::new();
        echo_once(&broker, "echo", true).await;

        let client = RpcClient::new(broker.clone());
        let result = client
            .call("echo", "echo", arguments(json!({ "y": 2 })))
            .await
            .unwrap();
        assert_eq!(result, json!({ "y": 2 }));
    }

    #[tokio::test]
    async fn test_reply_queue_is_torn_down_after_call() {
        let broker = InMemoryBroker::new();
        let client = RpcClient::new(broker.clone()).with_timeout(Duration::from_millis(20));
        let _ = client.call("void", "anything", Arguments::new()).await;
        // Only the durable request queue remains.
        assert!(broker.has_queue("void"));
        assert_eq!(format!("{broker:?}"), "InMemoryBroker { queues: 1, connected: true }");
    }

    #[tokio::test]
    async fn test_disconnected_broker_is_transport_error() {
        let broker = InMemoryBroker::new();
        broker.disconnect();
        let client = RpcClient::new(broker);
        let err = client.call("q", "op", Arguments::new()).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(BrokerError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_publish_sends_persistent_request_without_reply_to() {
        let broker = InMemoryBroker::new();
        let client = RpcClient::new(broker.clone());
        client
            .publish("book-copies-queue", "updateBookCopyStatus", arguments(json!({ "id": "7" })))
            .await
            .unwrap();

        let channel = broker.open_channel().await.unwrap();
        let mut deliveries = channel.consume("book-copies-queue").await.unwrap();
        let msg = deliveries.next().await.unwrap().unwrap();
        assert!(msg.properties.persistent);
        assert_eq!(msg.reply_to(), None);
        let envelope = RequestEnvelope::decode(&msg.body).unwrap();
        assert_eq!(envelope.operation(), "updateBookCopyStatus");
    }
}
