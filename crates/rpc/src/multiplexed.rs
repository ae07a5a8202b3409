//! RPC client sharing one reply queue between concurrent calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use broker::{Broker, Channel, Deliveries, Message, QueueOptions};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::{DEFAULT_TIMEOUT, RpcCaller, request_message};
use crate::envelope::{Arguments, CorrelationId, ReplyEnvelope};
use crate::error::{Result, RpcError};

/// Client-side bookkeeping for an outstanding call.
struct PendingCall {
    created_at: Instant,
    deadline: Instant,
    reply: oneshot::Sender<Message>,
}

#[derive(Default)]
struct PendingTable {
    calls: Mutex<HashMap<CorrelationId, PendingCall>>,
    closed: AtomicBool,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the pending entry when the call ends, however it ends.
struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.lock().remove(&self.id);
    }
}

/// RPC client with one long-lived channel and reply queue.
///
/// A background task consumes the reply queue and hands each reply to the
/// call whose correlation id it carries. Replies nobody is waiting for (late
/// replies to calls that already timed out) are discarded.
pub struct MultiplexedRpcClient<B: Broker> {
    channel: Arc<B::Channel>,
    reply_queue: String,
    pending: Arc<PendingTable>,
    timeout: Duration,
    demux: AbortOnDrop,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<B: Broker> MultiplexedRpcClient<B> {
    /// Opens the shared channel and reply queue and starts demultiplexing.
    pub async fn connect(broker: &B) -> Result<Self> {
        let channel = broker.open_channel().await?;
        let reply_queue = channel.declare_queue("", QueueOptions::reply()).await?;
        let replies = channel.consume(&reply_queue).await?;

        let pending = Arc::new(PendingTable::default());
        let demux = tokio::spawn(demultiplex(replies, Arc::clone(&pending)));
        tracing::debug!(%reply_queue, "multiplexed rpc client connected");

        Ok(Self {
            channel: Arc::new(channel),
            reply_queue,
            pending,
            timeout: DEFAULT_TIMEOUT,
            demux: AbortOnDrop(demux),
        })
    }

    /// Sets the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name of the shared reply queue.
    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    #[tracing::instrument(skip(self, arguments, correlation_id), fields(%correlation_id))]
    async fn call_inner(
        &self,
        queue: &str,
        operation: &str,
        arguments: Arguments,
        timeout: Duration,
        correlation_id: CorrelationId,
    ) -> Result<Value> {
        if self.pending.closed.load(Ordering::Acquire) {
            return Err(RpcError::ClientClosed);
        }

        let created_at = Instant::now();
        let deadline = created_at + timeout;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            correlation_id,
            PendingCall {
                created_at,
                deadline,
                reply: tx,
            },
        );
        let _guard = PendingGuard {
            table: &self.pending,
            id: correlation_id,
        };

        self.channel
            .declare_queue(queue, QueueOptions::durable())
            .await?;
        let message = request_message(operation, arguments)?
            .with_correlation_id(correlation_id.to_string())
            .with_reply_to(self.reply_queue.clone());
        self.channel.publish(queue, message).await?;

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(reply)) => ReplyEnvelope::decode(&reply.body)?.into_result(operation),
            Ok(Err(_)) => Err(RpcError::ClientClosed),
            Err(_) => {
                metrics::counter!("rpc_call_timeouts_total", "operation" => operation.to_string())
                    .increment(1);
                tracing::warn!(queue, operation, ?timeout, "timed out waiting for reply");
                Err(RpcError::Timeout {
                    queue: queue.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Stops demultiplexing and closes the shared channel.
    ///
    /// Outstanding calls fail with [`RpcError::ClientClosed`].
    pub async fn close(self) -> Result<()> {
        self.pending.closed.store(true, Ordering::Release);
        self.demux.0.abort();
        self.pending.lock().clear();
        if let Ok(channel) = Arc::try_unwrap(self.channel) {
            channel.close().await?;
        }
        Ok(())
    }
}

async fn demultiplex(mut replies: Deliveries, pending: Arc<PendingTable>) {
    while let Some(delivery) = replies.next().await {
        let message = match delivery {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "reply delivery failed");
                continue;
            }
        };

        let Some(id) = message.correlation_id().and_then(CorrelationId::parse) else {
            tracing::debug!("discarding reply without a usable correlation id");
            continue;
        };

        let call = pending.lock().remove(&id);
        match call {
            Some(call) if Instant::now() <= call.deadline => {
                metrics::histogram!("rpc_call_duration_seconds")
                    .record(call.created_at.elapsed().as_secs_f64());
                // The caller may have gone away in the meantime.
                let _ = call.reply.send(message);
            }
            Some(_) | None => {
                metrics::counter!("rpc_stale_replies_total").increment(1);
                tracing::debug!(correlation_id = %id, "discarding reply for unknown or expired call");
            }
        }
    }

    // Reply stream is gone: fail everyone still waiting.
    pending.closed.store(true, Ordering::Release);
    pending.lock().clear();
    tracing::warn!("reply queue consumer stopped");
}

#[async_trait]
impl<B: Broker> RpcCaller for MultiplexedRpcClient<B> {
    async fn call(&self, queue: &str, operation: &str, arguments: Arguments) -> Result<Value> {
        metrics::counter!("rpc_calls_total", "operation" => operation.to_string()).increment(1);
        self.call_inner(queue, operation, arguments, self.timeout, CorrelationId::new())
            .await
    }

    async fn publish(&self, queue: &str, operation: &str, arguments: Arguments) -> Result<()> {
        self.channel
            .declare_queue(queue, QueueOptions::durable())
            .await?;
        let message = request_message(operation, arguments)?.persistent();
        self.channel.publish(queue, message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use broker::InMemoryBroker;

    use super::*;

    #[tokio::test]
    async fn test_timed_out_call_leaves_no_pending_entry() {
        let broker = InMemoryBroker::new();
        let client = MultiplexedRpcClient::connect(&broker)
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(20));

        let err = client
            .call("nobody-home", "op", Arguments::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_close_removes_reply_queue() {
        let broker = InMemoryBroker::new();
        let client = MultiplexedRpcClient::connect(&broker).await.unwrap();
        let reply_queue = client.reply_queue().to_string();
        assert!(broker.has_queue(&reply_queue));

        client.close().await.unwrap();
        assert!(!broker.has_queue(&reply_queue));
    }

    #[tokio::test]
    async fn test_disconnect_fails_outstanding_calls() {
        let broker = InMemoryBroker::new();
        let client = Arc::new(MultiplexedRpcClient::connect(&broker).await.unwrap());

        let caller = Arc::clone(&client);
        let call = tokio::spawn(async move { caller.call("slow", "op", Arguments::new()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.disconnect();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::ClientClosed));
    }
}
