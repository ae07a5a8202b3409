//! Server side of the RPC bridge.

use std::future::Future;
use std::sync::Arc;

use broker::{Broker, BrokerError, Channel, Message, QueueOptions};
use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::envelope::{CONTENT_TYPE_JSON, ReplyEnvelope, RequestEnvelope};
use crate::error::{Result, RpcError};
use crate::handler::HandlerRegistry;

/// Consumes one durable request queue and answers each request.
///
/// - malformed envelopes are logged and dropped
/// - unknown operations are logged and dropped without a reply, so the caller
///   observes a timeout
/// - handler errors are logged and answered with a null result plus `errors`
/// - requests without `replyTo` are executed and never answered
///
/// None of these stop the loop. Several dispatchers may consume the same
/// queue; the broker hands each request to exactly one of them.
pub struct Dispatcher<B> {
    broker: B,
    queue: String,
    registry: Arc<HandlerRegistry>,
}

impl<B: Broker> Dispatcher<B> {
    pub fn new(broker: B, queue: impl Into<String>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            broker,
            queue: queue.into(),
            registry,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Runs until the delivery stream ends.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Runs until `shutdown` resolves or the delivery stream ends.
    ///
    /// Returns a transport error if the broker goes away underneath it.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let channel = self.broker.open_channel().await?;
        channel
            .declare_queue(&self.queue, QueueOptions::durable())
            .await?;
        let mut deliveries = channel.consume(&self.queue).await?;
        tracing::info!(
            queue = %self.queue,
            operations = ?self.registry.operations(),
            "dispatcher started"
        );

        tokio::pin!(shutdown);
        loop {
            let message = tokio::select! {
                _ = &mut shutdown => break,
                next = deliveries.next() => match next {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::warn!(queue = %self.queue, error = %e, "delivery failed");
                        continue;
                    }
                    None => {
                        tracing::warn!(queue = %self.queue, "delivery stream ended");
                        return Err(RpcError::Transport(BrokerError::ChannelClosed));
                    }
                },
            };
            self.handle(&channel, message).await;
        }

        tracing::info!(queue = %self.queue, "dispatcher stopped");
        channel.close().await?;
        Ok(())
    }

    #[tracing::instrument(
        skip_all,
        fields(
            queue = %self.queue,
            operation = tracing::field::Empty,
            correlation_id = ?message.correlation_id()
        )
    )]
    async fn handle(&self, channel: &B::Channel, message: Message) {
        let envelope = match RequestEnvelope::decode(&message.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::counter!("rpc_malformed_envelopes_total").increment(1);
                tracing::warn!(error = %e, "dropping malformed envelope");
                return;
            }
        };
        let operation = envelope.requested_resolver;
        tracing::Span::current().record("operation", operation.as_str());
        metrics::counter!("rpc_requests_total", "operation" => operation.clone()).increment(1);

        let Some(handler) = self.registry.get(&operation) else {
            metrics::counter!("rpc_unknown_operations_total").increment(1);
            tracing::warn!("no handler registered, dropping request");
            return;
        };

        let start = std::time::Instant::now();
        let outcome = handler.handle(envelope.variables).await;
        metrics::histogram!("rpc_handler_duration_seconds", "operation" => operation.clone())
            .record(start.elapsed().as_secs_f64());

        let reply = match outcome {
            Ok(result) => ReplyEnvelope::success(&operation, result),
            Err(e) => {
                metrics::counter!("rpc_handler_errors_total", "operation" => operation.clone())
                    .increment(1);
                tracing::error!(error = %e, code = e.code(), "handler failed");
                ReplyEnvelope::failure(&operation, &e)
            }
        };

        let Some(reply_to) = message.reply_to() else {
            tracing::debug!("no reply destination");
            return;
        };

        let body = match reply.encode() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode reply");
                return;
            }
        };
        let mut out =
            Message::new(body).with_content_type(message.content_type().unwrap_or(CONTENT_TYPE_JSON));
        if let Some(correlation_id) = message.correlation_id() {
            out = out.with_correlation_id(correlation_id);
        }

        if let Err(e) = channel.publish(reply_to, out).await {
            tracing::error!(error = %e, reply_to, "failed to publish reply");
        }
    }
}

impl<B: Broker + 'static> Dispatcher<B> {
    /// Runs the dispatcher on its own task.
    pub fn spawn(self) -> DispatcherHandle {
        let queue = self.queue.clone();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(self.run_until(async {
            let _ = stopped.await;
        }));
        DispatcherHandle { queue, stop, task }
    }
}

/// Handle to a spawned [`Dispatcher`].
pub struct DispatcherHandle {
    queue: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl DispatcherHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Asks the dispatcher to stop and waits for it.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.stop.send(());
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(queue = %self.queue, error = %e, "dispatcher task failed");
                Err(RpcError::ClientClosed)
            }
        }
    }
}
