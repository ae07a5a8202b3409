//! Feeds events arriving on a broker queue into a local registry.

use std::sync::Arc;

use broker::Broker;
use rpc::{Dispatcher, DispatcherHandle, HandlerError, HandlerRegistry};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Subscribers;

/// Starts a consumer on `queue` that republishes every `operation` message
/// to `subscribers`.
///
/// The message variables are the event itself. Messages that do not
/// deserialize into `T` are logged by the dispatcher and skipped.
pub fn spawn_bridge<B, T>(
    broker: B,
    queue: &str,
    operation: &str,
    subscribers: Subscribers<T>,
) -> DispatcherHandle
where
    B: Broker + 'static,
    T: DeserializeOwned + Clone + Send + 'static,
{
    let mut registry = HandlerRegistry::new();
    registry.register_fn(operation, move |arguments| {
        let subscribers = subscribers.clone();
        async move {
            let event: T = serde_json::from_value(Value::Object(arguments))
                .map_err(|e| HandlerError::invalid("event", e))?;
            let delivered = subscribers.publish(event);
            tracing::debug!(topic = subscribers.topic(), delivered, "bridged event");
            Ok(Value::Null)
        }
    });
    tracing::info!(queue, operation, "starting subscription bridge");
    Dispatcher::new(broker, queue, Arc::new(registry)).spawn()
}
