//! Request/reply through a running dispatcher on the in-memory broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use broker::{Broker, Channel, InMemoryBroker, Message, QueueOptions};
use rpc::{
    Arguments, Dispatcher, HandlerError, HandlerRegistry, MultiplexedRpcClient, RpcCaller,
    RpcClient, RpcError, arguments,
};
use serde_json::{Value, json};

const QUEUE: &str = "test-service-queue";

fn registry(counter: Arc<AtomicUsize>) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry
        .register_fn("echo", |args| async move { Ok(Value::Object(args)) })
        .register_fn("slowEcho", |args| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Value::Object(args))
        })
        .register_fn("fail", |_args| async move {
            Err(HandlerError::rejected("ITEM_RESERVED", "book has a pending reservation"))
        })
        .register_fn("count", move |_args| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });
    Arc::new(registry)
}

#[tokio::test]
async fn test_call_reaches_handler_and_returns_result() {
    let broker = InMemoryBroker::new();
    let dispatcher = Dispatcher::new(broker.clone(), QUEUE, registry(Arc::default())).spawn();

    let client = RpcClient::new(broker.clone());
    let result = client
        .call(QUEUE, "echo", arguments(json!({ "book_id": "B1" })))
        .await
        .unwrap();
    assert_eq!(result, json!({ "book_id": "B1" }));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_on_shared_reply_queue_get_their_own_results() {
    let broker = InMemoryBroker::new();
    let dispatcher = Dispatcher::new(broker.clone(), QUEUE, registry(Arc::default())).spawn();
    let client = Arc::new(MultiplexedRpcClient::connect(&broker).await.unwrap());

    let calls = (0..50).map(|i| {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            let result = client
                .call(QUEUE, "slowEcho", arguments(json!({ "n": i })))
                .await
                .unwrap();
            (i, result)
        })
    });

    for call in calls.collect::<Vec<_>>() {
        let (i, result) = call.await.unwrap();
        assert_eq!(result, json!({ "n": i }));
    }
    assert_eq!(client.pending_calls(), 0);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_channel_per_call_clients_get_their_own_results() {
    let broker = InMemoryBroker::new();
    let dispatcher = Dispatcher::new(broker.clone(), QUEUE, registry(Arc::default())).spawn();
    let client = RpcClient::new(broker.clone());

    let calls: Vec<_> = (0..20)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call(QUEUE, "echo", arguments(json!({ "n": i })))
                    .await
                    .map(|v| (i, v))
            })
        })
        .collect();

    for call in calls {
        let (i, result) = call.await.unwrap().unwrap();
        assert_eq!(result, json!({ "n": i }));
    }

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_call_without_dispatcher_times_out_at_deadline() {
    let broker = InMemoryBroker::new();
    let timeout = Duration::from_millis(100);
    let client = RpcClient::new(broker).with_timeout(timeout);

    let start = std::time::Instant::now();
    let err = client
        .call("unconsumed-queue", "echo", Arguments::new())
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(1));
}

#[tokio::test]
async fn test_unknown_operation_gets_no_reply() {
    let broker = InMemoryBroker::new();
    let dispatcher = Dispatcher::new(broker.clone(), QUEUE, registry(Arc::default())).spawn();
    let client = RpcClient::new(broker.clone()).with_timeout(Duration::from_millis(100));

    let err = client
        .call(QUEUE, "noSuchOperation", Arguments::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // The loop keeps serving afterwards.
    let ok = client.call(QUEUE, "echo", Arguments::new()).await.unwrap();
    assert_eq!(ok, json!({}));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handler_error_is_answered_not_timed_out() {
    let broker = InMemoryBroker::new();
    let dispatcher = Dispatcher::new(broker.clone(), QUEUE, registry(Arc::default())).spawn();
    let client = RpcClient::new(broker.clone()).with_timeout(Duration::from_secs(2));

    let start = std::time::Instant::now();
    let err = client.call(QUEUE, "fail", Arguments::new()).await.unwrap_err();
    match err {
        RpcError::Remote { code, message, .. } => {
            assert_eq!(code.as_deref(), Some("ITEM_RESERVED"));
            assert!(message.contains("pending reservation"));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_secs(1));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_envelope_is_dropped_and_loop_survives() {
    let broker = InMemoryBroker::new();
    let dispatcher = Dispatcher::new(broker.clone(), QUEUE, registry(Arc::default())).spawn();

    let channel = broker.open_channel().await.unwrap();
    channel
        .declare_queue(QUEUE, QueueOptions::durable())
        .await
        .unwrap();
    channel
        .publish(QUEUE, Message::new("{not json").with_reply_to("nowhere"))
        .await
        .unwrap();

    let client = RpcClient::new(broker.clone());
    let ok = client
        .call(QUEUE, "echo", arguments(json!({ "after": true })))
        .await
        .unwrap();
    assert_eq!(ok, json!({ "after": true }));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fire_and_forget_runs_handler_without_reply() {
    let broker = InMemoryBroker::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::new(broker.clone(), QUEUE, registry(Arc::clone(&counter))).spawn();

    let client = RpcClient::new(broker.clone());
    client.publish(QUEUE, "count", Arguments::new()).await.unwrap();
    client.publish(QUEUE, "count", Arguments::new()).await.unwrap();

    // A regular call after the publishes is served after them.
    client.call(QUEUE, "echo", Arguments::new()).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(broker.unroutable_count(), 0);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_competing_dispatchers_share_the_load() {
    let broker = InMemoryBroker::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = registry(Arc::clone(&counter));
    let first = Dispatcher::new(broker.clone(), QUEUE, Arc::clone(&registry)).spawn();
    let second = Dispatcher::new(broker.clone(), QUEUE, registry).spawn();

    let client = Arc::new(MultiplexedRpcClient::connect(&broker).await.unwrap());
    let calls: Vec<_> = (0..20)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call(QUEUE, "count", Arguments::new()).await })
        })
        .collect();
    for call in calls {
        call.await.unwrap().unwrap();
    }

    // Every request handled exactly once.
    assert_eq!(counter.load(Ordering::SeqCst), 20);

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dispatcher_reports_transport_error_when_broker_goes_away() {
    let broker = InMemoryBroker::new();
    let dispatcher = Dispatcher::new(broker.clone(), QUEUE, registry(Arc::default()));
    let task = tokio::spawn(dispatcher.run());

    // Let it subscribe first.
    let client = RpcClient::new(broker.clone());
    client.call(QUEUE, "echo", Arguments::new()).await.unwrap();

    broker.disconnect();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(RpcError::Transport(_))));
}
