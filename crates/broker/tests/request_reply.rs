//! Request/reply over the in-memory broker using only the channel primitives.

use broker::{Broker, Channel, InMemoryBroker, Message, QueueOptions};
use futures_util::StreamExt;

#[tokio::test]
async fn test_reply_reaches_requester_through_private_queue() {
    let broker = InMemoryBroker::new();

    let server = broker.open_channel().await.unwrap();
    server
        .declare_queue("echo-queue", QueueOptions::durable())
        .await
        .unwrap();
    let mut requests = server.consume("echo-queue").await.unwrap();

    let server_task = tokio::spawn(async move {
        let request = requests.next().await.unwrap().unwrap();
        let reply_to = request.reply_to().unwrap().to_string();
        let correlation_id = request.correlation_id().unwrap().to_string();
        server
            .publish(
                &reply_to,
                Message::new(request.body.clone()).with_correlation_id(correlation_id),
            )
            .await
            .unwrap();
    });

    let client = broker.open_channel().await.unwrap();
    let reply_queue = client.declare_queue("", QueueOptions::reply()).await.unwrap();
    let mut replies = client.consume(&reply_queue).await.unwrap();
    client
        .publish(
            "echo-queue",
            Message::new("ping")
                .with_correlation_id("req-1")
                .with_reply_to(reply_queue.clone()),
        )
        .await
        .unwrap();

    let reply = replies.next().await.unwrap().unwrap();
    assert_eq!(reply.body, b"ping");
    assert_eq!(reply.correlation_id(), Some("req-1"));

    server_task.await.unwrap();
    client.close().await.unwrap();
    assert!(!broker.has_queue(&reply_queue));
    assert!(broker.has_queue("echo-queue"));
}

#[tokio::test]
async fn test_messages_published_before_consume_are_kept() {
    let broker = InMemoryBroker::new();
    let channel = broker.open_channel().await.unwrap();
    channel
        .declare_queue("book.added", QueueOptions::durable())
        .await
        .unwrap();

    for i in 0..3 {
        channel
            .publish("book.added", Message::new(format!("m{i}")).persistent())
            .await
            .unwrap();
    }

    let deliveries = channel.consume("book.added").await.unwrap();
    let bodies: Vec<Vec<u8>> = deliveries
        .take(3)
        .map(|m| m.unwrap().body)
        .collect()
        .await;
    assert_eq!(bodies, vec![b"m0".to_vec(), b"m1".to_vec(), b"m2".to_vec()]);
}
