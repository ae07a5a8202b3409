use std::time::Duration;

use broker::InMemoryBroker;
use common::BookId;
use domain::Book;
use futures_util::StreamExt;
use pubsub::{Hub, spawn_bridge};
use rpc::{RpcCaller, RpcClient, arguments};

fn dune() -> Book {
    Book {
        id: BookId::new("B1"),
        title: "Dune".to_string(),
        author_name: "Frank Herbert".to_string(),
        date_published: "1965".to_string(),
        description: String::new(),
        image: None,
    }
}

#[tokio::test]
async fn test_book_added_messages_reach_local_subscribers() {
    let broker = InMemoryBroker::new();
    let hub = Hub::new();
    let mut subscription = hub.book_added.subscribe();
    let bridge = spawn_bridge(broker.clone(), "book.added", "bookAdded", hub.book_added.clone());

    let client = RpcClient::new(broker.clone());
    let book = dune();
    client
        .publish(
            "book.added",
            "bookAdded",
            arguments(serde_json::to_value(&book).unwrap()),
        )
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .unwrap();
    assert_eq!(received, Some(book));

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_event_is_skipped() {
    let broker = InMemoryBroker::new();
    let hub = Hub::new();
    let mut subscription = hub.book_added.subscribe();
    let bridge = spawn_bridge(broker.clone(), "book.added", "bookAdded", hub.book_added.clone());

    let client = RpcClient::new(broker.clone());
    client
        .publish("book.added", "bookAdded", arguments(serde_json::json!({ "title": 3 })))
        .await
        .unwrap();
    client
        .publish(
            "book.added",
            "bookAdded",
            arguments(serde_json::to_value(dune()).unwrap()),
        )
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.id, BookId::new("B1"));

    bridge.shutdown().await.unwrap();
}
