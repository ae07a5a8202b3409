//! Integration tests for the gateway against an in-process node.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::AppState;
use api::config::{Config, ServiceKind};
use api::node::Node;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use broker::InMemoryBroker;
use chrono::{TimeZone, Utc};
use common::FixedClock;
use futures_util::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn setup_with(config: Config) -> (axum::Router, Node) {
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    let node = Node::start_with_clock(InMemoryBroker::new(), &config, Arc::new(clock))
        .await
        .unwrap();
    let app = api::create_app(AppState::for_node(&node), get_metrics_handle());
    (app, node)
}

async fn setup() -> (axum::Router, Node) {
    setup_with(Config::default()).await
}

fn rpc_request(queue: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/rpc/{queue}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn add_book(app: &axum::Router) -> String {
    let response = app
        .clone()
        .oneshot(rpc_request(
            "book-service-queue",
            json!({
                "requestedResolver": "addBook",
                "variables": { "title": "Dune", "author_name": "Frank Herbert" }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    json["data"]["addBook"]["id"].as_str().unwrap().to_string()
}

async fn register_patron(app: &axum::Router, patron_id: &str) {
    let response = app
        .clone()
        .oneshot(rpc_request(
            "patron-service-queue",
            json!({
                "requestedResolver": "createPatron",
                "variables": { "patron_id": patron_id, "first_name": "Ada", "last_name": "Lovelace" }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_check_lists_services() {
    let (app, node) = setup().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["services"], json!(["book", "patron", "borrowing", "fine"]));
    node.shutdown().await;
}

#[tokio::test]
async fn test_borrow_through_gateway() {
    let (app, node) = setup().await;
    let book_id = add_book(&app).await;
    register_patron(&app, "P1").await;

    let borrow = json!({
        "requestedResolver": "borrowBook",
        "variables": { "book_id": book_id, "patron_id": "P1" }
    });
    let response = app
        .clone()
        .oneshot(rpc_request("borrowing-service-queue", borrow.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["borrowBook"]["status"], "ACTIVE");
    assert_eq!(json["data"]["borrowBook"]["renewalCount"], 0);

    // The only copy is out; the reply carries the service's error.
    let mut rejected = None;
    for _ in 0..50 {
        let response = app
            .clone()
            .oneshot(rpc_request("borrowing-service-queue", borrow.clone()))
            .await
            .unwrap();
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            rejected = Some(json_body(response).await);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let rejected = rejected.expect("second borrow was never rejected");
    assert_eq!(rejected["data"]["borrowBook"], Value::Null);
    assert_eq!(rejected["errors"][0]["code"], "NOT_AVAILABLE");
    node.shutdown().await;
}

#[tokio::test]
async fn test_rejects_unknown_queue_and_empty_operation() {
    let (app, node) = setup().await;

    let response = app
        .clone()
        .oneshot(rpc_request(
            "borrowing.returned",
            json!({ "requestedResolver": "loanReturned", "variables": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(rpc_request(
            "patron-service-queue",
            json!({ "requestedResolver": "  " }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    node.shutdown().await;
}

#[tokio::test]
async fn test_call_to_absent_service_times_out() {
    let config = Config {
        services: vec![ServiceKind::Patron],
        rpc_timeout: Duration::from_millis(100),
        ..Config::default()
    };
    let (app, node) = setup_with(config).await;

    let response = app
        .oneshot(rpc_request(
            "borrowing-service-queue",
            json!({ "requestedResolver": "markOverdue", "variables": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let json = json_body(response).await;
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("timeout waiting for reply from service")
    );
    node.shutdown().await;
}

#[tokio::test]
async fn test_book_added_stream() {
    let (app, node) = setup().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/subscriptions/book-added")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    assert_eq!(node.hub().book_added.len(), 1);

    add_book(&app).await;

    let mut frames = response.into_body().into_data_stream();
    let frame = tokio::time::timeout(Duration::from_secs(2), frames.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    assert!(text.contains("event: bookAdded"));
    assert!(text.contains("Dune"));

    drop(frames);
    assert_eq!(node.hub().book_added.len(), 0);
    node.shutdown().await;
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, node) = setup().await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    node.shutdown().await;
}
