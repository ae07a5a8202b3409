//! The deployable node of the library platform.
//!
//! A node runs dispatchers for the services it is configured with and an
//! HTTP gateway that forwards operation calls over the broker, streams
//! subscriber events and exposes health and Prometheus metrics.

pub mod config;
pub mod error;
pub mod node;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use pubsub::Hub;
use rpc::RpcCaller;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::ServiceKind;
use node::Node;

/// Shared by every route.
pub struct AppState {
    pub caller: Arc<dyn RpcCaller>,
    pub hub: Arc<Hub>,
    pub services: Vec<ServiceKind>,
}

impl AppState {
    pub fn for_node(node: &Node) -> Arc<Self> {
        Arc::new(Self {
            caller: node.caller(),
            hub: node.hub(),
            services: node.services().to_vec(),
        })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/rpc/{queue}", post(routes::rpc::call))
        .route(
            "/subscriptions/book-added",
            get(routes::subscriptions::book_added),
        )
        .route(
            "/subscriptions/patron-created",
            get(routes::subscriptions::patron_created),
        )
        .route(
            "/subscriptions/ongoing-violations/{patron_id}",
            get(routes::subscriptions::ongoing_violations),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
