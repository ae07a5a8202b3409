//! Server-sent-event streams over the subscriber registries.
//!
//! Each request holds one [`Subscription`](pubsub::Subscription); when the
//! client disconnects axum drops the stream and the subscriber is removed.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use serde::Serialize;

use crate::AppState;

fn events<T, S>(name: &'static str, subscription: S) -> Sse<impl Stream<Item = Result<Event, axum::Error>>>
where
    T: Serialize,
    S: Stream<Item = T> + Send + 'static,
{
    let stream = subscription.map(move |event| Event::default().event(name).json_data(event));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /subscriptions/book-added
pub async fn book_added(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    tracing::debug!("book-added subscriber connected");
    events("bookAdded", state.hub.book_added.subscribe())
}

/// GET /subscriptions/patron-created
pub async fn patron_created(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    events("patronCreated", state.hub.patron_created.subscribe())
}

/// GET /subscriptions/ongoing-violations/{patron_id}
pub async fn ongoing_violations(
    State(state): State<Arc<AppState>>,
    Path(patron_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    events(
        "ongoingViolations",
        state.hub.ongoing_violations.subscribe_key(patron_id),
    )
}
