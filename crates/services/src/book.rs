//! Book service: catalogue, availability and copy status.

use std::sync::Arc;

use common::{BookCopyId, BookId};
use domain::{Availability, Book, CopyStatus};
use pubsub::Subscribers;
use rpc::queues::{self, operations};
use rpc::{Arguments, HandlerError, HandlerRegistry, RpcCaller, args, arguments};
use serde_json::Value;
use store::BookCopyStore;
use uuid::Uuid;

use crate::{QueueHandlers, route, store_error, to_json};

pub const ADD_BOOK: &str = "addBook";
pub const GET_BOOK_COPIES_BY_ID: &str = "getBookCopiesById";

pub struct BookService<S> {
    store: S,
    book_added: Subscribers<Book>,
    feed: Option<Arc<dyn RpcCaller>>,
}

impl<S: BookCopyStore + 'static> BookService<S> {
    /// `feed`, when set, also receives every new book on the `book.added`
    /// queue for subscribers on other nodes.
    pub fn new(store: S, book_added: Subscribers<Book>, feed: Option<Arc<dyn RpcCaller>>) -> Self {
        Self {
            store,
            book_added,
            feed,
        }
    }

    /// Catalogue calls on `book-service-queue`, availability checks on
    /// `bookCopyAvailRequests` and status updates on `book-copies-queue`.
    pub fn handlers(self) -> QueueHandlers {
        let service = Arc::new(self);

        let mut catalogue = HandlerRegistry::new();
        route(&mut catalogue, ADD_BOOK, &service, add_book);
        route(&mut catalogue, GET_BOOK_COPIES_BY_ID, &service, get_book_copies);

        let mut availability = HandlerRegistry::new();
        route(&mut availability, operations::CHECK_AVAILABILITY, &service, check_availability);

        let mut updates = HandlerRegistry::new();
        route(&mut updates, operations::UPDATE_BOOK_COPY_STATUS, &service, update_copy_status);

        vec![
            (queues::BOOK_SERVICE, catalogue),
            (queues::BOOK_COPY_AVAILABILITY, availability),
            (queues::BOOK_COPY_UPDATES, updates),
        ]
    }
}

async fn check_availability<S: BookCopyStore>(
    service: Arc<BookService<S>>,
    arguments: Arguments,
) -> Result<Value, HandlerError> {
    let book_id = BookId::new(args::required_str(&arguments, "book_id")?);
    let availability = match service
        .store
        .find_available_copy(&book_id)
        .await
        .map_err(store_error)?
    {
        Some(copy) => Availability::available(copy.id),
        None => Availability::unavailable(),
    };
    tracing::debug!(%book_id, book_copy_id = %availability.book_copy_id, "availability checked");
    to_json(availability)
}

async fn update_copy_status<S: BookCopyStore>(
    service: Arc<BookService<S>>,
    arguments: Arguments,
) -> Result<Value, HandlerError> {
    let id = BookCopyId::new(args::required_str(&arguments, "id")?);
    let status: CopyStatus = args::required(&arguments, "status")?;
    let copy = service
        .store
        .update_copy_status(&id, status)
        .await
        .map_err(store_error)?;
    tracing::info!(book_copy_id = %copy.id, status = %copy.status, "copy status updated");
    to_json(copy)
}

async fn add_book<S: BookCopyStore>(
    service: Arc<BookService<S>>,
    arguments: Arguments,
) -> Result<Value, HandlerError> {
    let book = Book {
        id: BookId::new(Uuid::new_v4().to_string()),
        title: args::required_str(&arguments, "title")?.to_string(),
        author_name: args::required_str(&arguments, "author_name")?.to_string(),
        date_published: args::optional_str(&arguments, "date_published")?
            .unwrap_or_default()
            .to_string(),
        description: args::optional_str(&arguments, "description")?
            .unwrap_or_default()
            .to_string(),
        image: args::optional_str(&arguments, "image")?.map(str::to_string),
    };
    let copies: u32 = args::optional(&arguments, "copies")?.unwrap_or(1);

    service
        .store
        .add_book(&book, copies)
        .await
        .map_err(store_error)?;
    tracing::info!(book_id = %book.id, copies, "book added");

    service.book_added.publish(book.clone());
    if let Some(feed) = &service.feed {
        let payload = arguments_of(&book)?;
        if let Err(e) = feed
            .publish(queues::BOOK_ADDED, operations::BOOK_ADDED, payload)
            .await
        {
            tracing::warn!(error = %e, book_id = %book.id, "failed to publish book.added");
        }
    }

    to_json(book)
}

fn arguments_of(book: &Book) -> Result<Arguments, HandlerError> {
    Ok(arguments(serde_json::to_value(book)?))
}

async fn get_book_copies<S: BookCopyStore>(
    service: Arc<BookService<S>>,
    arguments: Arguments,
) -> Result<Value, HandlerError> {
    let book_id = BookId::new(args::required_str(&arguments, "book_id")?);
    let copies = service
        .store
        .copies_of(&book_id)
        .await
        .map_err(store_error)?;
    to_json(copies)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use store::InMemoryBookCopyStore;

    use super::*;

    fn registry() -> (QueueHandlers, Subscribers<Book>) {
        let subscribers = Subscribers::new("bookAdded");
        let service = BookService::new(InMemoryBookCopyStore::new(), subscribers.clone(), None);
        (service.handlers(), subscribers)
    }

    fn on_queue<'a>(handlers: &'a QueueHandlers, queue: &str) -> &'a HandlerRegistry {
        handlers
            .iter()
            .find(|(name, _)| *name == queue)
            .map(|(_, registry)| registry)
            .unwrap()
    }

    async fn invoke(
        handlers: &QueueHandlers,
        queue: &str,
        op: &str,
        args: Value,
    ) -> Result<Value, HandlerError> {
        on_queue(handlers, queue)
            .get(op)
            .unwrap()
            .handle(arguments(args))
            .await
    }

    #[tokio::test]
    async fn test_add_book_then_check_availability() {
        let (registry, subscribers) = registry();
        let mut feed = subscribers.subscribe();

        let book = invoke(
            &registry,
            queues::BOOK_SERVICE,
            ADD_BOOK,
            json!({ "title": "Dune", "author_name": "Frank Herbert" }),
        )
        .await
        .unwrap();
        let book_id = book["id"].as_str().unwrap().to_string();
        assert_eq!(feed.try_recv().unwrap().title, "Dune");

        let availability = invoke(
            &registry,
            queues::BOOK_COPY_AVAILABILITY,
            operations::CHECK_AVAILABILITY,
            json!({ "book_id": book_id }),
        )
        .await
        .unwrap();
        assert_eq!(availability["status"], "Available");
        let copy_id = availability["book_copy_id"].as_str().unwrap().to_string();
        assert_ne!(copy_id, "0");

        invoke(
            &registry,
            queues::BOOK_COPY_UPDATES,
            operations::UPDATE_BOOK_COPY_STATUS,
            json!({ "id": copy_id, "status": "Borrowed" }),
        )
        .await
        .unwrap();

        let availability = invoke(
            &registry,
            queues::BOOK_COPY_AVAILABILITY,
            operations::CHECK_AVAILABILITY,
            json!({ "book_id": book_id }),
        )
        .await
        .unwrap();
        assert_eq!(availability, json!({ "book_copy_id": "0", "status": "Borrowed" }));

        let copies = invoke(
            &registry,
            queues::BOOK_SERVICE,
            GET_BOOK_COPIES_BY_ID,
            json!({ "book_id": book_id }),
        )
        .await
        .unwrap();
        assert_eq!(copies.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_copy_and_bad_status() {
        let (registry, _) = registry();

        let err = invoke(
            &registry,
            queues::BOOK_COPY_UPDATES,
            operations::UPDATE_BOOK_COPY_STATUS,
            json!({ "id": "42", "status": "Borrowed" }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let err = invoke(
            &registry,
            queues::BOOK_COPY_UPDATES,
            operations::UPDATE_BOOK_COPY_STATUS,
            json!({ "id": "42", "status": "Lost" }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "BAD_USER_INPUT");
    }

    #[test]
    fn test_each_queue_answers_only_its_operations() {
        let (handlers, _) = registry();
        let names: Vec<&str> = handlers.iter().map(|(queue, _)| *queue).collect();
        assert_eq!(
            names,
            [
                queues::BOOK_SERVICE,
                queues::BOOK_COPY_AVAILABILITY,
                queues::BOOK_COPY_UPDATES
            ]
        );

        let catalogue = on_queue(&handlers, queues::BOOK_SERVICE);
        assert!(catalogue.get(ADD_BOOK).is_some());
        assert!(catalogue.get(operations::UPDATE_BOOK_COPY_STATUS).is_none());
        assert!(catalogue.get(operations::CHECK_AVAILABILITY).is_none());

        let availability = on_queue(&handlers, queues::BOOK_COPY_AVAILABILITY);
        assert!(availability.get(operations::CHECK_AVAILABILITY).is_some());
        assert!(availability.get(operations::UPDATE_BOOK_COPY_STATUS).is_none());

        let updates = on_queue(&handlers, queues::BOOK_COPY_UPDATES);
        assert!(updates.get(operations::UPDATE_BOOK_COPY_STATUS).is_some());
        assert!(updates.get(operations::CHECK_AVAILABILITY).is_none());
    }
}
