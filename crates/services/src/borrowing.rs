//! Borrowing service handlers.

use std::sync::Arc;

use common::{BookId, PatronId, RecordId, ReservationId};
use domain::BorrowStatus;
use rpc::queues;
use rpc::{Arguments, HandlerError, HandlerRegistry, args};
use saga::{BookCopyService, LoanService, PatronDirectory, ReturnNotifier, SagaError};
use serde_json::{Value, json};
use store::{LoanStore, RecordFilter};

use crate::{route, to_json};

/// The queue the borrowing service consumes.
pub const QUEUE: &str = queues::BORROWING_SERVICE;

pub const BORROW_BOOK: &str = "borrowBook";
pub const RETURN_BOOK: &str = "returnBook";
pub const RENEW_LOAN: &str = "renewLoan";
pub const RESERVE_BOOK: &str = "reserveBook";
pub const CANCEL_RESERVATION: &str = "cancelReservation";
pub const FULFILL_RESERVATION: &str = "fulfillReservation";
pub const BORROW_RECORDS: &str = "borrowRecords";
pub const MARK_OVERDUE: &str = "markOverdue";

/// Builds the borrowing service's registry over a shared [`LoanService`].
pub fn handlers<S, C, P, N>(service: Arc<LoanService<S, C, P, N>>) -> HandlerRegistry
where
    S: LoanStore + 'static,
    C: BookCopyService + 'static,
    P: PatronDirectory + 'static,
    N: ReturnNotifier + 'static,
{
    let mut registry = HandlerRegistry::new();
    route(&mut registry, BORROW_BOOK, &service, borrow_book);
    route(&mut registry, RETURN_BOOK, &service, return_book);
    route(&mut registry, RENEW_LOAN, &service, renew_loan);
    route(&mut registry, RESERVE_BOOK, &service, reserve_book);
    route(&mut registry, CANCEL_RESERVATION, &service, cancel_reservation);
    route(&mut registry, FULFILL_RESERVATION, &service, fulfill_reservation);
    route(&mut registry, BORROW_RECORDS, &service, borrow_records);
    route(&mut registry, MARK_OVERDUE, &service, mark_overdue);
    registry
}

fn record_id(arguments: &Arguments) -> Result<RecordId, HandlerError> {
    let raw = args::required_str(arguments, "id")?;
    RecordId::parse(raw).map_err(|e| HandlerError::invalid("id", e))
}

fn reservation_id(arguments: &Arguments) -> Result<ReservationId, HandlerError> {
    let raw = args::required_str(arguments, "id")?;
    ReservationId::parse(raw).map_err(|e| HandlerError::invalid("id", e))
}

fn book_and_patron(arguments: &Arguments) -> Result<(BookId, PatronId), HandlerError> {
    Ok((
        BookId::new(args::required_str(arguments, "book_id")?),
        PatronId::new(args::required_str(arguments, "patron_id")?),
    ))
}

async fn borrow_book<S, C, P, N>(
    service: Arc<LoanService<S, C, P, N>>,
    arguments: Arguments,
) -> Result<Value, HandlerError>
where
    S: LoanStore,
    C: BookCopyService,
    P: PatronDirectory,
    N: ReturnNotifier,
{
    let (book_id, patron_id) = book_and_patron(&arguments)?;
    let record = service.borrow_book(&book_id, &patron_id).await?;
    to_json(record)
}

async fn return_book<S, C, P, N>(
    service: Arc<LoanService<S, C, P, N>>,
    arguments: Arguments,
) -> Result<Value, HandlerError>
where
    S: LoanStore,
    C: BookCopyService,
    P: PatronDirectory,
    N: ReturnNotifier,
{
    let record = service.return_book(record_id(&arguments)?).await?;
    to_json(record)
}

/// Answers with the renewed record, or with `{code, message}` when a loan
/// rule refuses the renewal.
async fn renew_loan<S, C, P, N>(
    service: Arc<LoanService<S, C, P, N>>,
    arguments: Arguments,
) -> Result<Value, HandlerError>
where
    S: LoanStore,
    C: BookCopyService,
    P: PatronDirectory,
    N: ReturnNotifier,
{
    match service.renew_loan(record_id(&arguments)?).await {
        Ok(record) => to_json(record),
        Err(e @ SagaError::Loan(_)) => Ok(json!({ "code": e.code(), "message": e.to_string() })),
        Err(e) => Err(e.into()),
    }
}

async fn reserve_book<S, C, P, N>(
    service: Arc<LoanService<S, C, P, N>>,
    arguments: Arguments,
) -> Result<Value, HandlerError>
where
    S: LoanStore,
    C: BookCopyService,
    P: PatronDirectory,
    N: ReturnNotifier,
{
    let (book_id, patron_id) = book_and_patron(&arguments)?;
    let reservation = service.reserve_book(&book_id, &patron_id).await?;
    to_json(reservation)
}

async fn cancel_reservation<S, C, P, N>(
    service: Arc<LoanService<S, C, P, N>>,
    arguments: Arguments,
) -> Result<Value, HandlerError>
where
    S: LoanStore,
    C: BookCopyService,
    P: PatronDirectory,
    N: ReturnNotifier,
{
    let reservation = service
        .cancel_reservation(reservation_id(&arguments)?)
        .await?;
    to_json(reservation)
}

async fn fulfill_reservation<S, C, P, N>(
    service: Arc<LoanService<S, C, P, N>>,
    arguments: Arguments,
) -> Result<Value, HandlerError>
where
    S: LoanStore,
    C: BookCopyService,
    P: PatronDirectory,
    N: ReturnNotifier,
{
    let (reservation, record) = service
        .fulfill_reservation(reservation_id(&arguments)?)
        .await?;
    Ok(json!({ "reservation": to_json(reservation)?, "record": to_json(record)? }))
}

async fn borrow_records<S, C, P, N>(
    service: Arc<LoanService<S, C, P, N>>,
    arguments: Arguments,
) -> Result<Value, HandlerError>
where
    S: LoanStore,
    C: BookCopyService,
    P: PatronDirectory,
    N: ReturnNotifier,
{
    let filter = RecordFilter {
        patron_id: args::optional_str(&arguments, "patron_id")?.map(PatronId::new),
        book_id: args::optional_str(&arguments, "book_id")?.map(BookId::new),
        status: args::optional::<BorrowStatus>(&arguments, "status")?,
    };
    to_json(service.records(&filter).await?)
}

async fn mark_overdue<S, C, P, N>(
    service: Arc<LoanService<S, C, P, N>>,
    _arguments: Arguments,
) -> Result<Value, HandlerError>
where
    S: LoanStore,
    C: BookCopyService,
    P: PatronDirectory,
    N: ReturnNotifier,
{
    to_json(service.mark_overdue().await?)
}
