//! Fine service: assesses late-return fines from loan-returned events.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::{PatronId, SharedClock};
use domain::{Fine, ReturnedEvent};
use rpc::queues::{self, operations};
use rpc::{Arguments, HandlerError, HandlerRegistry, args};
use serde_json::Value;

use crate::{QueueHandlers, route, to_json};

pub const GET_FINES_BY_PATRON_ID: &str = "getFinesByPatronId";

pub const DEFAULT_RATE_PER_DAY: f64 = 1.0;

/// In-memory fine ledger.
#[derive(Debug, Clone, Default)]
pub struct FineStore {
    fines: Arc<Mutex<Vec<Fine>>>,
}

impl FineStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn fines(&self) -> MutexGuard<'_, Vec<Fine>> {
        self.fines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, fine: Fine) {
        self.fines().push(fine);
    }

    pub fn of_patron(&self, patron_id: &PatronId) -> Vec<Fine> {
        self.fines()
            .iter()
            .filter(|f| &f.patron_id == patron_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fines().is_empty()
    }
}

pub struct FineService {
    store: FineStore,
    rate_per_day: f64,
    clock: SharedClock,
}

impl FineService {
    pub fn new(store: FineStore, rate_per_day: f64, clock: SharedClock) -> Self {
        Self {
            store,
            rate_per_day,
            clock,
        }
    }

    /// Loan-returned events on `borrowing.returned`, lookups on
    /// `fine-service-queue`.
    pub fn handlers(self) -> QueueHandlers {
        let service = Arc::new(self);

        let mut events = HandlerRegistry::new();
        route(&mut events, operations::LOAN_RETURNED, &service, loan_returned);

        let mut lookups = HandlerRegistry::new();
        route(&mut lookups, GET_FINES_BY_PATRON_ID, &service, fines_of_patron);

        vec![
            (queues::BORROWING_RETURNED, events),
            (queues::FINE_SERVICE, lookups),
        ]
    }
}

/// Replies with the assessed fine, or `null` for an on-time return.
async fn loan_returned(service: Arc<FineService>, arguments: Arguments) -> Result<Value, HandlerError> {
    let event: ReturnedEvent = serde_json::from_value(Value::Object(arguments))
        .map_err(|e| HandlerError::invalid("event", e))?;
    let Some(fine) = Fine::assess(&event, service.rate_per_day, service.clock.now()) else {
        tracing::debug!(borrowing_id = %event.borrowing_id, "returned on time");
        return Ok(Value::Null);
    };

    metrics::counter!("fines_assessed_total").increment(1);
    tracing::info!(
        fine_id = %fine.fine_id,
        patron_id = %fine.patron_id,
        days_late = fine.days_late,
        amount = fine.amount,
        "fine assessed"
    );
    service.store.insert(fine.clone());
    to_json(fine)
}

async fn fines_of_patron(service: Arc<FineService>, arguments: Arguments) -> Result<Value, HandlerError> {
    let patron_id = PatronId::new(args::required_str(&arguments, "patron_id")?);
    to_json(service.store.of_patron(&patron_id))
}
