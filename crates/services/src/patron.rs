//! Patron service: patrons, standing and violation records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::{PatronId, SharedClock, ViolationId};
use domain::{
    Patron, PatronStanding, PatronStatus, ViolationError, ViolationRecord, ViolationStatus,
    ViolationType,
};
use pubsub::Subscribers;
use rpc::queues::{self, operations};
use rpc::{Arguments, HandlerError, HandlerRegistry, args};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{route, to_json};

/// The queue the patron service consumes.
pub const QUEUE: &str = queues::PATRON_SERVICE;

pub const CREATE_PATRON: &str = "createPatron";
pub const GET_PATRON_BY_ID: &str = operations::GET_PATRON_BY_ID;
pub const GET_ALL_PATRONS: &str = "getAllPatrons";
pub const UPDATE_PATRON: &str = "updatePatron";
pub const DELETE_PATRON_BY_ID: &str = "deletePatronById";
pub const UPDATE_PATRON_STATUS: &str = "updatePatronStatus";
pub const ADD_VIOLATION: &str = "addViolation";
pub const UPDATE_VIOLATION_STATUS: &str = "updateViolationStatus";
pub const GET_VIOLATION_BY_PATRON_ID: &str = "getViolationByPatronId";
pub const GET_PATRON_STATUS_BY_TYPE: &str = "getPatronStatusByType";

#[derive(Debug, Default)]
struct PatronTables {
    patrons: HashMap<PatronId, Patron>,
    violations: HashMap<ViolationId, ViolationRecord>,
}

/// In-memory patron records.
#[derive(Debug, Clone, Default)]
pub struct PatronStore {
    tables: Arc<Mutex<PatronTables>>,
}

impl PatronStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PatronTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, patron: Patron) {
        self.lock().patrons.insert(patron.patron_id.clone(), patron);
    }

    pub fn get(&self, id: &PatronId) -> Option<Patron> {
        self.lock().patrons.get(id).cloned()
    }

    /// All patrons, oldest first.
    pub fn all(&self) -> Vec<Patron> {
        let mut patrons: Vec<Patron> = self.lock().patrons.values().cloned().collect();
        patrons.sort_by_key(|p| p.patron_created);
        patrons
    }

    /// Applies `f` to a stored patron and returns the result.
    pub fn update<F>(&self, id: &PatronId, f: F) -> Result<Option<Patron>, ViolationError>
    where
        F: FnOnce(&mut Patron) -> Result<(), ViolationError>,
    {
        let mut tables = self.lock();
        let Some(patron) = tables.patrons.get_mut(id) else {
            return Ok(None);
        };
        let mut updated = patron.clone();
        f(&mut updated)?;
        *patron = updated.clone();
        Ok(Some(updated))
    }

    pub fn remove(&self, id: &PatronId) -> Option<Patron> {
        self.lock().patrons.remove(id)
    }

    pub fn insert_violation(&self, violation: ViolationRecord) {
        self.lock()
            .violations
            .insert(violation.violation_record_id, violation);
    }

    pub fn set_violation_status(
        &self,
        id: ViolationId,
        status: ViolationStatus,
    ) -> Result<ViolationRecord, ViolationError> {
        let mut tables = self.lock();
        let violation = tables
            .violations
            .get_mut(&id)
            .ok_or(ViolationError::NotFound(id))?;
        violation.set_status(status)?;
        Ok(violation.clone())
    }

    /// A patron's violations, oldest first.
    pub fn violations_of(&self, patron_id: &PatronId) -> Vec<ViolationRecord> {
        let mut violations: Vec<ViolationRecord> = self
            .lock()
            .violations
            .values()
            .filter(|v| v.patron_id == *patron_id)
            .cloned()
            .collect();
        violations.sort_by_key(|v| v.violation_created);
        violations
    }
}

pub struct PatronService {
    store: PatronStore,
    clock: SharedClock,
    patron_created: Subscribers<Patron>,
    ongoing_violations: Subscribers<ViolationRecord>,
}

impl PatronService {
    pub fn new(
        store: PatronStore,
        clock: SharedClock,
        patron_created: Subscribers<Patron>,
        ongoing_violations: Subscribers<ViolationRecord>,
    ) -> Self {
        Self {
            store,
            clock,
            patron_created,
            ongoing_violations,
        }
    }

    pub fn handlers(self) -> HandlerRegistry {
        let service = Arc::new(self);
        let mut registry = HandlerRegistry::new();
        route(&mut registry, CREATE_PATRON, &service, create_patron);
        route(&mut registry, GET_PATRON_BY_ID, &service, get_patron);
        route(&mut registry, GET_ALL_PATRONS, &service, get_all_patrons);
        route(&mut registry, UPDATE_PATRON, &service, update_patron);
        route(&mut registry, DELETE_PATRON_BY_ID, &service, delete_patron);
        route(&mut registry, UPDATE_PATRON_STATUS, &service, update_patron_status);
        route(&mut registry, ADD_VIOLATION, &service, add_violation);
        route(&mut registry, UPDATE_VIOLATION_STATUS, &service, update_violation_status);
        route(&mut registry, GET_VIOLATION_BY_PATRON_ID, &service, get_violations);
        route(&mut registry, GET_PATRON_STATUS_BY_TYPE, &service, get_status_by_type);
        registry
    }
}

fn patron_id(arguments: &Arguments) -> Result<PatronId, HandlerError> {
    Ok(PatronId::new(args::required_str(arguments, "patron_id")?))
}

fn violation_error(err: ViolationError) -> HandlerError {
    match err {
        ViolationError::NotFound(id) => HandlerError::NotFound(format!("violation {id}")),
        other => HandlerError::rejected("INVALID_TRANSITION", other.to_string()),
    }
}

fn patron_not_found(id: &PatronId) -> HandlerError {
    HandlerError::NotFound(format!("patron {id}"))
}

async fn create_patron(service: Arc<PatronService>, arguments: Arguments) -> Result<Value, HandlerError> {
    let id = match args::optional_str(&arguments, "patron_id")? {
        Some(id) => PatronId::new(id),
        None => PatronId::new(Uuid::new_v4().to_string()),
    };
    if service.store.get(&id).is_some() {
        return Err(HandlerError::rejected("DUPLICATE", format!("patron {id} exists")));
    }
    let patron = Patron::new(
        id,
        args::required_str(&arguments, "first_name")?,
        args::required_str(&arguments, "last_name")?,
        args::optional_str(&arguments, "phone_number")?.unwrap_or_default(),
        service.clock.now(),
    );
    service.store.insert(patron.clone());
    service.patron_created.publish(patron.clone());
    tracing::info!(patron_id = %patron.patron_id, "patron created");
    to_json(patron)
}

async fn get_patron(service: Arc<PatronService>, arguments: Arguments) -> Result<Value, HandlerError> {
    let id = patron_id(&arguments)?;
    let patron = service.store.get(&id).ok_or_else(|| patron_not_found(&id))?;
    to_json(patron)
}

async fn get_all_patrons(service: Arc<PatronService>, _arguments: Arguments) -> Result<Value, HandlerError> {
    to_json(service.store.all())
}

async fn update_patron(service: Arc<PatronService>, arguments: Arguments) -> Result<Value, HandlerError> {
    let id = patron_id(&arguments)?;
    let first_name = args::optional_str(&arguments, "first_name")?;
    let last_name = args::optional_str(&arguments, "last_name")?;
    let phone_number = args::optional_str(&arguments, "phone_number")?;

    let patron = service
        .store
        .update(&id, |patron| {
            if let Some(v) = first_name {
                patron.first_name = v.to_string();
            }
            if let Some(v) = last_name {
                patron.last_name = v.to_string();
            }
            if let Some(v) = phone_number {
                patron.phone_number = v.to_string();
            }
            Ok(())
        })
        .map_err(violation_error)?
        .ok_or_else(|| patron_not_found(&id))?;
    to_json(patron)
}

async fn delete_patron(service: Arc<PatronService>, arguments: Arguments) -> Result<Value, HandlerError> {
    let id = patron_id(&arguments)?;
    service.store.remove(&id).ok_or_else(|| patron_not_found(&id))?;
    tracing::info!(patron_id = %id, "patron deleted");
    Ok(json!(true))
}

async fn update_patron_status(
    service: Arc<PatronService>,
    arguments: Arguments,
) -> Result<Value, HandlerError> {
    let id = patron_id(&arguments)?;
    let standing: Option<PatronStanding> = args::optional(&arguments, "patron_status")?;
    let warning_count: Option<u32> = args::optional(&arguments, "warning_count")?;
    let unpaid_fees: Option<f64> = args::optional(&arguments, "unpaid_fees")?;

    let patron = service
        .store
        .update(&id, |patron| {
            if let Some(next) = standing {
                patron.status.set_standing(next)?;
            }
            if let Some(count) = warning_count {
                patron.status.warning_count = count;
            }
            if let Some(fees) = unpaid_fees {
                patron.status.unpaid_fees = fees;
            }
            Ok(())
        })
        .map_err(violation_error)?
        .ok_or_else(|| patron_not_found(&id))?;
    to_json(patron.status)
}

async fn add_violation(service: Arc<PatronService>, arguments: Arguments) -> Result<Value, HandlerError> {
    let id = patron_id(&arguments)?;
    if service.store.get(&id).is_none() {
        return Err(patron_not_found(&id));
    }
    let violation_type: ViolationType = args::required(&arguments, "violation_type")?;
    let violation = ViolationRecord::open(
        id.clone(),
        violation_type,
        args::optional_str(&arguments, "violation_info")?.unwrap_or_default(),
        service.clock.now(),
    );
    service.store.insert_violation(violation.clone());
    service
        .ongoing_violations
        .publish_to(id.as_str(), violation.clone());
    tracing::info!(patron_id = %id, violation_type = %violation_type, "violation recorded");
    to_json(violation)
}

async fn update_violation_status(
    service: Arc<PatronService>,
    arguments: Arguments,
) -> Result<Value, HandlerError> {
    let raw = args::required_str(&arguments, "violation_record_id")?;
    let id = ViolationId::parse(raw).map_err(|e| HandlerError::invalid("violation_record_id", e))?;
    let status: ViolationStatus = args::required(&arguments, "violation_status")?;
    let violation = service
        .store
        .set_violation_status(id, status)
        .map_err(violation_error)?;
    to_json(violation)
}

async fn get_violations(service: Arc<PatronService>, arguments: Arguments) -> Result<Value, HandlerError> {
    let id = patron_id(&arguments)?;
    to_json(service.store.violations_of(&id))
}

async fn get_status_by_type(
    service: Arc<PatronService>,
    arguments: Arguments,
) -> Result<Value, HandlerError> {
    let standing: PatronStanding = args::required(&arguments, "patron_status")?;
    let statuses: Vec<PatronStatus> = service
        .store
        .all()
        .into_iter()
        .map(|p| p.status)
        .filter(|s| s.patron_status == standing)
        .collect();
    to_json(statuses)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use common::FixedClock;
    use rpc::arguments;

    use super::*;

    struct Harness {
        registry: HandlerRegistry,
        violations: Subscribers<ViolationRecord>,
        created: Subscribers<Patron>,
    }

    fn harness() -> Harness {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        let created = Subscribers::new("patronCreated");
        let violations = Subscribers::new("ongoingViolations");
        let service = PatronService::new(
            PatronStore::new(),
            Arc::new(clock),
            created.clone(),
            violations.clone(),
        );
        Harness {
            registry: service.handlers(),
            violations,
            created,
        }
    }

    async fn invoke(h: &Harness, op: &str, args: Value) -> Result<Value, HandlerError> {
        h.registry.get(op).unwrap().handle(arguments(args)).await
    }

    #[tokio::test]
    async fn test_patron_crud() {
        let h = harness();
        let mut created = h.created.subscribe();

        let patron = invoke(
            &h,
            CREATE_PATRON,
            json!({ "patron_id": "P1", "first_name": "Ada", "last_name": "Lovelace" }),
        )
        .await
        .unwrap();
        assert_eq!(patron["status"]["patron_status"], "Good");
        assert_eq!(created.try_recv().unwrap().first_name, "Ada");

        let updated = invoke(&h, UPDATE_PATRON, json!({ "patron_id": "P1", "phone_number": "555" }))
            .await
            .unwrap();
        assert_eq!(updated["phone_number"], "555");
        assert_eq!(updated["first_name"], "Ada");

        let all = invoke(&h, GET_ALL_PATRONS, json!({})).await.unwrap();
        assert_eq!(all.as_array().unwrap().len(), 1);

        assert_eq!(
            invoke(&h, DELETE_PATRON_BY_ID, json!({ "patron_id": "P1" }))
                .await
                .unwrap(),
            json!(true)
        );
        let err = invoke(&h, GET_PATRON_BY_ID, json!({ "patron_id": "P1" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_standing_and_status_lookup() {
        let h = harness();
        invoke(&h, CREATE_PATRON, json!({ "patron_id": "P1", "first_name": "A", "last_name": "B" }))
            .await
            .unwrap();
        invoke(&h, CREATE_PATRON, json!({ "patron_id": "P2", "first_name": "C", "last_name": "D" }))
            .await
            .unwrap();

        let status = invoke(
            &h,
            UPDATE_PATRON_STATUS,
            json!({ "patron_id": "P2", "patron_status": "Warned", "warning_count": 1 }),
        )
        .await
        .unwrap();
        assert_eq!(status["patron_status"], "Warned");
        assert_eq!(status["warning_count"], 1);

        let warned = invoke(&h, GET_PATRON_STATUS_BY_TYPE, json!({ "patron_status": "Warned" }))
            .await
            .unwrap();
        assert_eq!(warned.as_array().unwrap().len(), 1);
        assert_eq!(warned[0]["patron_id"], "P2");

        let err = invoke(
            &h,
            UPDATE_PATRON_STATUS,
            json!({ "patron_id": "P2", "patron_status": "Pending" }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_violation_lifecycle_and_feed() {
        let h = harness();
        invoke(&h, CREATE_PATRON, json!({ "patron_id": "P1", "first_name": "A", "last_name": "B" }))
            .await
            .unwrap();
        let mut feed = h.violations.subscribe_key("P1");

        let violation = invoke(
            &h,
            ADD_VIOLATION,
            json!({ "patron_id": "P1", "violation_type": "Late_Return", "violation_info": "3 days" }),
        )
        .await
        .unwrap();
        assert_eq!(violation["violation_status"], "Ongoing");
        assert_eq!(feed.try_recv().unwrap().violation_type, ViolationType::LateReturn);

        let id = violation["violation_record_id"].as_str().unwrap().to_string();
        let resolved = invoke(
            &h,
            UPDATE_VIOLATION_STATUS,
            json!({ "violation_record_id": id, "violation_status": "Resolved" }),
        )
        .await
        .unwrap();
        assert_eq!(resolved["violation_status"], "Resolved");

        let err = invoke(
            &h,
            UPDATE_VIOLATION_STATUS,
            json!({ "violation_record_id": id, "violation_status": "Ongoing" }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");

        let listed = invoke(&h, GET_VIOLATION_BY_PATRON_ID, json!({ "patron_id": "P1" }))
            .await
            .unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_violation_for_unknown_patron() {
        let h = harness();
        let err = invoke(
            &h,
            ADD_VIOLATION,
            json!({ "patron_id": "nobody", "violation_type": "Unpaid_Fees" }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
