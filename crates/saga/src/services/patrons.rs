//! The patron service as seen from the borrowing service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::PatronId;
use domain::{Patron, PatronStanding};
use rpc::queues::{self, operations};
use rpc::{RpcCaller, RpcError, arguments, decode_result};
use serde_json::json;

#[async_trait]
pub trait PatronDirectory: Send + Sync {
    /// Looks up a patron's standing. `None` means the patron does not exist.
    async fn standing(&self, patron_id: &PatronId) -> Result<Option<PatronStanding>, RpcError>;
}

/// [`PatronDirectory`] over the RPC bridge.
#[derive(Clone)]
pub struct RpcPatronDirectory {
    caller: Arc<dyn RpcCaller>,
}

impl RpcPatronDirectory {
    pub fn new(caller: Arc<dyn RpcCaller>) -> Self {
        Self { caller }
    }
}

#[async_trait]
impl PatronDirectory for RpcPatronDirectory {
    async fn standing(&self, patron_id: &PatronId) -> Result<Option<PatronStanding>, RpcError> {
        let result = self
            .caller
            .call(
                queues::PATRON_SERVICE,
                operations::GET_PATRON_BY_ID,
                arguments(json!({ "patron_id": patron_id })),
            )
            .await;
        match result {
            Ok(value) => {
                let patron: Patron = decode_result(value)?;
                Ok(Some(patron.status.patron_status))
            }
            Err(RpcError::Remote { code: Some(code), .. }) if code == "NOT_FOUND" => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// In-memory patron standings for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPatronDirectory {
    standings: Arc<Mutex<HashMap<PatronId, PatronStanding>>>,
}

impl InMemoryPatronDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory where each of `patrons` is in good standing.
    pub fn with_good<I, P>(patrons: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PatronId>,
    {
        let directory = Self::new();
        for patron in patrons {
            directory.set_standing(patron, PatronStanding::Good);
        }
        directory
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PatronId, PatronStanding>> {
        self.standings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_standing(&self, patron_id: impl Into<PatronId>, standing: PatronStanding) {
        self.lock().insert(patron_id.into(), standing);
    }
}

#[async_trait]
impl PatronDirectory for InMemoryPatronDirectory {
    async fn standing(&self, patron_id: &PatronId) -> Result<Option<PatronStanding>, RpcError> {
        Ok(self.lock().get(patron_id).copied())
    }
}
