//! Wires the enabled services onto a broker.

use std::sync::Arc;

use broker::Broker;
use common::{SharedClock, SystemClock};
use pubsub::Hub;
use rpc::queues::{self, operations};
use rpc::{Dispatcher, DispatcherHandle, MultiplexedRpcClient, RpcCaller};
use saga::{BorrowingSaga, LoanService, RpcBookCopyService, RpcPatronDirectory, RpcReturnNotifier};
use services::QueueHandlers;
use services::book::BookService;
use services::borrowing;
use services::fine::{FineService, FineStore};
use services::patron::{self, PatronService, PatronStore};
use store::{
    BookCopyStore, InMemoryBookCopyStore, InMemoryLoanStore, LoanStore, PostgresBookCopyStore,
    PostgresLoanStore,
};

use crate::config::{Config, ServiceKind};
use crate::error::NodeError;

/// A running node: its outgoing client and the dispatchers it owns.
pub struct Node {
    caller: Arc<dyn RpcCaller>,
    hub: Arc<Hub>,
    services: Vec<ServiceKind>,
    dispatchers: Vec<DispatcherHandle>,
}

impl Node {
    /// Starts dispatchers for every service `config` enables, with the
    /// system clock.
    pub async fn start<B>(broker: B, config: &Config) -> Result<Self, NodeError>
    where
        B: Broker + Clone + 'static,
    {
        Self::start_with_clock(broker, config, Arc::new(SystemClock)).await
    }

    pub async fn start_with_clock<B>(
        broker: B,
        config: &Config,
        clock: SharedClock,
    ) -> Result<Self, NodeError>
    where
        B: Broker + Clone + 'static,
    {
        let client = MultiplexedRpcClient::connect(&broker)
            .await?
            .with_timeout(config.rpc_timeout);
        let caller: Arc<dyn RpcCaller> = Arc::new(client);
        let hub = Arc::new(Hub::new());

        let registries = match &config.database_url {
            Some(url) => {
                let pool = store::connect(url).await?;
                tracing::info!("using PostgreSQL stores");
                registries(
                    config,
                    PostgresLoanStore::new(pool.clone()),
                    PostgresBookCopyStore::new(pool),
                    &caller,
                    &hub,
                    &clock,
                )
            }
            None => registries(
                config,
                InMemoryLoanStore::new(),
                InMemoryBookCopyStore::new(),
                &caller,
                &hub,
                &clock,
            ),
        };

        let mut dispatchers = Vec::new();
        for (queue, registry) in registries {
            let registry = Arc::new(registry);
            for _ in 0..config.dispatchers_per_queue {
                dispatchers.push(Dispatcher::new(broker.clone(), queue, Arc::clone(&registry)).spawn());
            }
        }

        // A node hosting the book service feeds its own subscribers directly.
        if !config.runs(ServiceKind::Book) {
            dispatchers.push(pubsub::spawn_bridge(
                broker.clone(),
                queues::BOOK_ADDED,
                operations::BOOK_ADDED,
                hub.book_added.clone(),
            ));
        }

        let services: Vec<&str> = config.services.iter().map(ServiceKind::as_str).collect();
        tracing::info!(
            services = ?services,
            dispatchers = dispatchers.len(),
            "node started"
        );

        Ok(Self {
            caller,
            hub,
            services: config.services.clone(),
            dispatchers,
        })
    }

    pub fn caller(&self) -> Arc<dyn RpcCaller> {
        Arc::clone(&self.caller)
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    pub fn services(&self) -> &[ServiceKind] {
        &self.services
    }

    /// Stops every dispatcher, waiting for in-flight messages.
    pub async fn shutdown(self) {
        for dispatcher in self.dispatchers {
            let queue = dispatcher.queue().to_string();
            if let Err(e) = dispatcher.shutdown().await {
                tracing::warn!(%queue, error = %e, "dispatcher stopped with an error");
            }
        }
        tracing::info!("node stopped");
    }
}

fn registries<L, C>(
    config: &Config,
    loans: L,
    copies: C,
    caller: &Arc<dyn RpcCaller>,
    hub: &Hub,
    clock: &SharedClock,
) -> QueueHandlers
where
    L: LoanStore + Clone + 'static,
    C: BookCopyStore + Clone + 'static,
{
    let mut registries = QueueHandlers::new();
    for service in &config.services {
        match service {
            ServiceKind::Book => registries.extend(
                BookService::new(copies.clone(), hub.book_added.clone(), Some(Arc::clone(caller)))
                    .handlers(),
            ),
            ServiceKind::Patron => registries.push((
                patron::QUEUE,
                PatronService::new(
                    PatronStore::new(),
                    Arc::clone(clock),
                    hub.patron_created.clone(),
                    hub.ongoing_violations.clone(),
                )
                .handlers(),
            )),
            ServiceKind::Borrowing => {
                let saga = BorrowingSaga::new(
                    loans.clone(),
                    RpcBookCopyService::new(Arc::clone(caller)),
                    RpcPatronDirectory::new(Arc::clone(caller)),
                    Arc::clone(clock),
                    config.saga_options(),
                );
                let service = LoanService::new(saga, RpcReturnNotifier::new(Arc::clone(caller)));
                registries.push((borrowing::QUEUE, borrowing::handlers(Arc::new(service))));
            }
            ServiceKind::Fine => registries.extend(
                FineService::new(FineStore::new(), config.fine_rate_per_day, Arc::clone(clock))
                    .handlers(),
            ),
        }
    }
    registries
}
