//! Operation handlers and the registry the dispatcher routes through.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Arguments, HandlerError};

/// Business logic behind one operation name.
///
/// Handlers are invoked concurrently when several dispatchers drain the same
/// queue, so any shared state they touch must be synchronized.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn handle(&self, arguments: Arguments) -> Result<Value, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn handle(&self, arguments: Arguments) -> Result<Value, HandlerError> {
        (self.0)(arguments).await
    }
}

/// Static mapping from operation name to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for `operation`.
    pub fn register(
        &mut self,
        operation: impl Into<String>,
        handler: impl OperationHandler + 'static,
    ) -> &mut Self {
        self.handlers.insert(operation.into(), Arc::new(handler));
        self
    }

    /// Registers an async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, operation: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(operation, FnHandler(f))
    }

    /// Moves every handler of `other` into this registry.
    pub fn merge(&mut self, other: HandlerRegistry) -> &mut Self {
        self.handlers.extend(other.handlers);
        self
    }

    pub fn get(&self, operation: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(operation).cloned()
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("operations", &self.operations())
            .finish()
    }
}
