//! Test-fixture glue.
//!
//! A `Fixture` bundles the pieces a test needs: a database, a session over
//! it, the registry and the scope options. Override any of them, then `run`
//! the test body inside a scope.

use crate::core::Result;
use crate::manager::{ModelFactory, Scope, ScopeOptions};
use crate::registry::{self, Registry};
use crate::session::MemorySession;
use crate::storage::Database;
use std::future::Future;

#[derive(Clone)]
pub struct Fixture {
    database: Database,
    session: MemorySession,
    registry: Registry,
    options: ScopeOptions,
}

impl Fixture {
    pub fn new(database: Database, registry: Registry) -> Self {
        Self {
            session: MemorySession::new(database.clone()),
            database,
            registry,
            options: ScopeOptions::default(),
        }
    }

    /// Fixture over the process-wide default registry.
    pub fn with_default_registry(database: Database) -> Result<Self> {
        Ok(Self::new(database, registry::snapshot_default()?))
    }

    /// Swap in a session that needs an explicit `begin()`.
    pub fn explicit_begin(mut self) -> Self {
        self.session = MemorySession::with_explicit_begin(self.database.clone());
        self
    }

    pub fn options(mut self, options: ScopeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn session(&self) -> &MemorySession {
        &self.session
    }

    pub fn factory(&self) -> ModelFactory {
        ModelFactory::new(self.registry.clone(), self.session.clone()).with_options(self.options)
    }

    pub async fn run<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = self.factory().with_scope(op).await;
        // the session outlives the scope; leave it clean for the next test
        let closed = self.session.close().await;
        let value = result?;
        closed?;
        Ok(value)
    }
}
