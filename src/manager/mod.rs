// ============================================================================
// Lifecycle Manager
// ============================================================================
//
// `ModelFactory` is the entry point: it owns a registry snapshot, the session
// and the scope options, and hands out `Scope`s. A scope wraps every factory
// call in the rollback/attach/flush/commit protocol and sweeps the session on
// exit so nothing produced during a test outlives it.
//
// ============================================================================

pub mod config;
pub mod scope;

pub use config::ScopeOptions;
pub use scope::{Phase, Scope};

use crate::core::{FactoryError, Result};
use crate::namespace::Node;
use crate::registry::{self, Registry};
use crate::session::Session;
use std::future::Future;
use std::sync::Arc;

pub struct ModelFactory {
    registry: Registry,
    session: Arc<dyn Session>,
    options: ScopeOptions,
}

impl ModelFactory {
    pub fn new<S: Session + 'static>(registry: Registry, session: S) -> Self {
        Self::from_arc(registry, Arc::new(session))
    }

    pub fn from_arc(registry: Registry, session: Arc<dyn Session>) -> Self {
        Self {
            registry,
            session,
            options: ScopeOptions::default(),
        }
    }

    /// Uses a snapshot of the process-wide default registry.
    pub fn from_default_registry<S: Session + 'static>(session: S) -> Result<Self> {
        Ok(Self::new(registry::snapshot_default()?, session))
    }

    pub fn with_options(mut self, options: ScopeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ScopeOptions {
        self.options
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn session(&self) -> Arc<dyn Session> {
        Arc::clone(&self.session)
    }

    /// Builds the namespace tree and activates a new scope. Nothing touches
    /// the session until the first call.
    pub async fn enter(&self) -> Scope {
        let root = Node::build(&self.registry);
        let scope = Scope::new(Arc::clone(&self.session), self.options, root);
        scope.activate().await;
        scope
    }

    /// Runs `op` inside a scope and always exits it afterwards. When both the
    /// body and the exit fail, both errors come back in `ScopeFailed`.
    pub async fn with_scope<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = self.enter().await;
        let body = op(scope.clone()).await;

        // the body may have exited on its own
        let cleanup = if scope.phase().await == Phase::Active {
            scope.exit().await
        } else {
            Ok(())
        };

        match (body, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(err), Ok(())) | (Ok(_), Err(err)) => Err(err),
            (Err(body), Err(cleanup)) => Err(FactoryError::ScopeFailed {
                body: Box::new(body),
                cleanup: Box::new(cleanup),
            }),
        }
    }
}

impl std::fmt::Debug for ModelFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelFactory")
            .field("methods", &self.registry.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
