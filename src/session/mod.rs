// ============================================================================
// Session contract
// ============================================================================
//
// The lifecycle manager talks to persistence only through `Session`. The
// contract follows a unit-of-work ORM session: objects are staged with
// add/merge/delete, written by flush, made durable by commit, and everything
// the session currently knows lives in its identity map.
//
// ============================================================================

pub mod memory;

pub use memory::{MemorySession, SessionStats};

use crate::core::Result;
use crate::model::Model;
use async_trait::async_trait;

#[async_trait]
pub trait Session: Send + Sync {
    /// True when writes need an explicit `begin()` first.
    fn requires_explicit_begin(&self) -> bool;

    async fn begin(&self) -> Result<()>;

    /// Discards the open transaction and everything staged. Never fails just
    /// because no transaction is open.
    async fn rollback(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    /// Writes staged work into the open transaction without finalizing it.
    async fn flush(&self) -> Result<()>;

    /// Stages a transient instance (and its transient relations) as new.
    async fn add(&self, model: &Model) -> Result<()>;

    async fn add_all(&self, models: &[Model]) -> Result<()> {
        for model in models {
            self.add(model).await?;
        }
        Ok(())
    }

    /// Reconciles `model` against persisted state by primary key and returns
    /// the canonical instance.
    async fn merge(&self, model: &Model) -> Result<Model>;

    /// Stages removal of a persistent instance.
    async fn delete(&self, model: &Model) -> Result<()>;

    /// Reloads the instance's fields from the current transaction view.
    async fn refresh(&self, model: &Model) -> Result<()>;

    /// Snapshot of the live identity map, oldest entry first.
    async fn identity_map(&self) -> Result<Vec<Model>>;

    /// Whether this exact instance is in the identity map.
    async fn contains(&self, model: &Model) -> Result<bool>;

    /// Instances staged by `add` and not yet flushed.
    async fn new_models(&self) -> Result<Vec<Model>>;
}
