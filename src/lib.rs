// ============================================================================
// model_factory Library
// ============================================================================
//
// Test-data factories for session-backed models. Register factories under
// dotted namespaces, call them inside a scope, and every row they produce is
// swept from the database when the scope exits.
//
// ============================================================================

pub mod core;
pub mod fixtures;
pub mod manager;
pub mod model;
pub mod namespace;
pub mod prelude;
pub mod registry;
pub mod session;
pub mod storage;
pub mod transaction;
pub mod utils;

pub use core::{Column, DataType, FactoryError, ForeignKey, OnDelete, Result, TableSchema, Value};
pub use fixtures::Fixture;
pub use manager::{ModelFactory, Phase, Scope, ScopeOptions};
pub use model::{Arg, Args, InstanceId, Model, ModelKey, ModelState, Produced};
pub use namespace::Namespace;
pub use registry::{CallOptions, Declaration, Method, NamespacePath, Registry, resolve_flag};
pub use session::{MemorySession, Session, SessionStats};
pub use storage::Database;
pub use utils::{autoincrement, for_model};
