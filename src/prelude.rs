//! Everything a test module usually needs, in one import.
//!
//! ```ignore
//! use model_factory::prelude::*;
//! ```

pub use crate::core::{Column, DataType, FactoryError, ForeignKey, OnDelete, Result, TableSchema, Value};
pub use crate::fixtures::Fixture;
pub use crate::manager::{ModelFactory, Scope, ScopeOptions};
pub use crate::model::{Args, Model, Produced};
pub use crate::registry::{CallOptions, Declaration, Method, Registry};
pub use crate::session::{MemorySession, Session};
pub use crate::storage::Database;
pub use crate::utils::{autoincrement, for_model};
