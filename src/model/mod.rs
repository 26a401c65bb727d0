// ============================================================================
// Model handles
// ============================================================================
//
// A `Model` is the in-process stand-in for an ORM-mapped instance. Clones share
// one record, so a session can refresh or merge into the very object a test
// holds. Identity is the `InstanceId`, never the field values.
//
// ============================================================================

pub mod args;

pub use args::{Arg, Args};

use crate::core::{FactoryError, Result, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an instance stands relative to the session that knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Transient,
    Pending,
    Persistent,
    Deleted,
}

/// Identity-map key: table plus primary key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub table: String,
    pub pk: Value,
}

impl ModelKey {
    pub fn new(table: impl Into<String>, pk: Value) -> Self {
        Self {
            table: table.into(),
            pk,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.table, self.pk)
    }
}

#[derive(Debug)]
struct Record {
    table: String,
    fields: BTreeMap<String, Value>,
    relations: BTreeMap<String, Model>,
    state: ModelState,
}

#[derive(Clone)]
pub struct Model {
    id: InstanceId,
    record: Arc<RwLock<Record>>,
}

impl Model {
    pub fn new(table: impl Into<String>) -> Self {
        Self::from_fields(table, BTreeMap::new())
    }

    pub fn from_fields(table: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            id: InstanceId::next(),
            record: Arc::new(RwLock::new(Record {
                table: table.into(),
                fields,
                relations: BTreeMap::new(),
                state: ModelState::Transient,
            })),
        }
    }

    pub fn with(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn with_relation(self, name: impl Into<String>, related: &Model) -> Self {
        self.relate(name, related);
        self
    }

    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    pub fn same_instance(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }

    pub fn table(&self) -> String {
        self.read().table.clone()
    }

    pub fn state(&self) -> ModelState {
        self.read().state
    }

    /// Field value, `Value::Null` when unset.
    pub fn get(&self, field: &str) -> Value {
        self.read().fields.get(field).cloned().unwrap_or(Value::Null)
    }

    pub fn get_i64(&self, field: &str) -> Result<i64> {
        self.get(field)
            .expect_i64(&format!("{}.{}", self.table(), field))
    }

    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        self.write().fields.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> BTreeMap<String, Value> {
        self.read().fields.clone()
    }

    pub fn relate(&self, name: impl Into<String>, related: &Model) {
        self.write().relations.insert(name.into(), related.clone());
    }

    pub fn unrelate(&self, name: &str) -> Option<Model> {
        self.write().relations.remove(name)
    }

    pub fn relation(&self, name: &str) -> Option<Model> {
        self.read().relations.get(name).cloned()
    }

    pub fn relations(&self) -> Vec<(String, Model)> {
        self.read()
            .relations
            .iter()
            .map(|(name, model)| (name.clone(), model.clone()))
            .collect()
    }

    /// A new transient instance with the same table, fields and relations.
    pub fn detached_copy(&self) -> Model {
        let record = self.read();
        let copy = Model::from_fields(record.table.clone(), record.fields.clone());
        copy.write().relations = record.relations.clone();
        copy
    }

    pub(crate) fn set_state(&self, state: ModelState) {
        self.write().state = state;
    }

    pub(crate) fn replace_fields(&self, fields: BTreeMap<String, Value>) {
        self.write().fields = fields;
    }

    // A poisoned record only means a panic happened mid-write of plain data;
    // the map itself is still coherent.
    fn read(&self) -> RwLockReadGuard<'_, Record> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Record> {
        self.record.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.read();
        f.debug_struct("Model")
            .field("id", &self.id)
            .field("table", &record.table)
            .field("state", &record.state)
            .field("fields", &record.fields)
            .field("relations", &record.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// What a factory hands back: one instance or an ordered batch.
#[derive(Debug, Clone)]
pub enum Produced {
    One(Model),
    Many(Vec<Model>),
}

impl Produced {
    pub fn models(&self) -> Vec<Model> {
        match self {
            Self::One(model) => vec![model.clone()],
            Self::Many(models) => models.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(models) => models.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_one(self) -> Result<Model> {
        match self {
            Self::One(model) => Ok(model),
            Self::Many(models) => Err(FactoryError::Argument(format!(
                "expected a single instance, factory produced {}",
                models.len()
            ))),
        }
    }

    pub fn into_many(self) -> Vec<Model> {
        match self {
            Self::One(model) => vec![model],
            Self::Many(models) => models,
        }
    }

    /// Same shape, elements replaced in order.
    pub(crate) fn with_models(&self, models: Vec<Model>) -> Produced {
        match self {
            Self::One(_) => match models.into_iter().next() {
                Some(model) => Self::One(model),
                None => Self::Many(Vec::new()),
            },
            Self::Many(_) => Self::Many(models),
        }
    }
}

impl From<Model> for Produced {
    fn from(model: Model) -> Self {
        Self::One(model)
    }
}

impl From<Vec<Model>> for Produced {
    fn from(models: Vec<Model>) -> Self {
        Self::Many(models)
    }
}
