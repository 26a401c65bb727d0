use crate::core::{Result, Value};
use crate::model::{Args, Model, Produced};
use crate::registry::Method;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Wraps `factory` so each invocation receives the next value of a counter
/// starting at `start`. Useful for unique names and emails.
///
/// The counter advances only when the factory succeeds. It stays locked for
/// the whole call, so concurrent callers never see the same value.
pub fn autoincrement<F, P>(start: i64, factory: F) -> Method
where
    F: Fn(&Args, i64) -> Result<P> + Send + Sync + 'static,
    P: Into<Produced>,
{
    let counter = Mutex::new(start);
    Method::new(move |args| {
        let mut current = counter.lock()?;
        let produced = factory(args, *current)?;
        *current += 1;
        Ok(produced)
    })
}

/// A factory for `table` built from a function returning the row's fields.
pub fn for_model<F>(table: impl Into<String>, fields: F) -> Method
where
    F: Fn(&Args) -> Result<BTreeMap<String, Value>> + Send + Sync + 'static,
{
    let table = table.into();
    Method::new(move |args| Ok(Model::from_fields(table.clone(), fields(args)?)))
}
