use crate::core::{FactoryError, Result, Row, TableSchema, Value};
use std::collections::BTreeMap;

/// Rows of one table keyed by primary key.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<Value, Row>,
    next_id: i64,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, pk: &Value) -> Option<&Row> {
        self.rows.get(pk)
    }

    pub fn contains(&self, pk: &Value) -> bool {
        self.rows.contains_key(pk)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&Value, &Row)> {
        self.rows.iter()
    }

    /// Hands out the next autoincrement value.
    pub fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn primary_key_of(&self, row: &Row) -> Result<Value> {
        let idx = self.schema.primary_key_index().ok_or_else(|| {
            FactoryError::ConstraintViolation(format!(
                "Table '{}' has no primary key",
                self.schema.name()
            ))
        })?;
        row.get(idx).cloned().ok_or_else(|| {
            FactoryError::ConstraintViolation(format!(
                "Row for '{}' is missing its primary key column",
                self.schema.name()
            ))
        })
    }

    pub fn insert(&mut self, row: Row) -> Result<Value> {
        let pk = self.primary_key_of(&row)?;
        if pk.is_null() {
            return Err(FactoryError::ConstraintViolation(format!(
                "Primary key of '{}' cannot be NULL",
                self.schema.name()
            )));
        }
        if self.rows.contains_key(&pk) {
            return Err(FactoryError::ConstraintViolation(format!(
                "Duplicate primary key {} in table '{}'",
                pk,
                self.schema.name()
            )));
        }

        // Explicit ids push the counter forward so later allocations never collide.
        if let Value::Integer(id) = pk {
            if id >= self.next_id {
                self.next_id = id + 1;
            }
        }

        self.rows.insert(pk.clone(), row);
        Ok(pk)
    }

    pub fn update(&mut self, pk: &Value, row: Row) -> Result<Row> {
        let new_pk = self.primary_key_of(&row)?;
        if &new_pk != pk {
            return Err(FactoryError::ConstraintViolation(format!(
                "Primary key of '{}' cannot change ({} -> {})",
                self.schema.name(),
                pk,
                new_pk
            )));
        }
        match self.rows.get_mut(pk) {
            Some(existing) => Ok(std::mem::replace(existing, row)),
            None => Err(FactoryError::ObjectDeleted(format!(
                "{}({})",
                self.schema.name(),
                pk
            ))),
        }
    }

    pub fn delete(&mut self, pk: &Value) -> Option<Row> {
        self.rows.remove(pk)
    }

    /// Primary keys of rows whose `column` equals `value`.
    pub fn find_by(&self, column: &str, value: &Value) -> Vec<Value> {
        let Some(idx) = self.schema.find_column_index(column) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter(|(_, row)| row.get(idx) == Some(value))
            .map(|(pk, _)| pk.clone())
            .collect()
    }
}
