use super::Table;
use crate::core::{FactoryError, ForeignKey, Result, Row, TableSchema};
use crate::transaction::Change;
use std::collections::BTreeMap;

/// A set of tables. The committed store and every transaction's working copy
/// are both `InMemoryStorage` values.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    tables: BTreeMap<String, Table>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        schema.validate()?;
        let name = schema.name().to_string();
        if self.tables.contains_key(&name) {
            return Err(FactoryError::TableExists(name));
        }

        for fk in schema.foreign_keys() {
            let target_schema = if fk.references_table == name {
                &schema
            } else {
                self.schema(&fk.references_table)?
            };
            if target_schema.find_column_index(&fk.references_column).is_none() {
                return Err(FactoryError::ColumnNotFound(
                    fk.references_column.clone(),
                    fk.references_table.clone(),
                ));
            }
        }

        self.tables.insert(name, Table::new(schema));
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| FactoryError::TableNotFound(name.to_string()))
    }

    pub fn get_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| FactoryError::TableNotFound(name.to_string()))
    }

    pub fn schema(&self, name: &str) -> Result<&TableSchema> {
        self.get_table(name).map(Table::schema)
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn row_count(&self, name: &str) -> Result<usize> {
        self.get_table(name).map(Table::row_count)
    }

    /// Foreign keys, on any table, that point at `table`.
    pub fn referencing(&self, table: &str) -> Vec<(String, ForeignKey)> {
        self.tables
            .iter()
            .flat_map(|(child, t)| {
                t.schema()
                    .foreign_keys()
                    .iter()
                    .filter(|fk| fk.references_table == table)
                    .map(move |fk| (child.clone(), fk.clone()))
            })
            .collect()
    }

    /// Every non-NULL foreign key value of `row` must name an existing row.
    pub fn check_references(&self, table: &str, row: &Row) -> Result<()> {
        let schema = self.schema(table)?;
        for fk in schema.foreign_keys() {
            let Some(idx) = schema.find_column_index(&fk.column) else {
                continue;
            };
            let value = &row[idx];
            if value.is_null() {
                continue;
            }

            let target = self.get_table(&fk.references_table)?;
            let exists = match target.schema().primary_key() {
                Some(pk) if pk.name == fk.references_column => target.contains(value),
                _ => !target.find_by(&fk.references_column, value).is_empty(),
            };
            if !exists {
                return Err(FactoryError::ConstraintViolation(format!(
                    "{}.{} references non-existent key {} in '{}'",
                    table, fk.column, value, fk.references_table
                )));
            }
        }
        Ok(())
    }

    /// Replays one recorded change. Used when a transaction commits.
    pub fn apply(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::InsertRow { table, row } => {
                self.get_table_mut(table)?.insert(row.clone())?;
            }
            Change::UpdateRow {
                table, pk, new_row, ..
            } => {
                self.get_table_mut(table)?.update(pk, new_row.clone())?;
            }
            Change::DeleteRow { table, pk, .. } => {
                self.get_table_mut(table)?.delete(pk);
            }
        }
        Ok(())
    }
}
