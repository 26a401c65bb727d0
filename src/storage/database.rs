use super::InMemoryStorage;
use crate::core::{Result, Row, TableSchema, Value};
use crate::transaction::Change;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared committed store. Clones point at the same tables, so a test can keep
/// one handle to inspect what actually got committed while sessions write.
#[derive(Clone, Default)]
pub struct Database {
    storage: Arc<RwLock<InMemoryStorage>>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_table(&self, schema: TableSchema) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.create_table(schema)
    }

    /// Creates every table in a JSON array of schemas, in order, so a table
    /// may reference any table listed before it.
    pub async fn create_tables_from_json(&self, json: &str) -> Result<()> {
        let schemas: Vec<TableSchema> = serde_json::from_str(json)?;
        for schema in schemas {
            self.create_table(schema).await?;
        }
        Ok(())
    }

    pub async fn schema(&self, table: &str) -> Result<TableSchema> {
        let storage = self.storage.read().await;
        storage.schema(table).cloned()
    }

    pub async fn table_names(&self) -> Vec<String> {
        self.storage.read().await.table_names()
    }

    pub async fn row_count(&self, table: &str) -> Result<usize> {
        self.storage.read().await.row_count(table)
    }

    pub async fn row(&self, table: &str, pk: &Value) -> Result<Option<Row>> {
        let storage = self.storage.read().await;
        Ok(storage.get_table(table)?.get(pk).cloned())
    }

    /// Committed rows of `table` as field maps, in primary-key order.
    pub async fn rows(&self, table: &str) -> Result<Vec<BTreeMap<String, Value>>> {
        let storage = self.storage.read().await;
        let table = storage.get_table(table)?;
        Ok(table
            .rows()
            .map(|(_, row)| table.schema().fields_from_row(row))
            .collect())
    }

    /// Copy of the committed state; a transaction starts from this.
    pub async fn snapshot(&self) -> InMemoryStorage {
        self.storage.read().await.clone()
    }

    /// Applies a committed change log atomically: either every change lands
    /// or the store is left untouched.
    pub async fn apply(&self, changes: &[Change]) -> Result<()> {
        let mut storage = self.storage.write().await;
        let mut next = storage.clone();
        for change in changes {
            next.apply(change)?;
        }
        for change in changes {
            if let Change::InsertRow { table, row } | Change::UpdateRow { table, new_row: row, .. } =
                change
            {
                // the row may have been deleted later in the same log
                let pk = next.get_table(table)?.primary_key_of(row)?;
                if let Some(current) = next.get_table(table)?.get(&pk).cloned() {
                    next.check_references(table, &current)?;
                }
            }
        }
        *storage = next;
        Ok(())
    }
}
