use super::Session;
use crate::core::{FactoryError, ForeignKey, OnDelete, Result, Row, TableSchema, Value};
use crate::model::{InstanceId, Model, ModelKey, ModelState};
use crate::storage::Database;
use crate::transaction::{Change, Transaction, Undo};
use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Counters for what a session has done; tests assert on these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub begins: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub flushes: u64,
}

#[derive(Debug)]
struct IdentityEntry {
    model: Model,
    seq: u64,
}

#[derive(Debug, Default)]
struct SessionState {
    txn: Option<Transaction>,
    identity: HashMap<ModelKey, IdentityEntry>,
    next_seq: u64,
    pending: Vec<Model>,
    deleted: Vec<Model>,
    stats: SessionStats,
}

/// Unit-of-work session over a [`Database`].
///
/// Clones share one session state, the same way an ORM session object is
/// shared between a fixture and the code under test.
#[derive(Clone)]
pub struct MemorySession {
    db: Database,
    state: Arc<Mutex<SessionState>>,
    explicit_begin: bool,
}

impl MemorySession {
    /// Session that begins transactions implicitly on the first write.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            state: Arc::new(Mutex::new(SessionState::default())),
            explicit_begin: false,
        }
    }

    /// Session that refuses writes until `begin()` is called.
    pub fn with_explicit_begin(db: Database) -> Self {
        Self {
            explicit_begin: true,
            ..Self::new(db)
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn stats(&self) -> SessionStats {
        self.state.lock().await.stats
    }

    pub async fn in_transaction(&self) -> bool {
        self.state.lock().await.txn.is_some()
    }

    /// All rows of `table` visible to this session, as identity-mapped
    /// instances. Staged work is flushed first.
    pub async fn query_all(&self, table: &str) -> Result<Vec<Model>> {
        let mut state = self.state.lock().await;
        if !state.pending.is_empty() || !state.deleted.is_empty() {
            self.flush_locked(&mut state).await?;
        }

        let (schema, rows) = self.table_view(&state, table).await?;
        let mut models = Vec::with_capacity(rows.len());
        for (pk, row) in rows {
            let key = ModelKey::new(table, pk);
            let known = state.identity.get(&key).map(|entry| entry.model.clone());
            let model = match known {
                Some(model) => model,
                None => {
                    let model = Model::from_fields(table, schema.fields_from_row(&row));
                    state.remember(key, model.clone());
                    model
                }
            };
            models.push(model);
        }
        Ok(models)
    }

    pub async fn count(&self, table: &str) -> Result<usize> {
        Ok(self.query_all(table).await?.len())
    }

    /// Rolls back and forgets every instance.
    pub async fn close(&self) -> Result<()> {
        self.rollback().await?;
        let mut state = self.state.lock().await;
        for (_, entry) in state.identity.drain() {
            entry.model.set_state(ModelState::Transient);
        }
        Ok(())
    }

    async fn begin_locked(&self, state: &mut SessionState) {
        let txn = Transaction::new(self.db.snapshot().await);
        debug!("session began {}", txn.id());
        state.txn = Some(txn);
        state.stats.begins += 1;
    }

    async fn ensure_transaction(&self, state: &mut SessionState) -> Result<()> {
        if state.txn.is_some() {
            return Ok(());
        }
        if self.explicit_begin {
            return Err(FactoryError::Transaction(
                "no transaction is active; call begin() first".into(),
            ));
        }
        self.begin_locked(state).await;
        Ok(())
    }

    async fn flush_locked(&self, state: &mut SessionState) -> Result<()> {
        if state.txn.is_none() {
            if state.pending.is_empty()
                && state.deleted.is_empty()
                && !self.has_dirty(state).await?
            {
                return Ok(());
            }
            self.ensure_transaction(state).await?;
        }

        state.flush()?;
        state.stats.flushes += 1;
        Ok(())
    }

    /// Dirty check against committed data, used only outside a transaction.
    async fn has_dirty(&self, state: &SessionState) -> Result<bool> {
        if state.identity.is_empty() {
            return Ok(false);
        }
        let committed = self.db.snapshot().await;
        for (key, entry) in &state.identity {
            let table = committed.get_table(&key.table)?;
            let current = table.get(&key.pk);
            let fields = fields_with_relation_keys(table.schema(), &entry.model);
            let dirty = table
                .schema()
                .row_from_fields(&fields)
                .map_or(true, |row| current != Some(&row));
            if dirty {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn schema_for(&self, state: &SessionState, table: &str) -> Result<TableSchema> {
        match &state.txn {
            Some(txn) => txn.working().schema(table).cloned(),
            None => self.db.schema(table).await,
        }
    }

    async fn row_for(&self, state: &SessionState, table: &str, pk: &Value) -> Result<Option<Row>> {
        match &state.txn {
            Some(txn) => Ok(txn.working().get_table(table)?.get(pk).cloned()),
            None => self.db.row(table, pk).await,
        }
    }

    async fn table_view(
        &self,
        state: &SessionState,
        table: &str,
    ) -> Result<(TableSchema, Vec<(Value, Row)>)> {
        let collect = |t: &crate::storage::Table| {
            (
                t.schema().clone(),
                t.rows()
                    .map(|(pk, row)| (pk.clone(), row.clone()))
                    .collect::<Vec<_>>(),
            )
        };
        match &state.txn {
            Some(txn) => Ok(collect(txn.working().get_table(table)?)),
            None => {
                let snapshot = self.db.snapshot().await;
                Ok(collect(snapshot.get_table(table)?))
            }
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    fn requires_explicit_begin(&self) -> bool {
        self.explicit_begin
    }

    async fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.txn.is_some() {
            return Err(FactoryError::Transaction(
                "a transaction is already in progress".into(),
            ));
        }
        self.begin_locked(&mut state).await;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.stats.rollbacks += 1;

        for model in std::mem::take(&mut state.pending) {
            model.set_state(ModelState::Transient);
        }
        state.deleted.clear();

        if let Some(txn) = state.txn.take() {
            debug!("session rolled back {}", txn.id());
            for undo in txn.into_undo() {
                match undo {
                    Undo::Inserted(key) => {
                        if let Some(entry) = state.identity.remove(&key) {
                            entry.model.set_state(ModelState::Transient);
                        }
                    }
                    Undo::Deleted { key, model, seq } => {
                        model.set_state(ModelState::Persistent);
                        state.identity.insert(key, IdentityEntry { model, seq });
                    }
                }
            }
        }

        // Whatever survives must look like the committed row again.
        let committed = self.db.snapshot().await;
        let mut gone = Vec::new();
        for (key, entry) in &state.identity {
            let table = committed.get_table(&key.table)?;
            match table.get(&key.pk) {
                Some(row) => entry
                    .model
                    .replace_fields(table.schema().fields_from_row(row)),
                None => gone.push(key.clone()),
            }
        }
        for key in gone {
            if let Some(entry) = state.identity.remove(&key) {
                entry.model.set_state(ModelState::Transient);
            }
        }
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await?;

        let Some(txn) = state.txn.take() else {
            return Ok(());
        };
        if let Err(err) = self.db.apply(txn.changes()).await {
            state.txn = Some(txn);
            return Err(err);
        }
        debug!(
            "session committed {} ({} changes)",
            txn.id(),
            txn.changes().len()
        );
        state.stats.commits += 1;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    async fn add(&self, model: &Model) -> Result<()> {
        let mut state = self.state.lock().await;
        state.add_model(model)
    }

    async fn merge(&self, model: &Model) -> Result<Model> {
        let mut state = self.state.lock().await;
        if model.state() == ModelState::Pending || state.seq_of(model).is_some() {
            return Ok(model.clone());
        }

        let table = model.table();
        let schema = self.schema_for(&state, &table).await?;
        let pk_column = schema
            .primary_key()
            .map(|column| column.name.clone())
            .ok_or_else(|| {
                FactoryError::ConstraintViolation(format!("Table '{}' has no primary key", table))
            })?;

        let pk = model.get(&pk_column);
        if !pk.is_null() {
            let key = ModelKey::new(table.clone(), pk.clone());
            let known = state.identity.get(&key).map(|entry| entry.model.clone());
            if let Some(canonical) = known {
                copy_onto(model, &canonical);
                stage_relations(&mut state, &canonical)?;
                return Ok(canonical);
            }
            // staged earlier in this unit of work, not yet flushed
            if let Some(canonical) = state.pending_with_key(&table, &pk_column, &pk) {
                copy_onto(model, &canonical);
                stage_relations(&mut state, &canonical)?;
                return Ok(canonical);
            }
            if let Some(row) = self.row_for(&state, &table, &pk).await? {
                let canonical = Model::from_fields(table, schema.fields_from_row(&row));
                state.remember(key, canonical.clone());
                copy_onto(model, &canonical);
                stage_relations(&mut state, &canonical)?;
                return Ok(canonical);
            }
        }

        let copy = model.detached_copy();
        state.add_model(&copy)?;
        Ok(copy)
    }

    async fn delete(&self, model: &Model) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.seq_of(model).is_none() {
            return Err(match model.state() {
                ModelState::Deleted => FactoryError::ObjectDeleted(describe(model)),
                _ => FactoryError::NotPersisted(describe(model)),
            });
        }
        if !state.is_staged_for_delete(model) {
            state.deleted.push(model.clone());
        }
        Ok(())
    }

    async fn refresh(&self, model: &Model) -> Result<()> {
        let state = self.state.lock().await;
        let key = state
            .identity_key_of(model)
            .ok_or_else(|| FactoryError::NotPersisted(describe(model)))?;
        let schema = self.schema_for(&state, &key.table).await?;
        let row = self
            .row_for(&state, &key.table, &key.pk)
            .await?
            .ok_or_else(|| FactoryError::ObjectDeleted(key.to_string()))?;
        model.replace_fields(schema.fields_from_row(&row));
        Ok(())
    }

    async fn identity_map(&self) -> Result<Vec<Model>> {
        let state = self.state.lock().await;
        let mut entries: Vec<&IdentityEntry> = state.identity.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        Ok(entries.into_iter().map(|entry| entry.model.clone()).collect())
    }

    async fn contains(&self, model: &Model) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.seq_of(model).is_some())
    }

    async fn new_models(&self) -> Result<Vec<Model>> {
        let state = self.state.lock().await;
        Ok(state.pending.clone())
    }
}

impl SessionState {
    fn txn_ref(&self) -> Result<&Transaction> {
        self.txn
            .as_ref()
            .ok_or_else(|| FactoryError::Transaction("no transaction is active".into()))
    }

    fn txn_mut(&mut self) -> Result<&mut Transaction> {
        self.txn
            .as_mut()
            .ok_or_else(|| FactoryError::Transaction("no transaction is active".into()))
    }

    fn remember(&mut self, key: ModelKey, model: Model) {
        let seq = self.next_seq;
        self.next_seq += 1;
        model.set_state(ModelState::Persistent);
        self.identity.insert(key, IdentityEntry { model, seq });
    }

    fn seq_of(&self, model: &Model) -> Option<u64> {
        self.identity
            .values()
            .find(|entry| entry.model.same_instance(model))
            .map(|entry| entry.seq)
    }

    fn identity_key_of(&self, model: &Model) -> Option<ModelKey> {
        self.identity
            .iter()
            .find(|(_, entry)| entry.model.same_instance(model))
            .map(|(key, _)| key.clone())
    }

    fn pending_with_key(&self, table: &str, pk_column: &str, pk: &Value) -> Option<Model> {
        self.pending
            .iter()
            .find(|pending| pending.table() == table && pending.get(pk_column) == *pk)
            .cloned()
    }

    fn is_staged_for_delete(&self, model: &Model) -> bool {
        self.deleted.iter().any(|staged| staged.same_instance(model))
    }

    fn add_model(&mut self, model: &Model) -> Result<()> {
        match model.state() {
            ModelState::Pending => Ok(()),
            ModelState::Persistent => {
                self.deleted.retain(|staged| !staged.same_instance(model));
                Ok(())
            }
            ModelState::Deleted => Err(FactoryError::ObjectDeleted(describe(model))),
            ModelState::Transient => {
                model.set_state(ModelState::Pending);
                self.pending.push(model.clone());
                for (_, related) in model.relations() {
                    if related.state() == ModelState::Transient {
                        self.add_model(&related)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Inserts, then updates, then deletes, all into the open transaction.
    fn flush(&mut self) -> Result<()> {
        // save-update cascade from instances the session already holds
        let known: Vec<Model> = self.identity.values().map(|entry| entry.model.clone()).collect();
        for model in &known {
            stage_relations(self, model)?;
        }

        let queue = self.pending.clone();
        let mut visiting = HashSet::new();
        for model in &queue {
            self.insert_pending(model, &mut visiting)?;
        }

        self.write_dirty()?;

        let mut staged = std::mem::take(&mut self.deleted);
        // newest first, so dependents go before what they reference
        staged.sort_by_key(|model| std::cmp::Reverse(self.seq_of(model)));
        while let Some(model) = staged.first().cloned() {
            if let Some(key) = self.identity_key_of(&model) {
                if let Err(err) = self.delete_row(&key.table, &key.pk) {
                    self.deleted = staged;
                    return Err(err);
                }
            }
            staged.remove(0);
        }
        Ok(())
    }

    fn insert_pending(&mut self, model: &Model, visiting: &mut HashSet<InstanceId>) -> Result<()> {
        if model.state() != ModelState::Pending {
            return Ok(());
        }
        if !visiting.insert(model.instance_id()) {
            return Err(FactoryError::ConstraintViolation(format!(
                "circular relation while flushing {}",
                describe(model)
            )));
        }

        for (_, related) in model.relations() {
            if related.state() == ModelState::Transient {
                self.add_model(&related)?;
            }
            self.insert_pending(&related, visiting)?;
        }

        let table = model.table();
        let txn = self.txn_mut()?;
        let schema = txn.working().schema(&table)?.clone();
        resolve_relation_keys(&schema, model)?;

        if let Some(pk) = schema.primary_key() {
            if pk.autoincrement && model.get(&pk.name).is_null() {
                let id = txn.working_mut().get_table_mut(&table)?.allocate_id();
                model.set(pk.name.clone(), id);
            }
        }

        let row = schema.row_from_fields(&model.fields())?;
        txn.working().check_references(&table, &row)?;
        let pk = txn.working_mut().get_table_mut(&table)?.insert(row.clone())?;
        txn.record(Change::InsertRow {
            table: table.clone(),
            row,
        });

        let key = ModelKey::new(table, pk);
        txn.note_inserted(key.clone());
        self.pending.retain(|pending| !pending.same_instance(model));
        self.remember(key, model.clone());
        Ok(())
    }

    fn write_dirty(&mut self) -> Result<()> {
        let entries: Vec<(ModelKey, Model)> = self
            .identity
            .iter()
            .map(|(key, entry)| (key.clone(), entry.model.clone()))
            .collect();

        for (key, model) in entries {
            if self.is_staged_for_delete(&model) {
                continue;
            }
            let txn = self.txn_mut()?;
            let schema = txn.working().schema(&key.table)?.clone();
            resolve_relation_keys(&schema, &model)?;
            let row = schema.row_from_fields(&model.fields())?;

            let Some(current) = txn.working().get_table(&key.table)?.get(&key.pk).cloned() else {
                continue;
            };
            if current == row {
                continue;
            }

            txn.working().check_references(&key.table, &row)?;
            let old_row = txn
                .working_mut()
                .get_table_mut(&key.table)?
                .update(&key.pk, row.clone())?;
            txn.record(Change::UpdateRow {
                table: key.table.clone(),
                pk: key.pk.clone(),
                old_row,
                new_row: row,
            });
        }
        Ok(())
    }

    /// Deletes one row and applies ON DELETE rules to rows referencing it.
    /// The whole cascade is checked before anything is written.
    fn delete_row(&mut self, table: &str, pk: &Value) -> Result<()> {
        let mut plan = DeletePlan::default();
        self.plan_delete(table, pk, &mut plan)?;

        for (table, pk) in plan.deletes {
            self.remove_row(&table, &pk)?;
        }
        for (table, pk, fk) in plan.nulls {
            self.null_out(&table, &pk, &fk)?;
        }
        Ok(())
    }

    fn plan_delete(&self, table: &str, pk: &Value, plan: &mut DeletePlan) -> Result<()> {
        if plan.contains(table, pk) {
            return Ok(());
        }
        let working = self.txn_ref()?.working();
        let schema = working.schema(table)?;
        let Some(row) = working.get_table(table)?.get(pk) else {
            return Ok(());
        };
        plan.deletes.push((table.to_string(), pk.clone()));

        for (child_table, fk) in working.referencing(table) {
            let Some(idx) = schema.find_column_index(&fk.references_column) else {
                continue;
            };
            let target = &row[idx];
            if target.is_null() {
                continue;
            }
            let child_schema = working.schema(&child_table)?;
            for child_pk in working.get_table(&child_table)?.find_by(&fk.column, target) {
                if plan.contains(&child_table, &child_pk) {
                    continue;
                }
                match fk.on_delete {
                    OnDelete::Restrict => {
                        return Err(FactoryError::ConstraintViolation(format!(
                            "delete of {}({}) violates foreign key constraint from {}.{}",
                            table, pk, child_table, fk.column
                        )));
                    }
                    OnDelete::Cascade => self.plan_delete(&child_table, &child_pk, plan)?,
                    OnDelete::SetNull => {
                        if let Some(column) = child_schema.get_column(&fk.column) {
                            column.validate(&Value::Null)?;
                        }
                        plan.nulls.push((child_table.clone(), child_pk, fk.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    fn remove_row(&mut self, table: &str, pk: &Value) -> Result<()> {
        let txn = self.txn_mut()?;
        let Some(old_row) = txn.working_mut().get_table_mut(table)?.delete(pk) else {
            return Ok(());
        };
        txn.record(Change::DeleteRow {
            table: table.to_string(),
            pk: pk.clone(),
            old_row,
        });

        let key = ModelKey::new(table, pk.clone());
        if let Some(entry) = self.identity.remove(&key) {
            entry.model.set_state(ModelState::Deleted);
            self.deleted
                .retain(|staged| !staged.same_instance(&entry.model));
            self.txn_mut()?.note_deleted(key, entry.model, entry.seq);
        }
        Ok(())
    }

    fn null_out(&mut self, table: &str, pk: &Value, fk: &ForeignKey) -> Result<()> {
        let txn = self.txn_mut()?;
        let Some(idx) = txn.working().schema(table)?.find_column_index(&fk.column) else {
            return Ok(());
        };
        // cascaded away by another path
        let Some(old_row) = txn.working().get_table(table)?.get(pk).cloned() else {
            return Ok(());
        };

        let mut new_row = old_row.clone();
        new_row[idx] = Value::Null;
        txn.working_mut()
            .get_table_mut(table)?
            .update(pk, new_row.clone())?;
        txn.record(Change::UpdateRow {
            table: table.to_string(),
            pk: pk.clone(),
            old_row,
            new_row,
        });

        if let Some(entry) = self.identity.get(&ModelKey::new(table, pk.clone())) {
            entry.model.set(fk.column.clone(), Value::Null);
            if let Some(relation) = &fk.relation {
                entry.model.unrelate(relation);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct DeletePlan {
    deletes: Vec<(String, Value)>,
    nulls: Vec<(String, Value, ForeignKey)>,
}

impl DeletePlan {
    fn contains(&self, table: &str, pk: &Value) -> bool {
        self.deletes.iter().any(|(t, p)| t == table && p == pk)
    }
}

/// Copies foreign-key values from related instances onto `model`.
fn resolve_relation_keys(schema: &TableSchema, model: &Model) -> Result<()> {
    for fk in schema.foreign_keys() {
        let Some(relation) = &fk.relation else {
            continue;
        };
        let Some(related) = model.relation(relation) else {
            continue;
        };
        let value = related.get(&fk.references_column);
        if value.is_null() {
            return Err(FactoryError::ConstraintViolation(format!(
                "relation '{}' of {} points at an instance without '{}'",
                relation,
                describe(model),
                fk.references_column
            )));
        }
        model.set(fk.column.clone(), value);
    }
    Ok(())
}

/// Field map as a flush would write it, without touching the model.
fn fields_with_relation_keys(schema: &TableSchema, model: &Model) -> BTreeMap<String, Value> {
    let mut fields = model.fields();
    for fk in schema.foreign_keys() {
        let related = fk.relation.as_deref().and_then(|name| model.relation(name));
        if let Some(related) = related {
            let value = related.get(&fk.references_column);
            if !value.is_null() {
                fields.insert(fk.column.clone(), value);
            }
        }
    }
    fields
}

fn copy_onto(source: &Model, target: &Model) {
    for (field, value) in source.fields() {
        target.set(field, value);
    }
    for (name, related) in source.relations() {
        target.relate(name, &related);
    }
}

fn stage_relations(state: &mut SessionState, model: &Model) -> Result<()> {
    for (_, related) in model.relations() {
        if related.state() == ModelState::Transient {
            state.add_model(&related)?;
        }
    }
    Ok(())
}

fn describe(model: &Model) -> String {
    format!("{} {}", model.table(), model.instance_id())
}
