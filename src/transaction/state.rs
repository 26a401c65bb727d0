// ============================================================================
// Session Transaction State
// ============================================================================
//
// A transaction owns a working copy of the committed tables. Reads inside the
// transaction see committed data plus its own flushed changes. The undo log
// lets a rollback put the session's identity map back the way it was; it is
// replayed newest-first, so a key deleted and then re-inserted ends up
// pointing at the instance it held before the transaction.
//
// ============================================================================

use super::Change;
use crate::model::{Model, ModelKey};
use crate::storage::InMemoryStorage;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// One identity-map edit made while flushing, in the order it happened.
#[derive(Debug, Clone)]
pub enum Undo {
    /// A row was inserted and its instance entered the identity map.
    Inserted(ModelKey),
    /// A row was deleted; `seq` is the instance's original insertion order.
    Deleted { key: ModelKey, model: Model, seq: u64 },
}

#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    working: InMemoryStorage,
    changes: Vec<Change>,
    undo: Vec<Undo>,
}

impl Transaction {
    pub fn new(working: InMemoryStorage) -> Self {
        Self {
            id: TransactionId::new(),
            working,
            changes: Vec::new(),
            undo: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn working(&self) -> &InMemoryStorage {
        &self.working
    }

    pub fn working_mut(&mut self) -> &mut InMemoryStorage {
        &mut self.working
    }

    pub fn record(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn note_inserted(&mut self, key: ModelKey) {
        self.undo.push(Undo::Inserted(key));
    }

    pub fn note_deleted(&mut self, key: ModelKey, model: Model, seq: u64) {
        self.undo.push(Undo::Deleted { key, model, seq });
    }

    /// Consumes the transaction, returning its undo log newest-first.
    pub fn into_undo(self) -> impl Iterator<Item = Undo> {
        self.undo.into_iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_ids_are_unique() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
        assert!(a.to_string().starts_with("txn_"));
    }

    #[test]
    fn test_undo_log_replays_newest_first() {
        let mut txn = Transaction::new(InMemoryStorage::new());
        let key = ModelKey::new("bar", crate::core::Value::Integer(5));
        txn.note_deleted(key.clone(), Model::new("bar"), 0);
        txn.note_inserted(key.clone());

        let undo: Vec<Undo> = txn.into_undo().collect();
        assert!(matches!(&undo[0], Undo::Inserted(k) if *k == key));
        assert!(matches!(&undo[1], Undo::Deleted { seq: 0, .. }));
    }
}
