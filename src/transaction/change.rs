// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Each flush inside an open transaction records what it did to the working
// copy. COMMIT replays the log onto the shared store; ROLLBACK drops it.
//
// ============================================================================

use crate::core::{Row, Value};

#[derive(Debug, Clone)]
pub enum Change {
    InsertRow {
        table: String,
        row: Row,
    },

    UpdateRow {
        table: String,
        pk: Value,
        old_row: Row,
        new_row: Row,
    },

    DeleteRow {
        table: String,
        pk: Value,
        old_row: Row,
    },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Change::DeleteRow { .. })
    }
}
