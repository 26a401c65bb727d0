// ============================================================================
// Transaction Module
// ============================================================================
//
// Working-copy transactions for `MemorySession`: changes are recorded against
// a private copy of the committed tables and replayed on COMMIT.
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{Transaction, TransactionId, Undo};
