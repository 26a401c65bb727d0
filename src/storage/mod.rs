pub mod database;
pub mod memory;
pub mod table;

pub use database::Database;
pub use memory::InMemoryStorage;
pub use table::Table;
