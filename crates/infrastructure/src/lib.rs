pub mod database;
pub mod memory;

pub use database::{DatabaseManager, SqliteStore};
pub use memory::InMemoryStore;
