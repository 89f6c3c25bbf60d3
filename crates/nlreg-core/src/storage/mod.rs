//! Storage layer: SQLite connection pooling, migrations, and the
//! relationship store.

pub mod database;
pub mod migrations;
pub mod relationships;

pub use database::{Database, DatabaseConfig};
pub use relationships::RelationshipStore;
