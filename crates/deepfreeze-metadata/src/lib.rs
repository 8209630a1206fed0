//! Status store adapters for deepfreeze: an embedded SQLite store and an
//! in-memory store for tests and dry runs.

mod memory_store;
mod sqlite_store;
mod util;

pub use memory_store::MemoryStatusStore;
pub use sqlite_store::SqliteStatusStore;
pub use util::{create_sqlite_pool, run_migrations};

/// Embedded SQL migrations for the status database.
pub const MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
