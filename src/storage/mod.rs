//! Storage Layer - SQLite-backed repositories
//!
//! Every configured repository is one SQLite database. The rest of the crate
//! only needs a narrow surface from it:
//! - `execute(sql, params)` for schema and data statements
//! - `transaction(f)` to run a closure atomically

pub mod sqlite;

pub use sqlite::{SqliteStore, StoreStats};
