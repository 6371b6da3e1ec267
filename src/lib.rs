//! # Reconbase - storage core for reconnaissance records
//!
//! Reconbase keeps host names, IP addresses, URLs, credentials, software and
//! open ports in one or more SQLite repositories.
//!
//! Reconbase provides:
//! - Named repositories configured in a TOML file, with a built-in default
//! - Migrations declared as data, ordered by their dependencies
//! - A per-repository ledger so upgrades are applied exactly once
//! - A `Database` coordinator handing out scoped, locked access to each repository

pub mod config;
pub mod database;
pub mod logging;
pub mod migrations;
pub mod storage;
pub mod ui;

// Re-exports for convenient access
pub use config::{RepositoryConfig, RepositoryUri, Repositories, Settings};
pub use database::{Database, Repository, Session};
pub use logging::{LogLevel, LogOptions};
pub use migrations::{Migration, MigrationRegistry, Schema};

/// Result type alias for Reconbase operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Reconbase operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid config {path}: {reason}")]
    ConfigFormat { path: String, reason: String },

    #[error("Could not write config {path}: {source}")]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown database repository: {0}")]
    UnknownRepository(String),

    #[error("Database repository {0} is not set up")]
    NotSetup(String),

    #[error("Repository {0} cannot be removed")]
    ProtectedRepository(String),

    #[error("Migration already registered: {0}")]
    DuplicateMigration(String),

    #[error("Migration {migration} needs unknown migration {dependency}")]
    UnknownDependency { migration: String, dependency: String },

    #[error("Cyclic migration dependencies between: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    #[error("Unknown migration: {0}")]
    UnknownMigration(String),

    #[error("Migration {id} failed: {source}")]
    MigrationApply {
        id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Unsupported repository scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Lock poisoned for repository {0}")]
    LockPoisoned(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
