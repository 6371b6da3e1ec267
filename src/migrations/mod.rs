//! Schema migrations
//!
//! A migration is plain data: an id, the ids it needs, and up/down actions.
//! The registry orders migrations by their needs and records applied ones
//! in each repository's ledger.

pub mod builtin;
pub mod ledger;
pub mod registry;
pub mod unit;

pub use ledger::{LedgerEntry, LEDGER_TABLE};
pub use registry::{MigrationRegistry, MigrationStatus};
pub use unit::{Action, Migration, Schema};
