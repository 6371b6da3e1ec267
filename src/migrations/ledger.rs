//! Applied-migration ledger
//!
//! Each repository records its own applied migrations in
//! `reconbase_migrations(seq, migration, applied_at)`. `seq` keeps the
//! application order, `applied_at` is RFC 3339 UTC and strictly increasing.

use crate::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};

pub const LEDGER_TABLE: &str = "reconbase_migrations";

/// One applied migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub migration: String,
    pub applied_at: DateTime<Utc>,
}

pub fn ensure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reconbase_migrations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            migration TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL
        )",
    )?;
    Ok(())
}

pub fn exists(conn: &Connection) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [LEDGER_TABLE],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Applied migrations in application order. Empty when there is no ledger yet.
pub fn entries(conn: &Connection) -> Result<Vec<LedgerEntry>> {
    if !exists(conn)? {
        return Ok(Vec::new());
    }

    let mut stmt =
        conn.prepare("SELECT migration, applied_at FROM reconbase_migrations ORDER BY seq")?;
    let entries = stmt
        .query_map([], |row| {
            let applied_at: String = row.get(1)?;
            Ok(LedgerEntry {
                migration: row.get(0)?,
                applied_at: parse_timestamp(&applied_at).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn contains(conn: &Connection, migration: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM reconbase_migrations WHERE migration = ?1",
            [migration],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Record `migration` as applied now, returning its timestamp
pub fn record(conn: &Connection, migration: &str) -> Result<DateTime<Utc>> {
    let last: Option<String> = conn
        .query_row(
            "SELECT applied_at FROM reconbase_migrations ORDER BY seq DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let mut applied_at = Utc::now();
    if let Some(last) = last.as_deref().and_then(|last| parse_timestamp(last).ok()) {
        if applied_at <= last {
            applied_at = last + chrono::Duration::nanoseconds(1);
        }
    }

    conn.execute(
        "INSERT INTO reconbase_migrations (migration, applied_at) VALUES (?1, ?2)",
        rusqlite::params![migration, format_timestamp(&applied_at)],
    )?;
    Ok(applied_at)
}

pub fn remove(conn: &Connection, migration: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM reconbase_migrations WHERE migration = ?1",
        [migration],
    )?;
    Ok(())
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|timestamp| timestamp.with_timezone(&Utc))
}
