//! SQLite storage implementation

use crate::config::{RepositoryUri, StorageTarget};
use crate::Result;
use rusqlite::{Connection, Params, Transaction, TransactionBehavior};
use std::time::Duration;

/// How long a writer waits for another process holding the database lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One open repository database
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the database a repository URI points at (creates if doesn't exist)
    pub fn open(uri: &RepositoryUri) -> Result<Self> {
        let conn = match uri.target()? {
            StorageTarget::Memory => Connection::open_in_memory()?,
            StorageTarget::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Connection::open(&path)?
            }
        };
        let store = Self { conn };
        store.configure()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.configure()?;
        Ok(store)
    }

    fn configure(&self) -> Result<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn.pragma_update(None, "foreign_keys", true)?;
        let mode: String = self
            .conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("Opened SQLite store (journal_mode={})", mode);
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Execute one statement, returning the number of changed rows
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.conn.execute_batch(sql)?)
    }

    /// Run `f` inside a transaction. Commits on `Ok`, rolls back otherwise.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        self.run_in(TransactionBehavior::Deferred, f)
    }

    /// Like [`transaction`](Self::transaction) but takes the write lock up front
    pub fn immediate_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        self.run_in(TransactionBehavior::Immediate, f)
    }

    fn run_in<T, F>(&mut self, behavior: TransactionBehavior, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        // Dropping an uncommitted transaction rolls it back
        let tx = self.conn.transaction_with_behavior(behavior)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Names of all user tables, excluding SQLite's internal ones
    pub fn table_names(&self) -> Result<Vec<String>> {
        table_names(&self.conn)
    }

    /// Count rows of a table
    pub fn count_rows(&self, table: &str) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Row counts per table
    pub fn stats(&self) -> Result<StoreStats> {
        let mut tables = Vec::new();
        for table in self.table_names()? {
            let rows = self.count_rows(&table)?;
            tables.push((table, rows));
        }
        Ok(StoreStats { tables })
    }
}

/// Names of all user tables visible through `conn`
pub fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// Quote an identifier for interpolation into SQL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Row counts of a repository's tables
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub tables: Vec<(String, usize)>,
}

impl StoreStats {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|(_, rows)| rows).sum()
    }
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Repository Statistics:")?;
        for (table, rows) in &self.tables {
            writeln!(f, "  {}: {}", table, rows)?;
        }
        write!(f, "  Total rows: {}", self.total_rows())
    }
}
