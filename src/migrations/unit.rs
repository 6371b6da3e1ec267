//! Migration units and the schema handle their actions run against

use crate::storage::sqlite::quote_identifier;
use crate::Result;
use rusqlite::{Connection, OptionalExtension, Params};
use std::fmt;

/// An up or down action of a migration
pub type Action = Box<dyn Fn(&Schema<'_>) -> Result<()> + Send + Sync>;

/// A single schema transition.
///
/// ```
/// use reconbase::Migration;
///
/// let migration = Migration::new("create_softwares_table")
///     .needs(["create_vendors_table"])
///     .up(|schema| {
///         schema.create_table("ronin_softwares", &["id INTEGER PRIMARY KEY", "name TEXT NOT NULL"])
///     })
///     .down(|schema| schema.drop_table("ronin_softwares"));
///
/// assert_eq!(migration.dependencies(), ["create_vendors_table"]);
/// ```
pub struct Migration {
    id: String,
    needs: Vec<String>,
    up: Option<Action>,
    down: Option<Action>,
}

impl Migration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            needs: Vec::new(),
            up: None,
            down: None,
        }
    }

    /// Declare migrations that must be applied before this one
    pub fn needs<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs.extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn up<F>(mut self, action: F) -> Self
    where
        F: Fn(&Schema<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.up = Some(Box::new(action));
        self
    }

    /// Without a down action, rolling this migration back changes nothing
    pub fn down<F>(mut self, action: F) -> Self
    where
        F: Fn(&Schema<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.down = Some(Box::new(action));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dependencies(&self) -> &[String] {
        &self.needs
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    pub(crate) fn run_up(&self, schema: &Schema<'_>) -> Result<()> {
        match &self.up {
            Some(action) => action(schema),
            None => Ok(()),
        }
    }

    pub(crate) fn run_down(&self, schema: &Schema<'_>) -> Result<()> {
        match &self.down {
            Some(action) => action(schema),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("needs", &self.needs)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}

/// Handle a migration action uses to change one repository.
///
/// Bound to the transaction the action runs in. The table helpers are
/// idempotent so actions can be replayed after a repository is cleared.
pub struct Schema<'a> {
    conn: &'a Connection,
}

impl<'a> Schema<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.conn.execute_batch(sql)?)
    }

    /// `CREATE TABLE IF NOT EXISTS` with the given column definitions
    pub fn create_table(&self, table: &str, columns: &[&str]) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(table),
            columns.join(", ")
        );
        tracing::debug!("{}", sql);
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    /// Index named `index_<table>_<columns>`
    pub fn create_index(&self, table: &str, columns: &[&str]) -> Result<()> {
        let name = format!("index_{}_{}", table, columns.join("_"));
        self.index(&name, table, columns, false)
    }

    /// Unique index named `unique_index_<table>`
    pub fn create_unique_index(&self, table: &str, columns: &[&str]) -> Result<()> {
        let name = format!("unique_index_{}", table);
        self.index(&name, table, columns, true)
    }

    fn index(&self, name: &str, table: &str, columns: &[&str], unique: bool) -> Result<()> {
        let columns: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
        let sql = format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            quote_identifier(name),
            quote_identifier(table),
            columns.join(", ")
        );
        tracing::debug!("{}", sql);
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_identifier(table));
        tracing::debug!("{}", sql);
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
