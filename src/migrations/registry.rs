//! Migration registry
//!
//! Holds every known migration and applies them to a repository in an order
//! consistent with their `needs` declarations.

use super::ledger::{self, LedgerEntry};
use super::unit::{Migration, Schema};
use crate::storage::sqlite::quote_identifier;
use crate::storage::SqliteStore;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Registered migrations, in registration order
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    units: Vec<Migration>,
    index: HashMap<String, usize>,
}

/// A migration and whether it has been applied to a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub id: String,
    pub needs: Vec<String>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration. Its dependencies may be registered later.
    pub fn register(&mut self, migration: Migration) -> Result<()> {
        if self.index.contains_key(migration.id()) {
            return Err(Error::DuplicateMigration(migration.id().to_string()));
        }
        self.index.insert(migration.id().to_string(), self.units.len());
        self.units.push(migration);
        Ok(())
    }

    pub fn register_all<I>(&mut self, migrations: I) -> Result<()>
    where
        I: IntoIterator<Item = Migration>,
    {
        for migration in migrations {
            self.register(migration)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Migration> {
        self.index.get(id).map(|&position| &self.units[position])
    }

    pub fn ids(&self) -> Vec<&str> {
        self.units.iter().map(Migration::id).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Order all migrations so each comes after everything it needs.
    ///
    /// Whenever several migrations are ready, the earliest registered one goes
    /// first, so the same registrations always produce the same plan.
    pub fn plan(&self) -> Result<Vec<&Migration>> {
        let count = self.units.len();
        let mut remaining = vec![0usize; count];
        let mut dependents = vec![Vec::new(); count];

        for (position, migration) in self.units.iter().enumerate() {
            for dependency in migration.dependencies() {
                let &needed = self.index.get(dependency).ok_or_else(|| Error::UnknownDependency {
                    migration: migration.id().to_string(),
                    dependency: dependency.clone(),
                })?;
                remaining[position] += 1;
                dependents[needed].push(position);
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&p| remaining[p] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(position) = ready.pop_first() {
            order.push(position);
            for &dependent in &dependents[position] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < count {
            let stuck = (0..count)
                .filter(|&p| remaining[p] > 0)
                .map(|p| self.units[p].id().to_string())
                .collect();
            return Err(Error::CyclicDependency(stuck));
        }

        tracing::debug!("Planned {} migrations", order.len());
        Ok(order.into_iter().map(|p| &self.units[p]).collect())
    }

    /// Apply every migration not yet recorded in the repository's ledger.
    ///
    /// The whole run holds the database write lock, so concurrent runs against
    /// the same file apply each migration once. Every migration runs with its
    /// ledger entry in its own savepoint. When one fails, the ones before it
    /// stay applied and the error names it. Returns the ids that were applied.
    pub fn migrate_up(&self, store: &mut SqliteStore) -> Result<Vec<String>> {
        let plan = self.plan()?;

        let (applied, failure) = store.immediate_transaction(|tx| {
            ledger::ensure(tx)?;
            let done: HashSet<String> = ledger::entries(tx)?
                .into_iter()
                .map(|entry| entry.migration)
                .collect();

            let mut applied = Vec::new();
            for migration in plan {
                if done.contains(migration.id()) {
                    tracing::debug!("Skipping applied migration {}", migration.id());
                    continue;
                }

                let result = in_savepoint(tx, || {
                    migration.run_up(&Schema::new(tx))?;
                    ledger::record(tx, migration.id())?;
                    Ok(())
                });
                if let Err(err) = result {
                    return Ok((applied, Some(apply_error(migration.id(), err))));
                }

                tracing::info!("Applied migration {}", migration.id());
                applied.push(migration.id().to_string());
            }
            Ok((applied, None))
        })?;

        match failure {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }

    /// Roll back applied migrations, newest first, stopping before `to`.
    ///
    /// Without `to` every applied migration is rolled back. Locking and
    /// failure handling match [`migrate_up`](Self::migrate_up). Returns the
    /// ids that were rolled back.
    pub fn migrate_down(&self, store: &mut SqliteStore, to: Option<&str>) -> Result<Vec<String>> {
        let (rolled_back, failure) = store.immediate_transaction(|tx| {
            let entries = ledger::entries(tx)?;

            if let Some(to) = to {
                if !entries.iter().any(|entry| entry.migration == to) {
                    return Err(Error::UnknownMigration(to.to_string()));
                }
            }

            let targets = entries
                .iter()
                .rev()
                .take_while(|entry| to != Some(entry.migration.as_str()))
                .map(|entry| {
                    self.get(&entry.migration)
                        .ok_or_else(|| Error::UnknownMigration(entry.migration.clone()))
                })
                .collect::<Result<Vec<_>>>()?;

            let mut rolled_back = Vec::new();
            for migration in targets {
                let result = in_savepoint(tx, || {
                    migration.run_down(&Schema::new(tx))?;
                    ledger::remove(tx, migration.id())
                });
                if let Err(err) = result {
                    return Ok((rolled_back, Some(apply_error(migration.id(), err))));
                }

                if migration.is_reversible() {
                    tracing::info!("Rolled back migration {}", migration.id());
                } else {
                    tracing::info!("Unrecorded irreversible migration {}", migration.id());
                }
                rolled_back.push(migration.id().to_string());
            }
            Ok((rolled_back, None))
        })?;

        match failure {
            Some(err) => Err(err),
            None => Ok(rolled_back),
        }
    }

    /// Drop everything in the repository and rebuild an empty schema.
    ///
    /// Runs as one transaction and bypasses the ledger. Every up action is
    /// replayed, then every table is emptied, seeded ones included. The ledger
    /// ends up empty so the next upgrade applies every migration again.
    pub fn rebuild(&self, store: &mut SqliteStore) -> Result<()> {
        let plan = self.plan()?;

        store.immediate_transaction(|tx| {
            for table in tables_newest_first(tx)? {
                tracing::debug!("Dropping table {}", table);
                tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_identifier(&table)))?;
            }

            ledger::ensure(tx)?;
            for migration in &plan {
                migration
                    .run_up(&Schema::new(tx))
                    .map_err(|e| apply_error(migration.id(), e))?;
            }

            for table in tables_newest_first(tx)? {
                tx.execute_batch(&format!("DELETE FROM {}", quote_identifier(&table)))?;
            }
            if Schema::new(tx).table_exists("sqlite_sequence")? {
                tx.execute_batch("DELETE FROM sqlite_sequence")?;
            }
            Ok(())
        })
    }

    /// Every migration in plan order with its applied timestamp
    pub fn status(&self, conn: &Connection) -> Result<Vec<MigrationStatus>> {
        let plan = self.plan()?;
        let applied: HashMap<String, DateTime<Utc>> = ledger::entries(conn)?
            .into_iter()
            .map(|LedgerEntry { migration, applied_at }| (migration, applied_at))
            .collect();

        Ok(plan
            .into_iter()
            .map(|migration| MigrationStatus {
                id: migration.id().to_string(),
                needs: migration.dependencies().to_vec(),
                applied_at: applied.get(migration.id()).copied(),
            })
            .collect())
    }

    /// Ids of migrations not yet applied, in the order they would run
    pub fn pending(&self, conn: &Connection) -> Result<Vec<String>> {
        Ok(self
            .status(conn)?
            .into_iter()
            .filter(|status| !status.is_applied())
            .map(|status| status.id)
            .collect())
    }
}

fn apply_error(id: &str, err: Error) -> Error {
    match err {
        Error::MigrationApply { .. } => err,
        other => Error::MigrationApply {
            id: id.to_string(),
            source: Box::new(other),
        },
    }
}

/// Run `f` inside a savepoint of the open transaction, undoing its changes on error
fn in_savepoint<F>(conn: &Connection, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    conn.execute_batch("SAVEPOINT reconbase_migration")?;
    match f() {
        Ok(()) => {
            conn.execute_batch("RELEASE reconbase_migration")?;
            Ok(())
        }
        Err(err) => {
            conn.execute_batch("ROLLBACK TO reconbase_migration; RELEASE reconbase_migration")?;
            Err(err)
        }
    }
}

fn tables_newest_first(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid DESC",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(id: &str) -> Migration {
        Migration::new(id).up(|_| Ok(()))
    }

    fn plan_ids(registry: &MigrationRegistry) -> Vec<String> {
        registry
            .plan()
            .unwrap()
            .into_iter()
            .map(|m| m.id().to_string())
            .collect()
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = MigrationRegistry::new();
        registry.register(noop("a")).unwrap();

        let err = registry.register(noop("a")).unwrap_err();
        assert!(matches!(err, Error::DuplicateMigration(id) if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_plan_respects_dependencies() {
        let mut registry = MigrationRegistry::new();
        registry.register(noop("c").needs(["b"])).unwrap();
        registry.register(noop("b").needs(["a"])).unwrap();
        registry.register(noop("a")).unwrap();

        assert_eq!(plan_ids(&registry), ["a", "b", "c"]);
    }

    #[test]
    fn test_plan_ties_follow_registration_order() {
        let mut registry = MigrationRegistry::new();
        registry.register(noop("z")).unwrap();
        registry.register(noop("m").needs(["y"])).unwrap();
        registry.register(noop("y")).unwrap();
        registry.register(noop("a")).unwrap();

        assert_eq!(plan_ids(&registry), ["z", "y", "m", "a"]);
        assert_eq!(plan_ids(&registry), plan_ids(&registry));
    }

    #[test]
    fn test_unknown_dependency() {
        let mut registry = MigrationRegistry::new();
        registry.register(noop("a").needs(["missing"])).unwrap();

        let err = registry.plan().unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownDependency { migration, dependency } if migration == "a" && dependency == "missing"
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let mut registry = MigrationRegistry::new();
        registry.register(noop("root")).unwrap();
        registry.register(noop("a").needs(["b"])).unwrap();
        registry.register(noop("b").needs(["a"])).unwrap();

        let err = registry.plan().unwrap_err();
        assert!(matches!(err, Error::CyclicDependency(ids) if ids == ["a", "b"]));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let mut registry = MigrationRegistry::new();
        registry.register(noop("a").needs(["a"])).unwrap();

        assert!(matches!(registry.plan(), Err(Error::CyclicDependency(_))));
    }

    #[test]
    fn test_status_without_ledger() {
        let mut registry = MigrationRegistry::new();
        registry.register(noop("a")).unwrap();
        let store = SqliteStore::open_in_memory().unwrap();

        let status = registry.status(store.connection()).unwrap();
        assert_eq!(status.len(), 1);
        assert!(!status[0].is_applied());
        assert_eq!(registry.pending(store.connection()).unwrap(), ["a"]);
    }

    #[test]
    fn test_migrate_up_then_down() {
        let mut registry = MigrationRegistry::new();
        registry
            .register(
                Migration::new("create_hosts")
                    .up(|s| s.create_table("hosts", &["name TEXT"]))
                    .down(|s| s.drop_table("hosts")),
            )
            .unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();

        assert_eq!(registry.migrate_up(&mut store).unwrap(), ["create_hosts"]);
        assert!(registry.migrate_up(&mut store).unwrap().is_empty());

        assert_eq!(registry.migrate_down(&mut store, None).unwrap(), ["create_hosts"]);
        assert_eq!(store.table_names().unwrap(), [ledger::LEDGER_TABLE]);
    }
}
