use reconbase::migrations::{builtin, ledger, LEDGER_TABLE};
use reconbase::storage::SqliteStore;
use reconbase::{Migration, MigrationRegistry};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn ledger_ids(store: &SqliteStore) -> Vec<String> {
    ledger::entries(store.connection())
        .unwrap()
        .into_iter()
        .map(|entry| entry.migration)
        .collect()
}

#[test]
fn test_dependencies_run_first() {
    let mut registry = MigrationRegistry::new();
    registry
        .register(
            Migration::new("create_softwares_table")
                .needs(["create_vendors_table"])
                .up(|s| {
                    s.create_table(
                        "softwares",
                        &[
                            "id INTEGER PRIMARY KEY",
                            "vendor_id INTEGER REFERENCES vendors(id)",
                        ],
                    )
                }),
        )
        .unwrap();
    registry
        .register(
            Migration::new("create_vendors_table")
                .up(|s| s.create_table("vendors", &["id INTEGER PRIMARY KEY"])),
        )
        .unwrap();

    let mut store = SqliteStore::open_in_memory().unwrap();
    let applied = registry.migrate_up(&mut store).unwrap();

    assert_eq!(applied, ["create_vendors_table", "create_softwares_table"]);

    let entries = ledger::entries(store.connection()).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].applied_at < entries[1].applied_at);
}

#[test]
fn test_second_upgrade_is_noop() {
    let registry = builtin::registry().unwrap();
    let mut store = SqliteStore::open_in_memory().unwrap();

    let first = registry.migrate_up(&mut store).unwrap();
    assert_eq!(first.len(), registry.len());

    let before = ledger::entries(store.connection()).unwrap();
    assert!(registry.migrate_up(&mut store).unwrap().is_empty());
    assert_eq!(ledger::entries(store.connection()).unwrap(), before);
}

#[test]
fn test_cycle_fails_before_any_action() {
    let ran = Arc::new(AtomicUsize::new(0));
    let mut registry = MigrationRegistry::new();
    for (id, needs) in [("a", "b"), ("b", "a")] {
        let ran = Arc::clone(&ran);
        registry
            .register(Migration::new(id).needs([needs]).up(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
    }

    let mut store = SqliteStore::open_in_memory().unwrap();
    let err = registry.migrate_up(&mut store).unwrap_err();

    assert!(matches!(err, reconbase::Error::CyclicDependency(_)));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(!store.table_names().unwrap().contains(&LEDGER_TABLE.to_string()));
}

#[test]
fn test_failure_keeps_earlier_migrations() {
    let broken = Arc::new(AtomicBool::new(true));
    let mut registry = MigrationRegistry::new();
    let mut previous: Option<String> = None;

    for step in 1..=5 {
        let id = format!("step_{step}");
        let table = format!("table_{step}");
        let broken = Arc::clone(&broken);
        let mut migration = Migration::new(id.clone()).up(move |s| {
            s.create_table(&table, &["id INTEGER PRIMARY KEY"])?;
            if step == 3 && broken.load(Ordering::SeqCst) {
                s.execute_batch("INSERT INTO no_such_table VALUES (1)")?;
            }
            Ok(())
        });
        if let Some(previous) = previous.take() {
            migration = migration.needs([previous]);
        }
        registry.register(migration).unwrap();
        previous = Some(id);
    }

    let mut store = SqliteStore::open_in_memory().unwrap();
    let err = registry.migrate_up(&mut store).unwrap_err();

    assert!(
        matches!(&err, reconbase::Error::MigrationApply { id, .. } if id == "step_3")
    );
    assert_eq!(ledger_ids(&store), ["step_1", "step_2"]);
    // The failed step's table was rolled back with its transaction
    assert!(!store.table_names().unwrap().contains(&"table_3".to_string()));

    broken.store(false, Ordering::SeqCst);
    assert_eq!(
        registry.migrate_up(&mut store).unwrap(),
        ["step_3", "step_4", "step_5"]
    );
    assert_eq!(
        ledger_ids(&store),
        ["step_1", "step_2", "step_3", "step_4", "step_5"]
    );
}

#[test]
fn test_rollback_to_target() {
    let registry = builtin::registry().unwrap();
    let mut store = SqliteStore::open_in_memory().unwrap();
    registry.migrate_up(&mut store).unwrap();

    let rolled_back = registry
        .migrate_down(&mut store, Some("create_urls_table"))
        .unwrap();

    assert_eq!(rolled_back.first().map(String::as_str), Some("create_credentials_table"));
    let remaining = ledger_ids(&store);
    assert_eq!(remaining.last().map(String::as_str), Some("create_urls_table"));
    assert!(registry.pending(store.connection()).unwrap().len() == rolled_back.len());
}

#[test]
fn test_rollback_to_unapplied_migration() {
    let registry = builtin::registry().unwrap();
    let mut store = SqliteStore::open_in_memory().unwrap();

    let err = registry
        .migrate_down(&mut store, Some("create_vendors_table"))
        .unwrap_err();
    assert!(matches!(err, reconbase::Error::UnknownMigration(_)));
}

#[test]
fn test_rebuild_empties_tables_and_ledger() {
    let registry = builtin::registry().unwrap();
    let mut store = SqliteStore::open_in_memory().unwrap();
    registry.migrate_up(&mut store).unwrap();
    store
        .execute("INSERT INTO ronin_vendors (name) VALUES (?1)", ["Example Corp"])
        .unwrap();

    registry.rebuild(&mut store).unwrap();

    let stats = store.stats().unwrap();
    assert!(stats.tables.iter().any(|(table, _)| table == "ronin_url_schemes"));
    assert_eq!(stats.total_rows(), 0);
    assert!(ledger_ids(&store).is_empty());

    // The next upgrade applies everything again, seed rows included
    let applied = registry.migrate_up(&mut store).unwrap();
    assert_eq!(applied.len(), registry.len());
    assert_eq!(
        store.count_rows("ronin_url_schemes").unwrap(),
        builtin::URL_SCHEMES.len()
    );
}

#[test]
fn test_down_failure_keeps_earlier_rollbacks() {
    let broken = Arc::new(AtomicBool::new(true));
    let mut registry = MigrationRegistry::new();
    let mut previous: Option<String> = None;

    for step in 1..=5 {
        let id = format!("step_{step}");
        let table = format!("table_{step}");
        let dropped = table.clone();
        let broken = Arc::clone(&broken);
        let mut migration = Migration::new(id.clone())
            .up(move |s| s.create_table(&table, &["id INTEGER PRIMARY KEY"]))
            .down(move |s| {
                s.drop_table(&dropped)?;
                if step == 3 && broken.load(Ordering::SeqCst) {
                    s.execute_batch("DELETE FROM no_such_table")?;
                }
                Ok(())
            });
        if let Some(previous) = previous.take() {
            migration = migration.needs([previous]);
        }
        registry.register(migration).unwrap();
        previous = Some(id);
    }

    let mut store = SqliteStore::open_in_memory().unwrap();
    registry.migrate_up(&mut store).unwrap();

    let err = registry.migrate_down(&mut store, None).unwrap_err();
    assert!(
        matches!(&err, reconbase::Error::MigrationApply { id, .. } if id == "step_3")
    );
    assert_eq!(ledger_ids(&store), ["step_1", "step_2", "step_3"]);
    let tables = store.table_names().unwrap();
    // The failed step's drop was undone with it
    assert!(tables.contains(&"table_3".to_string()));
    assert!(!tables.contains(&"table_4".to_string()));
    assert!(!tables.contains(&"table_5".to_string()));

    broken.store(false, Ordering::SeqCst);
    assert_eq!(
        registry.migrate_down(&mut store, None).unwrap(),
        ["step_3", "step_2", "step_1"]
    );
    assert!(ledger_ids(&store).is_empty());
    assert_eq!(store.table_names().unwrap(), [LEDGER_TABLE]);
}

#[test]
fn test_concurrent_runs_apply_each_migration_once() {
    let dir = tempfile::tempdir().unwrap();
    let uri = reconbase::RepositoryUri::sqlite_file(&dir.path().join("shared.sqlite3")).unwrap();
    let registry = builtin::registry().unwrap();
    let barrier = std::sync::Barrier::new(2);

    let runs: Vec<Vec<String>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    let mut store = SqliteStore::open(&uri).unwrap();
                    barrier.wait();
                    registry.migrate_up(&mut store).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut applied: Vec<String> = runs.iter().flatten().cloned().collect();
    assert_eq!(applied.len(), registry.len());
    applied.sort();
    applied.dedup();
    assert_eq!(applied.len(), registry.len());
    assert_eq!(runs.iter().filter(|run| !run.is_empty()).count(), 1);

    let store = SqliteStore::open(&uri).unwrap();
    assert_eq!(ledger_ids(&store).len(), registry.len());
}
