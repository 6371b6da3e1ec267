use crate::config::Repositories;
use crate::migrations::MigrationStatus;
use crate::storage::StoreStats;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct RepositoryRow {
    #[tabled(rename = "Repository")]
    pub name: String,
    #[tabled(rename = "URI")]
    pub uri: String,
}

#[derive(Tabled)]
pub struct MigrationRow {
    #[tabled(rename = "Migration")]
    pub id: String,
    #[tabled(rename = "Needs")]
    pub needs: String,
    #[tabled(rename = "Applied")]
    pub applied_at: String,
}

#[derive(Tabled)]
pub struct StatsRow {
    #[tabled(rename = "Table")]
    pub table: String,
    #[tabled(rename = "Rows")]
    pub rows: usize,
}

fn render<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn repositories_table(repositories: &Repositories) -> String {
    let rows: Vec<RepositoryRow> = repositories
        .iter()
        .map(|(name, uri)| RepositoryRow {
            name: name.to_string(),
            uri: uri.to_string(),
        })
        .collect();
    render(&rows)
}

pub fn migrations_table(statuses: &[MigrationStatus]) -> String {
    let rows: Vec<MigrationRow> = statuses
        .iter()
        .map(|status| MigrationRow {
            id: status.id.clone(),
            needs: status.needs.join(", "),
            applied_at: status
                .applied_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "pending".to_string()),
        })
        .collect();
    render(&rows)
}

pub fn stats_table(stats: &StoreStats) -> String {
    let rows: Vec<StatsRow> = stats
        .tables
        .iter()
        .map(|(table, rows)| StatsRow {
            table: table.clone(),
            rows: *rows,
        })
        .collect();
    render(&rows)
}
