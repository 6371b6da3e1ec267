//! Reconbase CLI - manage repositories and their schema

use clap::{Parser, Subcommand};
use reconbase::config::{RepositoryUri, Settings, DEFAULT_REPOSITORY};
use reconbase::ui::{self, Icons};
use reconbase::{Database, LogLevel, LogOptions};

#[derive(Parser)]
#[command(name = "reconbase")]
#[command(version)]
#[command(about = "Repository configuration and schema migrations for reconnaissance data")]
#[command(long_about = r#"
Reconbase keeps reconnaissance records (host names, IP addresses, URLs,
credentials, software, open ports) in named SQLite repositories.

Example usage:
  reconbase add work sqlite3:///srv/recon/work.sqlite3
  reconbase setup
  reconbase status --repository work
"#)]
struct Cli {
    /// Log to stderr at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON instead of human output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured repositories
    Repos,

    /// Add or replace a repository in the config file
    Add {
        /// Repository name
        name: String,

        /// Connection URI, e.g. sqlite3:///path/to/db.sqlite3
        uri: String,
    },

    /// Remove a repository from the config file
    Remove {
        /// Repository name
        name: String,
    },

    /// Open every repository and apply pending migrations
    Setup,

    /// Show applied and pending migrations
    Status {
        /// Repository name
        #[arg(short, long, default_value = DEFAULT_REPOSITORY)]
        repository: String,
    },

    /// Roll back applied migrations
    Rollback {
        /// Repository name
        #[arg(short, long, default_value = DEFAULT_REPOSITORY)]
        repository: String,

        /// Stop before this migration (rolls back everything when omitted)
        #[arg(long)]
        to: Option<String>,
    },

    /// Drop every table of a repository and rebuild the schema
    Clear {
        /// Repository name
        name: String,

        /// Confirm the destructive reset
        #[arg(long)]
        yes: bool,
    },

    /// Show row counts per table
    Stats {
        /// Repository name
        #[arg(short, long, default_value = DEFAULT_REPOSITORY)]
        repository: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    fn is_human(&self) -> bool {
        *self == OutputMode::Human
    }
}

fn emit_success(command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    let envelope = serde_json::json!({
        "ok": true,
        "command": command,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let mode = if cli.json { OutputMode::Json } else { OutputMode::Human };

    if let Err(err) = run(cli, mode) {
        if mode.is_human() {
            ui::error(&format!("{:#}", err));
        } else {
            let envelope = serde_json::json!({ "ok": false, "error": format!("{:#}", err) });
            println!("{}", envelope);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli, mode: OutputMode) -> anyhow::Result<()> {
    let mut settings = Settings::from_env()?;
    if cli.verbose {
        settings.log = LogOptions::stderr(LogLevel::Debug);
    }
    let db = Database::new(settings)?;

    match cli.command {
        Commands::Repos => {
            let repositories = db.config().list()?;
            if mode.is_human() {
                ui::header("Repositories");
                ui::info("Config", &db.config().path().display().to_string());
                println!("{}", ui::repositories_table(&repositories));
            } else {
                let data: serde_json::Map<String, serde_json::Value> = repositories
                    .iter()
                    .map(|(name, uri)| (name.to_string(), uri.to_string().into()))
                    .collect();
                emit_success("repos", data.into())?;
            }
        }

        Commands::Add { name, uri } => {
            let uri = RepositoryUri::parse(&uri)?;
            uri.target()?;
            db.config().save_with(|repositories| {
                repositories.insert(name.clone(), uri.clone());
                Ok(())
            })?;
            if mode.is_human() {
                ui::success(&format!("Saved repository {} ({})", name, uri));
            } else {
                emit_success("add", serde_json::json!({ "name": name, "uri": uri.to_string() }))?;
            }
        }

        Commands::Remove { name } => {
            if db.config().remove(&name)?.is_none() {
                anyhow::bail!("unknown repository {}", name);
            }
            if mode.is_human() {
                ui::success(&format!("Removed repository {}", name));
            } else {
                emit_success("remove", serde_json::json!({ "name": name }))?;
            }
        }

        Commands::Setup => {
            let migrated = db.setup()?;
            let names = db.config().list()?.names();
            if mode.is_human() {
                ui::header("Setup");
                for name in &names {
                    ui::summary_row(Icons::DATABASE, name);
                }
                if migrated {
                    ui::success("Applied pending migrations");
                } else {
                    ui::success("Schema is up to date");
                }
            } else {
                emit_success(
                    "setup",
                    serde_json::json!({ "repositories": names, "migrated": migrated }),
                )?;
            }
        }

        Commands::Status { repository } => {
            db.connect()?;
            let statuses = db.status(&repository)?;
            if mode.is_human() {
                let pending = statuses.iter().filter(|s| !s.is_applied()).count();
                ui::header(&format!("Migrations for {}", repository));
                println!("{}", ui::migrations_table(&statuses));
                ui::info("Pending", &pending.to_string());
            } else {
                emit_success("status", serde_json::to_value(&statuses)?)?;
            }
        }

        Commands::Rollback { repository, to } => {
            db.connect()?;
            let rolled_back = db.rollback(&repository, to.as_deref())?;
            if mode.is_human() {
                ui::header(&format!("Rollback of {}", repository));
                for id in &rolled_back {
                    ui::summary_row(Icons::DOWN, id);
                }
                ui::success(&format!("Rolled back {} migrations", rolled_back.len()));
            } else {
                emit_success("rollback", serde_json::json!({ "rolled_back": rolled_back }))?;
            }
        }

        Commands::Clear { name, yes } => {
            if !yes {
                anyhow::bail!("clearing {} deletes every record in it; pass --yes to confirm", name);
            }
            db.connect()?;
            db.clear_with(&name, || {
                if mode.is_human() {
                    ui::warn(&format!("Repository {} was cleared", name));
                }
            })?;
            if !mode.is_human() {
                emit_success("clear", serde_json::json!({ "name": name }))?;
            }
        }

        Commands::Stats { repository } => {
            db.connect()?;
            let stats = db.stats(&repository)?;
            if mode.is_human() {
                ui::section(&repository);
                println!("{}", ui::stats_table(&stats));
                ui::info("Total rows", &stats.total_rows().to_string());
            } else {
                let tables: serde_json::Map<String, serde_json::Value> = stats
                    .tables
                    .iter()
                    .map(|(table, rows)| (table.clone(), (*rows).into()))
                    .collect();
                emit_success("stats", tables.into())?;
            }
        }
    }

    Ok(())
}
