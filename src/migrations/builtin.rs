//! Built-in schema for reconnaissance records

use super::registry::MigrationRegistry;
use super::unit::Migration;
use crate::Result;

/// An index created alongside a table
struct Index {
    columns: &'static [&'static str],
    unique: bool,
}

const fn index(columns: &'static [&'static str]) -> Index {
    Index { columns, unique: false }
}

const fn unique(columns: &'static [&'static str]) -> Index {
    Index { columns, unique: true }
}

/// A migration that creates one table (plus indexes) and drops it on the way down
fn create_table(
    id: &str,
    needs: &[&str],
    table: &'static str,
    columns: &'static [&'static str],
    indexes: Vec<Index>,
) -> Migration {
    Migration::new(id)
        .needs(needs.iter().copied())
        .up(move |schema| {
            schema.create_table(table, columns)?;
            for index in &indexes {
                if index.unique {
                    schema.create_unique_index(table, index.columns)?;
                } else {
                    schema.create_index(table, index.columns)?;
                }
            }
            Ok(())
        })
        .down(move |schema| schema.drop_table(table))
}

const SERIAL: &str = "id INTEGER PRIMARY KEY AUTOINCREMENT";
const CREATED_AT: &str = "created_at TEXT";

/// URL schemes every repository knows about
pub const URL_SCHEMES: [&str; 3] = ["http", "https", "ftp"];

/// The built-in migrations, in registration order
pub fn migrations() -> Vec<Migration> {
    vec![
        create_table(
            "create_vendors_table",
            &[],
            "ronin_vendors",
            &[SERIAL, "name TEXT NOT NULL"],
            vec![unique(&["name"])],
        ),
        create_table(
            "create_softwares_table",
            &["create_vendors_table"],
            "ronin_softwares",
            &[SERIAL, "name TEXT NOT NULL", "version TEXT NOT NULL", "vendor_id INTEGER"],
            vec![index(&["name"]), index(&["version"])],
        ),
        create_table(
            "create_url_schemes_table",
            &[],
            "ronin_url_schemes",
            &[SERIAL, "name TEXT NOT NULL"],
            vec![unique(&["name"])],
        ),
        Migration::new("populate_url_schemes_table")
            .needs(["create_url_schemes_table"])
            .up(|schema| {
                for name in URL_SCHEMES {
                    schema.execute(
                        "INSERT OR IGNORE INTO ronin_url_schemes (name) VALUES (?1)",
                        [name],
                    )?;
                }
                Ok(())
            }),
        create_table(
            "create_url_query_param_names_table",
            &[],
            "ronin_url_query_param_names",
            &[SERIAL, "name VARCHAR(256) NOT NULL"],
            vec![unique(&["name"])],
        ),
        create_table(
            "create_host_names_table",
            &[],
            "ronin_host_names",
            &[SERIAL, "address VARCHAR(256) NOT NULL", CREATED_AT],
            vec![unique(&["address"])],
        ),
        create_table(
            "create_ip_addresses_table",
            &[],
            "ronin_ip_addresses",
            &[SERIAL, "address VARCHAR(39) NOT NULL", "version INTEGER NOT NULL", CREATED_AT],
            vec![unique(&["address"])],
        ),
        create_table(
            "create_host_name_ip_addresses_table",
            &["create_host_names_table", "create_ip_addresses_table"],
            "ronin_host_name_ip_addresses",
            &[
                SERIAL,
                "host_name_id INTEGER NOT NULL",
                "ip_address_id INTEGER NOT NULL",
                CREATED_AT,
            ],
            vec![unique(&["host_name_id", "ip_address_id"])],
        ),
        create_table(
            "create_ports_table",
            &[],
            "ronin_ports",
            &[SERIAL, "protocol TEXT NOT NULL", "number INTEGER NOT NULL"],
            vec![unique(&["protocol", "number"])],
        ),
        create_table(
            "create_open_ports_table",
            &["create_ip_addresses_table", "create_ports_table", "create_softwares_table"],
            "ronin_open_ports",
            &[
                SERIAL,
                "ip_address_id INTEGER NOT NULL",
                "port_id INTEGER NOT NULL",
                "service TEXT",
                "software_id INTEGER",
                "last_scanned_at TEXT",
                CREATED_AT,
            ],
            vec![unique(&["ip_address_id", "port_id"])],
        ),
        create_table(
            "create_urls_table",
            &["create_url_schemes_table", "create_host_names_table", "create_ports_table"],
            "ronin_urls",
            &[
                SERIAL,
                "scheme_id INTEGER NOT NULL",
                "host_name_id INTEGER NOT NULL",
                "port_id INTEGER",
                "path TEXT",
                "fragment TEXT",
                "last_scanned_at TEXT",
                CREATED_AT,
            ],
            vec![unique(&["scheme_id", "host_name_id", "port_id", "path", "fragment"])],
        ),
        create_table(
            "create_url_query_params_table",
            &["create_urls_table", "create_url_query_param_names_table"],
            "ronin_url_query_params",
            &[
                SERIAL,
                "name_id INTEGER NOT NULL",
                "value TEXT",
                "url_id INTEGER NOT NULL",
            ],
            vec![index(&["url_id"])],
        ),
        create_table(
            "create_user_names_table",
            &[],
            "ronin_user_names",
            &[SERIAL, "name TEXT NOT NULL", CREATED_AT],
            vec![unique(&["name"])],
        ),
        create_table(
            "create_passwords_table",
            &[],
            "ronin_passwords",
            &[SERIAL, "clear_text VARCHAR(256) NOT NULL"],
            vec![unique(&["clear_text"])],
        ),
        create_table(
            "create_email_addresses_table",
            &["create_user_names_table", "create_host_names_table"],
            "ronin_email_addresses",
            &[
                SERIAL,
                "user_name_id INTEGER NOT NULL",
                "host_name_id INTEGER NOT NULL",
                CREATED_AT,
            ],
            vec![unique(&["user_name_id", "host_name_id"])],
        ),
        create_table(
            "create_proxies_table",
            &["create_ip_addresses_table", "create_ports_table"],
            "ronin_proxies",
            &[
                SERIAL,
                "type TEXT NOT NULL DEFAULT 'http'",
                "anonymous BOOLEAN NOT NULL DEFAULT 0",
                "latency REAL",
                "alive BOOLEAN NOT NULL DEFAULT 1",
                "ip_address_id INTEGER NOT NULL",
                "port_id INTEGER NOT NULL",
                CREATED_AT,
            ],
            vec![unique(&["ip_address_id", "port_id"])],
        ),
        create_table(
            "create_credentials_table",
            &[
                "create_user_names_table",
                "create_passwords_table",
                "create_email_addresses_table",
                "create_open_ports_table",
                "create_urls_table",
                "create_proxies_table",
            ],
            "ronin_credentials",
            &[
                SERIAL,
                "user_name_id INTEGER NOT NULL",
                "password_id INTEGER NOT NULL",
                "open_port_id INTEGER",
                "email_address_id INTEGER",
                "url_id INTEGER",
                "proxy_id INTEGER",
            ],
            vec![unique(&[
                "user_name_id",
                "password_id",
                "open_port_id",
                "email_address_id",
                "url_id",
                "proxy_id",
            ])],
        ),
    ]
}

/// A registry holding the built-in migrations
pub fn registry() -> Result<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    registry.register_all(migrations())?;
    Ok(registry)
}
