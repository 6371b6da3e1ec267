//! Terminal output for the `reconbase` binary

pub mod output;
pub mod table;

pub use output::{error, header, info, paint, section, success, summary_row, warn, Icons, Tone};
pub use table::{migrations_table, repositories_table, stats_table};
