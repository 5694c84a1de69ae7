//! Select command implementation.

use crate::format::{key_text, record_text, OutputFormat};
use burrowdb_core::UqiResult;
use serde::Serialize;
use std::path::Path;

/// One rendered result row.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Row {
    /// Rendered key column; omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Rendered record column; omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
}

/// Runs the select command.
pub fn run(
    path: &Path,
    key: Option<&str>,
    query: &str,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let env = super::open_read_only(path, key)?;
    let result = env.select(query)?;
    let rows = render(&result);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => {
            for row in &rows {
                match (&row.key, &row.record) {
                    (Some(key), Some(record)) => println!("{key}\t{record}"),
                    (Some(value), None) | (None, Some(value)) => println!("{value}"),
                    (None, None) => println!(),
                }
            }
            println!("{} rows", rows.len());
        }
    }
    Ok(())
}

/// Renders every row with the column types of the result.
pub fn render(result: &UqiResult) -> Vec<Row> {
    result
        .rows
        .iter()
        .map(|row| Row {
            key: (!row.key.is_empty()).then(|| key_text(result.key_type, &row.key)),
            record: (!row.record.is_empty())
                .then(|| record_text(result.record_type, &row.record)),
        })
        .collect()
}
