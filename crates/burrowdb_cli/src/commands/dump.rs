//! Dump command implementation.

use crate::format::{key_text, record_text, OutputFormat};
use burrowdb_core::{CursorMove, Environment, ErrorCode, MoveFlags};
use serde::Serialize;
use std::path::Path;

/// One printed record.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DumpEntry {
    /// Rendered key.
    pub key: String,
    /// Duplicate index.
    pub duplicate: u32,
    /// Rendered record.
    pub record: String,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    key: Option<&str>,
    db: u16,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let env = super::open_read_only(path, key)?;
    let entries = collect(&env, db, limit)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => {
            for entry in &entries {
                if entry.duplicate == 0 {
                    println!("{} => {}", entry.key, entry.record);
                } else {
                    println!("{} [{}] => {}", entry.key, entry.duplicate, entry.record);
                }
            }
            println!("{} records", entries.len());
        }
    }
    Ok(())
}

/// Walks database `db` in key order.
pub fn collect(
    env: &Environment,
    db: u16,
    limit: Option<usize>,
) -> Result<Vec<DumpEntry>, Box<dyn std::error::Error>> {
    let database = env.open_db(db).map_err(|err| {
        if err.code() == ErrorCode::PluginNotFound {
            format!("database {db} needs a comparator that is not registered: {err}")
        } else {
            err.to_string()
        }
    })?;
    let config = database.config().clone();
    let mut cursor = database.cursor(None)?;

    let mut entries = Vec::new();
    while limit.map_or(true, |limit| entries.len() < limit) {
        match cursor.move_to(CursorMove::Next, MoveFlags::NONE) {
            Ok(()) => {}
            Err(err) if err.code() == ErrorCode::KeyNotFound => break,
            Err(err) => return Err(err.into()),
        }
        entries.push(DumpEntry {
            key: key_text(config.key_type, &cursor.key()?),
            duplicate: cursor.duplicate_position()?,
            record: record_text(config.record_type, &cursor.record()?),
        });
    }
    Ok(entries)
}
