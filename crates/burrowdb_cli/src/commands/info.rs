//! Info command implementation.

use crate::format::{format_size, OutputFormat};
use burrowdb_core::{Environment, ErrorCode};
use serde::Serialize;
use std::path::Path;

/// Environment description.
#[derive(Debug, Serialize)]
pub struct InfoResult {
    /// Environment path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Page size in bytes.
    pub page_size: u32,
    /// File format version.
    pub format_version: String,
    /// Pages are encrypted.
    pub encrypted: bool,
    /// Pages carry a CRC32 trailer.
    pub crc32: bool,
    /// Allocated pages including the header page.
    pub page_count: u64,
    /// Pages on the freelist.
    pub freelist_pages: u64,
    /// Databases in the catalog.
    pub databases: Vec<DatabaseInfo>,
}

/// Catalog entry of one database.
#[derive(Debug, Serialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: u16,
    /// Key type.
    pub key_type: String,
    /// Fixed key size, if any.
    pub key_size: Option<u16>,
    /// Record type.
    pub record_type: String,
    /// Fixed record size, if any.
    pub record_size: Option<u32>,
    /// Duplicate keys are allowed.
    pub duplicates: bool,
    /// Registered comparator name, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparator: Option<String>,
    /// Number of records (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
}

/// Runs the info command.
pub fn run(
    path: &Path,
    key: Option<&str>,
    counts: bool,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let env = super::open_read_only(path, key)?;
    let result = collect(&env, path, counts)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

/// Gathers the description of an open environment.
pub fn collect(
    env: &Environment,
    path: &Path,
    counts: bool,
) -> Result<InfoResult, Box<dyn std::error::Error>> {
    let info = env.info()?;
    let mut databases = Vec::new();
    for name in env.database_names()? {
        let config = env.database_config(name)?;
        let records = if counts {
            count_records(env, name)?
        } else {
            None
        };
        databases.push(DatabaseInfo {
            name,
            key_type: config.key_type.to_string(),
            key_size: config.key_size,
            record_type: config.record_type.to_string(),
            record_size: config.record_size,
            duplicates: config.enable_duplicate_keys,
            comparator: config.custom_compare_name,
            records,
        });
    }

    Ok(InfoResult {
        path: path.display().to_string(),
        file_size: std::fs::metadata(path)?.len(),
        page_size: info.page_size,
        format_version: format!("{}.{}", info.format_version.0, info.format_version.1),
        encrypted: info.encrypted,
        crc32: info.crc32,
        page_count: info.page_count,
        freelist_pages: info.freelist_pages,
        databases,
    })
}

/// Counts through a query so that databases with unregistered comparators
/// are counted too.
fn count_records(env: &Environment, name: u16) -> Result<Option<u64>, Box<dyn std::error::Error>> {
    match env.select(&format!("COUNT($key) FROM DATABASE {name}")) {
        Ok(result) => Ok(result.record_u64(0)),
        Err(err) if err.code() == ErrorCode::PluginNotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn print_text_output(result: &InfoResult) {
    println!("burrowdb Environment");
    println!("====================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  File size:      {}", format_size(result.file_size));
    println!("  Page size:      {}", result.page_size);
    println!("  Format version: {}", result.format_version);
    println!("  Encrypted:      {}", result.encrypted);
    println!("  CRC32:          {}", result.crc32);
    println!("  Pages:          {}", result.page_count);
    println!("  Free pages:     {}", result.freelist_pages);
    println!();
    println!("Databases: {}", result.databases.len());
    for db in &result.databases {
        let mut line = format!("  [{}] key {}", db.name, db.key_type);
        if let Some(size) = db.key_size {
            line.push_str(&format!("/{size}"));
        }
        line.push_str(&format!(", record {}", db.record_type));
        if let Some(size) = db.record_size {
            line.push_str(&format!("/{size}"));
        }
        if db.duplicates {
            line.push_str(", duplicates");
        }
        if let Some(name) = &db.comparator {
            line.push_str(&format!(", comparator {name}"));
        }
        if let Some(records) = db.records {
            line.push_str(&format!(", {records} records"));
        }
        println!("{line}");
    }
}
