//! CLI command implementations.

pub mod dump;
pub mod info;
pub mod select;
pub mod verify;

use burrowdb_core::{EnvConfig, Environment};
use std::path::Path;

/// Opens an environment for inspection; nothing is ever written.
pub fn open_read_only(
    path: &Path,
    key: Option<&str>,
) -> Result<Environment, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("no environment found at {}", path.display()).into());
    }
    let mut config = EnvConfig::new().read_only(true);
    if let Some(key) = key {
        config = config.encryption_key(key.as_bytes().to_vec());
    }
    let env = Environment::open(path, config)?;
    tracing::debug!(path = %path.display(), "opened environment");
    Ok(env)
}
