//! Verify command implementation.

use burrowdb_core::{Environment, ErrorCode, IntegrityReport};
use std::path::Path;

/// Outcome for one database.
#[derive(Debug)]
pub enum DbCheck {
    /// The tree is consistent.
    Passed(IntegrityReport),
    /// The database uses a comparator this tool cannot resolve.
    Skipped(String),
    /// The tree is damaged.
    Failed(String),
}

/// Runs the verify command.
pub fn run(
    path: &Path,
    key: Option<&str>,
    only: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying environment at {}", path.display());
    println!();

    let env = super::open_read_only(path, key)?;
    let names = match only {
        Some(name) => vec![name],
        None => env.database_names()?,
    };

    let mut failures = 0;
    for name in names {
        match check(&env, name) {
            DbCheck::Passed(report) => println!(
                "  [{name}] ok: {} keys, {} records, depth {}, {} leaves",
                report.keys, report.records, report.depth, report.leaves
            ),
            DbCheck::Skipped(reason) => println!("  [{name}] skipped: {reason}"),
            DbCheck::Failed(reason) => {
                failures += 1;
                println!("  [{name}] FAILED: {reason}");
            }
        }
    }

    println!();
    if failures == 0 {
        println!("✓ Environment verification passed");
        Ok(())
    } else {
        println!("✗ Environment verification failed");
        Err(format!("{failures} database(s) failed verification").into())
    }
}

/// Opens database `name` and checks its tree.
pub fn check(env: &Environment, name: u16) -> DbCheck {
    let db = match env.open_db(name) {
        Ok(db) => db,
        Err(err) if err.code() == ErrorCode::PluginNotFound => {
            return DbCheck::Skipped(err.to_string())
        }
        Err(err) => return DbCheck::Failed(err.to_string()),
    };
    match db.check_integrity() {
        Ok(report) => {
            tracing::debug!(db = name, keys = report.keys, "database verified");
            DbCheck::Passed(report)
        }
        Err(err) => DbCheck::Failed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrowdb_core::{DbConfig, EnvConfig, InsertFlags, KeyType};

    #[test]
    fn passes_skips_and_fails() {
        let env = Environment::create_in_memory(EnvConfig::new().page_size(1024)).unwrap();
        env.context()
            .register_compare("reverse", |a: &[u8], b: &[u8]| Ok(b.cmp(a)));
        let db = env.create_db(1, DbConfig::new()).unwrap();
        for i in 0..300u32 {
            db.insert(None, &i.to_be_bytes(), b"x", InsertFlags::NONE)
                .unwrap();
        }
        drop(db);
        drop(
            env.create_db(
                2,
                DbConfig::new()
                    .key_type(KeyType::Custom)
                    .custom_compare_name("reverse"),
            )
            .unwrap(),
        );
        env.context().unregister_compare("reverse");

        match check(&env, 1) {
            DbCheck::Passed(report) => assert_eq!(report.keys, 300),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(check(&env, 2), DbCheck::Skipped(_)));
        assert!(matches!(check(&env, 3), DbCheck::Failed(_)));
    }
}
