//! UQI, a one-function aggregate query language.
//!
//! A query names a function, the stream it consumes and the database to
//! scan, optionally filtered by a predicate registered in the
//! [`Context`](crate::Context):
//!
//! ```text
//! SUM($record) FROM DATABASE 1 WHERE is_even($key)
//! DISTINCT COUNT($key) FROM DATABASE 0x10
//! TOP($record) FROM DATABASE 1 LIMIT 5
//! ```
//!
//! Builtins: `COUNT`, `SUM`, `AVERAGE`, `MIN`, `MAX`, `TOP`, `BOTTOM` and
//! `VALUE`. Function and predicate names are case-insensitive; predicates
//! are looked up by their lower-cased name. Queries read committed state
//! only.

mod aggregate;
mod parser;
mod result;

pub use result::{UqiResult, UqiRow};

use crate::btree::BTree;
use crate::compare::KeyOrder;
use crate::context::PredicateFn;
use crate::env::EnvShared;
use crate::error::{CoreError, CoreResult};
use aggregate::Source;
use parser::Input;

fn filter(predicate: &PredicateFn, input: Input, key: &[u8], record: &[u8]) -> CoreResult<bool> {
    let (key, record) = match input {
        Input::Key => (key, &[][..]),
        Input::Record => (&[][..], record),
        Input::KeyAndRecord => (key, record),
    };
    predicate(key, record).map_err(CoreError::Callback)
}

/// Parses and runs `query`.
pub(crate) fn execute(env: &EnvShared, query: &str) -> CoreResult<UqiResult> {
    let statement = parser::parse(query)?;
    if !aggregate::is_builtin(&statement.function.name) {
        return Err(CoreError::plugin_not_found(statement.function.name.clone()));
    }
    let predicate = match &statement.predicate {
        Some(call) => {
            let predicate = env
                .context
                .predicate(&call.name)
                .ok_or_else(|| CoreError::plugin_not_found(call.name.clone()))?;
            Some((predicate, call.input))
        }
        None => None,
    };

    let core = env.read_core()?;
    let meta = core
        .catalog
        .get(statement.db)
        .ok_or(CoreError::DatabaseNotFound { name: statement.db })?;
    let source = Source {
        key_type: meta.config.key_type,
        record_type: meta.config.record_type,
        input: statement.function.input,
    };
    let mut aggregate = aggregate::builtin(&statement.function.name, source, statement.limit)?;

    // scans never compare keys, so a missing custom comparator is fine here
    let order = KeyOrder::for_key_type(meta.config.key_type, None);
    let tree = BTree::new(&core.pager, &order, &env.metrics, meta.root);
    let mut visited = 0u64;
    tree.scan(|key, value| {
        let records = if statement.distinct {
            tree.load_record(value, 0)?.into_iter().collect()
        } else {
            tree.load_records(value)?
        };
        for record in &records {
            if let Some((predicate, input)) = &predicate {
                if !filter(predicate, *input, key, record)? {
                    continue;
                }
            }
            visited += 1;
            if !aggregate.visit(key, record)? {
                return Ok(false);
            }
        }
        Ok(true)
    })?;

    let result = aggregate.finish();
    tracing::debug!(
        db = statement.db,
        function = %statement.function.name,
        visited,
        rows = result.row_count(),
        "executed query"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use crate::config::{DbConfig, EnvConfig};
    use crate::db::InsertFlags;
    use crate::env::Environment;
    use crate::error::ErrorCode;
    use crate::types::{KeyType, RecordType};

    fn numbers_env() -> Environment {
        let env = Environment::create_in_memory(EnvConfig::new().page_size(1024)).unwrap();
        let db = env
            .create_db(
                1,
                DbConfig::new()
                    .key_type(KeyType::UInt32)
                    .record_type(RecordType::UInt32)
                    .enable_duplicate_keys(true),
            )
            .unwrap();
        for i in 0..100u32 {
            db.insert(None, &i.to_le_bytes(), &(i * 2).to_le_bytes(), InsertFlags::NONE)
                .unwrap();
        }
        db.insert(
            None,
            &5u32.to_le_bytes(),
            &1000u32.to_le_bytes(),
            InsertFlags::DUPLICATE,
        )
        .unwrap();
        env
    }

    #[test]
    fn count_and_distinct_count() {
        let env = numbers_env();
        let result = env.select("COUNT($key) FROM DATABASE 1").unwrap();
        assert_eq!(result.key(0), Some(&b"COUNT"[..]));
        assert_eq!(result.record_u64(0), Some(101));

        let result = env.select("distinct count($key) from database 1;").unwrap();
        assert_eq!(result.record_u64(0), Some(100));
    }

    #[test]
    fn sum_over_records_and_keys() {
        let env = numbers_env();
        let result = env.select("SUM($record) FROM DATABASE 1").unwrap();
        assert_eq!(result.record_u64(0), Some(9900 + 1000));

        let result = env.select("DISTINCT SUM($key) FROM DATABASE 1").unwrap();
        assert_eq!(result.record_u64(0), Some(4950));
    }

    #[test]
    fn predicates_filter_entries() {
        let env = numbers_env();
        env.context().register_predicate("below_ten", |key, _| {
            Ok(u32::from_le_bytes(key.try_into()?) < 10)
        });
        let result = env
            .select("COUNT($key) FROM DATABASE 1 WHERE below_ten($key)")
            .unwrap();
        assert_eq!(result.record_u64(0), Some(11));

        let err = env
            .select("COUNT($key) FROM DATABASE 1 WHERE missing($key)")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PluginNotFound);
    }

    #[test]
    fn predicate_errors_pass_through() {
        let env = numbers_env();
        env.context()
            .register_predicate("fails", |_, _| Err("predicate failed".into()));
        let err = env
            .select("COUNT($key) FROM DATABASE 1 WHERE fails($record)")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CallbackFailed);
        assert_eq!(
            err.into_callback_error().unwrap().to_string(),
            "predicate failed"
        );
    }

    #[test]
    fn rows_for_value_and_max() {
        let env = numbers_env();
        let result = env
            .select("VALUE($key, $record) FROM DATABASE 1 LIMIT 3")
            .unwrap();
        assert_eq!(result.row_count(), 3);
        assert_eq!(result.key_u64(2), Some(2));
        assert_eq!(result.record_u64(2), Some(4));

        let result = env.select("MAX($record) FROM DATABASE 1").unwrap();
        assert_eq!(result.key_u64(0), Some(5));
        assert_eq!(result.record_u64(0), Some(1000));
    }

    #[test]
    fn lookup_errors() {
        let env = numbers_env();
        assert_eq!(
            env.select("COUNT($key) FROM DATABASE 2").unwrap_err().code(),
            ErrorCode::DatabaseNotFound
        );
        assert_eq!(
            env.select("COUNT($key) FROM TABLE 1").unwrap_err().code(),
            ErrorCode::ParserError
        );
        assert_eq!(
            env.select("MEDIAN($key) FROM DATABASE 1").unwrap_err().code(),
            ErrorCode::PluginNotFound
        );
        // unknown functions fail before the database is looked up
        assert_eq!(
            env.select("MEDIAN($key) FROM DATABASE 2").unwrap_err().code(),
            ErrorCode::PluginNotFound
        );
    }
}
