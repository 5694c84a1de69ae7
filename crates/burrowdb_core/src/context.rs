//! Engine context: named comparators, query predicates and the error hook.
//!
//! A [`Context`] replaces process-wide registries. Every environment holds an
//! `Arc<Context>`; environments that should see the same registrations share
//! one. Registrations live exactly as long as the last `Arc` does.

use crate::error::{BoxError, CoreResult, ErrorCode};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// User key comparator. Must implement a consistent total order.
pub type CompareFn = Arc<dyn Fn(&[u8], &[u8]) -> Result<Ordering, BoxError> + Send + Sync>;

/// Query predicate for `WHERE` clauses; receives the key and the record.
pub type PredicateFn = Arc<dyn Fn(&[u8], &[u8]) -> Result<bool, BoxError> + Send + Sync>;

/// Observer invoked for every error returned by a public operation.
pub type ErrorHandler = Arc<dyn Fn(ErrorCode, &str) + Send + Sync>;

/// Wraps a closure as a [`CompareFn`].
pub fn compare_fn<F>(f: F) -> CompareFn
where
    F: Fn(&[u8], &[u8]) -> Result<Ordering, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a closure as a [`PredicateFn`].
pub fn predicate_fn<F>(f: F) -> PredicateFn
where
    F: Fn(&[u8], &[u8]) -> Result<bool, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registry of callbacks shared by one or more environments.
#[derive(Default)]
pub struct Context {
    comparators: RwLock<HashMap<String, CompareFn>>,
    predicates: RwLock<HashMap<String, PredicateFn>>,
    error_handler: RwLock<Option<ErrorHandler>>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named comparator, replacing any previous one.
    ///
    /// Databases created with a `custom_compare_name` resolve it here when
    /// they are created or opened.
    pub fn register_compare<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&[u8], &[u8]) -> Result<Ordering, BoxError> + Send + Sync + 'static,
    {
        self.comparators.write().insert(name.into(), Arc::new(f));
    }

    /// Removes a named comparator. Returns true if it existed.
    pub fn unregister_compare(&self, name: &str) -> bool {
        self.comparators.write().remove(name).is_some()
    }

    /// Looks up a named comparator.
    #[must_use]
    pub fn compare(&self, name: &str) -> Option<CompareFn> {
        self.comparators.read().get(name).cloned()
    }

    /// Registers a named query predicate, replacing any previous one.
    ///
    /// Predicate names are case-insensitive.
    pub fn register_predicate<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&[u8], &[u8]) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.predicates
            .write()
            .insert(name.into().to_ascii_lowercase(), Arc::new(f));
    }

    /// Removes a named query predicate. Returns true if it existed.
    pub fn unregister_predicate(&self, name: &str) -> bool {
        self.predicates
            .write()
            .remove(&name.to_ascii_lowercase())
            .is_some()
    }

    /// Looks up a named query predicate.
    #[must_use]
    pub fn predicate(&self, name: &str) -> Option<PredicateFn> {
        self.predicates
            .read()
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    /// Installs or removes the error handler.
    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        *self.error_handler.write() = handler;
    }

    /// Passes an error result through the handler before it reaches the caller.
    pub(crate) fn report<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(err) = &result {
            let handler = self.error_handler.read().clone();
            if let Some(handler) = handler {
                handler(err.code(), &err.to_string());
            }
        }
        result
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut comparators: Vec<String> = self.comparators.read().keys().cloned().collect();
        comparators.sort();
        let mut predicates: Vec<String> = self.predicates.read().keys().cloned().collect();
        predicates.sort();
        f.debug_struct("Context")
            .field("comparators", &comparators)
            .field("predicates", &predicates)
            .field("error_handler", &self.error_handler.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use parking_lot::Mutex;

    #[test]
    fn register_and_lookup_compare() {
        let ctx = Context::new();
        assert!(ctx.compare("reverse").is_none());

        ctx.register_compare("reverse", |a, b| Ok(b.cmp(a)));
        let cmp = ctx.compare("reverse").unwrap();
        assert_eq!(cmp(b"a", b"b").unwrap(), Ordering::Greater);

        assert!(ctx.unregister_compare("reverse"));
        assert!(!ctx.unregister_compare("reverse"));
    }

    #[test]
    fn register_predicate() {
        let ctx = Context::new();
        ctx.register_predicate("non_empty", |_key, record| Ok(!record.is_empty()));

        let pred = ctx.predicate("non_empty").unwrap();
        assert!(pred(b"k", b"v").unwrap());
        assert!(!pred(b"k", b"").unwrap());
        assert!(ctx.predicate("Non_Empty").is_some());
        assert!(ctx.unregister_predicate("NON_EMPTY"));
    }

    #[test]
    fn report_invokes_handler_once() {
        let ctx = Context::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        ctx.set_error_handler(Some(Arc::new(move |code: ErrorCode, msg: &str| {
            sink.lock().push((code, msg.to_string()));
        })));

        let ok: CoreResult<u32> = ctx.report(Ok(1));
        assert_eq!(ok.unwrap(), 1);
        assert!(seen.lock().is_empty());

        let err: CoreResult<u32> = ctx.report(Err(CoreError::KeyNotFound));
        assert!(err.is_err());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, ErrorCode::KeyNotFound);
        assert_eq!(seen[0].1, "key not found");
    }

    #[test]
    fn handler_can_be_removed() {
        let ctx = Context::new();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        ctx.set_error_handler(Some(Arc::new(move |_: ErrorCode, _: &str| *counter.lock() += 1)));
        ctx.set_error_handler(None);

        let _: CoreResult<()> = ctx.report(Err(CoreError::KeyNotFound));
        assert_eq!(*calls.lock(), 0);
    }
}
