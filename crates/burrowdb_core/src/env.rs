//! Environments: one backing store holding any number of databases.

use crate::btree::BTree;
use crate::catalog::Catalog;
use crate::compare::KeyOrder;
use crate::config::{DbConfig, EnvConfig};
use crate::context::Context;
use crate::db::{Database, DbShared};
use crate::error::{CoreError, CoreResult};
use crate::page::{PageStore, Pager, StoreOptions};
use crate::stats::{EnvMetrics, MetricsSnapshot};
use crate::txn::{abort_shared, Transaction, TxnManager};
use crate::types::{validate_db_name, DbId, KeyType};
use crate::uqi::{self, UqiResult};
use burrowdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Mutable state that exists only while the environment is open.
pub(crate) struct EnvCore {
    pub pager: Pager,
    pub catalog: Catalog,
}

/// State shared by the environment handle and everything opened from it.
pub(crate) struct EnvShared {
    pub context: Arc<Context>,
    pub metrics: Arc<EnvMetrics>,
    pub txns: TxnManager,
    pub page_size: u32,
    config: EnvConfig,
    path: Option<PathBuf>,
    core: RwLock<Option<EnvCore>>,
    open_dbs: Mutex<HashMap<DbId, Weak<DbShared>>>,
}

impl EnvShared {
    pub(crate) fn report<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        self.context.report(result)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.core.read().is_some()
    }

    pub(crate) fn is_transactional(&self) -> bool {
        self.config.enable_transactions
    }

    pub(crate) fn read_core(&self) -> CoreResult<MappedRwLockReadGuard<'_, EnvCore>> {
        RwLockReadGuard::try_map(self.core.read(), Option::as_ref)
            .map_err(|_| CoreError::not_ready("environment is closed"))
    }

    fn write_core(&self) -> CoreResult<MappedRwLockWriteGuard<'_, EnvCore>> {
        RwLockWriteGuard::try_map(self.core.write(), Option::as_mut)
            .map_err(|_| CoreError::not_ready("environment is closed"))
    }

    /// Runs one mutation atomically.
    ///
    /// Page writes go into a pager batch and the catalog is snapshotted;
    /// an error from `f` rolls both back.
    pub(crate) fn write_op<T>(
        &self,
        f: impl FnOnce(&Pager, &mut Catalog) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut guard = self.write_core()?;
        if self.config.read_only {
            return Err(CoreError::WriteProtected);
        }
        let core = &mut *guard;
        core.pager.begin_batch()?;
        let saved = core.catalog.clone();
        match f(&core.pager, &mut core.catalog) {
            Ok(value) => {
                core.pager.commit_batch();
                Ok(value)
            }
            Err(err) => {
                core.pager.rollback_batch();
                core.catalog = saved;
                Err(err)
            }
        }
    }

    pub(crate) fn check_txn(&self, txn: &Transaction) -> CoreResult<()> {
        if std::ptr::eq(Arc::as_ptr(txn.env()), self) {
            Ok(())
        } else {
            Err(CoreError::invalid_parameter(
                "transaction belongs to another environment",
            ))
        }
    }

    pub(crate) fn forget_db(&self, id: DbId) {
        self.open_dbs.lock().remove(&id);
    }

    fn open_handle(&self, id: DbId) -> Option<Arc<DbShared>> {
        self.open_dbs
            .lock()
            .get(&id)
            .and_then(Weak::upgrade)
            .filter(|db| db.is_open())
    }

    /// Builds the key order of a database, resolving named comparators.
    fn key_order(&self, config: &DbConfig) -> CoreResult<KeyOrder> {
        match (config.key_type, &config.custom_compare_name) {
            (KeyType::Custom, Some(name)) => {
                let compare = self
                    .context
                    .compare(name)
                    .ok_or_else(|| CoreError::plugin_not_found(name.clone()))?;
                Ok(KeyOrder::Custom(Some(compare)))
            }
            (key_type, _) => Ok(KeyOrder::for_key_type(key_type, None)),
        }
    }

    fn close(&self) -> CoreResult<()> {
        let mut guard = self.core.write();
        let Some(core) = guard.as_ref() else {
            return Ok(());
        };
        core.pager
            .flush(&core.catalog.encode(), self.config.enable_fsync)?;

        for txn in self.txns.active() {
            // already finished transactions report NotReady here
            let _ = abort_shared(self, &txn);
        }
        for db in self.open_dbs.lock().drain().filter_map(|(_, db)| db.upgrade()) {
            db.mark_closed();
        }
        *guard = None;
        tracing::info!(path = ?self.path, "closed environment");
        Ok(())
    }
}

/// Summary of an open environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvInfo {
    /// Page size in bytes.
    pub page_size: u32,
    /// File format version (major, minor).
    pub format_version: (u16, u16),
    /// Pages are encrypted.
    pub encrypted: bool,
    /// Pages carry a CRC32 trailer.
    pub crc32: bool,
    /// Nothing is persisted.
    pub in_memory: bool,
    /// Writes are rejected.
    pub read_only: bool,
    /// Transactions can be started.
    pub transactions: bool,
    /// Pages in the store, header included.
    pub page_count: u64,
    /// Pages on the freelist.
    pub freelist_pages: u64,
    /// Number of databases.
    pub databases: usize,
}

/// An open environment.
///
/// # Example
///
/// ```rust,ignore
/// use burrowdb_core::{DbConfig, EnvConfig, Environment, InsertFlags};
///
/// let env = Environment::create("data.brw", EnvConfig::default())?;
/// let db = env.create_db(1, DbConfig::default())?;
/// db.insert(None, b"key", b"value", InsertFlags::NONE)?;
/// assert_eq!(db.find(None, b"key")?, b"value");
/// env.close()?;
/// ```
///
/// Closing the environment cascades: open transactions are aborted and
/// database handles and cursors become unusable (`NotReady`). Dropping the
/// handle closes it.
pub struct Environment {
    shared: Arc<EnvShared>,
}

impl Environment {
    /// Creates a new environment file, replacing an existing one.
    ///
    /// With `config.in_memory` the path is ignored and nothing is written
    /// to disk.
    ///
    /// # Errors
    ///
    /// - `InvParameter` / `InvPageSize` for an invalid configuration
    /// - `WouldBlock` if another handle holds the file lock
    /// - `IoError` if the file cannot be created
    pub fn create(path: impl AsRef<Path>, config: EnvConfig) -> CoreResult<Self> {
        let context = Arc::clone(&config.context);
        context.report(Self::create_inner(path.as_ref(), config))
    }

    /// Creates an in-memory environment.
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create).
    pub fn create_in_memory(config: EnvConfig) -> CoreResult<Self> {
        let config = config.in_memory(true);
        let context = Arc::clone(&config.context);
        context.report(Self::create_inner(Path::new(""), config))
    }

    fn create_inner(path: &Path, config: EnvConfig) -> CoreResult<Self> {
        config.validate()?;
        if config.read_only {
            return Err(CoreError::invalid_parameter(
                "a read-only environment cannot be created",
            ));
        }

        let backend: Box<dyn StorageBackend> = if config.in_memory {
            Box::new(InMemoryBackend::new())
        } else {
            let file = FileBackend::create(path, config.file_mode)?;
            file.try_lock_exclusive()?;
            Box::new(file)
        };
        let store = PageStore::create(backend, &store_options(&config))?;
        let metrics = Arc::new(EnvMetrics::new());
        let pager = Pager::create(
            store,
            config.cache_size,
            config.cache_unlimited,
            Arc::clone(&metrics),
        )?;

        tracing::info!(
            path = %path.display(),
            in_memory = config.in_memory,
            page_size = config.page_size,
            "created environment"
        );
        let path = (!config.in_memory).then(|| path.to_path_buf());
        Ok(Self::assemble(config, path, pager, Catalog::default(), metrics))
    }

    /// Opens an existing environment file.
    ///
    /// The page size stored in the file wins over `config.page_size`.
    ///
    /// # Errors
    ///
    /// - `FileNotFound` if the file does not exist
    /// - `InvFileHeader` / `InvFileVersion` for foreign or incompatible files
    /// - `InvParameter` if the encryption key does not fit the file, or for
    ///   an in-memory configuration
    /// - `IntegrityViolated` for a wrong encryption key or damaged pages
    /// - `WouldBlock` if another handle holds the file lock
    pub fn open(path: impl AsRef<Path>, config: EnvConfig) -> CoreResult<Self> {
        let context = Arc::clone(&config.context);
        context.report(Self::open_inner(path.as_ref(), config))
    }

    fn open_inner(path: &Path, config: EnvConfig) -> CoreResult<Self> {
        config.validate()?;
        if config.in_memory {
            return Err(CoreError::invalid_parameter(
                "an in-memory environment cannot be opened",
            ));
        }

        let file = FileBackend::open(path, config.read_only)?;
        if !config.read_only {
            file.try_lock_exclusive()?;
        }
        let store = PageStore::open(Box::new(file), &store_options(&config))?;
        let metrics = Arc::new(EnvMetrics::new());
        let (pager, catalog) = Pager::open(
            store,
            config.cache_size,
            config.cache_unlimited,
            config.read_only,
            Arc::clone(&metrics),
        )?;
        let catalog = Catalog::decode(&catalog)?;

        tracing::info!(
            path = %path.display(),
            page_size = pager.page_size(),
            databases = catalog.len(),
            read_only = config.read_only,
            "opened environment"
        );
        Ok(Self::assemble(
            config,
            Some(path.to_path_buf()),
            pager,
            catalog,
            metrics,
        ))
    }

    fn assemble(
        config: EnvConfig,
        path: Option<PathBuf>,
        pager: Pager,
        catalog: Catalog,
        metrics: Arc<EnvMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(EnvShared {
                context: Arc::clone(&config.context),
                metrics,
                txns: TxnManager::new(),
                page_size: pager.page_size() as u32,
                config,
                path,
                core: RwLock::new(Some(EnvCore { pager, catalog })),
                open_dbs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the engine context of this environment.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.shared.context
    }

    /// Returns the backing file, `None` for in-memory environments.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    /// Returns true until [`close`](Self::close).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Returns the page size of the store.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.shared.page_size
    }

    /// Creates a database.
    ///
    /// # Errors
    ///
    /// - `InvParameter` for a name outside `1..=0xEFFF` or a bad config
    /// - `DatabaseAlreadyExists` if the name is taken
    /// - `PluginNotFound` if `custom_compare_name` is not registered
    /// - `LimitsReached` if the header page cannot hold another database
    /// - `WriteProtected` on a read-only environment
    pub fn create_db(&self, name: u16, config: DbConfig) -> CoreResult<Database> {
        let result = self.create_db_inner(name, config);
        self.shared.report(result)
    }

    fn create_db_inner(&self, name: u16, config: DbConfig) -> CoreResult<Database> {
        validate_db_name(name)?;
        let config = config.resolve(self.shared.page_size)?;
        let order = self.shared.key_order(&config)?;

        let id = self.shared.write_op(|pager, catalog| {
            if catalog.get(name).is_some() {
                return Err(CoreError::DatabaseAlreadyExists { name });
            }
            let root = BTree::create(pager)?;
            let id = catalog.insert(name, config.clone(), root)?;
            let needed = catalog.encode().len();
            if needed > pager.catalog_capacity() {
                return Err(CoreError::limits_reached(format!(
                    "catalog needs {needed} bytes, header page holds {}",
                    pager.catalog_capacity()
                )));
            }
            Ok(id)
        })?;

        tracing::info!(db = name, key_type = %config.key_type, "created database");
        let shared = Arc::new(DbShared::new(id, name, config, order));
        self.shared
            .open_dbs
            .lock()
            .insert(id, Arc::downgrade(&shared));
        Ok(Database::new(Arc::clone(&self.shared), shared))
    }

    /// Opens an existing database.
    ///
    /// # Errors
    ///
    /// - `DatabaseNotFound` if no database has that name
    /// - `DatabaseAlreadyOpen` if a handle to it is open
    /// - `PluginNotFound` if its comparator name is not registered
    pub fn open_db(&self, name: u16) -> CoreResult<Database> {
        let result = self.open_db_inner(name);
        self.shared.report(result)
    }

    fn open_db_inner(&self, name: u16) -> CoreResult<Database> {
        validate_db_name(name)?;
        let meta = self
            .shared
            .read_core()?
            .catalog
            .get(name)
            .cloned()
            .ok_or(CoreError::DatabaseNotFound { name })?;
        let order = self.shared.key_order(&meta.config)?;

        let mut open_dbs = self.shared.open_dbs.lock();
        let already_open = open_dbs
            .get(&meta.id)
            .and_then(Weak::upgrade)
            .is_some_and(|db| db.is_open());
        if already_open {
            return Err(CoreError::DatabaseAlreadyOpen { name });
        }
        let shared = Arc::new(DbShared::new(meta.id, name, meta.config, order));
        open_dbs.insert(meta.id, Arc::downgrade(&shared));
        drop(open_dbs);

        tracing::debug!(db = name, "opened database");
        Ok(Database::new(Arc::clone(&self.shared), shared))
    }

    /// Deletes a database and frees its pages.
    ///
    /// # Errors
    ///
    /// - `DatabaseNotFound` if no database has that name
    /// - `DatabaseAlreadyOpen` while a handle to it is open
    /// - `TxnStillOpen` while a transaction has changes pending in it
    pub fn erase_db(&self, name: u16) -> CoreResult<()> {
        let result = self.erase_db_inner(name);
        self.shared.report(result)
    }

    fn erase_db_inner(&self, name: u16) -> CoreResult<()> {
        validate_db_name(name)?;
        let shared = &self.shared;
        shared.write_op(|pager, catalog| {
            let meta = catalog
                .get(name)
                .cloned()
                .ok_or(CoreError::DatabaseNotFound { name })?;
            if shared.open_handle(meta.id).is_some() {
                return Err(CoreError::DatabaseAlreadyOpen { name });
            }
            if shared.txns.db_has_locks(meta.id) {
                return Err(CoreError::txn_still_open(format!(
                    "database {name} has pending transactional changes"
                )));
            }
            catalog.remove(name)?;
            // freeing pages never compares keys
            let order = KeyOrder::Bytes;
            BTree::new(pager, &order, &shared.metrics, meta.root).destroy()
        })?;
        tracing::info!(db = name, "erased database");
        Ok(())
    }

    /// Renames a database; open handles follow the new name.
    ///
    /// # Errors
    ///
    /// - `DatabaseNotFound` if `old` does not exist
    /// - `DatabaseAlreadyExists` if `new` is taken
    pub fn rename_db(&self, old: u16, new: u16) -> CoreResult<()> {
        let result = self.rename_db_inner(old, new);
        self.shared.report(result)
    }

    fn rename_db_inner(&self, old: u16, new: u16) -> CoreResult<()> {
        validate_db_name(old)?;
        validate_db_name(new)?;
        let id = self.shared.write_op(|_, catalog| {
            let id = catalog
                .get(old)
                .map(|meta| meta.id)
                .ok_or(CoreError::DatabaseNotFound { name: old })?;
            catalog.rename(old, new)?;
            Ok(id)
        })?;
        if let Some(db) = self.shared.open_handle(id) {
            db.set_name(new);
        }
        tracing::info!(old, new, "renamed database");
        Ok(())
    }

    /// Names of all databases, ascending.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` after close.
    pub fn database_names(&self) -> CoreResult<Vec<u16>> {
        let result = self.shared.read_core().map(|core| core.catalog.names());
        self.shared.report(result)
    }

    /// Configuration of a database.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` if no database has that name.
    pub fn database_config(&self, name: u16) -> CoreResult<DbConfig> {
        let result = self.shared.read_core().and_then(|core| {
            core.catalog
                .get(name)
                .map(|meta| meta.config.clone())
                .ok_or(CoreError::DatabaseNotFound { name })
        });
        self.shared.report(result)
    }

    /// Writes every modified page and the catalog to the backing store.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if writing fails.
    pub fn flush(&self) -> CoreResult<()> {
        let result = self.shared.read_core().and_then(|core| {
            core.pager
                .flush(&core.catalog.encode(), self.shared.config.enable_fsync)
        });
        self.shared.report(result)
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvParameter` unless the environment was created or opened
    /// with `enable_transactions`.
    pub fn begin_txn(&self) -> CoreResult<Transaction> {
        let result = self.begin_txn_inner();
        self.shared.report(result)
    }

    fn begin_txn_inner(&self) -> CoreResult<Transaction> {
        if !self.shared.config.enable_transactions {
            return Err(CoreError::invalid_parameter(
                "transactions are not enabled for this environment",
            ));
        }
        self.shared.read_core()?;
        let txn = self.shared.txns.begin();
        tracing::debug!(txn = %txn.id, "began transaction");
        Ok(Transaction::new(Arc::clone(&self.shared), txn))
    }

    /// Runs `f` in a transaction: commits on `Ok`, aborts on `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or of begin/commit.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction) -> CoreResult<T>,
    {
        let txn = self.begin_txn()?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if txn.is_active() {
                    txn.abort()?;
                }
                Err(err)
            }
        }
    }

    /// Runs a UQI query against the committed state.
    ///
    /// # Errors
    ///
    /// - `ParserError` for malformed queries
    /// - `DatabaseNotFound` for an unknown database
    /// - `PluginNotFound` for unknown functions or predicates
    /// - `InvParameter` for numeric aggregates over binary data
    pub fn select(&self, query: &str) -> CoreResult<UqiResult> {
        let result = uqi::execute(&self.shared, query);
        self.shared.report(result)
    }

    /// Switches an unencrypted environment to page encryption.
    ///
    /// Every page is rewritten; reopening requires the same key.
    ///
    /// # Errors
    ///
    /// - `InvParameter` for in-memory or already encrypted environments,
    ///   or an empty key
    /// - `NotImplemented` without the `encryption` feature
    /// - `WriteProtected` on a read-only environment
    pub fn enable_encryption(&self, key: &[u8]) -> CoreResult<()> {
        let result = self.enable_encryption_inner(key);
        self.shared.report(result)
    }

    fn enable_encryption_inner(&self, key: &[u8]) -> CoreResult<()> {
        if self.shared.config.in_memory {
            return Err(CoreError::invalid_parameter(
                "an in-memory environment cannot be encrypted",
            ));
        }
        if key.is_empty() {
            return Err(CoreError::invalid_parameter("encryption key is empty"));
        }
        if self.shared.config.read_only {
            return Err(CoreError::WriteProtected);
        }
        let core = self.shared.write_core()?;
        if core.pager.is_encrypted() {
            return Err(CoreError::invalid_parameter(
                "environment is already encrypted",
            ));
        }
        core.pager.encrypt_all(key, &core.catalog.encode())
    }

    /// Counters plus current pager gauges.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` after close.
    pub fn metrics(&self) -> CoreResult<MetricsSnapshot> {
        let result = self.shared.read_core().map(|core| {
            let gauges = core.pager.gauges();
            MetricsSnapshot {
                page_count: gauges.page_count,
                freelist_pages: gauges.freelist_pages,
                cached_pages: gauges.cached_pages,
                ..self.shared.metrics.snapshot()
            }
        });
        self.shared.report(result)
    }

    /// Describes the open environment.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` after close.
    pub fn info(&self) -> CoreResult<EnvInfo> {
        let config = &self.shared.config;
        let result = self.shared.read_core().map(|core| {
            let gauges = core.pager.gauges();
            EnvInfo {
                page_size: self.shared.page_size,
                format_version: core.pager.format_version(),
                encrypted: core.pager.is_encrypted(),
                crc32: core.pager.has_crc32(),
                in_memory: config.in_memory,
                read_only: config.read_only,
                transactions: config.enable_transactions,
                page_count: gauges.page_count,
                freelist_pages: gauges.freelist_pages,
                databases: core.catalog.len(),
            }
        });
        self.shared.report(result)
    }

    /// Number of transactions that have neither committed nor aborted.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.shared.txns.active_count()
    }

    /// Flushes and closes the environment, cascading to everything opened
    /// from it. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the final flush fails; the environment then
    /// stays open.
    pub fn close(&self) -> CoreResult<()> {
        let result = self.shared.close();
        self.shared.report(result)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("path", &self.shared.path)
            .field("page_size", &self.shared.page_size)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Err(err) = self.shared.close() {
            tracing::warn!(error = %err, "failed to close environment on drop");
        }
    }
}

fn store_options(config: &EnvConfig) -> StoreOptions {
    StoreOptions {
        page_size: config.page_size,
        enable_crc32: config.enable_crc32,
        encryption_key: config.encryption_key.clone(),
        custom_transform: config.page_transform.clone(),
        file_size_limit: config.file_size_limit,
        read_only: config.read_only,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InsertFlags;
    use crate::error::ErrorCode;
    use tempfile::tempdir;

    fn memory_env() -> Environment {
        Environment::create_in_memory(EnvConfig::new().page_size(1024)).unwrap()
    }

    #[test]
    fn create_and_list_databases() {
        let env = memory_env();
        env.create_db(3, DbConfig::new()).unwrap();
        env.create_db(1, DbConfig::new()).unwrap();
        assert_eq!(env.database_names().unwrap(), vec![1, 3]);

        let err = env.create_db(3, DbConfig::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DatabaseAlreadyExists);
        let err = env.create_db(0, DbConfig::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);
        let err = env.create_db(0xF000, DbConfig::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);
    }

    #[test]
    fn open_db_rules() {
        let env = memory_env();
        let db = env.create_db(1, DbConfig::new()).unwrap();
        assert_eq!(
            env.open_db(1).unwrap_err().code(),
            ErrorCode::DatabaseAlreadyOpen
        );
        assert_eq!(
            env.open_db(2).unwrap_err().code(),
            ErrorCode::DatabaseNotFound
        );

        db.close().unwrap();
        let reopened = env.open_db(1).unwrap();
        assert!(reopened.is_open());
    }

    #[test]
    fn erase_db_frees_pages() {
        let env = memory_env();
        let db = env.create_db(1, DbConfig::new()).unwrap();
        for i in 0..200u32 {
            db.insert(None, &i.to_be_bytes(), &[7u8; 40], InsertFlags::NONE)
                .unwrap();
        }
        assert_eq!(
            env.erase_db(1).unwrap_err().code(),
            ErrorCode::DatabaseAlreadyOpen
        );
        drop(db);

        env.erase_db(1).unwrap();
        assert!(env.database_names().unwrap().is_empty());
        assert!(env.metrics().unwrap().freelist_pages > 0);
        assert_eq!(
            env.erase_db(1).unwrap_err().code(),
            ErrorCode::DatabaseNotFound
        );
    }

    #[test]
    fn rename_updates_open_handle() {
        let env = memory_env();
        let db = env.create_db(1, DbConfig::new()).unwrap();
        env.create_db(2, DbConfig::new()).unwrap();

        assert_eq!(
            env.rename_db(1, 2).unwrap_err().code(),
            ErrorCode::DatabaseAlreadyExists
        );
        env.rename_db(1, 5).unwrap();
        assert_eq!(db.name(), 5);
        assert_eq!(env.database_names().unwrap(), vec![2, 5]);
    }

    #[test]
    fn missing_comparator_plugin() {
        let env = memory_env();
        let config = DbConfig::new()
            .key_type(KeyType::Custom)
            .custom_compare_name("nope");
        assert_eq!(
            env.create_db(1, config).unwrap_err().code(),
            ErrorCode::PluginNotFound
        );
    }

    #[test]
    fn close_cascades() {
        let env = Environment::create_in_memory(EnvConfig::new().enable_transactions(true)).unwrap();
        let db = env.create_db(1, DbConfig::new()).unwrap();
        let txn = env.begin_txn().unwrap();
        db.insert(Some(&txn), b"k", b"v", InsertFlags::NONE).unwrap();

        env.close().unwrap();
        env.close().unwrap();
        assert!(!env.is_open());
        assert!(!db.is_open());
        assert!(!txn.is_active());
        assert_eq!(db.find(None, b"k").unwrap_err().code(), ErrorCode::NotReady);
        db.close().unwrap();
    }

    #[test]
    fn transactions_must_be_enabled() {
        let env = memory_env();
        assert_eq!(
            env.begin_txn().unwrap_err().code(),
            ErrorCode::InvParameter
        );
    }

    #[test]
    fn file_lock_blocks_second_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env.brw");
        let env = Environment::create(&path, EnvConfig::new()).unwrap();

        let err = Environment::open(&path, EnvConfig::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::WouldBlock);

        env.close().unwrap();
        let reopened = Environment::open(&path, EnvConfig::new()).unwrap();
        assert!(reopened.is_open());
    }

    #[test]
    fn open_errors() {
        let dir = tempdir().unwrap();
        let err = Environment::open(dir.path().join("missing"), EnvConfig::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound);

        let junk = dir.path().join("junk");
        std::fs::write(&junk, vec![0xAB; 4096]).unwrap();
        let err = Environment::open(&junk, EnvConfig::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvFileHeader);

        let err = Environment::open(&junk, EnvConfig::new().in_memory(true)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env.brw");
        {
            let env = Environment::create(&path, EnvConfig::new()).unwrap();
            env.create_db(1, DbConfig::new()).unwrap();
        }
        let env = Environment::open(&path, EnvConfig::new().read_only(true)).unwrap();
        let db = env.open_db(1).unwrap();
        assert_eq!(
            db.insert(None, b"k", b"v", InsertFlags::NONE)
                .unwrap_err()
                .code(),
            ErrorCode::WriteProtected
        );
        assert_eq!(
            env.create_db(2, DbConfig::new()).unwrap_err().code(),
            ErrorCode::WriteProtected
        );
    }

    #[test]
    fn error_handler_sees_every_error_once() {
        let context = Arc::new(Context::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        context.set_error_handler(Some(Arc::new(move |code: ErrorCode, _: &str| {
            sink.lock().push(code);
        })));

        let env = Environment::create_in_memory(EnvConfig::new().context(context)).unwrap();
        let db = env.create_db(1, DbConfig::new()).unwrap();
        let _ = db.find(None, b"missing");
        let _ = env.open_db(9);
        assert_eq!(
            *seen.lock(),
            vec![ErrorCode::KeyNotFound, ErrorCode::DatabaseNotFound]
        );
    }
}
