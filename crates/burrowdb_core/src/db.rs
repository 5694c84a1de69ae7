//! Database handles and the key/record operations shared with cursors.

use crate::btree::{BTree, Seek, TreeReport};
use crate::catalog::DbMeta;
use crate::compare::{read_unsigned, KeyOrder};
use crate::config::{max_key_size, DbConfig};
use crate::context::CompareFn;
use crate::cursor::{Cursor, Position};
use crate::env::EnvShared;
use crate::error::{CoreError, CoreResult};
use crate::txn::{DbChanges, Pending, Transaction, TxnShared};
use crate::types::{DbId, KeyType};
use crate::view::View;
use parking_lot::RwLock;
use std::cmp::Ordering as KeyOrdering;
use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

/// Flags for [`Database::insert`] and [`Cursor::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InsertFlags(u32);

impl InsertFlags {
    /// Fail with `DuplicateKey` if the key exists.
    pub const NONE: Self = Self(0);
    /// Replace the record of an existing key.
    pub const OVERWRITE: Self = Self(0x0001);
    /// Add a duplicate record to an existing key.
    pub const DUPLICATE: Self = Self(0x0002);
    /// With `DUPLICATE`: insert before the cursor's duplicate.
    pub const DUPLICATE_INSERT_BEFORE: Self = Self(0x0004);
    /// With `DUPLICATE`: insert after the cursor's duplicate.
    pub const DUPLICATE_INSERT_AFTER: Self = Self(0x0008);
    /// With `DUPLICATE`: insert as the first duplicate.
    pub const DUPLICATE_INSERT_FIRST: Self = Self(0x0010);
    /// With `DUPLICATE`: insert as the last duplicate (the default).
    pub const DUPLICATE_INSERT_LAST: Self = Self(0x0020);
    /// Keys arrive in ascending order. Accepted and ignored.
    pub const HINT_APPEND: Self = Self(0x0008_0000);

    const ALL: u32 = 0x0001 | 0x0002 | 0x0004 | 0x0008 | 0x0010 | 0x0020 | 0x0008_0000;

    /// Builds flags from raw bits; unknown bits are rejected on use.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn mode(self, in_cursor: bool, duplicates: bool) -> CoreResult<InsertMode> {
        if self.0 & !Self::ALL != 0 {
            return Err(CoreError::invalid_parameter(format!(
                "unknown insert flags {:#x}",
                self.0 & !Self::ALL
            )));
        }
        let overwrite = self.contains(Self::OVERWRITE);
        let duplicate = self.contains(Self::DUPLICATE);
        if overwrite && duplicate {
            return Err(CoreError::invalid_parameter(
                "OVERWRITE and DUPLICATE cannot be combined",
            ));
        }

        let positions: Vec<DupPosition> = [
            (Self::DUPLICATE_INSERT_BEFORE, DupPosition::Before),
            (Self::DUPLICATE_INSERT_AFTER, DupPosition::After),
            (Self::DUPLICATE_INSERT_FIRST, DupPosition::First),
            (Self::DUPLICATE_INSERT_LAST, DupPosition::Last),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, position)| position)
        .collect();
        if positions.len() > 1 {
            return Err(CoreError::invalid_parameter(
                "only one duplicate position flag may be given",
            ));
        }
        let position = positions.first().copied();
        if position.is_some() && !duplicate {
            return Err(CoreError::invalid_parameter(
                "duplicate position flags require DUPLICATE",
            ));
        }
        if duplicate && !duplicates {
            return Err(CoreError::invalid_parameter(
                "database does not allow duplicate keys",
            ));
        }
        if matches!(position, Some(DupPosition::Before | DupPosition::After)) && !in_cursor {
            return Err(CoreError::invalid_parameter(
                "DUPLICATE_INSERT_BEFORE/AFTER need a cursor",
            ));
        }

        Ok(if overwrite {
            InsertMode::Overwrite
        } else if duplicate {
            InsertMode::Duplicate(position.unwrap_or(DupPosition::Last))
        } else {
            InsertMode::Unique
        })
    }
}

impl BitOr for InsertFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DupPosition {
    First,
    Last,
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertMode {
    Unique,
    Overwrite,
    Duplicate(DupPosition),
}

/// Match rule of an approximate lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchMode {
    /// The key itself.
    Exact,
    /// The largest key smaller than the probe.
    Lt,
    /// The smallest key greater than the probe.
    Gt,
    /// The key itself, or the largest smaller key.
    Leq,
    /// The key itself, or the smallest greater key.
    Geq,
}

impl MatchMode {
    fn seek(self) -> Option<Seek> {
        match self {
            Self::Exact => None,
            Self::Lt => Some(Seek::Lt),
            Self::Gt => Some(Seek::Gt),
            Self::Leq => Some(Seek::Le),
            Self::Geq => Some(Seek::Ge),
        }
    }
}

/// Result of [`Database::check_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Distinct keys.
    pub keys: u64,
    /// Records, duplicates included.
    pub records: u64,
    /// Levels from the root to the leaves.
    pub depth: u32,
    /// Leaf nodes.
    pub leaves: u64,
    /// Internal nodes.
    pub internal_nodes: u64,
}

impl From<TreeReport> for IntegrityReport {
    fn from(report: TreeReport) -> Self {
        Self {
            keys: report.keys,
            records: report.records,
            depth: report.depth,
            leaves: report.leaves,
            internal_nodes: report.internal_nodes,
        }
    }
}

/// Records of this size or smaller cannot be read or written partially.
const PARTIAL_MIN_RECORD: usize = 8;

/// The record side of an insert.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RecordWrite<'r> {
    /// The whole record.
    Full(&'r [u8]),
    /// `data` written at `offset` into a record of `record_size` bytes.
    Partial {
        record_size: usize,
        offset: usize,
        data: &'r [u8],
    },
}

impl RecordWrite<'_> {
    /// Builds the stored record; `base` is the record being replaced.
    pub(crate) fn apply(self, base: &[u8]) -> CoreResult<Vec<u8>> {
        match self {
            Self::Full(record) => Ok(record.to_vec()),
            Self::Partial {
                record_size,
                offset,
                data,
            } => {
                check_partial_write(record_size, offset, data.len())?;
                Ok(splice(base, record_size, offset, data))
            }
        }
    }
}

/// Returns up to `size` bytes of `record` starting at `offset`.
pub(crate) fn read_partial(record: &[u8], offset: usize, size: usize) -> CoreResult<Vec<u8>> {
    if record.len() <= PARTIAL_MIN_RECORD {
        return Err(CoreError::invalid_parameter(format!(
            "partial reads need records larger than {PARTIAL_MIN_RECORD} bytes"
        )));
    }
    if offset > record.len() {
        return Err(CoreError::invalid_parameter(format!(
            "partial offset {offset} is past the end of a {} byte record",
            record.len()
        )));
    }
    let end = offset.saturating_add(size).min(record.len());
    Ok(record[offset..end].to_vec())
}

fn check_partial_write(record_size: usize, offset: usize, len: usize) -> CoreResult<()> {
    if record_size <= PARTIAL_MIN_RECORD {
        return Err(CoreError::invalid_parameter(format!(
            "partial writes need records larger than {PARTIAL_MIN_RECORD} bytes"
        )));
    }
    match offset.checked_add(len) {
        Some(end) if end <= record_size => Ok(()),
        _ => Err(CoreError::invalid_parameter(format!(
            "partial range {offset}+{len} exceeds the record size {record_size}"
        ))),
    }
}

/// Resizes `base` to `record_size` (zero-filled) and copies `data` in at
/// `offset`. The range must have been checked.
fn splice(base: &[u8], record_size: usize, offset: usize, data: &[u8]) -> Vec<u8> {
    let mut record = base.to_vec();
    record.resize(record_size, 0);
    record[offset..offset + data.len()].copy_from_slice(data);
    record
}

/// State of an open database shared by its handle, cursors and
/// transactions.
pub(crate) struct DbShared {
    pub id: DbId,
    name: AtomicU16,
    pub config: DbConfig,
    order: RwLock<KeyOrder>,
    open: AtomicBool,
}

impl DbShared {
    pub(crate) fn new(id: DbId, name: u16, config: DbConfig, order: KeyOrder) -> Self {
        Self {
            id,
            name: AtomicU16::new(name),
            config,
            order: RwLock::new(order),
            open: AtomicBool::new(true),
        }
    }

    pub(crate) fn name(&self) -> u16 {
        self.name.load(Ordering::Acquire)
    }

    pub(crate) fn set_name(&self, name: u16) {
        self.name.store(name, Ordering::Release);
    }

    /// Snapshot of the key order; operations never hold the lock.
    pub(crate) fn order(&self) -> KeyOrder {
        self.order.read().clone()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

/// A database bound to an optional transaction.
pub(crate) struct DbAccess<'a> {
    pub env: &'a Arc<EnvShared>,
    pub db: &'a Arc<DbShared>,
    pub txn: Option<&'a Arc<TxnShared>>,
}

impl DbAccess<'_> {
    fn ensure_open(&self) -> CoreResult<()> {
        if self.db.is_open() {
            Ok(())
        } else {
            Err(CoreError::not_ready(format!(
                "database {} is closed",
                self.db.name()
            )))
        }
    }

    /// Runs `f` against the view seen by the bound transaction.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&View<'_>) -> CoreResult<T>) -> CoreResult<T> {
        self.ensure_open()?;
        let core = self.env.read_core()?;
        let order = self.db.order();
        let root = core.catalog.require(self.db.id)?.root;
        let tree = BTree::new(&core.pager, &order, &self.env.metrics, root);
        match self.txn {
            Some(txn) => {
                let state = txn.state.lock();
                state.ensure_active()?;
                f(&View::new(tree, &order, state.changes.get(&self.db.id)))
            }
            None => f(&View::new(tree, &order, None)),
        }
    }

    /// Replaces the records of one key.
    ///
    /// `resolve` picks the key (and may update the catalog entry, for record
    /// numbers); `f` maps the visible records to the new ones. Outside a
    /// transaction the tree is changed directly, inside one the result is
    /// staged and the key locked.
    pub(crate) fn write<T>(
        &self,
        resolve: impl FnOnce(&mut DbMeta) -> CoreResult<Vec<u8>>,
        f: impl FnOnce(&[u8], Option<Vec<Vec<u8>>>) -> CoreResult<(Option<Vec<Vec<u8>>>, T)>,
    ) -> CoreResult<(Vec<u8>, T)> {
        self.ensure_open()?;
        let order = self.db.order();
        let env = self.env.as_ref();
        env.write_op(|pager, catalog| {
            let meta = catalog.require_mut(self.db.id)?;
            let key = resolve(meta)?;
            let mut tree = BTree::new(pager, &order, &env.metrics, meta.root);

            let Some(txn) = self.txn else {
                env.txns.check_unlocked(self.db.id, &key, None)?;
                let output = tree.modify(&key, |current| f(&key, current))?;
                meta.root = tree.root();
                return Ok((key, output));
            };

            env.txns.check_unlocked(self.db.id, &key, Some(txn.id))?;
            let mut state = txn.state.lock();
            state.ensure_active()?;
            let staged = match state.changes.get(&self.db.id) {
                Some(changes) => changes.get(&order, &key)?.cloned(),
                None => None,
            };
            let current = match staged {
                Some(pending) => pending.records().map(<[Vec<u8>]>::to_vec),
                None => tree.get(&key)?,
            };
            let (records, output) = f(&key, current)?;

            let changes = state
                .changes
                .entry(self.db.id)
                .or_insert_with(|| DbChanges::new(Arc::clone(self.db)));
            let position = changes.find(&order, &key)?;
            env.txns.lock_key(self.db.id, &key, txn.id)?;
            changes.put_at(position, key.clone(), Pending::from_records(records));
            Ok((key, output))
        })
    }

    /// Inserts a record; returns the key and the duplicate index it landed on.
    ///
    /// `cursor` is the position of the inserting cursor, if any; positional
    /// duplicate flags are relative to it when it sits on the same key. A
    /// partial write replaces the record it lands on (or starts from zeros)
    /// unless `DUPLICATE` is given.
    pub(crate) fn insert(
        &self,
        key: &[u8],
        record: RecordWrite<'_>,
        flags: InsertFlags,
        in_cursor: bool,
        cursor: Option<&Position>,
    ) -> CoreResult<(Vec<u8>, usize)> {
        let config = &self.db.config;
        let mut mode = flags.mode(in_cursor, config.enable_duplicate_keys)?;
        match record {
            RecordWrite::Full(record) => check_record(config, record)?,
            RecordWrite::Partial {
                record_size,
                offset,
                data,
            } => {
                self.check_partial()?;
                check_partial_write(record_size, offset, data.len())?;
                if mode == InsertMode::Unique {
                    mode = InsertMode::Overwrite;
                }
            }
        }

        let record_number = config.key_type.is_record_number();
        if !(record_number && key.is_empty()) {
            check_key(config, self.env.page_size, key)?;
        }

        let order = self.db.order();
        self.write(
            |meta| {
                if record_number {
                    assign_record_number(meta, key, mode)
                } else {
                    Ok(key.to_vec())
                }
            },
            |key, current| {
                let cursor_dup = match cursor {
                    Some(position) if order.compare(&position.key, key)? == KeyOrdering::Equal => {
                        Some(position.dup)
                    }
                    _ => None,
                };
                let base = match (&current, record, mode) {
                    (Some(records), RecordWrite::Partial { .. }, InsertMode::Overwrite) => {
                        records[overwrite_index(records.len(), cursor_dup)?].as_slice()
                    }
                    _ => &[][..],
                };
                let record = record.apply(base)?;
                let (records, index) = apply_insert(current, record, mode, cursor_dup)?;
                Ok((Some(records), index))
            },
        )
    }

    /// Removes a key with all its duplicates.
    pub(crate) fn erase(&self, key: &[u8]) -> CoreResult<()> {
        check_key(&self.db.config, self.env.page_size, key)?;
        self.write(
            |_| Ok(key.to_vec()),
            |_, current| match current {
                Some(_) => Ok((None, ())),
                None => Err(CoreError::KeyNotFound),
            },
        )
        .map(|_| ())
    }

    pub(crate) fn check_key(&self, key: &[u8]) -> CoreResult<()> {
        check_key(&self.db.config, self.env.page_size, key)
    }

    /// Partial records are unavailable with transactions and fixed sizes.
    pub(crate) fn check_partial(&self) -> CoreResult<()> {
        if self.env.is_transactional() {
            return Err(CoreError::invalid_parameter(
                "partial records are not supported with transactions",
            ));
        }
        if self.db.config.record_size.is_some() {
            return Err(CoreError::invalid_parameter(
                "partial records are not supported with a fixed record size",
            ));
        }
        Ok(())
    }
}

fn check_key(config: &DbConfig, page_size: u32, key: &[u8]) -> CoreResult<()> {
    if let Some(size) = config.key_size {
        if key.len() != usize::from(size) {
            return Err(CoreError::invalid_key_size(format!(
                "key has {} bytes, database requires {size}",
                key.len()
            )));
        }
    }
    if key.len() > max_key_size(page_size) {
        return Err(CoreError::invalid_key_size(format!(
            "key has {} bytes, limit is {}",
            key.len(),
            max_key_size(page_size)
        )));
    }
    Ok(())
}

pub(crate) fn check_record(config: &DbConfig, record: &[u8]) -> CoreResult<()> {
    match config.record_size {
        Some(size) if record.len() != size as usize => Err(CoreError::InvalidRecordSize {
            expected: size,
            actual: record.len(),
        }),
        _ => Ok(()),
    }
}

/// Picks the key of a record-number insert and advances the counter.
fn assign_record_number(meta: &mut DbMeta, key: &[u8], mode: InsertMode) -> CoreResult<Vec<u8>> {
    let (width, max) = match meta.config.key_type {
        KeyType::RecordNumber32 => (4, u64::from(u32::MAX)),
        _ => (8, u64::MAX),
    };
    if !key.is_empty() && mode == InsertMode::Overwrite {
        let number = read_unsigned(key);
        meta.last_recno = meta.last_recno.max(number);
        return Ok(key.to_vec());
    }
    let number = meta
        .last_recno
        .checked_add(1)
        .filter(|&number| number <= max)
        .ok_or_else(|| CoreError::limits_reached("record numbers are exhausted"))?;
    meta.last_recno = number;
    Ok(number.to_le_bytes()[..width].to_vec())
}

/// Picks the duplicate an overwrite replaces.
fn overwrite_index(len: usize, cursor_dup: Option<usize>) -> CoreResult<usize> {
    match cursor_dup {
        Some(dup) if dup < len => Ok(dup),
        _ if len == 1 => Ok(0),
        _ => Err(CoreError::invalid_parameter(
            "OVERWRITE on a key with duplicates needs a cursor on that key",
        )),
    }
}

/// Merges a new record into the records of a key.
fn apply_insert(
    current: Option<Vec<Vec<u8>>>,
    record: Vec<u8>,
    mode: InsertMode,
    cursor_dup: Option<usize>,
) -> CoreResult<(Vec<Vec<u8>>, usize)> {
    let Some(mut records) = current else {
        return Ok((vec![record], 0));
    };
    let index = match mode {
        InsertMode::Unique => return Err(CoreError::DuplicateKey),
        InsertMode::Overwrite => {
            let index = overwrite_index(records.len(), cursor_dup)?;
            records[index] = record;
            return Ok((records, index));
        }
        InsertMode::Duplicate(position) => match (position, cursor_dup) {
            (DupPosition::First, _) | (DupPosition::Before, None) => 0,
            (DupPosition::Last, _) | (DupPosition::After, None) => records.len(),
            (DupPosition::Before, Some(dup)) => dup.min(records.len()),
            (DupPosition::After, Some(dup)) => (dup + 1).min(records.len()),
        },
    };
    if records.len() >= u32::MAX as usize {
        return Err(CoreError::limits_reached("too many duplicates"));
    }
    records.insert(index, record);
    Ok((records, index))
}

/// An open database.
///
/// Handles are created by [`Environment::create_db`](crate::Environment::create_db)
/// and [`Environment::open_db`](crate::Environment::open_db). Dropping a
/// handle closes it.
pub struct Database {
    env: Arc<EnvShared>,
    shared: Arc<DbShared>,
}

impl Database {
    pub(crate) fn new(env: Arc<EnvShared>, shared: Arc<DbShared>) -> Self {
        Self { env, shared }
    }

    pub(crate) fn access<'a>(&'a self, txn: Option<&'a Transaction>) -> CoreResult<DbAccess<'a>> {
        let txn = match txn {
            Some(txn) => {
                self.env.check_txn(txn)?;
                Some(txn.shared())
            }
            None => None,
        };
        Ok(DbAccess {
            env: &self.env,
            db: &self.shared,
            txn,
        })
    }

    pub(crate) fn env(&self) -> &Arc<EnvShared> {
        &self.env
    }

    pub(crate) fn shared(&self) -> &Arc<DbShared> {
        &self.shared
    }

    /// Returns the current name.
    #[must_use]
    pub fn name(&self) -> u16 {
        self.shared.name()
    }

    /// Returns the configuration fixed at creation.
    #[must_use]
    pub fn config(&self) -> &DbConfig {
        &self.shared.config
    }

    /// Returns true until the handle or its environment is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.is_open() && self.env.is_open()
    }

    /// Inserts a record and returns its key.
    ///
    /// For record-number databases pass an empty key to get the next number;
    /// the assigned key is returned little-endian.
    ///
    /// # Errors
    ///
    /// - `DuplicateKey` if the key exists and neither `OVERWRITE` nor
    ///   `DUPLICATE` is given
    /// - `InvParameter` for invalid flag combinations
    /// - `InvKeySize` / `InvRecordSize` for size violations
    /// - `TxnConflict` if another transaction has the key pending
    pub fn insert(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        record: &[u8],
        flags: InsertFlags,
    ) -> CoreResult<Vec<u8>> {
        let result = self
            .access(txn)
            .and_then(|access| access.insert(key, RecordWrite::Full(record), flags, false, None))
            .map(|(key, _)| key);
        self.env.report(result)
    }

    /// Writes `data` at `offset` into the record of `key`, resized to
    /// `record_size` bytes, and returns the key.
    ///
    /// An existing record is overwritten in place (no `OVERWRITE` needed);
    /// bytes outside the written range keep their value and new bytes are
    /// zero. With `DUPLICATE` a new zero-filled duplicate is added.
    ///
    /// # Errors
    ///
    /// - `InvParameter` if `offset + data.len()` exceeds `record_size`,
    ///   `record_size` is 8 bytes or less, transactions are enabled or the
    ///   database has a fixed record size
    /// - otherwise the same as [`Database::insert`]
    pub fn insert_partial(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        record_size: usize,
        offset: usize,
        data: &[u8],
        flags: InsertFlags,
    ) -> CoreResult<Vec<u8>> {
        let record = RecordWrite::Partial {
            record_size,
            offset,
            data,
        };
        let result = self
            .access(txn)
            .and_then(|access| access.insert(key, record, flags, false, None))
            .map(|(key, _)| key);
        self.env.report(result)
    }

    /// Returns the record of `key` (its first duplicate).
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key does not exist.
    pub fn find(&self, txn: Option<&Transaction>, key: &[u8]) -> CoreResult<Vec<u8>> {
        let result = self.access(txn).and_then(|access| {
            access.check_key(key)?;
            access.read(|view| {
                view.records(key)?
                    .and_then(|records| records.into_iter().next())
                    .ok_or(CoreError::KeyNotFound)
            })
        });
        self.env.report(result)
    }

    /// Returns up to `size` bytes of the record of `key`, starting at
    /// `offset`. The range is clipped to the end of the record.
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` if the key does not exist
    /// - `InvParameter` if `offset` is past the end of the record, the
    ///   record is 8 bytes or less, transactions are enabled or the
    ///   database has a fixed record size
    pub fn find_partial(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        offset: usize,
        size: usize,
    ) -> CoreResult<Vec<u8>> {
        let result = self.access(txn).and_then(|access| {
            access.check_key(key)?;
            access.check_partial()?;
            let record = access.read(|view| {
                view.records(key)?
                    .and_then(|records| records.into_iter().next())
                    .ok_or(CoreError::KeyNotFound)
            })?;
            read_partial(&record, offset, size)
        });
        self.env.report(result)
    }

    /// Finds the nearest key by `mode` and returns it with its first record.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if no key matches.
    pub fn find_approx(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        mode: MatchMode,
    ) -> CoreResult<(Vec<u8>, Vec<u8>)> {
        let result = self.access(txn).and_then(|access| {
            access.check_key(key)?;
            access.read(|view| {
                let found = match mode.seek() {
                    Some(seek) => view.seek(key, seek)?,
                    None => Some(key.to_vec()),
                };
                let Some(found) = found else {
                    return Err(CoreError::KeyNotFound);
                };
                let record = view
                    .records(&found)?
                    .and_then(|records| records.into_iter().next())
                    .ok_or(CoreError::KeyNotFound)?;
                Ok((found, record))
            })
        });
        self.env.report(result)
    }

    /// Removes a key and all of its duplicates.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key does not exist.
    pub fn erase(&self, txn: Option<&Transaction>, key: &[u8]) -> CoreResult<()> {
        let result = self.access(txn).and_then(|access| access.erase(key));
        self.env.report(result)
    }

    /// Counts records, or distinct keys when `distinct` is set.
    ///
    /// # Errors
    ///
    /// Fails only on storage errors or a closed handle.
    pub fn count(&self, txn: Option<&Transaction>, distinct: bool) -> CoreResult<u64> {
        let result = self
            .access(txn)
            .and_then(|access| access.read(|view| view.count(distinct)));
        self.env.report(result)
    }

    /// Installs the comparator of a custom-key database.
    ///
    /// `None` falls back to lexicographic byte order. The comparator is
    /// used by every later operation on this handle, its cursors and
    /// transactions.
    ///
    /// # Errors
    ///
    /// Returns `InvParameter` unless the key type is [`KeyType::Custom`].
    pub fn set_compare_func(&self, compare: Option<CompareFn>) -> CoreResult<()> {
        let result = if self.shared.config.key_type == KeyType::Custom {
            *self.shared.order.write() = match compare {
                Some(compare) => KeyOrder::Custom(Some(compare)),
                None => KeyOrder::Bytes,
            };
            Ok(())
        } else {
            Err(CoreError::invalid_parameter(format!(
                "database {} has key type {}, not custom",
                self.name(),
                self.shared.config.key_type
            )))
        };
        self.env.report(result)
    }

    /// Opens a cursor, optionally bound to a transaction.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` if the database is closed, `InvParameter` if the
    /// transaction belongs to another environment.
    pub fn cursor(&self, txn: Option<&Transaction>) -> CoreResult<Cursor> {
        let result = Cursor::new(self, txn);
        self.env.report(result)
    }

    /// Walks the whole tree and checks its structure.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityViolated` describing the first problem found.
    pub fn check_integrity(&self) -> CoreResult<IntegrityReport> {
        let result = self
            .access(None)
            .and_then(|access| access.read(|view| view.tree().check()))
            .map(IntegrityReport::from);
        self.env.report(result)
    }

    /// Closes the handle. Closing twice, or after the environment was
    /// closed, is a no-op.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for flushing.
    pub fn close(&self) -> CoreResult<()> {
        if self.shared.is_open() {
            self.shared.mark_closed();
            self.env.forget_db(self.shared.id);
            tracing::debug!(db = self.name(), "closed database");
        }
        Ok(())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name())
            .field("config", &self.shared.config)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn mode(flags: InsertFlags, in_cursor: bool) -> CoreResult<InsertMode> {
        flags.mode(in_cursor, true)
    }

    #[test]
    fn flag_validation() {
        assert_eq!(mode(InsertFlags::NONE, false).unwrap(), InsertMode::Unique);
        assert_eq!(
            mode(InsertFlags::DUPLICATE, false).unwrap(),
            InsertMode::Duplicate(DupPosition::Last)
        );
        assert_eq!(
            mode(InsertFlags::DUPLICATE | InsertFlags::DUPLICATE_INSERT_FIRST, false).unwrap(),
            InsertMode::Duplicate(DupPosition::First)
        );
        assert_eq!(
            mode(InsertFlags::OVERWRITE | InsertFlags::HINT_APPEND, false).unwrap(),
            InsertMode::Overwrite
        );

        let invalid = [
            (InsertFlags::OVERWRITE | InsertFlags::DUPLICATE, true),
            (InsertFlags::DUPLICATE_INSERT_FIRST, true),
            (
                InsertFlags::DUPLICATE
                    | InsertFlags::DUPLICATE_INSERT_FIRST
                    | InsertFlags::DUPLICATE_INSERT_LAST,
                true,
            ),
            (InsertFlags::DUPLICATE | InsertFlags::DUPLICATE_INSERT_BEFORE, false),
            (InsertFlags::from_bits(0x4000_0000), true),
        ];
        for (flags, in_cursor) in invalid {
            let err = mode(flags, in_cursor).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvParameter, "{flags:?}");
        }

        let err = InsertFlags::DUPLICATE.mode(false, false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);
    }

    #[test]
    fn insert_into_existing_key() {
        let current = || Some(vec![b"a".to_vec(), b"b".to_vec()]);

        let err = apply_insert(current(), b"x".to_vec(), InsertMode::Unique, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateKey);

        let err = apply_insert(current(), b"x".to_vec(), InsertMode::Overwrite, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);

        let (records, index) =
            apply_insert(current(), b"x".to_vec(), InsertMode::Overwrite, Some(1)).unwrap();
        assert_eq!(records, vec![b"a".to_vec(), b"x".to_vec()]);
        assert_eq!(index, 1);

        let (records, index) = apply_insert(
            current(),
            b"x".to_vec(),
            InsertMode::Duplicate(DupPosition::Before),
            Some(1),
        )
        .unwrap();
        assert_eq!(records, vec![b"a".to_vec(), b"x".to_vec(), b"b".to_vec()]);
        assert_eq!(index, 1);

        let (records, index) = apply_insert(
            current(),
            b"x".to_vec(),
            InsertMode::Duplicate(DupPosition::After),
            None,
        )
        .unwrap();
        assert_eq!(records.last().unwrap(), b"x");
        assert_eq!(index, 2);

        let (records, index) =
            apply_insert(None, b"x".to_vec(), InsertMode::Unique, None).unwrap();
        assert_eq!(records, vec![b"x".to_vec()]);
        assert_eq!(index, 0);
    }

    #[test]
    fn record_numbers() {
        let mut meta = DbMeta {
            id: DbId(1),
            name: 1,
            config: DbConfig::new().key_type(KeyType::RecordNumber32),
            root: crate::types::PageId(1),
            last_recno: 0,
        };
        assert_eq!(
            assign_record_number(&mut meta, &[], InsertMode::Unique).unwrap(),
            1u32.to_le_bytes().to_vec()
        );
        // a key without OVERWRITE still gets a fresh number
        assert_eq!(
            assign_record_number(&mut meta, &7u32.to_le_bytes(), InsertMode::Unique).unwrap(),
            2u32.to_le_bytes().to_vec()
        );
        assert_eq!(
            assign_record_number(&mut meta, &9u32.to_le_bytes(), InsertMode::Overwrite).unwrap(),
            9u32.to_le_bytes().to_vec()
        );
        assert_eq!(meta.last_recno, 9);

        meta.last_recno = u64::from(u32::MAX);
        let err = assign_record_number(&mut meta, &[], InsertMode::Unique).unwrap_err();
        assert_eq!(err.code(), ErrorCode::LimitsReached);
    }

    #[test]
    fn size_checks() {
        let config = DbConfig::new().key_size(4).record_size(2);
        assert!(check_key(&config, 1024, b"abcd").is_ok());
        assert_eq!(
            check_key(&config, 1024, b"abc").unwrap_err().code(),
            ErrorCode::InvKeySize
        );
        assert_eq!(
            check_key(&DbConfig::new(), 1024, &[0u8; 200]).unwrap_err().code(),
            ErrorCode::InvKeySize
        );
        assert_eq!(
            check_record(&config, b"abc").unwrap_err().code(),
            ErrorCode::InvRecordSize
        );
    }
}
