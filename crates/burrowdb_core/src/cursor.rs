//! Cursors.
//!
//! A cursor remembers a key and a duplicate index, never a page. Every
//! operation looks the key up again in the current view, so structural
//! changes made through other handles cannot leave it dangling; if its
//! entry disappeared, the next access reports `KeyNotFound` and the cursor
//! becomes nil.

use crate::btree::Seek;
use crate::db::{
    check_record, read_partial, Database, DbAccess, DbShared, InsertFlags, MatchMode, RecordWrite,
};
use crate::env::EnvShared;
use crate::error::{CoreError, CoreResult};
use crate::txn::{Transaction, TxnShared};
use crate::view::View;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Direction of [`Cursor::move_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorMove {
    /// First entry of the database.
    First,
    /// Last entry of the database.
    Last,
    /// Next duplicate, or the first duplicate of the next key.
    Next,
    /// Previous duplicate, or the last duplicate of the previous key.
    Previous,
}

/// Modifiers for [`Cursor::move_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MoveFlags(u32);

impl MoveFlags {
    /// Walk every duplicate.
    pub const NONE: Self = Self(0);
    /// Visit each key once, on its first duplicate.
    pub const SKIP_DUPLICATES: Self = Self(0x0010);
    /// Stay within the duplicates of the current key.
    pub const ONLY_DUPLICATES: Self = Self(0x0020);

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn parse(self) -> CoreResult<(bool, bool)> {
        let known = Self::SKIP_DUPLICATES.0 | Self::ONLY_DUPLICATES.0;
        if self.0 & !known != 0 {
            return Err(CoreError::invalid_parameter(format!(
                "unknown move flags {:#x}",
                self.0 & !known
            )));
        }
        let skip = self.contains(Self::SKIP_DUPLICATES);
        let only = self.contains(Self::ONLY_DUPLICATES);
        if skip && only {
            return Err(CoreError::invalid_parameter(
                "SKIP_DUPLICATES and ONLY_DUPLICATES cannot be combined",
            ));
        }
        Ok((skip, only))
    }
}

impl BitOr for MoveFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Where a cursor points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Position {
    pub key: Vec<u8>,
    pub dup: usize,
}

/// A position in one database, optionally seen through a transaction.
pub struct Cursor {
    env: Arc<EnvShared>,
    db: Arc<DbShared>,
    txn: Option<Arc<TxnShared>>,
    position: Option<Position>,
    closed: bool,
}

impl Cursor {
    pub(crate) fn new(db: &Database, txn: Option<&Transaction>) -> CoreResult<Self> {
        let access = db.access(txn)?;
        access.read(|_| Ok(()))?;
        Ok(Self {
            env: Arc::clone(db.env()),
            db: Arc::clone(db.shared()),
            txn: access.txn.cloned(),
            position: None,
            closed: false,
        })
    }

    fn access(&self) -> CoreResult<DbAccess<'_>> {
        if self.closed {
            return Err(CoreError::not_ready("cursor is closed"));
        }
        Ok(DbAccess {
            env: &self.env,
            db: &self.db,
            txn: self.txn.as_ref(),
        })
    }

    /// Returns true if the cursor points nowhere.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.position.is_none()
    }

    /// Moves the cursor.
    ///
    /// `Next` on a nil cursor behaves like `First`, `Previous` like `Last`.
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` when there is nothing in that direction; the cursor
    ///   becomes nil
    /// - `CursorIsNil` for `ONLY_DUPLICATES` on a nil cursor
    /// - `InvParameter` for contradicting flags
    pub fn move_to(&mut self, direction: CursorMove, flags: MoveFlags) -> CoreResult<()> {
        let result = self.move_inner(direction, flags);
        self.env.report(result)
    }

    fn move_inner(&mut self, direction: CursorMove, flags: MoveFlags) -> CoreResult<()> {
        let (skip, only) = flags.parse()?;
        let target = {
            let access = self.access()?;
            let current = self.position.as_ref();
            access.read(|view| step(view, current, direction, skip, only))?
        };
        match target {
            Some(position) => {
                self.position = Some(position);
                Ok(())
            }
            None => {
                self.position = None;
                Err(CoreError::KeyNotFound)
            }
        }
    }

    /// Positions the cursor on the first duplicate of `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key does not exist; the cursor is nil
    /// after any failure.
    pub fn find(&mut self, key: &[u8]) -> CoreResult<()> {
        self.position = None;
        let result = self.access().and_then(|access| {
            access.check_key(key)?;
            match access.read(|view| view.records(key))? {
                Some(_) => Ok(Position {
                    key: key.to_vec(),
                    dup: 0,
                }),
                None => Err(CoreError::KeyNotFound),
            }
        });
        let result = result.map(|position| self.position = Some(position));
        self.env.report(result)
    }

    /// Positions the cursor on the nearest key by `mode` and returns it.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if nothing matches; the cursor is nil after any
    /// failure.
    pub fn find_approx(&mut self, key: &[u8], mode: MatchMode) -> CoreResult<Vec<u8>> {
        self.position = None;
        let result = self.access().and_then(|access| {
            access.check_key(key)?;
            access.read(|view| {
                let found = match mode {
                    MatchMode::Exact => view.records(key)?.map(|_| key.to_vec()),
                    MatchMode::Lt => view.seek(key, Seek::Lt)?,
                    MatchMode::Gt => view.seek(key, Seek::Gt)?,
                    MatchMode::Leq => view.seek(key, Seek::Le)?,
                    MatchMode::Geq => view.seek(key, Seek::Ge)?,
                };
                found.ok_or(CoreError::KeyNotFound)
            })
        });
        let result = result.map(|found| {
            self.position = Some(Position {
                key: found.clone(),
                dup: 0,
            });
            found
        });
        self.env.report(result)
    }

    /// Inserts through the cursor and positions it on the new record.
    ///
    /// `DUPLICATE_INSERT_BEFORE`/`AFTER` are relative to the current
    /// duplicate; on a nil cursor or another key they act like `FIRST`/`LAST`.
    ///
    /// # Errors
    ///
    /// Same as [`Database::insert`].
    pub fn insert(&mut self, key: &[u8], record: &[u8], flags: InsertFlags) -> CoreResult<Vec<u8>> {
        self.insert_with(key, RecordWrite::Full(record), flags)
    }

    /// Writes `data` at `offset` into a record of `record_size` bytes and
    /// positions the cursor on it.
    ///
    /// Without `DUPLICATE` this overwrites the record under the cursor if
    /// it sits on `key`, otherwise the key's sole record.
    ///
    /// # Errors
    ///
    /// Same as [`Database::insert_partial`].
    pub fn insert_partial(
        &mut self,
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
        self.insert_with(key, record, flags)
    }

    fn insert_with(
        &mut self,
        key: &[u8],
        record: RecordWrite<'_>,
        flags: InsertFlags,
    ) -> CoreResult<Vec<u8>> {
        let result = self
            .access()
            .and_then(|access| access.insert(key, record, flags, true, self.position.as_ref()));
        let result = result.map(|(key, dup)| {
            self.position = Some(Position {
                key: key.clone(),
                dup,
            });
            key
        });
        self.env.report(result)
    }

    /// Removes the current duplicate and makes the cursor nil.
    ///
    /// # Errors
    ///
    /// Returns `CursorIsNil` on a nil cursor, `KeyNotFound` if the entry
    /// vanished.
    pub fn erase(&mut self) -> CoreResult<()> {
        let result = self.erase_inner();
        self.env.report(result)
    }

    fn erase_inner(&mut self) -> CoreResult<()> {
        let position = self.position.clone().ok_or(CoreError::CursorIsNil)?;
        let result = self.access().and_then(|access| {
            access.write(
                |_| Ok(position.key.clone()),
                |_, current| {
                    let mut records = current
                        .filter(|records| position.dup < records.len())
                        .ok_or(CoreError::KeyNotFound)?;
                    records.remove(position.dup);
                    Ok((Some(records), ()))
                },
            )
        });
        if matches!(result, Ok(_) | Err(CoreError::KeyNotFound)) {
            self.position = None;
        }
        result.map(|_| ())
    }

    /// Replaces the record under the cursor.
    ///
    /// # Errors
    ///
    /// Returns `CursorIsNil` on a nil cursor, `InvRecordSize` if the
    /// database has a fixed record size and `record` does not match it.
    pub fn overwrite(&mut self, record: &[u8]) -> CoreResult<()> {
        let result = self.overwrite_inner(RecordWrite::Full(record));
        self.env.report(result)
    }

    /// Writes `data` at `offset` into the record under the cursor, resized
    /// to `record_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `CursorIsNil` on a nil cursor and `InvParameter` for the
    /// cases listed at [`Database::insert_partial`].
    pub fn overwrite_partial(
        &mut self,
        record_size: usize,
        offset: usize,
        data: &[u8],
    ) -> CoreResult<()> {
        let record = RecordWrite::Partial {
            record_size,
            offset,
            data,
        };
        let result = self.overwrite_inner(record);
        self.env.report(result)
    }

    fn overwrite_inner(&mut self, record: RecordWrite<'_>) -> CoreResult<()> {
        let position = self.position.clone().ok_or(CoreError::CursorIsNil)?;
        let result = self.access().and_then(|access| {
            match record {
                RecordWrite::Full(record) => check_record(&self.db.config, record)?,
                RecordWrite::Partial { .. } => access.check_partial()?,
            }
            access.write(
                |_| Ok(position.key.clone()),
                |_, current| {
                    let mut records = current
                        .filter(|records| position.dup < records.len())
                        .ok_or(CoreError::KeyNotFound)?;
                    let updated = record.apply(&records[position.dup])?;
                    records[position.dup] = updated;
                    Ok((Some(records), ()))
                },
            )
        });
        if matches!(result, Err(CoreError::KeyNotFound)) {
            self.position = None;
        }
        result.map(|_| ())
    }

    /// Loads the entry under the cursor.
    fn current(&mut self) -> CoreResult<(Position, Vec<Vec<u8>>)> {
        let position = self.position.clone().ok_or(CoreError::CursorIsNil)?;
        let records = self
            .access()?
            .read(|view| view.records(&position.key))?;
        match records {
            Some(records) if position.dup < records.len() => Ok((position, records)),
            _ => {
                self.position = None;
                Err(CoreError::KeyNotFound)
            }
        }
    }

    /// Returns the key under the cursor.
    ///
    /// # Errors
    ///
    /// Returns `CursorIsNil` on a nil cursor.
    pub fn key(&mut self) -> CoreResult<Vec<u8>> {
        let result = self.current().map(|(position, _)| position.key);
        self.env.report(result)
    }

    /// Returns the record under the cursor.
    ///
    /// # Errors
    ///
    /// Returns `CursorIsNil` on a nil cursor.
    pub fn record(&mut self) -> CoreResult<Vec<u8>> {
        let result = self
            .current()
            .map(|(position, mut records)| records.swap_remove(position.dup));
        self.env.report(result)
    }

    /// Returns up to `size` bytes of the record under the cursor, starting
    /// at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `CursorIsNil` on a nil cursor and `InvParameter` for the
    /// cases listed at [`Database::find_partial`].
    pub fn record_partial(&mut self, offset: usize, size: usize) -> CoreResult<Vec<u8>> {
        let result = self.access().and_then(|access| access.check_partial());
        let result = result
            .and_then(|()| self.current())
            .and_then(|(position, records)| read_partial(&records[position.dup], offset, size));
        self.env.report(result)
    }

    /// Returns the number of duplicates of the current key.
    ///
    /// # Errors
    ///
    /// Returns `CursorIsNil` on a nil cursor.
    pub fn duplicate_count(&mut self) -> CoreResult<u32> {
        let result = self
            .current()
            .map(|(_, records)| u32::try_from(records.len()).unwrap_or(u32::MAX));
        self.env.report(result)
    }

    /// Returns the zero-based duplicate index of the cursor.
    ///
    /// # Errors
    ///
    /// Returns `CursorIsNil` on a nil cursor.
    pub fn duplicate_position(&mut self) -> CoreResult<u32> {
        let result = self
            .current()
            .map(|(position, _)| u32::try_from(position.dup).unwrap_or(u32::MAX));
        self.env.report(result)
    }

    /// Returns the size of the record under the cursor.
    ///
    /// # Errors
    ///
    /// Returns `CursorIsNil` on a nil cursor.
    pub fn record_size(&mut self) -> CoreResult<u64> {
        let result = self
            .current()
            .map(|(position, records)| records[position.dup].len() as u64);
        self.env.report(result)
    }

    /// Creates an independent cursor at the same position.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` if this cursor is closed.
    pub fn try_clone(&self) -> CoreResult<Self> {
        let result = self.access().map(|_| Self {
            env: Arc::clone(&self.env),
            db: Arc::clone(&self.db),
            txn: self.txn.clone(),
            position: self.position.clone(),
            closed: false,
        });
        self.env.report(result)
    }

    /// Closes the cursor; later operations fail with `NotReady`.
    pub fn close(&mut self) {
        self.closed = true;
        self.position = None;
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("db", &self.db.name())
            .field("txn", &self.txn.as_ref().map(|txn| txn.id))
            .field("position", &self.position)
            .field("closed", &self.closed)
            .finish()
    }
}

fn step(
    view: &View<'_>,
    current: Option<&Position>,
    direction: CursorMove,
    skip: bool,
    only: bool,
) -> CoreResult<Option<Position>> {
    if only {
        let position = current.ok_or(CoreError::CursorIsNil)?;
        let Some(records) = view.records(&position.key)? else {
            return Ok(None);
        };
        let dup = match direction {
            CursorMove::First => Some(0),
            CursorMove::Last => Some(records.len() - 1),
            CursorMove::Next => Some(position.dup + 1).filter(|&dup| dup < records.len()),
            CursorMove::Previous => position.dup.checked_sub(1).map(|dup| dup.min(records.len() - 1)),
        };
        return Ok(dup.map(|dup| Position {
            key: position.key.clone(),
            dup,
        }));
    }

    let landing = |key: Option<Vec<u8>>, last_dup: bool| -> CoreResult<Option<Position>> {
        let Some(key) = key else {
            return Ok(None);
        };
        let dup = if last_dup && !skip {
            view.records(&key)?.map_or(0, |records| records.len().saturating_sub(1))
        } else {
            0
        };
        Ok(Some(Position { key, dup }))
    };

    match (direction, current) {
        (CursorMove::First, _) | (CursorMove::Next, None) => landing(view.first()?, false),
        (CursorMove::Last, _) | (CursorMove::Previous, None) => landing(view.last()?, true),
        (CursorMove::Next, Some(position)) => {
            if !skip {
                if let Some(records) = view.records(&position.key)? {
                    if position.dup + 1 < records.len() {
                        return Ok(Some(Position {
                            key: position.key.clone(),
                            dup: position.dup + 1,
                        }));
                    }
                }
            }
            landing(view.seek(&position.key, Seek::Gt)?, false)
        }
        (CursorMove::Previous, Some(position)) => {
            if !skip && position.dup > 0 {
                if let Some(records) = view.records(&position.key)? {
                    return Ok(Some(Position {
                        key: position.key.clone(),
                        dup: (position.dup - 1).min(records.len() - 1),
                    }));
                }
            }
            landing(view.seek(&position.key, Seek::Lt)?, true)
        }
    }
}
