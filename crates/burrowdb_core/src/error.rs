//! Error types for burrowdb core.

use burrowdb_storage::StorageError;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Boxed error raised by user callbacks (comparators, query predicates).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stable status codes reported to bindings and error handlers.
///
/// The numeric values are part of the external interface and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// A record does not have the size the database requires.
    InvRecordSize = -2,
    /// A key is too large or does not have the fixed key size.
    InvKeySize = -3,
    /// The page size is not supported.
    InvPageSize = -4,
    /// Memory could not be allocated.
    OutOfMemory = -6,
    /// A parameter, flag or flag combination is invalid.
    InvParameter = -8,
    /// The file header is missing or damaged.
    InvFileHeader = -9,
    /// The file was written by an incompatible format version.
    InvFileVersion = -10,
    /// The key does not exist.
    KeyNotFound = -11,
    /// The key already exists.
    DuplicateKey = -12,
    /// Stored data failed a checksum or structural check.
    IntegrityViolated = -13,
    /// An internal invariant was broken.
    InternalError = -14,
    /// The environment was opened read-only.
    WriteProtected = -15,
    /// A blob chain is missing.
    BlobNotFound = -16,
    /// The operating system reported an I/O failure.
    IoError = -18,
    /// The operation is not available in this build.
    NotImplemented = -20,
    /// The backing file does not exist.
    FileNotFound = -21,
    /// The backing file is locked by another handle.
    WouldBlock = -22,
    /// The handle is closed or not usable yet.
    NotReady = -23,
    /// A size or capacity limit was reached.
    LimitsReached = -24,
    /// Another transaction holds a pending write on the key.
    TxnConflict = -31,
    /// A transaction still references the object.
    TxnStillOpen = -33,
    /// The cursor does not point to an entry.
    CursorIsNil = -100,
    /// The database does not exist.
    DatabaseNotFound = -200,
    /// A database with this name already exists.
    DatabaseAlreadyExists = -201,
    /// The database is already open.
    DatabaseAlreadyOpen = -202,
    /// A named comparator, predicate or query function is not registered.
    PluginNotFound = -500,
    /// A query string could not be parsed.
    ParserError = -501,
    /// A user callback failed.
    CallbackFailed = -600,
}

impl ErrorCode {
    const ALL: [Self; 28] = [
        Self::InvRecordSize,
        Self::InvKeySize,
        Self::InvPageSize,
        Self::OutOfMemory,
        Self::InvParameter,
        Self::InvFileHeader,
        Self::InvFileVersion,
        Self::KeyNotFound,
        Self::DuplicateKey,
        Self::IntegrityViolated,
        Self::InternalError,
        Self::WriteProtected,
        Self::BlobNotFound,
        Self::IoError,
        Self::NotImplemented,
        Self::FileNotFound,
        Self::WouldBlock,
        Self::NotReady,
        Self::LimitsReached,
        Self::TxnConflict,
        Self::TxnStillOpen,
        Self::CursorIsNil,
        Self::DatabaseNotFound,
        Self::DatabaseAlreadyExists,
        Self::DatabaseAlreadyOpen,
        Self::PluginNotFound,
        Self::ParserError,
        Self::CallbackFailed,
    ];

    /// Returns the raw status value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Looks up a code by its raw status value.
    #[must_use]
    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.as_i32() == value)
    }

    /// Returns the symbolic name of the code.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvRecordSize => "INV_RECORD_SIZE",
            Self::InvKeySize => "INV_KEY_SIZE",
            Self::InvPageSize => "INV_PAGE_SIZE",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::InvParameter => "INV_PARAMETER",
            Self::InvFileHeader => "INV_FILE_HEADER",
            Self::InvFileVersion => "INV_FILE_VERSION",
            Self::KeyNotFound => "KEY_NOT_FOUND",
            Self::DuplicateKey => "DUPLICATE_KEY",
            Self::IntegrityViolated => "INTEGRITY_VIOLATED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::WriteProtected => "WRITE_PROTECTED",
            Self::BlobNotFound => "BLOB_NOT_FOUND",
            Self::IoError => "IO_ERROR",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::WouldBlock => "WOULD_BLOCK",
            Self::NotReady => "NOT_READY",
            Self::LimitsReached => "LIMITS_REACHED",
            Self::TxnConflict => "TXN_CONFLICT",
            Self::TxnStillOpen => "TXN_STILL_OPEN",
            Self::CursorIsNil => "CURSOR_IS_NIL",
            Self::DatabaseNotFound => "DATABASE_NOT_FOUND",
            Self::DatabaseAlreadyExists => "DATABASE_ALREADY_EXISTS",
            Self::DatabaseAlreadyOpen => "DATABASE_ALREADY_OPEN",
            Self::PluginNotFound => "PLUGIN_NOT_FOUND",
            Self::ParserError => "PARSER_ERROR",
            Self::CallbackFailed => "CALLBACK_FAILED",
        }
    }

    /// Returns the taxonomy bucket of the code.
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::KeyNotFound
            | Self::DatabaseNotFound
            | Self::FileNotFound
            | Self::BlobNotFound
            | Self::PluginNotFound => ErrorCategory::NotFound,
            Self::DuplicateKey
            | Self::DatabaseAlreadyExists
            | Self::DatabaseAlreadyOpen
            | Self::TxnConflict
            | Self::WouldBlock => ErrorCategory::Conflict,
            Self::InvRecordSize
            | Self::InvKeySize
            | Self::InvPageSize
            | Self::InvParameter
            | Self::ParserError => ErrorCategory::InvalidParameter,
            Self::OutOfMemory | Self::LimitsReached => ErrorCategory::Capacity,
            Self::CursorIsNil => ErrorCategory::CursorState,
            Self::InvFileHeader
            | Self::InvFileVersion
            | Self::IntegrityViolated
            | Self::InternalError => ErrorCategory::Integrity,
            Self::CallbackFailed => ErrorCategory::Callback,
            Self::IoError => ErrorCategory::Io,
            Self::WriteProtected
            | Self::NotImplemented
            | Self::NotReady
            | Self::TxnStillOpen => ErrorCategory::State,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}

/// Coarse classification of errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A key, database, file or plugin was not found.
    NotFound,
    /// The operation collides with existing state.
    Conflict,
    /// Malformed configuration, wrong types or flag combinations.
    InvalidParameter,
    /// The store or cache is full.
    Capacity,
    /// A cursor was used without a position.
    CursorState,
    /// Stored data is damaged or unreadable.
    Integrity,
    /// A user callback failed.
    Callback,
    /// The operating system reported an I/O failure.
    Io,
    /// The handle is in the wrong state for the operation.
    State,
}

/// Errors that can occur in burrowdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid parameter, flag or flag combination.
    #[error("invalid parameter: {message}")]
    InvalidParameter {
        /// Description of the problem.
        message: String,
    },

    /// Key size is invalid for the database.
    #[error("invalid key size: {message}")]
    InvalidKeySize {
        /// Description of the problem.
        message: String,
    },

    /// Record size does not match the database's fixed record size.
    #[error("invalid record size: expected {expected} bytes, got {actual}")]
    InvalidRecordSize {
        /// Required size in bytes.
        expected: u32,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Page size is not supported.
    #[error("invalid page size: {size}")]
    InvalidPageSize {
        /// The rejected page size.
        size: u32,
    },

    /// Key was not found.
    #[error("key not found")]
    KeyNotFound,

    /// Key already exists and no overwrite/duplicate flag was given.
    #[error("duplicate key")]
    DuplicateKey,

    /// Database does not exist.
    #[error("database {name} not found")]
    DatabaseNotFound {
        /// Database name.
        name: u16,
    },

    /// Database already exists.
    #[error("database {name} already exists")]
    DatabaseAlreadyExists {
        /// Database name.
        name: u16,
    },

    /// Database is already open.
    #[error("database {name} is already open")]
    DatabaseAlreadyOpen {
        /// Database name.
        name: u16,
    },

    /// Cursor has no position.
    #[error("cursor is nil")]
    CursorIsNil,

    /// Another transaction has a pending write on the key.
    #[error("transaction conflict: {message}")]
    TxnConflict {
        /// Description of the conflict.
        message: String,
    },

    /// A transaction still references the object.
    #[error("transaction still open: {message}")]
    TxnStillOpen {
        /// Description of what is still referenced.
        message: String,
    },

    /// Handle is closed or not ready for the operation.
    #[error("not ready: {message}")]
    NotReady {
        /// Description of the state.
        message: String,
    },

    /// Environment is read-only.
    #[error("environment is write protected")]
    WriteProtected,

    /// A size or capacity limit was reached.
    #[error("limits reached: {message}")]
    LimitsReached {
        /// Description of the limit.
        message: String,
    },

    /// Stored data failed a checksum or structural check.
    #[error("integrity violated: {message}")]
    IntegrityViolated {
        /// Description of the damage.
        message: String,
    },

    /// The file header is missing or damaged.
    #[error("invalid file header: {message}")]
    InvalidFileHeader {
        /// Description of the problem.
        message: String,
    },

    /// The file format version is not supported.
    #[error("unsupported file version {found_major}.{found_minor}, expected {expected_major}.x")]
    InvalidFileVersion {
        /// Major version found in the file.
        found_major: u16,
        /// Minor version found in the file.
        found_minor: u16,
        /// Major version this build reads.
        expected_major: u16,
    },

    /// Feature is not available in this build.
    #[error("not implemented: {message}")]
    NotImplemented {
        /// Description of the missing feature.
        message: String,
    },

    /// Named comparator, predicate or query function is not registered.
    #[error("plugin not found: {name}")]
    PluginNotFound {
        /// The unresolved name.
        name: String,
    },

    /// Query string could not be parsed.
    #[error("parse error: {message}")]
    Parser {
        /// Description of the syntax error.
        message: String,
    },

    /// Internal invariant violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },

    /// Error raised by a user callback, carried unmodified.
    #[error("callback failed: {0}")]
    Callback(BoxError),
}

impl CoreError {
    /// Returns the stable status code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Storage(err) => match err {
                StorageError::Io(_) => ErrorCode::IoError,
                StorageError::ReadPastEnd { .. } => ErrorCode::IntegrityViolated,
                StorageError::NotFound { .. } => ErrorCode::FileNotFound,
                StorageError::Locked { .. } => ErrorCode::WouldBlock,
                StorageError::Closed => ErrorCode::NotReady,
            },
            Self::InvalidParameter { .. } => ErrorCode::InvParameter,
            Self::InvalidKeySize { .. } => ErrorCode::InvKeySize,
            Self::InvalidRecordSize { .. } => ErrorCode::InvRecordSize,
            Self::InvalidPageSize { .. } => ErrorCode::InvPageSize,
            Self::KeyNotFound => ErrorCode::KeyNotFound,
            Self::DuplicateKey => ErrorCode::DuplicateKey,
            Self::DatabaseNotFound { .. } => ErrorCode::DatabaseNotFound,
            Self::DatabaseAlreadyExists { .. } => ErrorCode::DatabaseAlreadyExists,
            Self::DatabaseAlreadyOpen { .. } => ErrorCode::DatabaseAlreadyOpen,
            Self::CursorIsNil => ErrorCode::CursorIsNil,
            Self::TxnConflict { .. } => ErrorCode::TxnConflict,
            Self::TxnStillOpen { .. } => ErrorCode::TxnStillOpen,
            Self::NotReady { .. } => ErrorCode::NotReady,
            Self::WriteProtected => ErrorCode::WriteProtected,
            Self::LimitsReached { .. } => ErrorCode::LimitsReached,
            Self::IntegrityViolated { .. } => ErrorCode::IntegrityViolated,
            Self::InvalidFileHeader { .. } => ErrorCode::InvFileHeader,
            Self::InvalidFileVersion { .. } => ErrorCode::InvFileVersion,
            Self::NotImplemented { .. } => ErrorCode::NotImplemented,
            Self::PluginNotFound { .. } => ErrorCode::PluginNotFound,
            Self::Parser { .. } => ErrorCode::ParserError,
            Self::Internal { .. } => ErrorCode::InternalError,
            Self::Callback(_) => ErrorCode::CallbackFailed,
        }
    }

    /// Returns the taxonomy bucket of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    /// Recovers the original error raised by a user callback.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged if this is not a callback error.
    pub fn into_callback_error(self) -> Result<BoxError, Self> {
        match self {
            Self::Callback(inner) => Ok(inner),
            other => Err(other),
        }
    }

    /// Creates an invalid parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(message: impl Into<String>) -> Self {
        Self::InvalidKeySize {
            message: message.into(),
        }
    }

    /// Creates a transaction conflict error.
    pub fn txn_conflict(message: impl Into<String>) -> Self {
        Self::TxnConflict {
            message: message.into(),
        }
    }

    /// Creates a transaction-still-open error.
    pub fn txn_still_open(message: impl Into<String>) -> Self {
        Self::TxnStillOpen {
            message: message.into(),
        }
    }

    /// Creates a not ready error.
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    /// Creates a limits reached error.
    pub fn limits_reached(message: impl Into<String>) -> Self {
        Self::LimitsReached {
            message: message.into(),
        }
    }

    /// Creates an integrity violation error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::IntegrityViolated {
            message: message.into(),
        }
    }

    /// Creates an invalid file header error.
    pub fn invalid_file_header(message: impl Into<String>) -> Self {
        Self::InvalidFileHeader {
            message: message.into(),
        }
    }

    /// Creates a not implemented error.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// Creates a plugin not found error.
    pub fn plugin_not_found(name: impl Into<String>) -> Self {
        Self::PluginNotFound { name: name.into() }
    }

    /// Creates a parser error.
    pub fn parser(message: impl Into<String>) -> Self {
        Self::Parser {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::KeyNotFound.as_i32(), -11);
        assert_eq!(ErrorCode::DuplicateKey.as_i32(), -12);
        assert_eq!(ErrorCode::InvParameter.as_i32(), -8);
        assert_eq!(ErrorCode::CursorIsNil.as_i32(), -100);
        assert_eq!(ErrorCode::DatabaseNotFound.as_i32(), -200);
        assert_eq!(ErrorCode::FileNotFound.as_i32(), -21);
    }

    #[test]
    fn code_lookup_round_trips() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_i32(code.as_i32()), Some(code));
        }
        assert_eq!(ErrorCode::from_i32(1), None);
    }

    #[test]
    fn storage_errors_map_to_codes() {
        let io = CoreError::from(StorageError::Io(io::Error::other("boom")));
        assert_eq!(io.code(), ErrorCode::IoError);
        assert_eq!(io.category(), ErrorCategory::Io);

        let locked = CoreError::from(StorageError::Locked {
            path: "x.db".into(),
        });
        assert_eq!(locked.code(), ErrorCode::WouldBlock);

        let missing = CoreError::from(StorageError::NotFound {
            path: "x.db".into(),
        });
        assert_eq!(missing.code(), ErrorCode::FileNotFound);
        assert_eq!(missing.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn record_size_is_an_invalid_parameter() {
        let err = CoreError::InvalidRecordSize {
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.code(), ErrorCode::InvRecordSize);
        assert_eq!(err.category(), ErrorCategory::InvalidParameter);
    }

    #[test]
    fn callback_error_is_recoverable() {
        #[derive(Debug, PartialEq)]
        struct Marker;
        impl fmt::Display for Marker {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("marker")
            }
        }
        impl std::error::Error for Marker {}

        let err = CoreError::Callback(Box::new(Marker));
        assert_eq!(err.code(), ErrorCode::CallbackFailed);

        let inner = err.into_callback_error().unwrap();
        assert_eq!(inner.downcast_ref::<Marker>(), Some(&Marker));

        let other = CoreError::KeyNotFound.into_callback_error();
        assert!(matches!(other, Err(CoreError::KeyNotFound)));
    }

    #[test]
    fn display_includes_context() {
        let err = CoreError::DatabaseNotFound { name: 7 };
        assert_eq!(err.to_string(), "database 7 not found");
        assert_eq!(ErrorCode::ParserError.to_string(), "PARSER_ERROR (-501)");
    }
}
