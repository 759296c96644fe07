//! Error types for the typed SQLite layer.
//!
//! The engine reports every outcome as an integer status. [`check_status`]
//! turns those into [`Error::Engine`] values, except for `SQLITE_MISUSE`,
//! which means the calling code already broke the API contract and aborts.

use std::error::Error as StdError;
use std::ffi::{c_int, CStr, NulError};
use std::str::Utf8Error;

use rusqlite::ffi;
use thiserror::Error;

use super::value::StorageClass;

/// Result type for SQLite operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while preparing, binding, stepping or decoding.
#[derive(Debug, Error)]
pub enum Error {
    /// Non-success status reported by the engine.
    #[error("sqlite error {code}: {message}{}", sql_suffix(.sql))]
    Engine {
        message: String,
        code: i32,
        extended_code: i32,
        sql: Option<String>,
    },

    /// The prepared text holds no statement (empty or only comments).
    #[error("no SQL statement in {sql:?}")]
    NoSqlInStatement { sql: String },

    #[error("bind parameter not found: {name}")]
    BindParameterNotFound { name: String },

    #[error("column not found: {name}")]
    ColumnNotFound { name: String },

    #[error("column index {index} out of range for {count} result columns")]
    ColumnIndexOutOfRange { index: usize, count: usize },

    /// A typed column accessor hit a cell of an incompatible storage class.
    #[error("type mismatch: column holds {got}")]
    TypeMismatch { got: StorageClass },

    /// The conversion protocol does not accept this storage class.
    #[error("unexpected {got} value, expected {}", classes_display(.expected))]
    UnexpectedType {
        got: StorageClass,
        expected: &'static [StorageClass],
    },

    /// A non-optional value was requested from a null cell.
    #[error("unexpected null value")]
    UnexpectedNull,

    #[error("integer {value} does not fit the requested type")]
    IntegerOutOfRange { value: i64 },

    #[error("timestamp {seconds} is out of range")]
    TimestampOutOfRange { seconds: f64 },

    #[error("text in column {index} is not valid UTF-8")]
    InvalidUtf8 {
        index: usize,
        #[source]
        source: Utf8Error,
    },

    #[error("value of {len} bytes is too big for sqlite")]
    TooBig { len: usize },

    #[error("invalid database path: {0}")]
    InvalidPath(#[from] NulError),

    /// The engine could not allocate a connection handle at all.
    #[error("sqlite could not allocate a connection handle")]
    OutOfMemory,

    /// Rolling back after a failure failed as well. `cause` is the original
    /// failure and is also reported as the error source.
    #[error("rollback failed ({rollback}) after: {cause}")]
    Rollback {
        #[source]
        cause: Box<dyn StdError + Send + Sync>,
        rollback: Box<Error>,
    },
}

fn sql_suffix(sql: &Option<String>) -> String {
    match sql {
        Some(sql) => format!(" (in {sql:?})"),
        None => String::new(),
    }
}

fn classes_display(classes: &[StorageClass]) -> String {
    classes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" or ")
}

impl Error {
    /// Primary engine result code, for engine errors.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Engine { code, .. } => Some(code & 0xff),
            _ => None,
        }
    }

    /// Extended engine result code, for engine errors.
    pub fn extended_code(&self) -> Option<i32> {
        match self {
            Error::Engine { extended_code, .. } => Some(*extended_code),
            _ => None,
        }
    }

    pub fn is_constraint(&self) -> bool {
        self.code() == Some(ffi::SQLITE_CONSTRAINT)
    }

    /// Lock contention; retrying is left to the caller.
    pub fn is_busy(&self) -> bool {
        matches!(self.code(), Some(ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED))
    }

    /// Builds an engine error from the connection's current error state.
    pub(crate) fn from_engine(db: *mut ffi::sqlite3, code: c_int, sql: Option<&str>) -> Self {
        let (message, extended_code) = if db.is_null() {
            (errstr(code), code)
        } else {
            // SAFETY: db is a live connection handle; errmsg never returns null for one.
            unsafe {
                let message = CStr::from_ptr(ffi::sqlite3_errmsg(db))
                    .to_string_lossy()
                    .into_owned();
                (message, ffi::sqlite3_extended_errcode(db))
            }
        };
        Error::Engine {
            message,
            code,
            extended_code,
            sql: sql.map(str::to_owned),
        }
    }
}

fn errstr(code: c_int) -> String {
    // SAFETY: errstr returns a pointer to a static string for every code.
    unsafe {
        CStr::from_ptr(ffi::sqlite3_errstr(code))
            .to_string_lossy()
            .into_owned()
    }
}

/// Passes success statuses (`OK`, `ROW`, `DONE`) through and converts
/// everything else into an [`Error`].
///
/// # Panics
///
/// On `SQLITE_MISUSE`: the statement or connection was used in a way the
/// engine forbids and the program state can no longer be trusted.
pub(crate) fn check_status(db: *mut ffi::sqlite3, code: c_int, sql: Option<&str>) -> Result<c_int> {
    match code {
        ffi::SQLITE_OK | ffi::SQLITE_ROW | ffi::SQLITE_DONE => Ok(code),
        misuse if misuse & 0xff == ffi::SQLITE_MISUSE => {
            panic!(
                "SQLITE_MISUSE ({misuse}): {}{}",
                errstr(misuse),
                sql_suffix(&sql.map(str::to_owned))
            )
        }
        other => Err(Error::from_engine(db, other, sql)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_codes_pass_through() {
        let null = std::ptr::null_mut();
        assert_eq!(check_status(null, ffi::SQLITE_OK, None).unwrap(), ffi::SQLITE_OK);
        assert_eq!(check_status(null, ffi::SQLITE_ROW, None).unwrap(), ffi::SQLITE_ROW);
        assert_eq!(check_status(null, ffi::SQLITE_DONE, None).unwrap(), ffi::SQLITE_DONE);
    }

    #[test]
    fn test_engine_error_carries_sql() {
        let err =
            check_status(std::ptr::null_mut(), ffi::SQLITE_BUSY, Some("select 1")).unwrap_err();
        assert!(err.is_busy());
        assert!(!err.is_constraint());
        assert_eq!(err.code(), Some(ffi::SQLITE_BUSY));
        let text = err.to_string();
        assert!(text.contains("select 1"), "{text}");
    }

    #[test]
    #[should_panic(expected = "SQLITE_MISUSE")]
    fn test_misuse_panics() {
        let _ = check_status(std::ptr::null_mut(), ffi::SQLITE_MISUSE, None);
    }

    #[test]
    fn test_rollback_reports_cause_as_source() {
        let err = Error::Rollback {
            cause: Box::new(Error::UnexpectedNull),
            rollback: Box::new(Error::OutOfMemory),
        };
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("unexpected null value"));
        assert!(err.to_string().contains("could not allocate"));
    }

    #[test]
    fn test_unexpected_type_lists_expected_classes() {
        let err = Error::UnexpectedType {
            got: StorageClass::Blob,
            expected: &[StorageClass::Integer, StorageClass::Real],
        };
        assert_eq!(err.to_string(), "unexpected blob value, expected integer or real");
    }
}
