//! Prepared statements: compilation, parameter binding and stepping.

use std::cell::{Cell, OnceCell};
use std::collections::HashMap;
use std::ffi::{c_int, CStr};
use std::fmt;
use std::ptr::{self, NonNull};

use rusqlite::ffi;
use tracing::trace;

use super::connection::Connection;
use super::error::{Error, Result};
use super::row::Row;
use super::value::{ToSql, ValueRef};

/// Result-column shape of a compiled statement. Fixed once compiled.
#[derive(Debug)]
struct Columns {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

/// Bind-parameter shape of a compiled statement. Fixed once compiled.
#[derive(Debug)]
struct Parameters {
    names: Vec<Option<String>>,
    by_name: HashMap<String, usize>,
}

/// A compiled SQL statement bound to the [`Connection`] it was prepared on.
///
/// Stepping yields [`Row`]s that stay readable only until the next
/// [`step`](Statement::step) or [`reset`](Statement::reset).
pub struct Statement<'c> {
    conn: &'c Connection,
    handle: NonNull<ffi::sqlite3_stmt>,
    sql: String,
    step_index: Cell<u64>,
    columns: OnceCell<Columns>,
    parameters: OnceCell<Parameters>,
}

/// Something that names a bind parameter: a 1-based position or a name
/// including its prefix (`:id`, `@id`, `$id`, `?1`).
pub trait ParamIndex {
    fn param_index(&self, statement: &Statement<'_>) -> Result<usize>;
}

impl ParamIndex for usize {
    fn param_index(&self, _statement: &Statement<'_>) -> Result<usize> {
        Ok(*self)
    }
}

impl ParamIndex for &str {
    fn param_index(&self, statement: &Statement<'_>) -> Result<usize> {
        statement.bind_parameter_index(self)
    }
}

impl ParamIndex for String {
    fn param_index(&self, statement: &Statement<'_>) -> Result<usize> {
        statement.bind_parameter_index(self)
    }
}

/// Compiles the first statement in `sql`. Returns the handle (none when
/// the text holds only whitespace or comments) and how many bytes of
/// `sql` the engine consumed.
pub(crate) fn compile(
    conn: &Connection,
    sql: &str,
) -> Result<(Option<NonNull<ffi::sqlite3_stmt>>, usize)> {
    let len = c_int::try_from(sql.len()).map_err(|_| Error::TooBig { len: sql.len() })?;
    let mut stmt = ptr::null_mut();
    let mut tail = ptr::null();
    // SAFETY: sql points to len readable bytes; the out pointers are valid.
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(conn.handle(), sql.as_ptr().cast(), len, &mut stmt, &mut tail)
    };
    conn.check(rc, Some(sql))?;
    let consumed = if tail.is_null() {
        sql.len()
    } else {
        (tail as usize - sql.as_ptr() as usize).min(sql.len())
    };
    trace!(sql, consumed, "compiled statement");
    Ok((NonNull::new(stmt), consumed))
}

fn byte_len(len: usize) -> Result<c_int> {
    c_int::try_from(len).map_err(|_| Error::TooBig { len })
}

impl<'c> Statement<'c> {
    pub(crate) fn prepare(conn: &'c Connection, sql: &str) -> Result<Self> {
        match compile(conn, sql)? {
            (Some(handle), _) => Ok(Self::from_handle(conn, handle, sql)),
            (None, _) => Err(Error::NoSqlInStatement {
                sql: sql.to_owned(),
            }),
        }
    }

    pub(crate) fn from_handle(
        conn: &'c Connection,
        handle: NonNull<ffi::sqlite3_stmt>,
        sql: &str,
    ) -> Self {
        Self {
            conn,
            handle,
            sql: sql.to_owned(),
            step_index: Cell::new(0),
            columns: OnceCell::new(),
            parameters: OnceCell::new(),
        }
    }

    /// The SQL text this statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// True when the statement makes no direct changes to the database.
    pub fn readonly(&self) -> bool {
        // SAFETY: handle is a live prepared statement.
        unsafe { ffi::sqlite3_stmt_readonly(self.handle.as_ptr()) != 0 }
    }

    pub(crate) fn step_index(&self) -> u64 {
        self.step_index.get()
    }

    pub(crate) fn raw(&self) -> *mut ffi::sqlite3_stmt {
        self.handle.as_ptr()
    }

    fn check(&self, rc: c_int) -> Result<c_int> {
        self.conn.check(rc, Some(&self.sql))
    }

    /// Advances to the next result row.
    ///
    /// Returns `None` once the statement has run to completion. Any row
    /// obtained earlier becomes stale, even when this call fails.
    pub fn step(&self) -> Result<Option<Row<'_>>> {
        let index = self.step_index.get() + 1;
        self.step_index.set(index);
        // SAFETY: handle is a live prepared statement.
        let rc = unsafe { ffi::sqlite3_step(self.raw()) };
        trace!(sql = %self.sql, rc, "stepped statement");
        match self.check(rc)? {
            ffi::SQLITE_ROW => Ok(Some(Row::new(self, index))),
            _ => Ok(None),
        }
    }

    /// Rewinds the statement so it can run again. Bindings are kept.
    pub fn reset(&self) {
        self.step_index.set(self.step_index.get() + 1);
        // The status only repeats the outcome of the previous step.
        // SAFETY: handle is a live prepared statement.
        let _ = unsafe { ffi::sqlite3_reset(self.raw()) };
    }

    /// Sets every bind parameter back to `NULL`.
    pub fn clear_bindings(&self) -> Result<()> {
        // SAFETY: handle is a live prepared statement.
        let rc = unsafe { ffi::sqlite3_clear_bindings(self.raw()) };
        self.check(rc).map(|_| ())
    }

    /// Binds `value` at a 1-based position or a parameter name.
    /// Text and blobs are copied; `None` binds `NULL`.
    pub fn bind<P: ParamIndex, T: ToSql>(&self, param: P, value: T) -> Result<()> {
        self.bind_value(param, value.to_sql())
    }

    pub fn bind_null<P: ParamIndex>(&self, param: P) -> Result<()> {
        self.bind_value(param, ValueRef::Null)
    }

    pub fn bind_value<P: ParamIndex>(&self, param: P, value: ValueRef<'_>) -> Result<()> {
        let index = param.param_index(self)?;
        // Positions past c_int are out of range for the engine as well.
        let index = c_int::try_from(index).unwrap_or(c_int::MAX);
        let stmt = self.raw();
        // SAFETY: handle is live; text and blob are copied by the engine
        // (SQLITE_TRANSIENT) before the call returns.
        let rc = unsafe {
            match value {
                ValueRef::Null => ffi::sqlite3_bind_null(stmt, index),
                ValueRef::Integer(i) => ffi::sqlite3_bind_int64(stmt, index, i),
                ValueRef::Real(r) => ffi::sqlite3_bind_double(stmt, index, r),
                ValueRef::Text(s) => ffi::sqlite3_bind_text(
                    stmt,
                    index,
                    s.as_ptr().cast(),
                    byte_len(s.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
                ValueRef::Blob(b) if b.is_empty() => ffi::sqlite3_bind_zeroblob(stmt, index, 0),
                ValueRef::Blob(b) => ffi::sqlite3_bind_blob(
                    stmt,
                    index,
                    b.as_ptr().cast(),
                    byte_len(b.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
            }
        };
        self.check(rc).map(|_| ())
    }

    /// Binds `params` to positions 1..=n.
    pub fn bind_all(&self, params: &[&dyn ToSql]) -> Result<()> {
        for (offset, param) in params.iter().enumerate() {
            self.bind_value(offset + 1, param.to_sql())?;
        }
        Ok(())
    }

    fn columns(&self) -> &Columns {
        self.columns.get_or_init(|| {
            // SAFETY: handle is live; indices are below the column count.
            let count = unsafe { ffi::sqlite3_column_count(self.raw()) };
            let names: Vec<String> = (0..count)
                .map(|i| unsafe { owned_name(ffi::sqlite3_column_name(self.raw(), i)) })
                .collect();
            let mut by_name = HashMap::with_capacity(names.len());
            for (index, name) in names.iter().enumerate() {
                by_name.entry(name.clone()).or_insert(index);
            }
            Columns { names, by_name }
        })
    }

    fn parameters(&self) -> &Parameters {
        self.parameters.get_or_init(|| {
            // SAFETY: handle is live; indices are within 1..=count.
            let count = unsafe { ffi::sqlite3_bind_parameter_count(self.raw()) };
            let names: Vec<Option<String>> = (1..=count)
                .map(|i| {
                    let name = unsafe { ffi::sqlite3_bind_parameter_name(self.raw(), i) };
                    (!name.is_null()).then(|| unsafe { owned_name(name) })
                })
                .collect();
            let by_name = names
                .iter()
                .enumerate()
                .filter_map(|(offset, name)| Some((name.clone()?, offset + 1)))
                .collect();
            Parameters { names, by_name }
        })
    }

    pub fn column_count(&self) -> usize {
        self.columns().names.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns().names
    }

    /// Column name to 0-based index. With duplicate names the first wins.
    pub fn column_name_map(&self) -> &HashMap<String, usize> {
        &self.columns().by_name
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.column_name_map()
            .get(name)
            .copied()
            .ok_or_else(|| Error::ColumnNotFound {
                name: name.to_owned(),
            })
    }

    /// Highest bind position, which equals the number of parameters.
    pub fn bind_parameter_count(&self) -> usize {
        self.parameters().names.len()
    }

    /// Parameter names by position (index 0 is position 1); anonymous `?`
    /// parameters have no name.
    pub fn bind_parameter_names(&self) -> &[Option<String>] {
        &self.parameters().names
    }

    pub fn bind_parameter_name_map(&self) -> &HashMap<String, usize> {
        &self.parameters().by_name
    }

    /// Resolves a named parameter to its 1-based position.
    pub fn bind_parameter_index(&self, name: &str) -> Result<usize> {
        self.bind_parameter_name_map()
            .get(name)
            .copied()
            .ok_or_else(|| Error::BindParameterNotFound {
                name: name.to_owned(),
            })
    }
}

/// # Safety
///
/// `name` must be null or point to a nul-terminated string.
unsafe fn owned_name(name: *const std::ffi::c_char) -> String {
    if name.is_null() {
        return String::new();
    }
    CStr::from_ptr(name).to_string_lossy().into_owned()
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        // The status repeats the last step's outcome, already reported.
        // SAFETY: handle is live and never used after this.
        unsafe {
            ffi::sqlite3_finalize(self.raw());
        }
    }
}

impl fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("step_index", &self.step_index.get())
            .finish()
    }
}
