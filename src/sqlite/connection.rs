//! Connection handle ownership and statement entry points.

use std::ffi::{c_int, CString};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use rusqlite::ffi;
use tracing::debug;

use super::config::{SavepointNaming, SqliteConfig};
use super::error::{check_status, Error, Result};
use super::statement::{compile, Statement};
use super::transaction::SavepointNamer;
use super::value::ToSql;

/// Whether a [`Connection`] closes its handle when dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOwnership {
    /// Opened by the connection, closed on drop.
    Owned,
    /// Supplied by the caller, never closed by the connection.
    Borrowed,
}

/// A connection to an SQLite database.
///
/// One thread drives a connection and its statements at a time; the
/// handle is opened without the engine's internal mutex.
pub struct Connection {
    handle: NonNull<ffi::sqlite3>,
    ownership: HandleOwnership,
    savepoint_namer: Box<dyn SavepointNamer>,
}

impl Connection {
    /// Opens (creating if missing) the database at `path` read-write.
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_config(&SqliteConfig::new(path))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open_with_config(&SqliteConfig::in_memory())
    }

    pub fn open_with_config(config: &SqliteConfig) -> Result<Self> {
        let path = CString::new(config.db_path.as_str())?;
        let flags = ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_NOMUTEX;
        let mut db = ptr::null_mut();
        // SAFETY: path is nul-terminated and db is a valid out pointer.
        let rc = unsafe { ffi::sqlite3_open_v2(path.as_ptr(), &mut db, flags, ptr::null()) };
        let handle = NonNull::new(db).ok_or(Error::OutOfMemory)?;
        if let Err(err) = check_status(handle.as_ptr(), rc, None) {
            // SAFETY: the handle came from open_v2 and is closed exactly once.
            unsafe {
                ffi::sqlite3_close_v2(handle.as_ptr());
            }
            return Err(err);
        }

        let conn = Self {
            handle,
            ownership: HandleOwnership::Owned,
            savepoint_namer: config.savepoint_naming.namer(),
        };
        debug!(path = %config.db_path, "opened sqlite connection");

        if let Some(enabled) = config.foreign_keys {
            conn.run(if enabled {
                "PRAGMA foreign_keys = ON"
            } else {
                "PRAGMA foreign_keys = OFF"
            })?;
        }
        Ok(conn)
    }

    /// Wraps a handle the caller keeps owning. It is never closed here.
    ///
    /// # Safety
    ///
    /// `handle` must be an open connection that stays open for as long as
    /// the returned value and every statement prepared from it are alive.
    pub unsafe fn from_external_handle(handle: NonNull<ffi::sqlite3>) -> Self {
        Self {
            handle,
            ownership: HandleOwnership::Borrowed,
            savepoint_namer: SavepointNaming::default().namer(),
        }
    }

    /// Borrows the handle of a `rusqlite` connection for as long as `conn`
    /// is borrowed.
    pub fn borrowed(conn: &rusqlite::Connection) -> Result<BorrowedConnection<'_>> {
        // SAFETY: the raw handle is only used while `conn` stays borrowed.
        let handle = NonNull::new(unsafe { conn.handle() }).ok_or(Error::OutOfMemory)?;
        Ok(BorrowedConnection {
            // SAFETY: the lifetime on BorrowedConnection keeps `conn` open.
            inner: unsafe { Self::from_external_handle(handle) },
            _owner: PhantomData,
        })
    }

    pub(crate) fn handle(&self) -> *mut ffi::sqlite3 {
        self.handle.as_ptr()
    }

    pub fn ownership(&self) -> HandleOwnership {
        self.ownership
    }

    pub fn owns_handle(&self) -> bool {
        self.ownership == HandleOwnership::Owned
    }

    pub(crate) fn check(&self, rc: c_int, sql: Option<&str>) -> Result<c_int> {
        check_status(self.handle(), rc, sql)
    }

    pub(crate) fn next_savepoint_name(&self) -> String {
        self.savepoint_namer.next_name()
    }

    /// Replaces the strategy used to name savepoints.
    pub fn set_savepoint_namer(&mut self, namer: Box<dyn SavepointNamer>) {
        self.savepoint_namer = namer;
    }

    /// Compiles the first statement in `sql`.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        Statement::prepare(self, sql)
    }

    /// Prepares `sql` and steps it once, discarding any row.
    pub fn run(&self, sql: &str) -> Result<()> {
        let stmt = self.prepare(sql)?;
        stmt.step()?;
        Ok(())
    }

    /// Binds `params` to positions 1..=n, steps once and returns the number
    /// of rows changed.
    pub fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize> {
        let stmt = self.prepare(sql)?;
        stmt.bind_all(params)?;
        stmt.step()?;
        Ok(self.changes())
    }

    /// Runs every statement in `sql` to completion, in order.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let mut rest = sql;
        while !rest.is_empty() {
            let (handle, consumed) = compile(self, rest)?;
            let Some(handle) = handle else { break };
            let stmt = Statement::from_handle(self, handle, rest[..consumed].trim());
            while stmt.step()?.is_some() {}
            rest = rest.get(consumed..).unwrap_or_default();
        }
        Ok(())
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> usize {
        // SAFETY: handle is live.
        let changes = unsafe { ffi::sqlite3_changes(self.handle()) };
        usize::try_from(changes).unwrap_or_default()
    }

    pub fn last_insert_rowid(&self) -> i64 {
        // SAFETY: handle is live.
        unsafe { ffi::sqlite3_last_insert_rowid(self.handle()) }
    }

    /// False while a transaction is open on this connection.
    pub fn is_autocommit(&self) -> bool {
        // SAFETY: handle is live.
        unsafe { ffi::sqlite3_get_autocommit(self.handle()) != 0 }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.ownership == HandleOwnership::Owned {
            // close_v2 defers the close until outstanding statements finish.
            // SAFETY: the handle is owned and not used after this.
            unsafe {
                ffi::sqlite3_close_v2(self.handle());
            }
            debug!("closed sqlite connection");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("ownership", &self.ownership)
            .field("autocommit", &self.is_autocommit())
            .finish()
    }
}

/// A [`Connection`] over a handle owned by a `rusqlite::Connection`.
#[derive(Debug)]
pub struct BorrowedConnection<'a> {
    inner: Connection,
    _owner: PhantomData<&'a rusqlite::Connection>,
}

impl Deref for BorrowedConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.inner
    }
}
