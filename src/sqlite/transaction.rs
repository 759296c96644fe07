//! Transactions and savepoints.
//!
//! Both are plain SQL control statements routed through
//! [`Connection::run`], so locking behaviour is whatever the engine does
//! for `BEGIN`/`SAVEPOINT`. The guards here make sure every boundary that
//! was opened is closed again: by an explicit commit/release or rollback,
//! or by rolling back when the guard is dropped unfinished.
//!
//! When rolling back after a failure fails too, the caller gets
//! [`Error::Rollback`] carrying the original failure as its cause.

use std::cell::Cell;
use std::error::Error as StdError;

use tracing::{debug, warn};
use ulid::Ulid;

use super::connection::Connection;
use super::error::{Error, Result};

/// Lock acquisition strategy for `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// Defers locking the database until the first read/write executes.
    #[default]
    Deferred,
    /// Immediately acquires a reserved lock on the database.
    Immediate,
    /// Immediately acquires an exclusive lock on the database.
    Exclusive,
}

impl TransactionMode {
    pub fn as_sql(self) -> &'static str {
        match self {
            TransactionMode::Deferred => "DEFERRED",
            TransactionMode::Immediate => "IMMEDIATE",
            TransactionMode::Exclusive => "EXCLUSIVE",
        }
    }
}

/// Produces savepoint names. Names must be unique among the savepoints
/// open on a connection at the same time.
pub trait SavepointNamer {
    fn next_name(&self) -> String;
}

/// `sp_` followed by a lowercase ULID.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSavepointNames;

impl SavepointNamer for RandomSavepointNames {
    fn next_name(&self) -> String {
        format!("sp_{}", Ulid::new().to_string().to_lowercase())
    }
}

/// `sp_1`, `sp_2`, ...
#[derive(Debug, Default)]
pub struct SequentialSavepointNames {
    last: Cell<u64>,
}

impl SavepointNamer for SequentialSavepointNames {
    fn next_name(&self) -> String {
        let next = self.last.get() + 1;
        self.last.set(next);
        format!("sp_{next}")
    }
}

/// Quotes a savepoint name as an SQL string literal.
fn quote(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// Returns `cause`, or wraps it together with the rollback error when
/// rolling back failed as well.
fn after_failure<E>(cause: E, rollback: Result<()>) -> E
where
    E: From<Error> + Into<Box<dyn StdError + Send + Sync>>,
{
    match rollback {
        Ok(()) => cause,
        Err(rollback) => {
            warn!(error = %rollback, "rollback after failure failed");
            E::from(Error::Rollback {
                cause: cause.into(),
                rollback: Box::new(rollback),
            })
        }
    }
}

/// An open transaction. Dropping it without [`commit`](Transaction::commit)
/// rolls it back.
#[derive(Debug)]
pub struct Transaction<'c> {
    conn: &'c Connection,
    finished: bool,
}

impl<'c> Transaction<'c> {
    fn begin(conn: &'c Connection, mode: TransactionMode) -> Result<Self> {
        conn.run(&format!("BEGIN {} TRANSACTION", mode.as_sql()))?;
        debug!(mode = mode.as_sql(), "began transaction");
        Ok(Self {
            conn,
            finished: false,
        })
    }

    /// Commits. If `COMMIT` fails the transaction is rolled back and the
    /// commit error returned.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        match self.conn.run("COMMIT TRANSACTION") {
            Ok(()) => {
                debug!("committed transaction");
                Ok(())
            }
            Err(err) => Err(after_failure(err, self.roll_back())),
        }
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.roll_back()
    }

    fn roll_back(&self) -> Result<()> {
        // Some failures (full disk, I/O errors) make the engine roll back
        // on its own, after which ROLLBACK would fail.
        if self.conn.is_autocommit() {
            debug!("transaction already rolled back by sqlite");
            return Ok(());
        }
        self.conn.run("ROLLBACK TRANSACTION")?;
        debug!("rolled back transaction");
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("transaction dropped unfinished, rolling back");
        if let Err(err) = self.roll_back() {
            warn!(error = %err, "implicit transaction rollback failed");
        }
    }
}

/// An open savepoint. Dropping it without [`release`](Savepoint::release)
/// rolls back to it and releases it.
#[derive(Debug)]
pub struct Savepoint<'c> {
    conn: &'c Connection,
    name: String,
    finished: bool,
}

impl<'c> Savepoint<'c> {
    fn open(conn: &'c Connection) -> Result<Self> {
        let name = conn.next_savepoint_name();
        conn.run(&format!("SAVEPOINT {}", quote(&name)))?;
        debug!(savepoint = %name, "opened savepoint");
        Ok(Self {
            conn,
            name,
            finished: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Releases the savepoint. If `RELEASE` fails (releasing the outermost
    /// savepoint commits), the savepoint is rolled back and the release
    /// error returned.
    pub fn release(mut self) -> Result<()> {
        self.finished = true;
        match self.conn.run(&format!("RELEASE {}", quote(&self.name))) {
            Ok(()) => {
                debug!(savepoint = %self.name, "released savepoint");
                Ok(())
            }
            Err(err) => Err(after_failure(err, self.roll_back())),
        }
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.roll_back()
    }

    /// `ROLLBACK TO` leaves the savepoint on the stack; the `RELEASE` that
    /// follows pops it. Both run even if the first fails.
    fn roll_back(&self) -> Result<()> {
        let name = quote(&self.name);
        let rolled_back = self.conn.run(&format!("ROLLBACK TO {name}"));
        let released = self.conn.run(&format!("RELEASE {name}"));
        debug!(savepoint = %self.name, "rolled back savepoint");
        rolled_back.and(released)
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(savepoint = %self.name, "savepoint dropped unfinished, rolling back");
        if let Err(err) = self.roll_back() {
            warn!(savepoint = %self.name, error = %err, "implicit savepoint rollback failed");
        }
    }
}

impl Connection {
    /// Starts a transaction. Only one can be open per connection; a second
    /// `BEGIN` fails in the engine.
    pub fn begin(&self, mode: TransactionMode) -> Result<Transaction<'_>> {
        Transaction::begin(self, mode)
    }

    /// Runs `work` inside a transaction.
    ///
    /// Commits when `work` succeeds. Rolls back when `work` fails or the
    /// commit fails, and returns that failure.
    pub fn transaction<T, E, F>(&self, mode: TransactionMode, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<Error> + Into<Box<dyn StdError + Send + Sync>>,
    {
        let tx = self.begin(mode)?;
        match work() {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                let rolled_back = tx.rollback();
                Err(after_failure(err, rolled_back))
            }
        }
    }

    /// Opens a savepoint, inside or outside a transaction.
    pub fn savepoint_guard(&self) -> Result<Savepoint<'_>> {
        Savepoint::open(self)
    }

    /// Runs `work` inside a savepoint.
    ///
    /// Releases it when `work` succeeds. When `work` fails, rolls back to
    /// the savepoint, releases it and returns the failure. Savepoints nest.
    pub fn savepoint<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<Error> + Into<Box<dyn StdError + Send + Sync>>,
    {
        let savepoint = self.savepoint_guard()?;
        match work() {
            Ok(value) => {
                savepoint.release()?;
                Ok(value)
            }
            Err(err) => {
                let rolled_back = savepoint.rollback();
                Err(after_failure(err, rolled_back))
            }
        }
    }
}
