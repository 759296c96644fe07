//! Typed execution layer over SQLite's C interface.
//!
//! Data flows one way: a [`Connection`] prepares a [`Statement`], the
//! caller binds parameters, and each [`Statement::step`] yields a [`Row`]
//! that is readable until the next step. Transactions and savepoints are
//! SQL control statements sent through the same path.

mod config;
mod connection;
mod error;
mod row;
mod statement;
mod transaction;
mod value;

pub use config::{SavepointNaming, SqliteConfig};
pub use connection::{BorrowedConnection, Connection, HandleOwnership};
pub use error::{Error, Result};
pub use row::{ColumnIndex, Row};
pub use statement::{ParamIndex, Statement};
pub use transaction::{
    RandomSavepointNames, Savepoint, SavepointNamer, SequentialSavepointNames, Transaction,
    TransactionMode,
};
pub use value::{FromSql, Null, StorageClass, ToSql, Value, ValueRef};
