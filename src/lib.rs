//! Typed prepared statements, rows and transactions for SQLite.
//!
//! # Intention
//!
//! - Manage prepared-statement lifecycle, typed parameter binding and typed
//!   row decoding directly on SQLite's native interface.
//! - Keep a closed value model: every cell is one of five storage classes.
//! - Wrap caller work in transactions and nested savepoints that always
//!   roll back on failure.
//!
//! # Architectural Boundaries
//!
//! - Only SQLite/database code belongs here.
//! - SQL semantics, locking and persistence stay in the engine.
//! - No pooling, async I/O, query building or migrations.
//!
//! # Example
//!
//! ```
//! use typed_sqlite::{Connection, TransactionMode};
//!
//! let db = Connection::open_in_memory()?;
//! db.run("create table users (name text, age integer)")?;
//! db.transaction(TransactionMode::Deferred, || {
//!     db.execute("insert into users values (?, ?)", &[&"Ada", &36i64])
//! })?;
//!
//! let stmt = db.prepare("select name, age from users")?;
//! let row = stmt.step()?.expect("one row");
//! assert_eq!(row.text("name")?.as_deref(), Some("Ada"));
//! assert_eq!(row.integer("age")?, Some(36));
//! # Ok::<(), typed_sqlite::Error>(())
//! ```

pub mod sqlite;

pub use sqlite::*;
