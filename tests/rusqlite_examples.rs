use anyhow::Result;
use tempfile::NamedTempFile;
use typed_sqlite::{Connection, Error, HandleOwnership, Row, StorageClass};

#[derive(Debug)]
struct User {
    _id: i64, // Prefix with underscore to indicate it's intentionally unused
    name: String,
    email: String,
    age: Option<i32>,
}

impl User {
    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(User {
            _id: row.get("id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            age: row.get("age")?,
        })
    }
}

// Helper function to create an in-memory database for testing
fn create_test_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    initialize_schema(&conn)?;
    Ok(conn)
}

// Helper function to create a temporary file-based database
fn create_temp_db() -> Result<(Connection, NamedTempFile)> {
    let temp_file = NamedTempFile::new()?;
    let path = temp_file.path().to_str().unwrap().to_string();
    let conn = Connection::open(&path)?;
    initialize_schema(&conn)?;
    Ok((conn, temp_file))
}

// Initialize the database schema
fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            age INTEGER
        );
        CREATE INDEX idx_users_email ON users(email);
        "#,
    )?;
    Ok(())
}

fn find_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    let stmt = conn.prepare("SELECT id, name, email, age FROM users WHERE id = :id")?;
    stmt.bind(":id", id)?;
    let user = match stmt.step()? {
        Some(row) => Some(User::from_row(&row)?),
        None => None,
    };
    Ok(user)
}

#[test]
fn test_basic_operations() -> Result<()> {
    let conn = create_test_db()?;

    conn.execute(
        "INSERT INTO users (name, email, age) VALUES (?1, ?2, ?3)",
        &[&"John Doe", &"john@example.com", &30i32],
    )?;

    let user = find_user(&conn, 1)?.expect("user 1");
    assert_eq!(user.name, "John Doe");
    assert_eq!(user.email, "john@example.com");
    assert_eq!(user.age, Some(30));

    let changed = conn.execute("UPDATE users SET age = ? WHERE id = ?", &[&31i32, &1i64])?;
    assert_eq!(changed, 1);
    assert_eq!(find_user(&conn, 1)?.and_then(|u| u.age), Some(31));

    conn.execute("UPDATE users SET age = NULL WHERE id = ?", &[&1i64])?;
    assert_eq!(find_user(&conn, 1)?.and_then(|u| u.age), None);

    conn.execute("DELETE FROM users WHERE id = ?", &[&1i64])?;
    assert!(find_user(&conn, 1)?.is_none());
    Ok(())
}

#[test]
fn test_unique_violation_is_constraint_error() -> Result<()> {
    let conn = create_test_db()?;
    let insert = conn.prepare("INSERT INTO users (name, email) VALUES (:name, :email)")?;
    insert.bind(":name", "A")?;
    insert.bind(":email", "dup@example.com")?;
    insert.step()?;
    insert.reset();

    insert.bind(":name", "B")?;
    let err = insert.step().unwrap_err();
    assert!(err.is_constraint(), "{err}");
    match &err {
        Error::Engine { sql, extended_code, .. } => {
            assert_eq!(sql.as_deref(), Some(insert.sql()));
            assert_eq!(*extended_code, rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn test_file_database_persists_across_connections() -> Result<()> {
    let (conn, temp_file) = create_temp_db()?;
    conn.execute(
        "INSERT INTO users (name, email, age) VALUES (?, ?, ?)",
        &[&"Jane", &"jane@example.com", &None::<i64>],
    )?;
    drop(conn);

    let reopened = Connection::open(temp_file.path().to_str().unwrap())?;
    let stmt = reopened.prepare("SELECT name, age FROM users")?;
    let row = stmt.step()?.expect("one row");
    assert_eq!(row.text("name")?.as_deref(), Some("Jane"));
    assert_eq!(row.storage_class("age")?, StorageClass::Null);
    assert!(stmt.step()?.is_none());
    Ok(())
}

#[test]
fn test_rusqlite_sees_rows_written_through_borrowed_handle() -> Result<()> {
    let owner = rusqlite::Connection::open_in_memory()?;
    owner.execute_batch("CREATE TABLE notes (body TEXT, data BLOB)")?;
    {
        let conn = Connection::borrowed(&owner)?;
        assert_eq!(conn.ownership(), HandleOwnership::Borrowed);
        conn.execute(
            "INSERT INTO notes VALUES (?, ?)",
            &[&"from typed_sqlite", &vec![1u8, 2, 3]],
        )?;
    }

    let (body, data): (String, Vec<u8>) =
        owner.query_row("SELECT body, data FROM notes", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
    assert_eq!(body, "from typed_sqlite");
    assert_eq!(data, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn test_external_handle_reads_rusqlite_rows() -> Result<()> {
    let owner = rusqlite::Connection::open_in_memory()?;
    owner.execute_batch("CREATE TABLE t (x REAL); INSERT INTO t VALUES (2.5);")?;

    // SAFETY: `owner` outlives `conn` and its statements.
    let handle = std::ptr::NonNull::new(unsafe { owner.handle() }).unwrap();
    let conn = unsafe { Connection::from_external_handle(handle) };
    assert!(!conn.owns_handle());
    {
        let stmt = conn.prepare("SELECT x FROM t")?;
        let row = stmt.step()?.expect("one row");
        assert_eq!(row.real(0)?, Some(2.5));
    }
    drop(conn);

    // The handle is still open after the wrapper is gone.
    let x: f64 = owner.query_row("SELECT x FROM t", [], |row| row.get(0))?;
    assert_eq!(x, 2.5);
    Ok(())
}
