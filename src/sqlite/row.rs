//! Typed access to the current result row of a [`Statement`].

use std::collections::BTreeMap;
use std::ffi::c_int;
use std::fmt;

use rusqlite::ffi;

use super::error::{Error, Result};
use super::statement::Statement;
use super::value::{FromSql, StorageClass, Value, ValueRef};

/// Something that names a result column: a 0-based index or a column name.
pub trait ColumnIndex {
    fn column_index(&self, statement: &Statement<'_>) -> Result<usize>;
}

impl ColumnIndex for usize {
    fn column_index(&self, statement: &Statement<'_>) -> Result<usize> {
        let count = statement.column_count();
        if *self < count {
            Ok(*self)
        } else {
            Err(Error::ColumnIndexOutOfRange {
                index: *self,
                count,
            })
        }
    }
}

impl ColumnIndex for &str {
    fn column_index(&self, statement: &Statement<'_>) -> Result<usize> {
        statement.column_index(self)
    }
}

impl ColumnIndex for String {
    fn column_index(&self, statement: &Statement<'_>) -> Result<usize> {
        statement.column_index(self)
    }
}

/// View of the tuple a [`Statement::step`] call produced.
///
/// A row is only valid until its statement is stepped or reset again.
/// Touching it afterwards is a bug in the calling code and panics.
pub struct Row<'s> {
    statement: &'s Statement<'s>,
    step_index: u64,
}

impl<'s> Row<'s> {
    pub(crate) fn new(statement: &'s Statement<'s>, step_index: u64) -> Self {
        Self {
            statement,
            step_index,
        }
    }

    fn is_stale(&self) -> bool {
        self.statement.step_index() != self.step_index
    }

    fn guard_overstep(&self) {
        assert!(
            !self.is_stale(),
            "row of {:?} accessed after the statement was stepped or reset",
            self.statement.sql()
        );
    }

    fn resolve<I: ColumnIndex>(&self, index: I) -> Result<usize> {
        self.guard_overstep();
        index.column_index(self.statement)
    }

    fn class_at(&self, index: usize) -> StorageClass {
        // SAFETY: the row is current and index is below the column count.
        StorageClass::from_code(unsafe {
            ffi::sqlite3_column_type(self.statement.raw(), index as c_int)
        })
    }

    fn int64_at(&self, index: usize) -> i64 {
        // SAFETY: the row is current and index is below the column count.
        unsafe { ffi::sqlite3_column_int64(self.statement.raw(), index as c_int) }
    }

    fn double_at(&self, index: usize) -> f64 {
        // SAFETY: the row is current and index is below the column count.
        unsafe { ffi::sqlite3_column_double(self.statement.raw(), index as c_int) }
    }

    /// Reads cell `index` without copying. The borrow must not outlive
    /// this row's step, so it never leaves this module.
    fn value_ref_at(&self, index: usize) -> Result<ValueRef<'_>> {
        let stmt = self.statement.raw();
        let col = index as c_int;
        // SAFETY: the row is current and col is a valid column. The
        // pointer/length pairs are read in the order the engine requires
        // (value first, then byte count) and stay valid until the next step.
        unsafe {
            Ok(match self.class_at(index) {
                StorageClass::Null => ValueRef::Null,
                StorageClass::Integer => ValueRef::Integer(self.int64_at(index)),
                StorageClass::Real => ValueRef::Real(self.double_at(index)),
                StorageClass::Text => {
                    let text = ffi::sqlite3_column_text(stmt, col);
                    if text.is_null() {
                        return Err(Error::OutOfMemory);
                    }
                    let len = ffi::sqlite3_column_bytes(stmt, col) as usize;
                    let bytes = std::slice::from_raw_parts(text, len);
                    let text = std::str::from_utf8(bytes)
                        .map_err(|source| Error::InvalidUtf8 { index, source })?;
                    ValueRef::Text(text)
                }
                StorageClass::Blob => {
                    let blob = ffi::sqlite3_column_blob(stmt, col);
                    let len = ffi::sqlite3_column_bytes(stmt, col) as usize;
                    if blob.is_null() || len == 0 {
                        ValueRef::Blob(&[])
                    } else {
                        ValueRef::Blob(std::slice::from_raw_parts(blob.cast::<u8>(), len))
                    }
                }
            })
        }
    }

    /// Storage class the engine reports for this cell.
    pub fn storage_class<I: ColumnIndex>(&self, index: I) -> Result<StorageClass> {
        let index = self.resolve(index)?;
        Ok(self.class_at(index))
    }

    pub fn is_null<I: ColumnIndex>(&self, index: I) -> Result<bool> {
        Ok(self.storage_class(index)? == StorageClass::Null)
    }

    pub fn integer<I: ColumnIndex>(&self, index: I) -> Result<Option<i64>> {
        let index = self.resolve(index)?;
        match self.class_at(index) {
            StorageClass::Null => Ok(None),
            StorageClass::Integer => Ok(Some(self.int64_at(index))),
            got => Err(Error::TypeMismatch { got }),
        }
    }

    /// Reads a real; integer cells are promoted.
    pub fn real<I: ColumnIndex>(&self, index: I) -> Result<Option<f64>> {
        let index = self.resolve(index)?;
        match self.class_at(index) {
            StorageClass::Null => Ok(None),
            StorageClass::Real => Ok(Some(self.double_at(index))),
            StorageClass::Integer => Ok(Some(self.int64_at(index) as f64)),
            got => Err(Error::TypeMismatch { got }),
        }
    }

    pub fn text<I: ColumnIndex>(&self, index: I) -> Result<Option<String>> {
        let index = self.resolve(index)?;
        match self.class_at(index) {
            StorageClass::Null => Ok(None),
            StorageClass::Text => match self.value_ref_at(index)? {
                ValueRef::Text(s) => Ok(Some(s.to_owned())),
                other => Err(Error::TypeMismatch {
                    got: other.storage_class(),
                }),
            },
            got => Err(Error::TypeMismatch { got }),
        }
    }

    pub fn blob<I: ColumnIndex>(&self, index: I) -> Result<Option<Vec<u8>>> {
        let index = self.resolve(index)?;
        match self.class_at(index) {
            StorageClass::Null => Ok(None),
            StorageClass::Blob => match self.value_ref_at(index)? {
                ValueRef::Blob(b) => Ok(Some(b.to_vec())),
                other => Err(Error::TypeMismatch {
                    got: other.storage_class(),
                }),
            },
            got => Err(Error::TypeMismatch { got }),
        }
    }

    /// Decodes the cell through [`FromSql`].
    pub fn get<T: FromSql, I: ColumnIndex>(&self, index: I) -> Result<T> {
        let index = self.resolve(index)?;
        T::from_sql(self.value_ref_at(index)?)
    }

    /// Untyped read, whatever the storage class. Meant for diagnostics.
    pub fn value<I: ColumnIndex>(&self, index: I) -> Result<Value> {
        let index = self.resolve(index)?;
        Ok(self.value_ref_at(index)?.to_value())
    }

    /// Every column in result order, paired with its name.
    fn entries(&self) -> Result<Vec<(&str, Value)>> {
        self.guard_overstep();
        self.statement
            .column_names()
            .iter()
            .enumerate()
            .map(|(index, name)| Ok((name.as_str(), self.value_ref_at(index)?.to_value())))
            .collect()
    }

    /// Column name to untyped value, for diagnostics. A name shared by
    /// several columns maps to the first of them, as name lookup does.
    pub fn to_map(&self) -> Result<BTreeMap<String, Value>> {
        let mut map = BTreeMap::new();
        for (name, value) in self.entries()? {
            map.entry(name.to_owned()).or_insert(value);
        }
        Ok(map)
    }

    pub fn column_count(&self) -> usize {
        self.statement.column_count()
    }

    pub fn column_names(&self) -> &[String] {
        self.statement.column_names()
    }

    pub fn statement(&self) -> &Statement<'s> {
        self.statement
    }
}

impl fmt::Debug for Row<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_stale() {
            return f.write_str("Row(stale)");
        }
        match self.entries() {
            Ok(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(name, value)| (name, value)))
                .finish(),
            Err(err) => write!(f, "Row(error: {err})"),
        }
    }
}
