//! Storage classes and the conversion protocol between Rust types and them.
//!
//! Every cell SQLite hands back belongs to exactly one of five storage
//! classes. [`ToSql`] describes how a Rust value is written and [`FromSql`]
//! how it is read back; anything a type does not explicitly accept is an
//! [`Error::UnexpectedType`].

use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::ffi;
use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// The five storage classes, numbered like the engine's fundamental types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum StorageClass {
    Integer = 1,
    Real = 2,
    Text = 3,
    Blob = 4,
    Null = 5,
}

impl StorageClass {
    pub(crate) fn from_code(code: i32) -> Self {
        match code {
            ffi::SQLITE_INTEGER => StorageClass::Integer,
            ffi::SQLITE_FLOAT => StorageClass::Real,
            ffi::SQLITE_TEXT => StorageClass::Text,
            ffi::SQLITE_BLOB => StorageClass::Blob,
            ffi::SQLITE_NULL => StorageClass::Null,
            other => panic!("sqlite reported unknown fundamental type {other}"),
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageClass::Integer => "integer",
            StorageClass::Real => "real",
            StorageClass::Text => "text",
            StorageClass::Blob => "blob",
            StorageClass::Null => "null",
        };
        f.write_str(name)
    }
}

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn storage_class(&self) -> StorageClass {
        self.as_value_ref().storage_class()
    }

    pub fn as_value_ref(&self) -> ValueRef<'_> {
        match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(r) => ValueRef::Real(*r),
            Value::Text(s) => ValueRef::Text(s),
            Value::Blob(b) => ValueRef::Blob(b),
        }
    }
}

/// Borrowed view of a value, used for binding and decoding without copies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRef<'a> {
    Null,
    Integer(i64),
    Real(f64),
    Text(&'a str),
    Blob(&'a [u8]),
}

impl ValueRef<'_> {
    pub fn storage_class(&self) -> StorageClass {
        match self {
            ValueRef::Null => StorageClass::Null,
            ValueRef::Integer(_) => StorageClass::Integer,
            ValueRef::Real(_) => StorageClass::Real,
            ValueRef::Text(_) => StorageClass::Text,
            ValueRef::Blob(_) => StorageClass::Blob,
        }
    }

    pub fn to_value(&self) -> Value {
        match *self {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(s) => Value::Text(s.to_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl<'a> From<&'a Value> for ValueRef<'a> {
    fn from(value: &'a Value) -> Self {
        value.as_value_ref()
    }
}

/// Marker that always binds SQL `NULL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Null;

/// A Rust type that can be written into a single storage class.
pub trait ToSql {
    /// The storage class a present value of this type is written as.
    fn storage_class() -> StorageClass
    where
        Self: Sized;

    fn to_sql(&self) -> ValueRef<'_>;
}

/// A Rust type that can be decoded from one or more storage classes.
pub trait FromSql: Sized {
    fn from_sql(value: ValueRef<'_>) -> Result<Self>;
}

fn unexpected(got: ValueRef<'_>, expected: &'static [StorageClass]) -> Error {
    match got {
        ValueRef::Null => Error::UnexpectedNull,
        other => Error::UnexpectedType {
            got: other.storage_class(),
            expected,
        },
    }
}

const INTEGER: &[StorageClass] = &[StorageClass::Integer];
const NUMERIC: &[StorageClass] = &[StorageClass::Integer, StorageClass::Real];
const TEXT: &[StorageClass] = &[StorageClass::Text];
const BLOB: &[StorageClass] = &[StorageClass::Blob];

impl ToSql for Null {
    fn storage_class() -> StorageClass {
        StorageClass::Null
    }

    fn to_sql(&self) -> ValueRef<'_> {
        ValueRef::Null
    }
}

impl ToSql for i64 {
    fn storage_class() -> StorageClass {
        StorageClass::Integer
    }

    fn to_sql(&self) -> ValueRef<'_> {
        ValueRef::Integer(*self)
    }
}

impl FromSql for i64 {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        match value {
            ValueRef::Integer(i) => Ok(i),
            other => Err(unexpected(other, INTEGER)),
        }
    }
}

macro_rules! narrow_integer {
    ($($ty:ty),*) => {$(
        impl ToSql for $ty {
            fn storage_class() -> StorageClass {
                StorageClass::Integer
            }

            fn to_sql(&self) -> ValueRef<'_> {
                ValueRef::Integer(i64::from(*self))
            }
        }

        impl FromSql for $ty {
            fn from_sql(value: ValueRef<'_>) -> Result<Self> {
                let wide = i64::from_sql(value)?;
                <$ty>::try_from(wide).map_err(|_| Error::IntegerOutOfRange { value: wide })
            }
        }
    )*};
}

narrow_integer!(i32, i16, i8, u32, u16, u8);

/// Booleans are stored as integer 0/1; any nonzero integer reads as true.
impl ToSql for bool {
    fn storage_class() -> StorageClass {
        StorageClass::Integer
    }

    fn to_sql(&self) -> ValueRef<'_> {
        ValueRef::Integer(i64::from(*self))
    }
}

impl FromSql for bool {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        match value {
            ValueRef::Integer(i) => Ok(i != 0),
            other => Err(unexpected(other, INTEGER)),
        }
    }
}

impl ToSql for f64 {
    fn storage_class() -> StorageClass {
        StorageClass::Real
    }

    fn to_sql(&self) -> ValueRef<'_> {
        ValueRef::Real(*self)
    }
}

impl FromSql for f64 {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        match value {
            ValueRef::Real(r) => Ok(r),
            ValueRef::Integer(i) => Ok(i as f64),
            other => Err(unexpected(other, NUMERIC)),
        }
    }
}

impl ToSql for f32 {
    fn storage_class() -> StorageClass {
        StorageClass::Real
    }

    fn to_sql(&self) -> ValueRef<'_> {
        ValueRef::Real(f64::from(*self))
    }
}

impl FromSql for f32 {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        f64::from_sql(value).map(|r| r as f32)
    }
}

impl ToSql for String {
    fn storage_class() -> StorageClass {
        StorageClass::Text
    }

    fn to_sql(&self) -> ValueRef<'_> {
        ValueRef::Text(self)
    }
}

impl ToSql for &str {
    fn storage_class() -> StorageClass {
        StorageClass::Text
    }

    fn to_sql(&self) -> ValueRef<'_> {
        ValueRef::Text(self)
    }
}

impl FromSql for String {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        match value {
            ValueRef::Text(s) => Ok(s.to_owned()),
            other => Err(unexpected(other, TEXT)),
        }
    }
}

impl ToSql for Vec<u8> {
    fn storage_class() -> StorageClass {
        StorageClass::Blob
    }

    fn to_sql(&self) -> ValueRef<'_> {
        ValueRef::Blob(self)
    }
}

impl ToSql for &[u8] {
    fn storage_class() -> StorageClass {
        StorageClass::Blob
    }

    fn to_sql(&self) -> ValueRef<'_> {
        ValueRef::Blob(self)
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        match value {
            ValueRef::Blob(b) => Ok(b.to_vec()),
            other => Err(unexpected(other, BLOB)),
        }
    }
}

/// Timestamps are written as real seconds since the Unix epoch and read
/// back from either integer or real seconds.
impl ToSql for DateTime<Utc> {
    fn storage_class() -> StorageClass {
        StorageClass::Real
    }

    fn to_sql(&self) -> ValueRef<'_> {
        let seconds = self.timestamp() as f64 + f64::from(self.timestamp_subsec_nanos()) / 1e9;
        ValueRef::Real(seconds)
    }
}

impl FromSql for DateTime<Utc> {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        match value {
            ValueRef::Integer(secs) => DateTime::<Utc>::from_timestamp(secs, 0).ok_or(
                Error::TimestampOutOfRange {
                    seconds: secs as f64,
                },
            ),
            ValueRef::Real(seconds) => timestamp_from_real(seconds),
            other => Err(unexpected(other, NUMERIC)),
        }
    }
}

fn timestamp_from_real(seconds: f64) -> Result<DateTime<Utc>> {
    let out_of_range = Error::TimestampOutOfRange { seconds };
    if !seconds.is_finite() || seconds.abs() >= i64::MAX as f64 {
        return Err(out_of_range);
    }
    let mut secs = seconds.floor() as i64;
    let mut nanos = ((seconds - seconds.floor()) * 1e9).round() as u32;
    if nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    DateTime::<Utc>::from_timestamp(secs, nanos).ok_or(out_of_range)
}

/// `None` binds `NULL`; a null cell decodes to `None`.
impl<T: ToSql> ToSql for Option<T> {
    fn storage_class() -> StorageClass {
        T::storage_class()
    }

    fn to_sql(&self) -> ValueRef<'_> {
        match self {
            Some(value) => value.to_sql(),
            None => ValueRef::Null,
        }
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        match value {
            ValueRef::Null => Ok(None),
            other => T::from_sql(other).map(Some),
        }
    }
}

/// Accepts every storage class, including null.
impl FromSql for Value {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        Ok(value.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_accepts_integer() {
        assert_eq!(f64::from_sql(ValueRef::Integer(3)).unwrap(), 3.0);
        assert_eq!(f64::from_sql(ValueRef::Real(2.5)).unwrap(), 2.5);
        assert!(matches!(
            f64::from_sql(ValueRef::Text("x")),
            Err(Error::UnexpectedType {
                got: StorageClass::Text,
                ..
            })
        ));
    }

    #[test]
    fn test_integer_rejects_real() {
        let err = i64::from_sql(ValueRef::Real(1.5)).unwrap_err();
        match err {
            Error::UnexpectedType { got, expected } => {
                assert_eq!(got, StorageClass::Real);
                assert_eq!(expected, &[StorageClass::Integer]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bool_nonzero_is_true() {
        assert!(!bool::from_sql(ValueRef::Integer(0)).unwrap());
        assert!(bool::from_sql(ValueRef::Integer(-7)).unwrap());
        assert_eq!(true.to_sql(), ValueRef::Integer(1));
        assert!(bool::from_sql(ValueRef::Real(1.0)).is_err());
    }

    #[test]
    fn test_null_requires_option() {
        assert!(matches!(String::from_sql(ValueRef::Null), Err(Error::UnexpectedNull)));
        assert_eq!(Option::<String>::from_sql(ValueRef::Null).unwrap(), None);
        assert_eq!(
            Option::<String>::from_sql(ValueRef::Text("hi")).unwrap(),
            Some("hi".to_string())
        );
        assert_eq!(None::<i64>.to_sql(), ValueRef::Null);
        assert_eq!(<Option<i64>>::storage_class(), StorageClass::Integer);
    }

    #[test]
    fn test_narrowing_out_of_range() {
        assert_eq!(u8::from_sql(ValueRef::Integer(255)).unwrap(), 255);
        assert!(matches!(
            u8::from_sql(ValueRef::Integer(256)),
            Err(Error::IntegerOutOfRange { value: 256 })
        ));
    }

    #[test]
    fn test_timestamp_from_integer_and_real() {
        let t = DateTime::<Utc>::from_sql(ValueRef::Integer(1_500_000_000)).unwrap();
        assert_eq!(t.timestamp(), 1_500_000_000);

        let t = DateTime::<Utc>::from_sql(ValueRef::Real(1_500_000_000.25)).unwrap();
        assert_eq!(t.timestamp(), 1_500_000_000);
        assert_eq!(t.timestamp_subsec_millis(), 250);

        assert!(DateTime::<Utc>::from_sql(ValueRef::Real(f64::NAN)).is_err());
        assert!(DateTime::<Utc>::from_sql(ValueRef::Blob(&[])).is_err());
    }

    #[test]
    fn test_value_accepts_everything() {
        assert_eq!(Value::from_sql(ValueRef::Null).unwrap(), Value::Null);
        assert_eq!(
            Value::from_sql(ValueRef::Blob(&[1, 2])).unwrap(),
            Value::Blob(vec![1, 2])
        );
        assert_eq!(Value::Text("a".into()).storage_class(), StorageClass::Text);
    }
}
