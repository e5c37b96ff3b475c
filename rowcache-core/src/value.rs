//! Typed column values and index keys

use crate::error::ValueError;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use uuid::Uuid;

/// Declared type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Text,
    Uuid,
    Timestamp,
    Bytes,
}

impl FieldType {
    /// Textual values are quoted when rendered as SQL literals.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            FieldType::Text | FieldType::Uuid | FieldType::Timestamp | FieldType::Bytes
        )
    }
}

/// A single column value as it travels between the database and an entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int(_) => "int",
            SqlValue::Float(_) => "float",
            SqlValue::Text(_) => "text",
            SqlValue::Uuid(_) => "uuid",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Bytes(_) => "bytes",
        }
    }

    /// The field type this value naturally belongs to, `None` for null.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(_) => Some(FieldType::Bool),
            SqlValue::Int(_) => Some(FieldType::Int),
            SqlValue::Float(_) => Some(FieldType::Float),
            SqlValue::Text(_) => Some(FieldType::Text),
            SqlValue::Uuid(_) => Some(FieldType::Uuid),
            SqlValue::Timestamp(_) => Some(FieldType::Timestamp),
            SqlValue::Bytes(_) => Some(FieldType::Bytes),
        }
    }

    /// Convert to the representation a column of type `target` stores.
    /// Integers widen to floats, integral floats narrow to integers and
    /// text parses as a UUID; anything else is returned unchanged.
    pub fn coerce(self, target: FieldType) -> SqlValue {
        match (self, target) {
            (SqlValue::Int(v), FieldType::Float) => SqlValue::Float(v as f64),
            (SqlValue::Float(v), FieldType::Int)
                if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 =>
            {
                SqlValue::Int(v as i64)
            }
            (SqlValue::Text(s), FieldType::Uuid) => match Uuid::parse_str(s.trim()) {
                Ok(u) => SqlValue::Uuid(u),
                Err(_) => SqlValue::Text(s),
            },
            (value, _) => value,
        }
    }

    /// Decode into a Rust type.
    pub fn decode<T: FromSqlValue>(self) -> Result<T, ValueError> {
        T::from_sql_value(self)
    }

    /// Render as an inline SQL literal. Textual values are single-quoted with
    /// embedded quotes doubled.
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "TRUE".to_string(),
            SqlValue::Bool(false) => "FALSE".to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) if v.is_finite() => v.to_string(),
            SqlValue::Float(v) => quote(&v.to_string()),
            SqlValue::Text(s) => quote(s),
            SqlValue::Uuid(u) => quote(&u.to_string()),
            SqlValue::Timestamp(ts) => quote(&ts.to_rfc3339()),
            SqlValue::Bytes(bytes) => {
                let mut out = String::with_capacity(bytes.len() * 2 + 2);
                out.push_str("\\x");
                for b in bytes {
                    let _ = write!(out, "{:02x}", b);
                }
                quote(&out)
            }
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

// ============================================================================
// CONVERSIONS INTO SqlValue
// ============================================================================

macro_rules! impl_from_for_sql_value {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    SqlValue::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

impl_from_for_sql_value! {
    bool => Bool,
    i64 => Int,
    i32 => Int as i64,
    i16 => Int as i64,
    f64 => Float,
    f32 => Float as f64,
    String => Text,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
    Vec<u8> => Bytes,
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

// ============================================================================
// DECODING FROM SqlValue
// ============================================================================

/// Conversion out of a [`SqlValue`].
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError>;
}

fn mismatch(expected: FieldType, found: &SqlValue) -> ValueError {
    if found.is_null() {
        ValueError::UnexpectedNull { expected }
    } else {
        ValueError::TypeMismatch {
            expected,
            found: found.kind_name(),
        }
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Bool(v) => Ok(v),
            SqlValue::Int(0) => Ok(false),
            SqlValue::Int(1) => Ok(true),
            other => Err(mismatch(FieldType::Bool, &other)),
        }
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Int(v) => Ok(v),
            other => Err(mismatch(FieldType::Int, &other)),
        }
    }
}

impl FromSqlValue for i32 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        let wide = i64::from_sql_value(value)?;
        i32::try_from(wide).map_err(|e| ValueError::OutOfRange {
            value: wide.to_string(),
            reason: e.to_string(),
        })
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Float(v) => Ok(v),
            SqlValue::Int(v) => Ok(v as f64),
            other => Err(mismatch(FieldType::Float, &other)),
        }
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Text(v) => Ok(v),
            other => Err(mismatch(FieldType::Text, &other)),
        }
    }
}

impl FromSqlValue for Uuid {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Uuid(v) => Ok(v),
            SqlValue::Text(s) => Uuid::parse_str(&s).map_err(|e| ValueError::OutOfRange {
                value: s,
                reason: e.to_string(),
            }),
            other => Err(mismatch(FieldType::Uuid, &other)),
        }
    }
}

impl FromSqlValue for DateTime<Utc> {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Timestamp(v) => Ok(v),
            other => Err(mismatch(FieldType::Timestamp, &other)),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Bytes(v) => Ok(v),
            other => Err(mismatch(FieldType::Bytes, &other)),
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}

// ============================================================================
// INDEX KEYS
// ============================================================================

/// Hashable key used by indexes and dictionaries.
///
/// `Null` is the reserved sentinel for a null column value; a null value is
/// always indexed under it rather than being left out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Int(i64),
    /// Bit pattern of the float, with `-0.0` folded into `0.0`.
    Float(u64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl From<&SqlValue> for IndexKey {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => IndexKey::Null,
            SqlValue::Bool(v) => IndexKey::Bool(*v),
            SqlValue::Int(v) => IndexKey::Int(*v),
            SqlValue::Float(v) => {
                let v = if *v == 0.0 { 0.0 } else { *v };
                IndexKey::Float(v.to_bits())
            }
            SqlValue::Text(v) => IndexKey::Text(v.clone()),
            SqlValue::Uuid(v) => IndexKey::Uuid(*v),
            SqlValue::Timestamp(v) => IndexKey::Timestamp(*v),
            SqlValue::Bytes(v) => IndexKey::Bytes(v.clone()),
        }
    }
}

impl From<SqlValue> for IndexKey {
    fn from(value: SqlValue) -> Self {
        IndexKey::from(&value)
    }
}
