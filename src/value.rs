//! Column value model.
//!
//! [`SqlValue`] is what the storage driver speaks: the five SQLite storage
//! classes. Every semantic column type owns exactly one encode/decode rule,
//! captured in a [`Codec`], that converts between the Rust value held by a
//! column and its driver-native form.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

const DOUBLE_BYTES: usize = std::mem::size_of::<f64>();

/// A driver-native value, as bound to a statement or read from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Storage class name, used in decode error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Integer(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Blob(_) => "blob",
        }
    }

    /// Storage identity: reals compare by bit pattern, so NaN equals NaN.
    pub fn same_as(&self, other: &SqlValue) -> bool {
        match (self, other) {
            (SqlValue::Real(a), SqlValue::Real(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Real(r) => write!(f, "{}", r),
            SqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            SqlValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&SqlValue> for serde_json::Value {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Integer(i) => serde_json::Value::Number((*i).into()),
            SqlValue::Real(r) => serde_json::Number::from_f64(*r)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SqlValue::Text(s) => serde_json::Value::String(s.clone()),
            SqlValue::Blob(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::Number((*byte).into())).collect(),
            ),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Semantic type tag of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Long,
    Double,
    DoubleArray,
    Text,
    Boolean,
    Date,
    Uuid,
    Enumerated,
}

impl ColumnType {
    /// SQLite type affinity used in CREATE TABLE.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer | Self::Long | Self::Boolean | Self::Enumerated => "INTEGER",
            Self::Double => "REAL",
            Self::Text | Self::Date | Self::Uuid => "TEXT",
            Self::DoubleArray => "BLOB",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Double => "double",
            Self::DoubleArray => "double[]",
            Self::Text => "string",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Uuid => "uuid",
            Self::Enumerated => "enum",
        };
        write!(f, "{}", name)
    }
}

/// Encode/decode rule for one semantic type.
///
/// Decoding never sees [`SqlValue::Null`]; null handling belongs to the column.
pub struct Codec<T> {
    kind: ColumnType,
    encode: fn(&T) -> SqlValue,
    decode: fn(SqlValue) -> Result<T, String>,
}

impl<T> Clone for Codec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Codec<T> {}

impl<T> fmt::Debug for Codec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").field("kind", &self.kind).finish()
    }
}

impl<T> Codec<T> {
    pub fn kind(&self) -> ColumnType {
        self.kind
    }

    pub fn encode(&self, value: &T) -> SqlValue {
        (self.encode)(value)
    }

    pub fn decode(&self, value: SqlValue) -> Result<T, String> {
        (self.decode)(value)
    }
}

impl<T: SqlType> Codec<T> {
    /// The codec of a built-in column type.
    pub fn of() -> Self {
        Codec {
            kind: T::KIND,
            encode: T::encode,
            decode: T::decode,
        }
    }
}

impl<E: Enumerated> Codec<E> {
    /// Integer-mapped codec for an enumerated type.
    pub fn enumerated() -> Self {
        Codec {
            kind: ColumnType::Enumerated,
            encode: encode_enum::<E>,
            decode: decode_enum::<E>,
        }
    }
}

/// A Rust type that a column can hold, with its storage rule.
pub trait SqlType: Clone + PartialEq + fmt::Debug + 'static {
    const KIND: ColumnType;

    fn encode(&self) -> SqlValue;

    fn decode(value: SqlValue) -> Result<Self, String>;
}

/// An enumeration stored through its integer mapping.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq)]
/// enum Colour { Red, Green }
///
/// impl Enumerated for Colour {
///     fn to_id(&self) -> i32 { match self { Colour::Red => 1, Colour::Green => 2 } }
///     fn from_id(id: i32) -> Option<Self> {
///         match id { 1 => Some(Colour::Red), 2 => Some(Colour::Green), _ => None }
///     }
/// }
/// ```
pub trait Enumerated: Clone + PartialEq + fmt::Debug + 'static {
    fn to_id(&self) -> i32;

    fn from_id(id: i32) -> Option<Self>;
}

fn encode_enum<E: Enumerated>(value: &E) -> SqlValue {
    SqlValue::Integer(value.to_id() as i64)
}

fn decode_enum<E: Enumerated>(value: SqlValue) -> Result<E, String> {
    let id = i32::decode(value)?;
    E::from_id(id).ok_or_else(|| format!("{} is not a known enumeration id", id))
}

fn mismatch(expected: &str, found: &SqlValue) -> String {
    format!("expected {}, found {}", expected, found.kind())
}

fn decode_i64(value: SqlValue) -> Result<i64, String> {
    match value {
        SqlValue::Integer(i) => Ok(i),
        // TEXT affinity stores numbers as their text form.
        SqlValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("expected integer, found text '{}'", s)),
        other => Err(mismatch("integer", &other)),
    }
}

impl SqlType for i32 {
    const KIND: ColumnType = ColumnType::Integer;

    fn encode(&self) -> SqlValue {
        SqlValue::Integer(*self as i64)
    }

    fn decode(value: SqlValue) -> Result<Self, String> {
        let wide = decode_i64(value)?;
        i32::try_from(wide).map_err(|_| format!("{} does not fit an integer column", wide))
    }
}

impl SqlType for i64 {
    const KIND: ColumnType = ColumnType::Long;

    fn encode(&self) -> SqlValue {
        SqlValue::Integer(*self)
    }

    fn decode(value: SqlValue) -> Result<Self, String> {
        decode_i64(value)
    }
}

impl SqlType for f64 {
    const KIND: ColumnType = ColumnType::Double;

    fn encode(&self) -> SqlValue {
        SqlValue::Real(*self)
    }

    fn decode(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Real(r) => Ok(r),
            SqlValue::Integer(i) => Ok(i as f64),
            other => Err(mismatch("real", &other)),
        }
    }
}

impl SqlType for Vec<f64> {
    const KIND: ColumnType = ColumnType::DoubleArray;

    fn encode(&self) -> SqlValue {
        let mut bytes = Vec::with_capacity(self.len() * DOUBLE_BYTES);
        for v in self {
            bytes.extend_from_slice(&v.to_ne_bytes());
        }
        SqlValue::Blob(bytes)
    }

    fn decode(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Blob(bytes) => Ok(bytes
                .chunks_exact(DOUBLE_BYTES)
                .map(|chunk| {
                    let mut raw = [0u8; DOUBLE_BYTES];
                    raw.copy_from_slice(chunk);
                    f64::from_ne_bytes(raw)
                })
                .collect()),
            other => Err(mismatch("blob", &other)),
        }
    }
}

impl SqlType for String {
    const KIND: ColumnType = ColumnType::Text;

    fn encode(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }

    fn decode(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(s) => Ok(s),
            SqlValue::Blob(b) => String::from_utf8(b).map_err(|e| e.to_string()),
            other => Err(mismatch("text", &other)),
        }
    }
}

impl SqlType for bool {
    const KIND: ColumnType = ColumnType::Boolean;

    fn encode(&self) -> SqlValue {
        SqlValue::Integer(*self as i64)
    }

    fn decode(value: SqlValue) -> Result<Self, String> {
        Ok(decode_i64(value)? != 0)
    }
}

impl SqlType for DateTime<Utc> {
    const KIND: ColumnType = ColumnType::Date;

    fn encode(&self) -> SqlValue {
        SqlValue::Integer(self.timestamp_millis())
    }

    fn decode(value: SqlValue) -> Result<Self, String> {
        let millis = decode_i64(value)?;
        DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| format!("{} is out of range for a date", millis))
    }
}

impl SqlType for Uuid {
    const KIND: ColumnType = ColumnType::Uuid;

    fn encode(&self) -> SqlValue {
        SqlValue::Text(self.hyphenated().to_string())
    }

    fn decode(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(s) => Uuid::parse_str(&s).map_err(|e| e.to_string()),
            other => Err(mismatch("text", &other)),
        }
    }
}
