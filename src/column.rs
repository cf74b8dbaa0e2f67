//! Typed, dirty-tracked columns and their registration factory.

use crate::driver::{Rows, Statement};
use crate::error::{KeelError, KeelResult};
use crate::source::{Binding, SourceId};
use crate::value::{Codec, ColumnType, Enumerated, SqlType, SqlValue};
use chrono::{DateTime, Utc};
use std::fmt;
use std::ops::BitOr;
use std::rc::Rc;
use uuid::Uuid;

/// Column names must not collide with storage-engine internals, so every
/// declared name is stored with this prefix.
pub const COLUMN_PREFIX: &str = "db_";

/// Key-role flags of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Keys(u8);

impl Keys {
    pub const NONE: Keys = Keys(0);
    pub const KEY: Keys = Keys(1);
    pub const AUTOINCREMENT: Keys = Keys(1 << 1);
    pub const NULLABLE: Keys = Keys(1 << 2);

    pub const fn contains(self, other: Keys) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// KEY or AUTOINCREMENT: part of the record's identity.
    pub const fn is_key(self) -> bool {
        self.contains(Self::KEY) || self.contains(Self::AUTOINCREMENT)
    }

    pub const fn is_nullable(self) -> bool {
        self.contains(Self::NULLABLE)
    }

    pub const fn is_autoincrement(self) -> bool {
        self.contains(Self::AUTOINCREMENT)
    }
}

impl BitOr for Keys {
    type Output = Keys;

    fn bitor(self, rhs: Keys) -> Keys {
        Keys(self.0 | rhs.0)
    }
}

/// Identifies a column inside a query: its source occurrence plus its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub(crate) source: SourceId,
    pub(crate) name: String,
}

impl ColumnRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> SourceId {
        self.source
    }
}

/// A named, typed cell belonging to exactly one record instance.
pub struct Column<T> {
    name: String,
    keys: Keys,
    codec: Codec<T>,
    value: Option<T>,
    dirty: bool,
    binding: Rc<Binding>,
}

impl<T: Clone + PartialEq + fmt::Debug + 'static> Column<T> {
    fn new(binding: Rc<Binding>, name: &str, keys: Keys, codec: Codec<T>) -> Self {
        Self {
            name: format!("{}{}", COLUMN_PREFIX, name),
            keys,
            codec,
            value: None,
            dirty: false,
            binding,
        }
    }

    /// Set a new value, marking the column dirty unless nothing changed.
    /// Values are compared as stored, so a double holding NaN is unchanged
    /// by setting NaN again.
    pub fn set(&mut self, value: impl Into<Option<T>>) {
        let value = value.into();
        let unchanged = match (&value, &self.value) {
            (None, None) => true,
            (Some(new), Some(old)) => {
                new == old || self.codec.encode(new).same_as(&self.codec.encode(old))
            }
            _ => false,
        };
        if unchanged {
            return;
        }
        self.value = value;
        self.dirty = true;
    }

    /// Copy another column's current value into this one.
    pub fn set_from(&mut self, other: &Column<T>) {
        self.set(other.value.clone());
    }

    /// The most recently set or materialized value.
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn codec(&self) -> Codec<T> {
        self.codec
    }

    /// Encode a value through this column's type rule.
    pub(crate) fn encode_value(&self, value: &T) -> SqlValue {
        self.codec.encode(value)
    }

    /// Bind the current value to a prepared statement parameter (1-based).
    pub fn bind(&self, statement: &mut dyn Statement, position: usize) -> KeelResult<()> {
        let value = AnyColumn::encode(self)?;
        statement
            .bind(position, value)
            .map_err(|e| KeelError::storage(statement.sql(), e))
    }
}

impl<T> fmt::Debug for Column<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Type-erased view of a column, used by the statement builders and cursors.
pub trait AnyColumn {
    fn name(&self) -> &str;

    fn keys(&self) -> Keys;

    fn column_type(&self) -> ColumnType;

    fn is_dirty(&self) -> bool;

    fn flag_clean(&mut self);

    fn has_value(&self) -> bool;

    fn binding(&self) -> &Rc<Binding>;

    fn source(&self) -> SourceId {
        self.binding().id()
    }

    fn is_key(&self) -> bool {
        self.keys().is_key()
    }

    fn column_ref(&self) -> ColumnRef {
        ColumnRef {
            source: self.source(),
            name: self.name().to_string(),
        }
    }

    /// Encode the current value; null into a non-nullable column is rejected.
    fn encode(&self) -> KeelResult<SqlValue>;

    /// Store a persisted value. Never marks the column dirty.
    fn apply(&mut self, value: SqlValue) -> KeelResult<()>;

    /// Read this column from the current row, by 1-based position or, when
    /// `index` is `None`, by the column's own name.
    fn update(&mut self, row: &dyn Rows, index: Option<usize>) -> KeelResult<()> {
        let read = match index {
            Some(i) => row.read_index(i),
            None => row.read_name(self.name()),
        };
        let value = read.map_err(|e| KeelError::storage(row.sql(), e))?;
        self.apply(value)
    }
}

impl<T: Clone + PartialEq + fmt::Debug + 'static> AnyColumn for Column<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn keys(&self) -> Keys {
        self.keys
    }

    fn column_type(&self) -> ColumnType {
        self.codec.kind()
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn flag_clean(&mut self) {
        self.dirty = false;
    }

    fn has_value(&self) -> bool {
        self.value.is_some()
    }

    fn binding(&self) -> &Rc<Binding> {
        &self.binding
    }

    fn encode(&self) -> KeelResult<SqlValue> {
        match &self.value {
            Some(v) => Ok(self.codec.encode(v)),
            None if self.keys.is_nullable() => Ok(SqlValue::Null),
            None => Err(KeelError::constraint(format!(
                "The column {} of {} cannot be null.",
                self.name,
                self.binding.table()
            ))),
        }
    }

    fn apply(&mut self, value: SqlValue) -> KeelResult<()> {
        self.value = if value.is_null() {
            None
        } else {
            Some(
                self.codec
                    .decode(value)
                    .map_err(|message| KeelError::decode(&self.name, message))?,
            )
        };
        self.dirty = false;
        Ok(())
    }
}

/// Registers a record's columns against one table binding.
///
/// Record factories receive a `Fields` and build every column through it, so
/// duplicate names are caught when the table is constructed.
pub struct Fields {
    binding: Rc<Binding>,
    names: Vec<String>,
    duplicates: Vec<String>,
}

impl Fields {
    pub(crate) fn new(binding: Rc<Binding>) -> Self {
        Self {
            binding,
            names: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    fn register<T: Clone + PartialEq + fmt::Debug + 'static>(
        &mut self,
        name: &str,
        keys: Keys,
        codec: Codec<T>,
    ) -> Column<T> {
        let column = Column::new(self.binding.clone(), name, keys, codec);
        if self.names.iter().any(|n| n == &column.name) {
            self.duplicates.push(column.name.clone());
        } else {
            self.names.push(column.name.clone());
        }
        column
    }

    /// Declare a column of any built-in type.
    pub fn column<T: SqlType>(&mut self, name: &str, keys: Keys) -> Column<T> {
        self.register(name, keys, Codec::of())
    }

    /// Declare a column holding an integer-mapped enumeration.
    pub fn enumerated<E: Enumerated>(&mut self, name: &str, keys: Keys) -> Column<E> {
        self.register(name, keys, Codec::enumerated())
    }

    pub fn integer(&mut self, name: &str, keys: Keys) -> Column<i32> {
        self.column(name, keys)
    }

    pub fn long(&mut self, name: &str, keys: Keys) -> Column<i64> {
        self.column(name, keys)
    }

    pub fn double(&mut self, name: &str, keys: Keys) -> Column<f64> {
        self.column(name, keys)
    }

    pub fn double_array(&mut self, name: &str, keys: Keys) -> Column<Vec<f64>> {
        self.column(name, keys)
    }

    pub fn string(&mut self, name: &str, keys: Keys) -> Column<String> {
        self.column(name, keys)
    }

    pub fn boolean(&mut self, name: &str, keys: Keys) -> Column<bool> {
        self.column(name, keys)
    }

    pub fn date(&mut self, name: &str, keys: Keys) -> Column<DateTime<Utc>> {
        self.column(name, keys)
    }

    pub fn uuid(&mut self, name: &str, keys: Keys) -> Column<Uuid> {
        self.column(name, keys)
    }

    /// Registered names in declaration order, or the first duplicate.
    pub(crate) fn finish(self) -> KeelResult<Vec<String>> {
        if let Some(name) = self.duplicates.first() {
            return Err(KeelError::constraint(format!(
                "The column {} was defined multiple times in {}.",
                name,
                self.binding.table()
            )));
        }
        Ok(self.names)
    }
}
