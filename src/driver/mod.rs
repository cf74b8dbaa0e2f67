//! Storage driver abstraction.
//!
//! The query layer talks to storage through three small traits: a
//! [`Driver`] prepares statements, a [`Statement`] takes 1-based parameter
//! bindings and executes, and [`Rows`] walks a result set. A row cursor
//! returned by [`Statement::execute`] stays readable after the statement
//! itself is closed.

pub mod sqlite;

use crate::error::DriverError;
use crate::value::SqlValue;

pub use sqlite::SqliteDriver;

/// A connection that can prepare and run SQL.
pub trait Driver {
    /// Prepare a statement.
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn Statement>, DriverError>;

    /// Prepare a statement whose execution reports the generated values of
    /// the named key columns through [`Statement::generated_keys`].
    fn prepare_with_keys(
        &mut self,
        sql: &str,
        keys: &[String],
    ) -> Result<Box<dyn Statement>, DriverError> {
        let _ = keys;
        self.prepare(sql)
    }

    /// Run a statement that takes no parameters and returns no rows.
    fn exec(&mut self, sql: &str) -> Result<(), DriverError>;

    fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// A prepared statement.
pub trait Statement {
    fn sql(&self) -> &str;

    /// Bind a parameter. Positions start at 1.
    fn bind(&mut self, position: usize, value: SqlValue) -> Result<(), DriverError>;

    /// Execute; returns a cursor when the statement produced rows.
    fn execute(&mut self) -> Result<Option<Box<dyn Rows>>, DriverError>;

    /// Generated key values of the last execution, if any were requested.
    fn generated_keys(&mut self) -> Result<Option<Box<dyn Rows>>, DriverError>;

    fn close(&mut self) {}
}

/// A forward-only row cursor.
pub trait Rows {
    fn sql(&self) -> &str;

    /// Advance to the next row; false once the rows are exhausted.
    fn next(&mut self) -> Result<bool, DriverError>;

    fn column_names(&self) -> &[String];

    /// Read the current row by 1-based position.
    fn read_index(&self, index: usize) -> Result<SqlValue, DriverError>;

    /// Read the current row by column name.
    fn read_name(&self, name: &str) -> Result<SqlValue, DriverError> {
        let index = self
            .column_names()
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| format!("no column named {} in result", name))?;
        self.read_index(index + 1)
    }

    fn close(&mut self) {}
}

/// A fully materialized result set.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    sql: String,
    names: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    position: Option<usize>,
    closed: bool,
}

impl RowSet {
    pub fn new(sql: impl Into<String>, names: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            sql: sql.into(),
            names,
            rows,
            position: None,
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn current(&self) -> Result<&[SqlValue], DriverError> {
        if self.closed {
            return Err("result set is closed".into());
        }
        self.position
            .and_then(|p| self.rows.get(p))
            .map(Vec::as_slice)
            .ok_or_else(|| "no current row".into())
    }
}

impl Rows for RowSet {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn next(&mut self) -> Result<bool, DriverError> {
        if self.closed {
            return Err("result set is closed".into());
        }
        let next = self.position.map_or(0, |p| p + 1);
        self.position = Some(next.min(self.rows.len()));
        Ok(next < self.rows.len())
    }

    fn column_names(&self) -> &[String] {
        &self.names
    }

    fn read_index(&self, index: usize) -> Result<SqlValue, DriverError> {
        let row = self.current()?;
        index
            .checked_sub(1)
            .and_then(|i| row.get(i))
            .cloned()
            .ok_or_else(|| format!("column index {} out of range", index).into())
    }

    fn close(&mut self) {
        self.closed = true;
        self.rows.clear();
    }
}
