//! SQLite driver backed by sqlx.
//!
//! sqlx is async; the query layer is synchronous. The driver owns a
//! current-thread tokio runtime and blocks on each call, materializing rows
//! before handing them back.

use super::{Driver, RowSet, Rows, Statement};
use crate::error::DriverError;
use crate::value::SqlValue;

use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Decode, Row, TypeInfo, ValueRef};
use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;
use tokio::runtime::Runtime;

type Shared = Rc<RefCell<Option<SqliteConnection>>>;

/// A single SQLite connection.
pub struct SqliteDriver {
    runtime: Rc<Runtime>,
    connection: Shared,
}

impl SqliteDriver {
    /// Open a connection.
    ///
    /// Supported URL formats:
    /// - `sqlite://path/to/db.sqlite`
    /// - `sqlite::memory:`
    pub fn connect(url: &str, create_if_missing: bool) -> Result<Self, DriverError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(create_if_missing)
            .disable_statement_logging();
        let connection = runtime.block_on(options.connect())?;
        Ok(Self {
            runtime: Rc::new(runtime),
            connection: Rc::new(RefCell::new(Some(connection))),
        })
    }
}

impl Driver for SqliteDriver {
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn Statement>, DriverError> {
        Ok(Box::new(SqliteStatement::new(self, sql.to_string(), false)))
    }

    fn prepare_with_keys(
        &mut self,
        sql: &str,
        keys: &[String],
    ) -> Result<Box<dyn Statement>, DriverError> {
        if keys.is_empty() {
            return self.prepare(sql);
        }
        let sql = format!("{} RETURNING {}", sql, keys.join(", "));
        Ok(Box::new(SqliteStatement::new(self, sql, true)))
    }

    fn exec(&mut self, sql: &str) -> Result<(), DriverError> {
        let mut guard = self.connection.borrow_mut();
        let connection = guard.as_mut().ok_or("connection is closed")?;
        self.runtime
            .block_on(sqlx::query(sql).execute(&mut *connection))?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if let Some(connection) = self.connection.borrow_mut().take() {
            self.runtime.block_on(connection.close())?;
        }
        Ok(())
    }
}

struct SqliteStatement {
    runtime: Rc<Runtime>,
    connection: Shared,
    sql: String,
    params: Vec<SqlValue>,
    returning: bool,
    keys: Option<RowSet>,
}

impl SqliteStatement {
    fn new(driver: &SqliteDriver, sql: String, returning: bool) -> Self {
        Self {
            runtime: driver.runtime.clone(),
            connection: driver.connection.clone(),
            sql,
            params: Vec::new(),
            returning,
            keys: None,
        }
    }

    fn fetch(&self) -> Result<Vec<SqliteRow>, DriverError> {
        let mut query = sqlx::query(&self.sql);
        for value in &self.params {
            query = match value {
                SqlValue::Null => query.bind(None::<i64>),
                SqlValue::Integer(v) => query.bind(*v),
                SqlValue::Real(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.as_str()),
                SqlValue::Blob(v) => query.bind(v.as_slice()),
            };
        }

        let mut guard = self.connection.borrow_mut();
        let connection = guard.as_mut().ok_or("connection is closed")?;
        Ok(self.runtime.block_on(query.fetch_all(&mut *connection))?)
    }

    fn materialize(&self, rows: Vec<SqliteRow>) -> Result<RowSet, DriverError> {
        let names: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let values = rows
            .iter()
            .map(|row| (0..row.len()).map(|i| read_value(row, i)).collect())
            .collect::<Result<Vec<Vec<SqlValue>>, DriverError>>()?;
        Ok(RowSet::new(self.sql.clone(), names, values))
    }
}

impl Statement for SqliteStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, position: usize, value: SqlValue) -> Result<(), DriverError> {
        let index = position
            .checked_sub(1)
            .ok_or("parameter positions start at 1")?;
        if self.params.len() <= index {
            self.params.resize(index + 1, SqlValue::Null);
        }
        self.params[index] = value;
        Ok(())
    }

    fn execute(&mut self) -> Result<Option<Box<dyn Rows>>, DriverError> {
        let rows = self.fetch()?;
        let set = self.materialize(rows)?;
        if self.returning {
            self.keys = Some(set);
            return Ok(None);
        }
        if set.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(set)))
    }

    fn generated_keys(&mut self) -> Result<Option<Box<dyn Rows>>, DriverError> {
        Ok(self
            .keys
            .take()
            .map(|keys| Box::new(keys) as Box<dyn Rows>))
    }

    fn close(&mut self) {
        self.params.clear();
        self.keys = None;
    }
}

/// Read one value by its storage class.
fn read_value(row: &SqliteRow, index: usize) -> Result<SqlValue, DriverError> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "INTEGER" | "BIGINT" | "INT8" | "BOOLEAN" => {
            SqlValue::Integer(<i64 as Decode<'_, Sqlite>>::decode(raw)?)
        }
        "REAL" | "NUMERIC" => SqlValue::Real(<f64 as Decode<'_, Sqlite>>::decode(raw)?),
        "BLOB" => SqlValue::Blob(<Vec<u8> as Decode<'_, Sqlite>>::decode(raw)?),
        _ => SqlValue::Text(<String as Decode<'_, Sqlite>>::decode(raw)?),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> SqliteDriver {
        SqliteDriver::connect("sqlite::memory:", true).unwrap()
    }

    #[test]
    fn test_exec_and_select() {
        let mut driver = driver();
        driver
            .exec("CREATE TABLE t (db_id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT, db_name TEXT)")
            .unwrap();

        let mut insert = driver
            .prepare_with_keys("INSERT INTO t (db_id, db_name) VALUES (NULL, ?)", &["db_id".to_string()])
            .unwrap();
        insert.bind(1, SqlValue::Text("bolt".into())).unwrap();
        assert!(insert.execute().unwrap().is_none());
        let mut keys = insert.generated_keys().unwrap().unwrap();
        assert!(keys.next().unwrap());
        assert_eq!(keys.read_index(1).unwrap(), SqlValue::Integer(1));

        let mut select = driver.prepare("SELECT db_id, db_name FROM t WHERE db_id = ?").unwrap();
        select.bind(1, SqlValue::Integer(1)).unwrap();
        let mut rows = select.execute().unwrap().unwrap();
        assert_eq!(rows.column_names(), &["db_id".to_string(), "db_name".to_string()]);
        assert!(rows.next().unwrap());
        assert_eq!(rows.read_name("db_name").unwrap(), SqlValue::Text("bolt".into()));
        assert!(!rows.next().unwrap());
    }

    #[test]
    fn test_empty_result_has_no_cursor() {
        let mut driver = driver();
        driver.exec("CREATE TABLE t (db_id INTEGER)").unwrap();
        let mut select = driver.prepare("SELECT * FROM t").unwrap();
        assert!(select.execute().unwrap().is_none());
    }

    #[test]
    fn test_bad_sql_is_an_error() {
        let mut driver = driver();
        let mut select = driver.prepare("SELECT * FROM nowhere").unwrap();
        assert!(select.execute().is_err());
    }

    #[test]
    fn test_closed_connection() {
        let mut driver = driver();
        driver.close().unwrap();
        assert!(driver.exec("SELECT 1").is_err());
    }
}
