//! Database handle and statement execution.
//!
//! A [`Database`] owns one driver connection plus everything that lives as
//! long as the connection: the registered tables, the set of tables already
//! migrated, and the counter that hands out table-occurrence identities.
//! Handles are cheap to clone and share that state.

use crate::column::Fields;
use crate::config::Config;
use crate::driver::{Driver, Rows, SqliteDriver, Statement};
use crate::error::{DriverError, KeelError, KeelResult};
use crate::migrate::{self, TableSchema};
use crate::record::{Record, TableRecord};
use crate::source::{Binding, SourceId, Table};
use crate::transpiler::{self, CompiledStatement};
use crate::value::SqlValue;

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// A connection plus its per-connection state.
#[derive(Clone)]
pub struct Database {
    inner: Rc<DatabaseInner>,
}

struct DatabaseInner {
    driver: RefCell<Option<Box<dyn Driver>>>,
    schemas: RefCell<Vec<TableSchema>>,
    migrated: RefCell<HashSet<String>>,
    next_source: Cell<u32>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        if let Some(mut driver) = self.driver.get_mut().take() {
            if let Err(e) = driver.close() {
                warn!(error = %e, "closing database failed");
            }
        }
    }
}

/// Outcome of one executed statement.
struct Executed {
    rows: Option<Box<dyn Rows>>,
    keys: Option<Box<dyn Rows>>,
}

impl Database {
    /// Wrap an open driver connection.
    pub fn new(driver: impl Driver + 'static) -> Self {
        Self::with_driver(Some(Box::new(driver)))
    }

    /// A handle with no storage behind it. Tables can be declared and SQL
    /// compiled, but running any statement fails.
    pub fn detached() -> Self {
        Self::with_driver(None)
    }

    fn with_driver(driver: Option<Box<dyn Driver>>) -> Self {
        Self {
            inner: Rc::new(DatabaseInner {
                driver: RefCell::new(driver),
                schemas: RefCell::new(Vec::new()),
                migrated: RefCell::new(HashSet::new()),
                next_source: Cell::new(0),
            }),
        }
    }

    /// Open the SQLite database named by the configuration.
    pub fn open(config: &Config) -> KeelResult<Self> {
        let url = &config.database.url;
        debug!(url = %url, "opening database");
        let driver = SqliteDriver::connect(url, config.database.create_if_missing)
            .map_err(|e| KeelError::Connection(format!("{}: {}", url, e)))?;
        Ok(Self::new(driver))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> KeelResult<Self> {
        Self::open(&Config::in_memory())
    }

    /// Declare a table. The factory builds one record, registering each
    /// column through the given [`Fields`].
    ///
    /// ```ignore
    /// let sprockets = db.table("tables", |f| Sprocket {
    ///     id: f.integer("id", Keys::AUTOINCREMENT),
    ///     email: f.string("email", Keys::NONE),
    /// })?;
    /// ```
    pub fn table<R, F>(&self, name: &str, factory: F) -> KeelResult<Table<R>>
    where
        R: TableRecord + 'static,
        F: Fn(&mut Fields) -> R + 'static,
    {
        if self.inner.schemas.borrow().iter().any(|s| s.name == name) {
            return Err(KeelError::invalid(format!(
                "Table {} is already declared on this connection.",
                name
            )));
        }
        let table = Table::build(self, name, Rc::new(factory))?;
        self.inner.schemas.borrow_mut().push(table.schema());
        Ok(table)
    }

    /// Schemas of every declared table, in declaration order.
    pub fn schemas(&self) -> Vec<TableSchema> {
        self.inner.schemas.borrow().clone()
    }

    /// Create every declared table that does not exist yet.
    pub fn migrate(&self) -> KeelResult<()> {
        migrate::run(self)
    }

    pub fn is_migrated(&self, table: &str) -> bool {
        self.inner.migrated.borrow().contains(table)
    }

    pub(crate) fn mark_migrated(&self, table: &str) {
        self.inner.migrated.borrow_mut().insert(table.to_string());
    }

    /// Run SQL that takes no parameters, e.g. DDL.
    pub fn exec(&self, sql: &str) -> KeelResult<()> {
        debug!(sql = %sql, "exec");
        let mut driver = self.inner.driver.borrow_mut();
        let driver = driver.as_mut().ok_or_else(detached_error)?;
        driver.exec(sql).map_err(|e| {
            warn!(sql = %sql, error = %e, "statement failed");
            KeelError::storage(sql, e)
        })
    }

    /// Run arbitrary parameterized SQL, returning its rows if it produced any.
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> KeelResult<Option<Box<dyn Rows>>> {
        self.fetch(&CompiledStatement::new(sql, params.to_vec()))
    }

    pub fn table_exists(&self, name: &str) -> KeelResult<bool> {
        let statement = CompiledStatement::new(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            vec![SqlValue::from(name)],
        );
        let Some(mut rows) = self.fetch(&statement)? else {
            return Ok(false);
        };
        let found = match rows.next() {
            Ok(true) => rows.read_index(1),
            Ok(false) => Ok(SqlValue::Integer(0)),
            Err(e) => Err(e),
        };
        rows.close();
        let found = found.map_err(|e| KeelError::storage(&statement.sql, e))?;
        Ok(matches!(found, SqlValue::Integer(n) if n > 0))
    }

    /// Close the connection. Later statements fail; migration state is
    /// forgotten.
    pub fn close(&self) -> KeelResult<()> {
        self.inner.migrated.borrow_mut().clear();
        let driver = self.inner.driver.borrow_mut().take();
        match driver {
            Some(mut driver) => driver
                .close()
                .map_err(|e| KeelError::Connection(e.to_string())),
            None => Ok(()),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.inner.driver.borrow().is_none()
    }

    /// Allocate a new table occurrence.
    pub(crate) fn bind_table(&self, name: &str) -> Rc<Binding> {
        let id = self.inner.next_source.get();
        self.inner.next_source.set(id + 1);
        Rc::new(Binding::new(SourceId(id), name, self.clone()))
    }

    pub(crate) fn same_connection(&self, other: &Database) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Execute and return the row cursor, if any.
    pub(crate) fn fetch(&self, statement: &CompiledStatement) -> KeelResult<Option<Box<dyn Rows>>> {
        Ok(self.execute(statement)?.rows)
    }

    /// Execute and discard any rows.
    pub(crate) fn run(&self, statement: &CompiledStatement) -> KeelResult<()> {
        let executed = self.execute(statement)?;
        for mut rows in [executed.rows, executed.keys].into_iter().flatten() {
            rows.close();
        }
        Ok(())
    }

    fn execute(&self, statement: &CompiledStatement) -> KeelResult<Executed> {
        debug!(
            sql = %statement.sql,
            params = statement.params.len(),
            "executing statement"
        );
        let mut prepared = {
            let mut driver = self.inner.driver.borrow_mut();
            let driver = driver.as_mut().ok_or_else(detached_error)?;
            let prepared = if statement.generated_keys.is_empty() {
                driver.prepare(&statement.sql)
            } else {
                driver.prepare_with_keys(&statement.sql, &statement.generated_keys)
            };
            prepared.map_err(|e| KeelError::storage(&statement.sql, e))?
        };

        let outcome = run_prepared(&mut *prepared, statement);
        prepared.close();
        outcome.map_err(|e| {
            warn!(sql = %statement.sql, error = %e, "statement failed");
            KeelError::storage(&statement.sql, e)
        })
    }

    pub(crate) fn insert(&self, table: &str, record: &mut dyn Record) -> KeelResult<()> {
        let statement = transpiler::compile_insert(table, &record.columns())?;
        let executed = self.execute(&statement)?;
        if let Some(mut rows) = executed.rows {
            rows.close();
        }
        if let Some(mut keys) = executed.keys {
            let applied = apply_generated_keys(&mut *keys, record, &statement);
            keys.close();
            applied?;
        }
        record.flag_all_clean();
        Ok(())
    }

    pub(crate) fn update(&self, table: &str, record: &mut dyn Record) -> KeelResult<bool> {
        let Some(statement) = transpiler::compile_update(table, &record.columns())? else {
            debug!(table = %table, "update skipped, nothing dirty");
            return Ok(false);
        };
        self.run(&statement)?;
        record.flag_all_clean();
        Ok(true)
    }

    pub(crate) fn delete(&self, table: &str, record: &mut dyn Record) -> KeelResult<()> {
        let statement = transpiler::compile_delete_record(table, &record.columns())?;
        self.run(&statement)?;
        record.flag_all_clean();
        Ok(())
    }
}

fn detached_error() -> KeelError {
    KeelError::invalid("No storage driver is attached to this database.")
}

fn run_prepared(
    prepared: &mut dyn Statement,
    statement: &CompiledStatement,
) -> Result<Executed, DriverError> {
    for (i, value) in statement.params.iter().enumerate() {
        prepared.bind(i + 1, value.clone())?;
    }
    let rows = prepared.execute()?;
    let keys = if statement.generated_keys.is_empty() {
        None
    } else {
        prepared.generated_keys()?
    };
    Ok(Executed { rows, keys })
}

/// Copy generated key values into the matching record columns.
fn apply_generated_keys(
    keys: &mut dyn Rows,
    record: &mut dyn Record,
    statement: &CompiledStatement,
) -> KeelResult<()> {
    let has_row = keys
        .next()
        .map_err(|e| KeelError::storage(&statement.sql, e))?;
    if !has_row {
        return Ok(());
    }
    let mut columns = record.columns_mut();
    for (i, name) in statement.generated_keys.iter().enumerate() {
        if let Some(column) = columns.iter_mut().find(|c| c.name() == name) {
            column.update(&*keys, Some(i + 1))?;
        }
    }
    Ok(())
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables: Vec<String> = self
            .inner
            .schemas
            .borrow()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        f.debug_struct("Database")
            .field("detached", &self.is_detached())
            .field("tables", &tables)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_database_refuses_statements() {
        let db = Database::detached();
        assert!(db.is_detached());
        assert!(matches!(db.exec("SELECT 1"), Err(KeelError::InvalidUsage(_))));
        assert!(db.query("SELECT 1", &[]).is_err());
    }

    #[test]
    fn test_bindings_get_distinct_ids() {
        let db = Database::detached();
        let a = db.bind_table("tables");
        let b = db.bind_table("tables");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.table(), "tables");
        assert!(a.database().same_connection(&db));
        assert!(!db.same_connection(&Database::detached()));
    }

    #[test]
    fn test_in_memory_exec_and_query() {
        let db = Database::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (db_id INTEGER)").unwrap();
        assert!(db.table_exists("t").unwrap());
        assert!(!db.table_exists("missing").unwrap());

        let mut rows = db
            .query("SELECT ? + 1 AS n", &[SqlValue::Integer(41)])
            .unwrap()
            .unwrap();
        assert!(rows.next().unwrap());
        assert_eq!(rows.read_name("n").unwrap(), SqlValue::Integer(42));
    }

    #[test]
    fn test_storage_errors_carry_sql() {
        let db = Database::open_in_memory().unwrap();
        let err = db.query("SELECT * FROM nowhere", &[]).err().unwrap();
        match err {
            KeelError::Storage { sql, .. } => assert_eq!(sql, "SELECT * FROM nowhere"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_closed_database_fails() {
        let db = Database::open_in_memory().unwrap();
        db.close().unwrap();
        assert!(db.exec("SELECT 1").is_err());
    }
}
