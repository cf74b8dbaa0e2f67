//! Schema creation from column metadata.
//!
//! Each registered table is created once per database. Applied versions are
//! kept in a `__version` table so reopening an existing file does not try to
//! create its tables again.

use crate::column::{Column, Fields, Keys};
use crate::engine::Database;
use crate::error::{KeelError, KeelResult};
use crate::record::TableRecord;
use crate::source::{Source, Table};
use crate::value::ColumnType;
use chrono::{DateTime, Utc};
use std::rc::Rc;
use tracing::info;

/// Bookkeeping table for applied table versions.
pub const VERSION_TABLE: &str = "__version";

/// Version written for every table created by [`CreateTable`].
pub const SCHEMA_VERSION: i32 = 1;

/// Metadata of one column, as used for DDL.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub keys: Keys,
}

/// Metadata of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

/// Generate the CREATE TABLE statement for a schema.
///
/// A table may have one AUTOINCREMENT column or any number of KEY columns,
/// never both.
pub fn create_table_sql(schema: &TableSchema) -> KeelResult<String> {
    let autoincrement: Vec<&ColumnDef> = schema
        .columns
        .iter()
        .filter(|c| c.keys.is_autoincrement())
        .collect();
    let keys: Vec<&ColumnDef> = schema
        .columns
        .iter()
        .filter(|c| c.keys.contains(Keys::KEY))
        .collect();

    if autoincrement.len() > 1 {
        return Err(KeelError::constraint(format!(
            "Invalid key specification in {}. You cannot specify multiple AUTOINCREMENT columns.",
            schema.name
        )));
    }
    if !autoincrement.is_empty() && !keys.is_empty() {
        return Err(KeelError::constraint(format!(
            "Invalid key specification in {}. You cannot specify a KEY as well as AUTOINCREMENT.",
            schema.name
        )));
    }
    if schema.columns.is_empty() {
        return Err(KeelError::invalid(format!("Table {} has no columns.", schema.name)));
    }

    let mut clauses: Vec<String> = schema
        .columns
        .iter()
        .map(|c| {
            let mut clause = format!("{} {}", c.name, c.column_type.sql_type());
            if !c.keys.is_nullable() {
                clause.push_str(" NOT NULL");
            }
            if c.keys.is_autoincrement() {
                clause.push_str(" PRIMARY KEY AUTOINCREMENT");
            }
            clause
        })
        .collect();

    if !keys.is_empty() {
        let names: Vec<&str> = keys.iter().map(|c| c.name.as_str()).collect();
        clauses.push(format!("PRIMARY KEY ({})", names.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE {} (\n    {}\n)",
        schema.name,
        clauses.join(",\n    ")
    ))
}

/// A reversible schema step.
pub trait Migration {
    fn name(&self) -> &str;

    fn up(&self, db: &Database) -> KeelResult<()>;

    fn down(&self, _db: &Database) -> KeelResult<()> {
        Err(KeelError::NotImplemented("down migrations"))
    }
}

/// Creates one table.
#[derive(Debug, Clone)]
pub struct CreateTable {
    schema: TableSchema,
    sql: String,
}

impl CreateTable {
    /// Validates the schema; fails without touching storage.
    pub fn new(schema: TableSchema) -> KeelResult<Self> {
        let sql = create_table_sql(&schema)?;
        Ok(Self { schema, sql })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl Migration for CreateTable {
    fn name(&self) -> &str {
        &self.schema.name
    }

    fn up(&self, db: &Database) -> KeelResult<()> {
        info!(table = %self.schema.name, "creating table");
        db.exec(&self.sql)
    }
}

/// A row of the version table.
pub struct VersionRecord {
    pub table: Column<String>,
    pub version: Column<i32>,
    pub updated: Column<DateTime<Utc>>,
}

impl VersionRecord {
    fn define(fields: &mut Fields) -> Self {
        Self {
            table: fields.string("key", Keys::KEY),
            version: fields.integer("id", Keys::NONE),
            updated: fields.date("updated", Keys::NONE),
        }
    }
}

crate::table_record!(VersionRecord { table, version, updated });

/// The version table of a database.
pub fn version_table(db: &Database) -> KeelResult<Table<VersionRecord>> {
    Table::build(db, VERSION_TABLE, Rc::new(VersionRecord::define))
}

fn stored_version(versions: &Table<VersionRecord>, table: &str) -> KeelResult<Option<VersionRecord>> {
    versions
        .filter(|v| v.table.is(table.to_string()))
        .first()
        .select()?
        .get()
}

fn record_version(versions: &Table<VersionRecord>, table: &str) -> KeelResult<()> {
    match stored_version(versions, table)? {
        Some(mut row) => {
            row.version.set(SCHEMA_VERSION);
            row.updated.set(Utc::now());
            row.update()?;
        }
        None => {
            let mut row = versions.create();
            row.table.set(table.to_string());
            row.version.set(SCHEMA_VERSION);
            row.updated.set(Utc::now());
            row.insert()?;
        }
    }
    Ok(())
}

/// Create every registered table this connection has not migrated yet.
///
/// All schemas are validated before the first statement runs.
pub(crate) fn run(db: &Database) -> KeelResult<()> {
    let pending = db
        .schemas()
        .into_iter()
        .filter(|s| !db.is_migrated(&s.name))
        .map(CreateTable::new)
        .collect::<KeelResult<Vec<_>>>()?;
    if pending.is_empty() {
        return Ok(());
    }

    let versions = version_table(db)?;
    if !db.table_exists(VERSION_TABLE)? {
        CreateTable::new(versions.schema())?.up(db)?;
        record_version(&versions, VERSION_TABLE)?;
    }

    for migration in pending {
        let current = stored_version(&versions, migration.name())?
            .and_then(|row| row.version.get().copied())
            .unwrap_or(0);
        if current < SCHEMA_VERSION {
            migration.up(db)?;
            record_version(&versions, migration.name())?;
        }
        db.mark_migrated(migration.name());
    }
    Ok(())
}
