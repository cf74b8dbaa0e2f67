//! SQL compiler.
//!
//! Turns source trees, filters, orderings and records into SQLite statements
//! with `?` placeholders. Parameters are collected in the exact order their
//! placeholders appear in the text. Every column reference is checked
//! against the table occurrences of the statement before any SQL is
//! returned.

use crate::column::{AnyColumn, ColumnRef};
use crate::error::{KeelError, KeelResult};
use crate::filter::Filter;
use crate::order::{Order, Projection};
use crate::source::{SourceId, SourceNode};
use crate::value::SqlValue;

/// SQL text plus the values for its placeholders.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Key columns whose generated values the statement should report.
    pub generated_keys: Vec<String>,
}

impl CompiledStatement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
            generated_keys: Vec::new(),
        }
    }
}

/// Assigns `t0`, `t1`, ... to table occurrences in left-to-right order.
#[derive(Debug, Clone)]
pub struct AliasMap {
    entries: Vec<(SourceId, String)>,
    qualified: bool,
}

impl AliasMap {
    pub fn new(node: &SourceNode) -> Self {
        let entries = node
            .leaves()
            .into_iter()
            .enumerate()
            .map(|(i, (id, _))| (id, format!("t{}", i)))
            .collect();
        Self {
            entries,
            qualified: true,
        }
    }

    /// Same membership, but columns render without a table alias.
    pub fn unqualified(node: &SourceNode) -> Self {
        Self {
            qualified: false,
            ..Self::new(node)
        }
    }

    pub fn alias(&self, id: SourceId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(source, _)| *source == id)
            .map(|(_, alias)| alias.as_str())
    }

    /// Render a column reference, rejecting columns of foreign tables.
    pub fn column(&self, column: &ColumnRef) -> KeelResult<String> {
        let alias = self
            .alias(column.source())
            .ok_or_else(|| KeelError::UnresolvedReference {
                column: column.name().to_string(),
            })?;
        if self.qualified {
            Ok(format!("{}.{}", alias, column.name()))
        } else {
            Ok(column.name().to_string())
        }
    }
}

/// Lower a filter to SQL, appending its parameters.
pub fn lower_filter(
    filter: &Filter,
    aliases: &AliasMap,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) -> KeelResult<()> {
    match filter {
        Filter::IsNull(column) => {
            sql.push_str(&aliases.column(column)?);
            sql.push_str(" IS NULL");
        }
        Filter::NotNull(column) => {
            sql.push_str(&aliases.column(column)?);
            sql.push_str(" IS NOT NULL");
        }
        Filter::Compare { column, op, value } => {
            sql.push_str(&format!("{} {} ?", aliases.column(column)?, op));
            params.push(value.clone());
        }
        Filter::CompareColumns { column, op, other } => {
            sql.push_str(&format!(
                "{} {} {}",
                aliases.column(column)?,
                op,
                aliases.column(other)?
            ));
        }
        Filter::And(left, right) => {
            sql.push('(');
            lower_filter(left, aliases, sql, params)?;
            sql.push_str(") AND (");
            lower_filter(right, aliases, sql, params)?;
            sql.push(')');
        }
    }
    Ok(())
}

fn push_from(
    node: &SourceNode,
    aliases: &AliasMap,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) -> KeelResult<()> {
    match node {
        SourceNode::Table { id, name } => {
            sql.push_str(name);
            if aliases.qualified {
                if let Some(alias) = aliases.alias(*id) {
                    sql.push(' ');
                    sql.push_str(alias);
                }
            }
        }
        SourceNode::Join { left, right, on } => {
            push_from(left, aliases, sql, params)?;
            sql.push_str(" INNER JOIN ");
            if right.is_join() {
                sql.push('(');
                push_from(right, aliases, sql, params)?;
                sql.push(')');
            } else {
                push_from(right, aliases, sql, params)?;
            }
            sql.push_str(" ON ");
            lower_filter(on, aliases, sql, params)?;
        }
    }
    Ok(())
}

fn push_where(
    filter: Option<&Filter>,
    aliases: &AliasMap,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) -> KeelResult<()> {
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        lower_filter(filter, aliases, sql, params)?;
    }
    Ok(())
}

/// SELECT over a source tree.
pub fn compile_select(
    node: &SourceNode,
    filter: Option<&Filter>,
    projection: Option<&Projection>,
    order: Option<&Order>,
    limit: Option<usize>,
) -> KeelResult<CompiledStatement> {
    let aliases = AliasMap::new(node);
    let mut sql = String::from("SELECT ");
    let mut params = Vec::new();

    // Columns
    match projection {
        None => sql.push('*'),
        Some(Projection::Columns(columns)) if columns.is_empty() => sql.push('*'),
        Some(Projection::Columns(columns)) => {
            let cols = columns
                .iter()
                .map(|c| aliases.column(c))
                .collect::<KeelResult<Vec<_>>>()?;
            sql.push_str(&cols.join(", "));
        }
        Some(Projection::Aggregate { func, column }) => {
            sql.push_str(&format!("{}({})", func, aliases.column(column)?));
        }
    }

    // FROM
    sql.push_str(" FROM ");
    push_from(node, &aliases, &mut sql, &mut params)?;

    push_where(filter, &aliases, &mut sql, &mut params)?;

    // ORDER BY
    if let Some(order) = order.filter(|o| !o.is_empty()) {
        let terms = order
            .terms()
            .iter()
            .map(|(column, direction)| {
                Ok(format!("{} {}", aliases.column(column)?, direction.as_sql()))
            })
            .collect::<KeelResult<Vec<_>>>()?;
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }

    // LIMIT
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }

    Ok(CompiledStatement::new(sql, params))
}

/// SELECT COUNT(*) over a source tree.
pub fn compile_count(node: &SourceNode, filter: Option<&Filter>) -> KeelResult<CompiledStatement> {
    let aliases = AliasMap::new(node);
    let mut sql = String::from("SELECT COUNT(*) FROM ");
    let mut params = Vec::new();
    push_from(node, &aliases, &mut sql, &mut params)?;
    push_where(filter, &aliases, &mut sql, &mut params)?;
    Ok(CompiledStatement::new(sql, params))
}

/// DELETE every row of a single table matching the filter.
pub fn compile_delete(node: &SourceNode, filter: Option<&Filter>) -> KeelResult<CompiledStatement> {
    let SourceNode::Table { name, .. } = node else {
        return Err(KeelError::invalid(
            "Cannot delete through a join; delete from one of its tables.",
        ));
    };
    let aliases = AliasMap::unqualified(node);
    let mut sql = format!("DELETE FROM {}", name);
    let mut params = Vec::new();
    push_where(filter, &aliases, &mut sql, &mut params)?;
    Ok(CompiledStatement::new(sql, params))
}

/// INSERT a record.
///
/// NULLABLE columns without a value are left out. AUTOINCREMENT columns
/// always insert `NULL` and are reported back as generated keys.
pub fn compile_insert(table: &str, columns: &[&dyn AnyColumn]) -> KeelResult<CompiledStatement> {
    let mut names = Vec::new();
    let mut values = Vec::new();
    let mut params = Vec::new();
    let mut generated_keys = Vec::new();

    for column in columns {
        let keys = column.keys();
        if keys.is_nullable() && !column.has_value() {
            continue;
        }
        names.push(column.name());
        if keys.is_autoincrement() {
            values.push("NULL");
            generated_keys.push(column.name().to_string());
        } else {
            values.push("?");
            params.push(column.encode()?);
        }
    }

    let sql = if names.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            values.join(", ")
        )
    };

    Ok(CompiledStatement {
        sql,
        params,
        generated_keys,
    })
}

/// Fails on the first modified key column.
fn reject_dirty_keys(table: &str, columns: &[&dyn AnyColumn]) -> KeelResult<()> {
    match columns.iter().find(|c| c.is_key() && c.is_dirty()) {
        Some(key) => Err(KeelError::constraint(format!(
            "The key column {} of {} was modified; key columns cannot be changed.",
            key.name(),
            table
        ))),
        None => Ok(()),
    }
}

fn key_clause(
    table: &str,
    columns: &[&dyn AnyColumn],
    params: &mut Vec<SqlValue>,
) -> KeelResult<String> {
    let keys: Vec<&&dyn AnyColumn> = columns.iter().filter(|c| c.is_key()).collect();
    if keys.is_empty() {
        return Err(KeelError::invalid(format!(
            "Table {} has no key columns to locate a row by.",
            table
        )));
    }
    let mut clauses = Vec::new();
    for key in keys {
        clauses.push(format!("{} = ?", key.name()));
        params.push(key.encode()?);
    }
    Ok(clauses.join(" AND "))
}

/// UPDATE the dirty non-key columns of a record, or `None` when nothing is
/// dirty.
pub fn compile_update(
    table: &str,
    columns: &[&dyn AnyColumn],
) -> KeelResult<Option<CompiledStatement>> {
    reject_dirty_keys(table, columns)?;

    let dirty: Vec<&&dyn AnyColumn> = columns
        .iter()
        .filter(|c| !c.is_key() && c.is_dirty())
        .collect();
    if dirty.is_empty() {
        return Ok(None);
    }

    let mut params = Vec::new();
    let mut sets = Vec::new();
    for column in dirty {
        sets.push(format!("{} = ?", column.name()));
        params.push(column.encode()?);
    }
    let clause = key_clause(table, columns, &mut params)?;

    let sql = format!("UPDATE {} SET {} WHERE {}", table, sets.join(", "), clause);
    Ok(Some(CompiledStatement::new(sql, params)))
}

/// DELETE the row identified by a record's key columns.
pub fn compile_delete_record(
    table: &str,
    columns: &[&dyn AnyColumn],
) -> KeelResult<CompiledStatement> {
    reject_dirty_keys(table, columns)?;
    let mut params = Vec::new();
    let clause = key_clause(table, columns, &mut params)?;
    let sql = format!("DELETE FROM {} WHERE {}", table, clause);
    Ok(CompiledStatement::new(sql, params))
}
