//! Orderings, projections and aggregates.

use crate::column::{AnyColumn, ColumnRef};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        }
    }
}

/// An ORDER BY list. The empty order means "unordered".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Order {
    terms: Vec<(ColumnRef, Direction)>,
}

impl Order {
    pub fn unordered() -> Self {
        Self::default()
    }

    pub fn asc(column: &dyn AnyColumn) -> Self {
        Self::unordered().then_asc(column)
    }

    pub fn desc(column: &dyn AnyColumn) -> Self {
        Self::unordered().then_desc(column)
    }

    pub fn then_asc(mut self, column: &dyn AnyColumn) -> Self {
        self.terms.push((column.column_ref(), Direction::Ascending));
        self
    }

    pub fn then_desc(mut self, column: &dyn AnyColumn) -> Self {
        self.terms.push((column.column_ref(), Direction::Descending));
        self
    }

    pub fn terms(&self) -> &[(ColumnRef, Direction)] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Min,
    Max,
    Sum,
    Avg,
}

impl fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
        })
    }
}

/// What a SELECT returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Only these columns; the rest of each record stays unset.
    Columns(Vec<ColumnRef>),
    /// A single aggregate value.
    Aggregate { func: AggregateFn, column: ColumnRef },
}

impl Projection {
    pub fn only(columns: &[&dyn AnyColumn]) -> Self {
        Projection::Columns(columns.iter().map(|c| c.column_ref()).collect())
    }

    pub fn aggregate(func: AggregateFn, column: &dyn AnyColumn) -> Self {
        Projection::Aggregate {
            func,
            column: column.column_ref(),
        }
    }

    pub fn columns(&self) -> Vec<&ColumnRef> {
        match self {
            Projection::Columns(columns) => columns.iter().collect(),
            Projection::Aggregate { column, .. } => vec![column],
        }
    }
}
