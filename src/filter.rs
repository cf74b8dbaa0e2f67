//! Immutable filter trees over typed columns.
//!
//! Filters are built from a column and a value (or another column) and are
//! combined with [`Filter::and`]. The SQL compiler lowers them to
//! parameterized predicates; see [`crate::transpiler`].

use crate::column::{AnyColumn, Column, ColumnRef};
use crate::source::SourceId;
use crate::value::SqlValue;
use std::fmt;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl Comparison {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Like => "LIKE",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `col IS NULL`
    IsNull(ColumnRef),
    /// `col IS NOT NULL`
    NotNull(ColumnRef),
    /// `col <op> ?` with the value already encoded by the column's codec.
    Compare {
        column: ColumnRef,
        op: Comparison,
        value: SqlValue,
    },
    /// `col <op> other`, no parameter.
    CompareColumns {
        column: ColumnRef,
        op: Comparison,
        other: ColumnRef,
    },
    /// `(left) AND (right)`
    And(Box<Filter>, Box<Filter>),
}

impl Filter {
    /// Conjunction of two filters.
    pub fn and(self, other: Filter) -> Filter {
        Filter::And(Box::new(self), Box::new(other))
    }

    /// Conjunction of every filter, or `None` when given none.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Option<Filter> {
        filters.into_iter().reduce(Filter::and)
    }

    /// Every column the filter references, left to right.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Filter::IsNull(c) | Filter::NotNull(c) | Filter::Compare { column: c, .. } => {
                out.push(c)
            }
            Filter::CompareColumns { column, other, .. } => {
                out.push(column);
                out.push(other);
            }
            Filter::And(left, right) => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }

    /// The table occurrence of the leftmost column.
    pub fn source(&self) -> SourceId {
        match self {
            Filter::IsNull(c) | Filter::NotNull(c) => c.source(),
            Filter::Compare { column, .. } | Filter::CompareColumns { column, .. } => {
                column.source()
            }
            Filter::And(left, _) => left.source(),
        }
    }
}

impl<T: Clone + PartialEq + fmt::Debug + 'static> Column<T> {
    fn compare(&self, op: Comparison, value: &T) -> Filter {
        Filter::Compare {
            column: self.column_ref(),
            op,
            value: self.encode_value(value),
        }
    }

    fn compare_column(&self, op: Comparison, other: &Column<T>) -> Filter {
        Filter::CompareColumns {
            column: self.column_ref(),
            op,
            other: other.column_ref(),
        }
    }

    /// Equality; `None` means `IS NULL`.
    pub fn is(&self, value: impl Into<Option<T>>) -> Filter {
        match value.into() {
            Some(v) => self.compare(Comparison::Eq, &v),
            None => self.is_null(),
        }
    }

    /// Equality with another column's current value.
    pub fn is_value_of(&self, other: &Column<T>) -> Filter {
        self.is(other.get().cloned())
    }

    pub fn lt(&self, value: T) -> Filter {
        self.compare(Comparison::Lt, &value)
    }

    pub fn le(&self, value: T) -> Filter {
        self.compare(Comparison::Le, &value)
    }

    pub fn gt(&self, value: T) -> Filter {
        self.compare(Comparison::Gt, &value)
    }

    pub fn ge(&self, value: T) -> Filter {
        self.compare(Comparison::Ge, &value)
    }

    pub fn is_null(&self) -> Filter {
        Filter::IsNull(self.column_ref())
    }

    pub fn not_null(&self) -> Filter {
        Filter::NotNull(self.column_ref())
    }

    /// Column-to-column equality, typically a join condition.
    pub fn is_column(&self, other: &Column<T>) -> Filter {
        self.compare_column(Comparison::Eq, other)
    }

    pub fn lt_column(&self, other: &Column<T>) -> Filter {
        self.compare_column(Comparison::Lt, other)
    }

    pub fn le_column(&self, other: &Column<T>) -> Filter {
        self.compare_column(Comparison::Le, other)
    }

    pub fn gt_column(&self, other: &Column<T>) -> Filter {
        self.compare_column(Comparison::Gt, other)
    }

    pub fn ge_column(&self, other: &Column<T>) -> Filter {
        self.compare_column(Comparison::Ge, other)
    }
}

impl Column<String> {
    /// SQL `LIKE` pattern match.
    pub fn like(&self, pattern: impl Into<String>) -> Filter {
        self.compare(Comparison::Like, &pattern.into())
    }
}
