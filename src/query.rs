//! Query builder over a [`Source`].
//!
//! ```ignore
//! let first = sprockets
//!     .filter(|s| s.id.gt(1))
//!     .order(|s| Order::desc(&s.id))
//!     .first()
//!     .select()?
//!     .get()?;
//! ```

use crate::column::Column;
use crate::driver::Rows;
use crate::error::{KeelError, KeelResult};
use crate::filter::Filter;
use crate::order::{AggregateFn, Order, Projection};
use crate::results::Results;
use crate::source::Source;
use crate::transpiler::{self, CompiledStatement};
use crate::value::{Codec, SqlValue};
use std::fmt;

/// A filtered, ordered, limited view of a source. Building never touches
/// storage; the terminal methods compile and run one statement each.
#[derive(Clone)]
pub struct Query<S: Source> {
    source: S,
    filter: Option<Filter>,
    order: Option<Order>,
    limit: Option<usize>,
}

impl<S: Source> Query<S> {
    pub(crate) fn new(source: S) -> Self {
        Self {
            source,
            filter: None,
            order: None,
            limit: None,
        }
    }

    /// Add a condition; multiple calls are combined with AND.
    pub fn filter<F>(mut self, condition: F) -> Self
    where
        F: FnOnce(&S::Record) -> Filter,
    {
        let condition = condition(self.source.helper());
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn order<F>(mut self, order: F) -> Self
    where
        F: FnOnce(&S::Record) -> Order,
    {
        self.order = Some(order(self.source.helper()));
        self
    }

    /// Limit to the first row.
    pub fn first(self) -> Self {
        self.first_n(1)
    }

    pub fn first_n(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The SELECT statement [`Query::select`] would run.
    pub fn to_sql(&self) -> KeelResult<CompiledStatement> {
        self.compile(None)
    }

    fn compile(&self, projection: Option<&Projection>) -> KeelResult<CompiledStatement> {
        transpiler::compile_select(
            &self.source.node(),
            self.filter.as_ref(),
            projection,
            self.order.as_ref(),
            self.limit,
        )
    }

    fn open(
        &self,
        statement: &CompiledStatement,
        projection: Option<&Projection>,
    ) -> KeelResult<Results<S::Record>> {
        let rows = self.source.database().fetch(statement)?;
        let source = self.source.clone();
        let create = Box::new(move || source.create());
        match projection {
            Some(Projection::Columns(columns)) if !columns.is_empty() => {
                Results::open_projected(rows, create, columns.clone())
            }
            _ => Results::open(rows, create),
        }
    }

    /// Run the query, returning a cursor of fresh records.
    pub fn select(&self) -> KeelResult<Results<S::Record>> {
        let statement = self.compile(None)?;
        self.open(&statement, None)
    }

    /// Run the query returning only the chosen columns; the others stay
    /// unset in every record.
    pub fn select_only<F>(&self, projection: F) -> KeelResult<Results<S::Record>>
    where
        F: FnOnce(&S::Record) -> Projection,
    {
        let projection = projection(self.source.helper());
        let statement = self.compile(Some(&projection))?;
        self.open(&statement, Some(&projection))
    }

    /// Number of matching rows. Ordering and limit are ignored.
    pub fn count(&self) -> KeelResult<u64> {
        let statement = transpiler::compile_count(&self.source.node(), self.filter.as_ref())?;
        let value = self.scalar(&statement)?;
        match value {
            SqlValue::Integer(n) => u64::try_from(n)
                .map_err(|_| KeelError::decode("COUNT(*)", format!("negative count {}", n))),
            other => Err(KeelError::decode(
                "COUNT(*)",
                format!("expected integer, found {}", other.kind()),
            )),
        }
    }

    /// Delete every matching row. Only valid on a single table.
    pub fn delete(&self) -> KeelResult<()> {
        let statement = transpiler::compile_delete(&self.source.node(), self.filter.as_ref())?;
        self.source.database().run(&statement)
    }

    pub fn min<T, F>(&self, column: F) -> KeelResult<Option<T>>
    where
        T: Clone + PartialEq + fmt::Debug + 'static,
        F: FnOnce(&S::Record) -> &Column<T>,
    {
        self.aggregate(AggregateFn::Min, column)
    }

    pub fn max<T, F>(&self, column: F) -> KeelResult<Option<T>>
    where
        T: Clone + PartialEq + fmt::Debug + 'static,
        F: FnOnce(&S::Record) -> &Column<T>,
    {
        self.aggregate(AggregateFn::Max, column)
    }

    pub fn sum<T, F>(&self, column: F) -> KeelResult<Option<T>>
    where
        T: Clone + PartialEq + fmt::Debug + 'static,
        F: FnOnce(&S::Record) -> &Column<T>,
    {
        self.aggregate(AggregateFn::Sum, column)
    }

    /// Average as a double, whatever the column type.
    pub fn avg<T, F>(&self, column: F) -> KeelResult<Option<f64>>
    where
        T: Clone + PartialEq + fmt::Debug + 'static,
        F: FnOnce(&S::Record) -> &Column<T>,
    {
        let column = column(self.source.helper());
        let projection = Projection::aggregate(AggregateFn::Avg, column);
        let value = self.scalar(&self.compile(Some(&projection))?)?;
        decode_aggregate(value, Codec::<f64>::of(), "AVG")
    }

    /// Aggregate values are decoded with the aggregated column's codec.
    fn aggregate<T, F>(&self, func: AggregateFn, column: F) -> KeelResult<Option<T>>
    where
        T: Clone + PartialEq + fmt::Debug + 'static,
        F: FnOnce(&S::Record) -> &Column<T>,
    {
        let column = column(self.source.helper());
        let codec = column.codec();
        let projection = Projection::aggregate(func, column);
        let value = self.scalar(&self.compile(Some(&projection))?)?;
        decode_aggregate(value, codec, &func.to_string())
    }

    /// First column of the first row.
    fn scalar(&self, statement: &CompiledStatement) -> KeelResult<SqlValue> {
        let Some(mut rows) = self.source.database().fetch(statement)? else {
            return Ok(SqlValue::Null);
        };
        let value = match rows.next() {
            Ok(true) => rows.read_index(1),
            Ok(false) => Ok(SqlValue::Null),
            Err(e) => Err(e),
        };
        rows.close();
        value.map_err(|e| KeelError::storage(&statement.sql, e))
    }
}

fn decode_aggregate<T>(value: SqlValue, codec: Codec<T>, label: &str) -> KeelResult<Option<T>> {
    if value.is_null() {
        return Ok(None);
    }
    codec
        .decode(value)
        .map(Some)
        .map_err(|message| KeelError::decode(label, message))
}

impl<S: Source> fmt::Debug for Query<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("node", &self.source.node())
            .field("filter", &self.filter)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .finish()
    }
}
