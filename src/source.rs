//! Record sources: physical tables and joins of sources.
//!
//! A source is a factory for records plus a description of where those
//! records come from. The description is a [`SourceNode`] tree: a leaf per
//! table occurrence, and a join node carrying its ON condition. Every leaf
//! has its own [`SourceId`], which is what columns and filters point at and
//! what the SQL compiler maps to a table alias.

use crate::column::Fields;
use crate::engine::Database;
use crate::error::{KeelError, KeelResult};
use crate::filter::Filter;
use crate::migrate::{ColumnDef, TableSchema};
use crate::query::Query;
use crate::record::{Joined, Record, TableRecord};
use crate::results::Results;
use crate::value::SqlValue;
use std::fmt;
use std::rc::Rc;

/// Identity of one table occurrence within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub(crate) u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a column knows about the table occurrence it belongs to.
pub struct Binding {
    id: SourceId,
    table: String,
    database: Database,
}

impl Binding {
    pub(crate) fn new(id: SourceId, table: &str, database: Database) -> Self {
        Self {
            id,
            table: table.to_string(),
            database,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("table", &self.table)
            .finish()
    }
}

/// Provenance tree of a query: one leaf per table occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceNode {
    Table {
        id: SourceId,
        name: String,
    },
    Join {
        left: Box<SourceNode>,
        right: Box<SourceNode>,
        on: Filter,
    },
}

impl SourceNode {
    /// Leaf occurrences, left to right.
    pub fn leaves(&self) -> Vec<(SourceId, &str)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<(SourceId, &'a str)>) {
        match self {
            SourceNode::Table { id, name } => out.push((*id, name.as_str())),
            SourceNode::Join { left, right, .. } => {
                left.collect_leaves(out);
                right.collect_leaves(out);
            }
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self, SourceNode::Join { .. })
    }
}

/// Anything queries can run against: a table, or a join of sources.
pub trait Source: Clone + 'static {
    type Record: Record + 'static;

    fn database(&self) -> &Database;

    fn node(&self) -> SourceNode;

    /// A fresh record bound to this source.
    fn create(&self) -> Self::Record;

    /// Template record used to build filters, orderings and projections.
    fn helper(&self) -> &Self::Record;

    /// The same source with fresh identities for every table occurrence.
    fn rebind(&self) -> Self;

    /// The unfiltered query.
    fn all(&self) -> Query<Self> {
        Query::new(self.clone())
    }

    fn filter<F>(&self, condition: F) -> Query<Self>
    where
        F: FnOnce(&Self::Record) -> Filter,
    {
        Query::new(self.clone()).filter(condition)
    }

    fn count(&self) -> KeelResult<u64> {
        self.all().count()
    }

    /// Inner join with another source on a condition over the joined record.
    ///
    /// ```ignore
    /// let pairs = widgets.join(&sprockets, |j| j.left.sprocket.is_column(&j.right.id))?;
    /// let rows = pairs.filter(|j| j.right.id.is(2)).select()?;
    /// ```
    fn join<O, F>(&self, other: &O, on: F) -> KeelResult<JoinedTable<Self, O>>
    where
        O: Source,
        F: Fn(&Joined<Self::Record, O::Record>) -> Filter + 'static,
    {
        if !self.database().same_connection(other.database()) {
            return Err(KeelError::invalid(
                "Cannot join sources from different connections.",
            ));
        }
        Ok(JoinedTable::new(self, other, Rc::new(on)))
    }
}

type Factory<R> = Rc<dyn Fn(&mut Fields) -> R>;

/// A physical table: one relation name plus the record factory for it.
pub struct Table<R> {
    inner: Rc<TableInner<R>>,
}

struct TableInner<R> {
    binding: Rc<Binding>,
    factory: Factory<R>,
    helper: R,
}

impl<R> Clone for Table<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: TableRecord + 'static> Table<R> {
    /// Build the table and check its column registration.
    pub(crate) fn build(database: &Database, name: &str, factory: Factory<R>) -> KeelResult<Self> {
        let binding = database.bind_table(name);
        let mut fields = Fields::new(binding.clone());
        let helper = factory(&mut fields);
        let registered = fields.finish()?;

        let listed: Vec<&str> = helper.columns().iter().map(|c| c.name()).collect();
        if listed != registered.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err(KeelError::invalid(format!(
                "Record for {} lists columns [{}] but registered [{}].",
                name,
                listed.join(", "),
                registered.join(", ")
            )));
        }
        if helper.columns().iter().any(|c| c.source() != binding.id()) {
            return Err(KeelError::invalid(format!(
                "Record for {} holds columns registered against another table.",
                name
            )));
        }

        Ok(Self {
            inner: Rc::new(TableInner {
                binding,
                factory,
                helper,
            }),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.binding.table()
    }

    pub fn id(&self) -> SourceId {
        self.inner.binding.id()
    }

    /// Column metadata, in registration order.
    pub fn schema(&self) -> TableSchema {
        TableSchema {
            name: self.name().to_string(),
            columns: self
                .inner
                .helper
                .columns()
                .iter()
                .map(|c| ColumnDef {
                    name: c.name().to_string(),
                    column_type: c.column_type(),
                    keys: c.keys(),
                })
                .collect(),
        }
    }

    /// A fresh record of this table carrying only the key column values.
    pub fn copy_key(&self, record: &R) -> KeelResult<R> {
        let mut copy = self.create();
        let source = record.columns();
        for (dest, src) in copy.columns_mut().into_iter().zip(source) {
            if src.is_key() {
                dest.apply(src.encode()?)?;
            }
        }
        Ok(copy)
    }

    /// Run arbitrary SQL and marshal its rows into this table's records.
    ///
    /// Result columns are matched to record columns by name; anything the
    /// statement does not return stays unset.
    pub fn select_sql(&self, sql: &str, params: &[SqlValue]) -> KeelResult<Results<R>> {
        let rows = self.database().query(sql, params)?;
        let table = self.clone();
        Results::open(rows, Box::new(move || table.create()))
    }
}

impl<R: TableRecord + 'static> Source for Table<R> {
    type Record = R;

    fn database(&self) -> &Database {
        self.inner.binding.database()
    }

    fn node(&self) -> SourceNode {
        SourceNode::Table {
            id: self.id(),
            name: self.name().to_string(),
        }
    }

    fn create(&self) -> R {
        let mut fields = Fields::new(self.inner.binding.clone());
        (self.inner.factory)(&mut fields)
    }

    fn helper(&self) -> &R {
        &self.inner.helper
    }

    fn rebind(&self) -> Self {
        let binding = self.database().bind_table(self.name());
        let mut fields = Fields::new(binding.clone());
        let helper = (self.inner.factory)(&mut fields);
        Self {
            inner: Rc::new(TableInner {
                binding,
                factory: self.inner.factory.clone(),
                helper,
            }),
        }
    }
}

impl<R> fmt::Debug for Table<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.inner.binding.table())
            .field("id", &self.inner.binding.id())
            .finish()
    }
}

type JoinCondition<A, B> = Rc<dyn Fn(&Joined<A, B>) -> Filter>;

/// Two sources joined on a condition; produces [`Joined`] records.
pub struct JoinedTable<A: Source, B: Source> {
    inner: Rc<JoinInner<A, B>>,
}

struct JoinInner<A: Source, B: Source> {
    left: A,
    right: B,
    condition: JoinCondition<A::Record, B::Record>,
    on: Filter,
    helper: Joined<A::Record, B::Record>,
}

impl<A: Source, B: Source> Clone for JoinedTable<A, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Source, B: Source> JoinedTable<A, B> {
    fn new(left: &A, right: &B, condition: JoinCondition<A::Record, B::Record>) -> Self {
        // Each side gets its own identities so a table may be joined to itself.
        let left = left.rebind();
        let right = right.rebind();
        let helper = Joined {
            left: left.create(),
            right: right.create(),
        };
        let on = condition(&helper);
        Self {
            inner: Rc::new(JoinInner {
                left,
                right,
                condition,
                on,
                helper,
            }),
        }
    }

    pub fn left(&self) -> &A {
        &self.inner.left
    }

    pub fn right(&self) -> &B {
        &self.inner.right
    }

    pub fn condition(&self) -> &Filter {
        &self.inner.on
    }
}

impl<A: Source, B: Source> Source for JoinedTable<A, B> {
    type Record = Joined<A::Record, B::Record>;

    fn database(&self) -> &Database {
        self.inner.left.database()
    }

    fn node(&self) -> SourceNode {
        SourceNode::Join {
            left: Box::new(self.inner.left.node()),
            right: Box::new(self.inner.right.node()),
            on: self.inner.on.clone(),
        }
    }

    fn create(&self) -> Self::Record {
        Joined {
            left: self.inner.left.create(),
            right: self.inner.right.create(),
        }
    }

    fn helper(&self) -> &Self::Record {
        &self.inner.helper
    }

    fn rebind(&self) -> Self {
        JoinedTable::new(
            &self.inner.left,
            &self.inner.right,
            self.inner.condition.clone(),
        )
    }
}
