//! Result cursor: turns driver rows into fresh records.

use crate::column::ColumnRef;
use crate::driver::Rows;
use crate::error::{KeelError, KeelResult};
use crate::record::Record;
use std::collections::HashMap;
use tracing::trace;

type Create<R> = Box<dyn Fn() -> R>;

/// A cursor over query results.
///
/// Open while a row is available; exhausted (and closed) once the last row
/// has been read. Reading an exhausted cursor returns `None`.
pub struct Results<R> {
    rows: Option<Box<dyn Rows>>,
    create: Create<R>,
    layout: Layout,
}

/// How result columns map onto record columns.
enum Layout {
    /// By name, for `SELECT *` and hand-written SQL.
    ByName,
    /// Position i holds the value of the i-th projected column.
    Projected(Vec<ColumnRef>),
}

impl<R: Record> Results<R> {
    /// Wrap a row cursor, advancing it once to find the first row.
    pub(crate) fn open(rows: Option<Box<dyn Rows>>, create: Create<R>) -> KeelResult<Self> {
        Self::with_layout(rows, create, Layout::ByName)
    }

    /// Like [`Results::open`] for a projection: each result position is
    /// written to the record column it was selected from.
    pub(crate) fn open_projected(
        rows: Option<Box<dyn Rows>>,
        create: Create<R>,
        columns: Vec<ColumnRef>,
    ) -> KeelResult<Self> {
        Self::with_layout(rows, create, Layout::Projected(columns))
    }

    fn with_layout(
        rows: Option<Box<dyn Rows>>,
        create: Create<R>,
        layout: Layout,
    ) -> KeelResult<Self> {
        let mut results = Self {
            rows,
            create,
            layout,
        };
        results.advance()?;
        Ok(results)
    }

    fn advance(&mut self) -> KeelResult<()> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(());
        };
        match rows.next() {
            Ok(true) => Ok(()),
            Ok(false) => {
                trace!(sql = %rows.sql(), "results exhausted");
                self.close();
                Ok(())
            }
            Err(e) => {
                let sql = rows.sql().to_string();
                self.close();
                Err(KeelError::storage(sql, e))
            }
        }
    }

    /// True while a row is available.
    pub fn is_valid(&self) -> bool {
        self.rows.is_some()
    }

    /// The next record, or `None` once exhausted.
    pub fn get(&mut self) -> KeelResult<Option<R>> {
        let Some(rows) = self.rows.as_deref() else {
            return Ok(None);
        };
        let mut record = (self.create)();
        let filled = match &self.layout {
            Layout::ByName => fill(&mut record, rows),
            Layout::Projected(columns) => fill_projected(&mut record, rows, columns),
        };
        if let Err(e) = filled {
            self.close();
            return Err(e);
        }
        self.advance()?;
        Ok(Some(record))
    }

    /// Drain the remaining rows.
    pub fn collect_all(mut self) -> KeelResult<Vec<R>> {
        let mut out = Vec::new();
        while let Some(record) = self.get()? {
            out.push(record);
        }
        Ok(out)
    }

    /// Release the underlying cursor.
    pub fn close(&mut self) {
        if let Some(mut rows) = self.rows.take() {
            rows.close();
        }
    }
}

/// Copy the current row into the record's columns.
///
/// Result columns are matched by name. When the same name occurs several
/// times (`SELECT *` over a join of tables sharing column names) the n-th
/// occurrence in the row goes to the n-th record column of that name.
/// Record columns the row does not carry are left unset.
fn fill<R: Record>(record: &mut R, rows: &dyn Rows) -> KeelResult<()> {
    let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, name) in rows.column_names().iter().enumerate() {
        positions.entry(name.as_str()).or_default().push(i + 1);
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    for column in record.columns_mut() {
        let occurrence = seen.entry(column.name().to_string()).or_insert(0);
        let index = positions
            .get(column.name())
            .and_then(|p| p.get(*occurrence))
            .copied();
        *occurrence += 1;
        if let Some(index) = index {
            column.update(rows, Some(index))?;
        }
    }
    Ok(())
}

/// Copy the current row into the projected columns, matched by source and
/// name so a column present on both sides of a join lands on the right one.
fn fill_projected<R: Record>(
    record: &mut R,
    rows: &dyn Rows,
    columns: &[ColumnRef],
) -> KeelResult<()> {
    for column in record.columns_mut() {
        let target = column.column_ref();
        if let Some(i) = columns.iter().position(|c| *c == target) {
            column.update(rows, Some(i + 1))?;
        }
    }
    Ok(())
}

impl<R: Record> Iterator for Results<R> {
    type Item = KeelResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get().transpose()
    }
}

impl<R> Drop for Results<R> {
    fn drop(&mut self) {
        if let Some(mut rows) = self.rows.take() {
            rows.close();
        }
    }
}
