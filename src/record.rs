//! Records: a fixed, ordered set of columns.

use crate::column::AnyColumn;
use crate::error::{KeelError, KeelResult};
use crate::source::Binding;
use std::rc::Rc;

/// An ordered collection of columns.
///
/// Column order is significant: it is the order used for `SELECT *`
/// marshalling, INSERT column lists and generated DDL.
pub trait Record {
    fn columns(&self) -> Vec<&dyn AnyColumn>;

    fn columns_mut(&mut self) -> Vec<&mut dyn AnyColumn>;

    /// Clear the dirty flag of every column.
    fn flag_all_clean(&mut self) {
        for column in self.columns_mut() {
            column.flag_clean();
        }
    }

    fn is_dirty(&self) -> bool {
        self.columns().iter().any(|c| c.is_dirty())
    }
}

/// A record that maps to exactly one table and can write itself back.
pub trait TableRecord: Record + Sized {
    /// The table occurrence this record's columns are bound to.
    fn binding(&self) -> KeelResult<Rc<Binding>> {
        self.columns()
            .first()
            .map(|c| c.binding().clone())
            .ok_or_else(|| KeelError::invalid("Record has no columns."))
    }

    /// INSERT this record. AUTOINCREMENT columns receive their generated
    /// values and every column is left clean.
    fn insert(&mut self) -> KeelResult<()> {
        let binding = self.binding()?;
        binding.database().insert(binding.table(), self)
    }

    /// UPDATE the dirty non-key columns, locating the row by key.
    /// Returns false, without touching storage, when nothing is dirty.
    fn update(&mut self) -> KeelResult<bool> {
        let binding = self.binding()?;
        binding.database().update(binding.table(), self)
    }

    /// DELETE the row identified by this record's key columns.
    fn delete(&mut self) -> KeelResult<()> {
        let binding = self.binding()?;
        binding.database().delete(binding.table(), self)
    }
}

/// A row of a join: one record from each side.
#[derive(Debug)]
pub struct Joined<A, B> {
    pub left: A,
    pub right: B,
}

impl<A: Record, B: Record> Record for Joined<A, B> {
    fn columns(&self) -> Vec<&dyn AnyColumn> {
        let mut columns = self.left.columns();
        columns.extend(self.right.columns());
        columns
    }

    fn columns_mut(&mut self) -> Vec<&mut dyn AnyColumn> {
        let mut columns = self.left.columns_mut();
        columns.extend(self.right.columns_mut());
        columns
    }
}

/// Implement [`Record`] and [`TableRecord`] for a struct of columns.
///
/// ```ignore
/// struct Sprocket {
///     id: Column<i32>,
///     email: Column<String>,
/// }
///
/// keel::table_record!(Sprocket { id, email });
/// ```
#[macro_export]
macro_rules! table_record {
    ($record:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::Record for $record {
            fn columns(&self) -> Vec<&dyn $crate::AnyColumn> {
                vec![$(&self.$field as &dyn $crate::AnyColumn),+]
            }

            fn columns_mut(&mut self) -> Vec<&mut dyn $crate::AnyColumn> {
                vec![$(&mut self.$field as &mut dyn $crate::AnyColumn),+]
            }
        }

        impl $crate::TableRecord for $record {}
    };
}
