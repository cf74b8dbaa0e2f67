//! # keel — typed tables over SQLite
//!
//! Declare a record as a struct of typed columns, build filters against
//! those columns, and let keel compile them to parameterized SQL.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use keel::prelude::*;
//!
//! struct Sprocket {
//!     id: Column<i32>,
//!     email: Column<String>,
//! }
//! keel::table_record!(Sprocket { id, email });
//!
//! let db = Database::open_in_memory()?;
//! let sprockets = db.table("tables", |f| Sprocket {
//!     id: f.integer("id", Keys::AUTOINCREMENT),
//!     email: f.string("email", Keys::NONE),
//! })?;
//! db.migrate()?;
//!
//! let mut s = sprockets.create();
//! s.email.set("a@example.com".to_string());
//! s.insert()?;
//!
//! let found = sprockets.filter(|s| s.id.is(1)).first().select()?.get()?;
//! // SELECT * FROM tables t0 WHERE t0.db_id = ? LIMIT 1
//! ```
//!
//! ## Column keys
//!
//! | Flag            | Meaning                                          |
//! |-----------------|--------------------------------------------------|
//! | `KEY`           | Part of the primary key; locates rows on update  |
//! | `AUTOINCREMENT` | Integer key generated on insert                  |
//! | `NULLABLE`      | May hold null; skipped on insert when unset      |

pub mod column;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod filter;
pub mod migrate;
pub mod order;
pub mod query;
pub mod record;
pub mod results;
pub mod source;
pub mod transpiler;
pub mod value;

pub use column::{AnyColumn, Column, Fields, Keys};
pub use engine::Database;
pub use error::{KeelError, KeelResult};
pub use record::{Joined, Record, TableRecord};

pub mod prelude {
    pub use crate::column::{AnyColumn, Column, Fields, Keys};
    pub use crate::config::Config;
    pub use crate::engine::Database;
    pub use crate::error::*;
    pub use crate::filter::{Comparison, Filter};
    pub use crate::order::{AggregateFn, Order, Projection};
    pub use crate::query::Query;
    pub use crate::record::{Joined, Record, TableRecord};
    pub use crate::results::Results;
    pub use crate::source::{JoinedTable, Source, Table};
    pub use crate::value::{ColumnType, Enumerated, SqlType, SqlValue};
}
