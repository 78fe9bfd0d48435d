//! Table catalog.
//!
//! The catalog records which columns each table exposes. The planner uses it
//! to reject unknown fields and to detect ambiguous unqualified names; tables
//! it does not know are accepted as they are.

mod catalog;
mod column;
mod table;

pub use catalog::Catalog;
pub use column::ColumnDef;
pub use table::TableDef;
