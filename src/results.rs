//! Query results: a [`ResultSet`] of [`CustomDbRow`]s sharing one column list.

mod result_set;
mod row;

pub use result_set::ResultSet;
pub use row::CustomDbRow;
