use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Statement, params_from_iter};

use crate::error::SqlDaoError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `SqlDaoError` if the value cannot be read.
pub fn sqlite_extract_value(row: &rusqlite::Row, idx: usize) -> Result<RowValues, SqlDaoError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Run a prepared statement and collect every row.
///
/// # Errors
/// Returns `SqlDaoError` if execution or value extraction fails.
pub fn build_result_set(stmt: &mut Statement, params: &[Value]) -> Result<ResultSet, SqlDaoError> {
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value(row, i)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}
