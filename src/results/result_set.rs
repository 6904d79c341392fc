use std::collections::HashMap;
use std::sync::Arc;

use super::row::CustomDbRow;
use crate::types::RowValues;

/// A result set from a database query
///
/// Rows share the column names and the name-to-index lookup table of the set
/// that produced them.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<CustomDbRow>,
    /// The number of rows collected
    pub rows_affected: usize,
    column_names: Option<Arc<Vec<String>>>,
    column_index: Option<Arc<HashMap<String, usize>>>,
}

impl ResultSet {
    /// Create a new result set with a known capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            rows_affected: 0,
            column_names: None,
            column_index: None,
        }
    }

    /// Set the column names for this result set (to be shared by all rows)
    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        let index = column_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect::<HashMap<_, _>>();
        self.column_index = Some(Arc::new(index));
        self.column_names = Some(column_names);
    }

    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Add a row built from raw values. Ignored until column names are set.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        if let (Some(names), Some(index)) = (&self.column_names, &self.column_index) {
            self.results.push(CustomDbRow::with_index(
                Arc::clone(names),
                row_values,
                Arc::clone(index),
            ));
            self.rows_affected += 1;
        }
    }

    pub fn add_row(&mut self, row: CustomDbRow) {
        if self.column_names.is_none() {
            self.set_column_names(Arc::clone(&row.column_names));
        }
        self.results.push(row);
        self.rows_affected += 1;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&CustomDbRow> {
        self.results.first()
    }

    /// First column of the first row, the usual shape of `COUNT(*)` and friends.
    #[must_use]
    pub fn scalar(&self) -> Option<&RowValues> {
        self.first().and_then(|row| row.get_by_index(0))
    }

    /// Every row as a JSON object; see [`CustomDbRow::to_map`].
    #[must_use]
    pub fn to_maps(&self, camel_case: bool) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.results.iter().map(|row| row.to_map(camel_case)).collect()
    }
}

impl IntoIterator for ResultSet {
    type Item = CustomDbRow;
    type IntoIter = std::vec::IntoIter<CustomDbRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_dropped_until_columns_are_known() {
        let mut rs = ResultSet::with_capacity(2);
        rs.add_row_values(vec![RowValues::Int(1)]);
        assert!(rs.is_empty());

        rs.set_column_names(Arc::new(vec!["n".to_string()]));
        rs.add_row_values(vec![RowValues::Int(42)]);
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.rows_affected, 1);
        assert_eq!(rs.scalar(), Some(&RowValues::Int(42)));
        assert_eq!(rs.first().unwrap().get("n"), Some(&RowValues::Int(42)));
    }

    #[test]
    fn prebuilt_rows_adopt_their_columns() {
        let columns = Arc::new(vec!["id".to_string(), "name".to_string()]);
        let mut rs = ResultSet::default();
        assert!(rs.get_column_names().is_none());

        rs.add_row(CustomDbRow::new(
            Arc::clone(&columns),
            vec![RowValues::Int(7), RowValues::Text("x".into())],
        ));

        assert_eq!(rs.get_column_names(), Some(&columns));
        assert_eq!(rs.rows_affected, 1);
        rs.add_row_values(vec![RowValues::Int(8), RowValues::Null]);
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.results[1].get("NAME"), Some(&RowValues::Null));
    }
}
