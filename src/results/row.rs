use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::types::RowValues;

/// A row from a database query result
///
/// This struct represents a single row from a database query result,
/// with access to both the column names and the values.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub rows: Vec<RowValues>,
    column_index: Arc<HashMap<String, usize>>,
}

impl CustomDbRow {
    /// Create a new database row
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, rows: Vec<RowValues>) -> Self {
        let index = Arc::new(
            column_names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect::<HashMap<_, _>>(),
        );
        Self::with_index(column_names, rows, index)
    }

    pub(crate) fn with_index(
        column_names: Arc<Vec<String>>,
        rows: Vec<RowValues>,
        column_index: Arc<HashMap<String, usize>>,
    ) -> Self {
        Self {
            column_names,
            rows,
            column_index,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index.get(column_name) {
            return Some(idx);
        }
        self.column_names
            .iter()
            .position(|col| col.eq_ignore_ascii_case(column_name))
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.rows.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.rows.get(index)
    }

    /// Convert the row into a JSON object keyed by lower-cased column name.
    ///
    /// With `camel_case`, `client_id` becomes `clientId`.
    #[must_use]
    pub fn to_map(&self, camel_case: bool) -> Map<String, JsonValue> {
        self.column_names
            .iter()
            .zip(self.rows.iter())
            .map(|(name, value)| {
                let key = name.to_lowercase();
                let key = if camel_case { to_camel_case(&key) } else { key };
                (key, value.to_json())
            })
            .collect()
    }
}

fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> CustomDbRow {
        CustomDbRow::new(
            Arc::new(vec!["CLIENT_ID".to_string(), "name".to_string()]),
            vec![RowValues::Int(7), RowValues::Text("x".into())],
        )
    }

    #[test]
    fn lookup_falls_back_to_case_insensitive() {
        let r = row();
        assert_eq!(r.get("name"), Some(&RowValues::Text("x".into())));
        assert_eq!(r.get("client_id"), Some(&RowValues::Int(7)));
        assert_eq!(r.get("missing"), None);
    }

    #[test]
    fn map_keys_are_lowercase_or_camel_case() {
        let plain = row().to_map(false);
        assert_eq!(plain.get("client_id"), Some(&JsonValue::from(7)));

        let camel = row().to_map(true);
        assert_eq!(camel.get("clientId"), Some(&JsonValue::from(7)));
        assert_eq!(camel.get("name"), Some(&JsonValue::from("x")));
    }

    #[test]
    fn camel_case_ignores_leading_and_double_underscores() {
        assert_eq!(to_camel_case("_a__b_c"), "aBC");
        assert_eq!(to_camel_case("plain"), "plain");
    }
}
