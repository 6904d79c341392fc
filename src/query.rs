use crate::types::RowValues;

/// A SQL string and its bound parameters bundled together.
///
/// The data-access core never looks inside; it only hands the statement to the
/// connection that runs it.
/// ```rust
/// use sql_dao::prelude::*;
///
/// let stmt = Statement::new(
///     "INSERT INTO t (id, name) VALUES (?1, ?2)",
///     vec![RowValues::Int(1), RowValues::Text("alice".into())],
/// );
/// # let _ = stmt;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// The SQL text
    pub sql: String,
    /// The parameters to bind, in placeholder order
    pub params: Vec<RowValues>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<RowValues>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn new_without_params(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append one parameter, builder style.
    #[must_use]
    pub fn bind(mut self, value: impl Into<RowValues>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Wrap this statement as `SELECT COUNT(*)` over its own rows, keeping the parameters.
    #[must_use]
    pub fn to_count(&self) -> Statement {
        let inner = self.sql.trim().trim_end_matches(';');
        Statement {
            sql: format!("SELECT COUNT(*) FROM ({inner}) AS count_subquery"),
            params: self.params.clone(),
        }
    }
}
