//! Statement-level helpers on top of [`UnitOfWork`].

use std::sync::Arc;

use tracing::trace;

use crate::connection::{ConnectionHandle, DataSourceHandle};
use crate::error::SqlDaoError;
use crate::executor::UnitOfWork;
use crate::handler::ConnectionHandler;
use crate::query::Statement;
use crate::results::{CustomDbRow, ResultSet};

/// Data-access object bound to one datasource.
///
/// Every call is one unit of work: inside an ambient transaction it runs on the
/// transaction's connection, outside it gets a connection of its own.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sql_dao::prelude::*;
///
/// # fn main() -> Result<(), SqlDaoError> {
/// let ds = SqliteDataSource::builder("app.db").build()?;
/// let dao = Dao::new(Arc::new(ds));
///
/// Transactions::run_in_transaction(IsolationLevel::default(), || {
///     dao.execute(&Statement::new_without_params("INSERT INTO t (name) VALUES ('a')"))?;
///     dao.execute(&Statement::new_without_params("INSERT INTO t (name) VALUES ('b')"))
/// })?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Dao {
    unit: UnitOfWork,
}

impl Dao {
    #[must_use]
    pub fn new(datasource: DataSourceHandle) -> Self {
        Self {
            unit: UnitOfWork::new(datasource),
        }
    }

    #[must_use]
    pub fn with_handler(datasource: DataSourceHandle, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            unit: UnitOfWork::with_handler(datasource, handler),
        }
    }

    #[must_use]
    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.unit
    }

    /// Run a DML statement; returns the affected row count.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if acquisition, execution or release fails.
    pub fn execute(&self, statement: &Statement) -> Result<usize, SqlDaoError> {
        trace!(sql = %statement.sql, "execute");
        self.unit.execute(|conn| conn.execute(statement))
    }

    /// Run an insert and return the generated key, when the backend reports one.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if acquisition, execution or release fails.
    pub fn insert(&self, statement: &Statement) -> Result<Option<i64>, SqlDaoError> {
        trace!(sql = %statement.sql, "insert");
        self.unit.execute(|conn| {
            conn.execute(statement)?;
            Ok::<_, SqlDaoError>(conn.last_insert_id())
        })
    }

    /// Run several statements on one connection, stopping at the first failure.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if acquisition, any statement, or release fails.
    pub fn execute_batch(&self, statements: &[Statement]) -> Result<Vec<usize>, SqlDaoError> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        self.unit.execute(|conn| {
            statements
                .iter()
                .map(|statement| conn.execute(statement))
                .collect::<Result<Vec<_>, _>>()
        })
    }

    /// # Errors
    /// Returns `SqlDaoError` if acquisition, the query, or release fails.
    pub fn query(&self, statement: &Statement) -> Result<ResultSet, SqlDaoError> {
        trace!(sql = %statement.sql, "query");
        self.unit.execute(|conn| conn.query(statement))
    }

    /// First row of the result, if any.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if acquisition, the query, or release fails.
    pub fn query_one(&self, statement: &Statement) -> Result<Option<CustomDbRow>, SqlDaoError> {
        Ok(self.query(statement)?.into_iter().next())
    }

    /// Number of rows `statement` would return.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if the count query fails or yields no integer.
    pub fn count(&self, statement: &Statement) -> Result<i64, SqlDaoError> {
        let rs = self.query(&statement.to_count())?;
        rs.scalar()
            .and_then(|value| value.as_int().copied())
            .ok_or_else(|| SqlDaoError::ExecutionError("count query returned no integer".into()))
    }

    /// Call `f` for each row; an error from `f` stops the iteration and is returned.
    ///
    /// # Errors
    /// Returns `SqlDaoError` from the query or from `f`.
    pub fn each<F>(&self, statement: &Statement, mut f: F) -> Result<(), SqlDaoError>
    where
        F: FnMut(&CustomDbRow) -> Result<(), SqlDaoError>,
    {
        self.query(statement)?.results.iter().try_for_each(|row| f(row))
    }

    /// Run arbitrary work on the unit's connection.
    ///
    /// # Errors
    /// Returns `SqlDaoError` from acquisition, `op`, or release.
    pub fn with_connection<T, F>(&self, op: F) -> Result<T, SqlDaoError>
    where
        F: FnOnce(&ConnectionHandle) -> Result<T, SqlDaoError>,
    {
        self.unit.execute(op)
    }
}
