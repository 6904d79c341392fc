//! Contracts the core consumes: a [`DataSource`] hands out [`Connection`]s.
//!
//! Pooling, drivers and SQL dialects all live behind these two traits. The
//! transaction manager only needs the commit/rollback/close and
//! auto-commit/isolation capabilities; statement execution is exposed so
//! callers of the unit of work have something to run.

use std::fmt;
use std::sync::Arc;

use crate::error::SqlDaoError;
use crate::query::Statement;
use crate::results::ResultSet;
use crate::types::IsolationLevel;

/// A live database connection.
///
/// Implementations use interior mutability: one handle may be shared between
/// the transaction that owns it and the operation currently borrowing it.
pub trait Connection: Send + Sync + fmt::Debug {
    /// Commit the work done since the last commit/rollback.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if the backend rejects the commit.
    fn commit(&self) -> Result<(), SqlDaoError>;

    /// Discard the work done since the last commit/rollback.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if the backend rejects the rollback.
    fn rollback(&self) -> Result<(), SqlDaoError>;

    /// Close the connection. Closing twice is a no-op.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if the backend fails to close cleanly.
    fn close(&self) -> Result<(), SqlDaoError>;

    fn is_closed(&self) -> bool;

    /// # Errors
    /// Returns `SqlDaoError` if the connection is closed or the mode cannot be changed.
    fn set_auto_commit(&self, auto_commit: bool) -> Result<(), SqlDaoError>;

    /// # Errors
    /// Returns `SqlDaoError` if the connection is closed.
    fn auto_commit(&self) -> Result<bool, SqlDaoError>;

    /// # Errors
    /// Returns `SqlDaoError` if the connection is closed or the level cannot be applied.
    fn set_isolation_level(&self, level: IsolationLevel) -> Result<(), SqlDaoError>;

    /// # Errors
    /// Returns `SqlDaoError` if the connection is closed.
    fn isolation_level(&self) -> Result<IsolationLevel, SqlDaoError>;

    /// Run a DML statement and return the number of affected rows.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if parameter conversion or execution fails.
    fn execute(&self, statement: &Statement) -> Result<usize, SqlDaoError>;

    /// Run a query and collect its rows.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if parameter conversion, execution or row extraction fails.
    fn query(&self, statement: &Statement) -> Result<ResultSet, SqlDaoError>;

    /// Run several parameterless statements separated by `;`.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if any statement fails.
    fn execute_batch(&self, sql: &str) -> Result<(), SqlDaoError>;

    /// Key generated by the most recent insert, for backends that track one.
    fn last_insert_id(&self) -> Option<i64> {
        None
    }
}

/// Shared handle to a connection.
pub type ConnectionHandle = Arc<dyn Connection>;

/// Connection provider for one logical datasource.
pub trait DataSource: Send + Sync + fmt::Debug {
    /// Hand out a live connection.
    ///
    /// # Errors
    /// Returns `SqlDaoError` if no connection can be supplied.
    fn connection(&self) -> Result<ConnectionHandle, SqlDaoError>;
}

/// Shared handle to a datasource. Clones of one handle are the same datasource.
pub type DataSourceHandle = Arc<dyn DataSource>;

/// Identity of a datasource inside a transaction.
///
/// Derived from the address of the `Arc` allocation, so it stays stable as
/// long as some clone of the handle is alive; the transaction keeps one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataSourceKey(usize);

impl DataSourceKey {
    #[must_use]
    pub fn of(datasource: &DataSourceHandle) -> Self {
        Self(Arc::as_ptr(datasource).cast::<()>() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingDataSource;

    #[test]
    fn key_follows_the_allocation_not_the_clone() {
        let a: DataSourceHandle = Arc::new(RecordingDataSource::new("a"));
        let b: DataSourceHandle = Arc::new(RecordingDataSource::new("a"));
        let a2 = Arc::clone(&a);

        assert_eq!(DataSourceKey::of(&a), DataSourceKey::of(&a2));
        assert_ne!(DataSourceKey::of(&a), DataSourceKey::of(&b));
    }
}
