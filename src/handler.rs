//! How the unit of work obtains and gives back connections.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::connection::{ConnectionHandle, DataSourceHandle};
use crate::error::SqlDaoError;
use crate::transaction::Transactions;

/// Acquire/release contract between the unit of work and whoever owns connections.
pub trait ConnectionHandler: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns `SqlDaoError` if no connection can be obtained for `datasource`.
    fn acquire(&self, datasource: &DataSourceHandle) -> Result<ConnectionHandle, SqlDaoError>;

    /// # Errors
    /// Returns `SqlDaoError` if the connection could not be settled and closed.
    fn release(
        &self,
        connection: ConnectionHandle,
        datasource: &DataSourceHandle,
    ) -> Result<(), SqlDaoError>;
}

/// Uses the thread's ambient transaction when there is one.
///
/// Inside a transaction the transaction owns the connection, so `release` does
/// nothing. Outside, every acquire opens a fresh connection that `release`
/// commits (when auto-commit is off) and closes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AmbientConnectionHandler;

impl ConnectionHandler for AmbientConnectionHandler {
    fn acquire(&self, datasource: &DataSourceHandle) -> Result<ConnectionHandle, SqlDaoError> {
        if let Some(from_tx) = Transactions::connection(datasource) {
            return from_tx;
        }
        datasource.connection().map_err(SqlDaoError::acquisition)
    }

    fn release(
        &self,
        connection: ConnectionHandle,
        _datasource: &DataSourceHandle,
    ) -> Result<(), SqlDaoError> {
        if Transactions::is_active() {
            trace!("connection stays with the active transaction");
            return Ok(());
        }

        let settled = connection.auto_commit().and_then(|auto_commit| {
            if !auto_commit {
                connection.commit()?;
            }
            connection.close()
        });

        settled.map_err(|err| {
            if let Err(rollback_err) = connection.rollback() {
                warn!(error = %rollback_err, "rollback after failed release failed");
            }
            if let Err(close_err) = connection.close() {
                debug!(error = %close_err, "close after failed release failed");
            }
            SqlDaoError::Release(Box::new(err))
        })
    }
}

/// Transaction manager owned by a host framework.
///
/// Implement this to embed the data-access layer where something else already
/// decides when connections are opened, committed and closed.
pub trait ExternalTransactionManager: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns `SqlDaoError` if the host cannot supply a connection.
    fn connection(&self, datasource: &DataSourceHandle) -> Result<ConnectionHandle, SqlDaoError>;

    /// # Errors
    /// Returns `SqlDaoError` if the host fails to take the connection back.
    fn release_connection(
        &self,
        connection: ConnectionHandle,
        datasource: &DataSourceHandle,
    ) -> Result<(), SqlDaoError>;
}

/// Pass-through to an [`ExternalTransactionManager`].
#[derive(Debug, Clone)]
pub struct DelegatedConnectionHandler {
    manager: Arc<dyn ExternalTransactionManager>,
}

impl DelegatedConnectionHandler {
    #[must_use]
    pub fn new(manager: Arc<dyn ExternalTransactionManager>) -> Self {
        Self { manager }
    }
}

impl ConnectionHandler for DelegatedConnectionHandler {
    fn acquire(&self, datasource: &DataSourceHandle) -> Result<ConnectionHandle, SqlDaoError> {
        self.manager.connection(datasource)
    }

    fn release(
        &self,
        connection: ConnectionHandle,
        datasource: &DataSourceHandle,
    ) -> Result<(), SqlDaoError> {
        self.manager.release_connection(connection, datasource)
    }
}
