use tracing::{debug, trace};

use crate::connection::{ConnectionHandle, DataSourceHandle, DataSourceKey};
use crate::error::SqlDaoError;
use crate::types::IsolationLevel;

/// One datasource's connection, borrowed for the lifetime of a transaction.
///
/// The auto-commit flag and isolation level the connection had when it was
/// acquired are put back after the transaction ends.
#[derive(Debug)]
pub(crate) struct Resource {
    key: DataSourceKey,
    // Keeps the datasource alive so `key` cannot be reused by another allocation.
    _datasource: DataSourceHandle,
    connection: ConnectionHandle,
    saved_auto_commit: bool,
    saved_isolation: IsolationLevel,
}

impl Resource {
    /// Acquire a connection and switch it to manual commit at `level`.
    ///
    /// A connection that cannot be configured is closed before the error is returned.
    pub(crate) fn acquire(
        datasource: &DataSourceHandle,
        level: IsolationLevel,
    ) -> Result<Self, SqlDaoError> {
        let connection = datasource.connection().map_err(SqlDaoError::acquisition)?;
        let configured = (|| {
            let saved_auto_commit = connection.auto_commit()?;
            let saved_isolation = connection.isolation_level()?;
            connection.set_auto_commit(false)?;
            connection.set_isolation_level(level)?;
            Ok::<_, SqlDaoError>((saved_auto_commit, saved_isolation))
        })();

        match configured {
            Ok((saved_auto_commit, saved_isolation)) => Ok(Self {
                key: DataSourceKey::of(datasource),
                _datasource: datasource.clone(),
                connection,
                saved_auto_commit,
                saved_isolation,
            }),
            Err(err) => {
                if let Err(close_err) = connection.close() {
                    debug!(error = %close_err, "closing unconfigured connection failed");
                }
                Err(SqlDaoError::acquisition(err))
            }
        }
    }

    pub(crate) fn key(&self) -> DataSourceKey {
        self.key
    }

    pub(crate) fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub(crate) fn commit(&self) -> Result<(), SqlDaoError> {
        trace!(connection = ?self.connection, "committing transaction resource");
        self.connection
            .commit()
            .and_then(|()| self.restore())
            .map_err(|e| SqlDaoError::Commit(Box::new(e)))
    }

    pub(crate) fn rollback(&self) -> Result<(), SqlDaoError> {
        trace!(connection = ?self.connection, "rolling back transaction resource");
        self.connection
            .rollback()
            .and_then(|()| self.restore())
            .map_err(|e| SqlDaoError::Rollback(Box::new(e)))
    }

    pub(crate) fn close(&self) -> Result<(), SqlDaoError> {
        trace!(connection = ?self.connection, "closing transaction resource");
        self.connection.close()
    }

    fn restore(&self) -> Result<(), SqlDaoError> {
        self.connection.set_auto_commit(self.saved_auto_commit)?;
        self.connection.set_isolation_level(self.saved_isolation)
    }
}
