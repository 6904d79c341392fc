//! Unit of work: run one operation against one borrowed connection.

use std::sync::Arc;

use tracing::warn;

use crate::connection::{ConnectionHandle, DataSourceHandle};
use crate::error::SqlDaoError;
use crate::handler::{AmbientConnectionHandler, ConnectionHandler};

/// Runs operations against connections obtained through a [`ConnectionHandler`].
///
/// Each [`execute`](Self::execute) acquires exactly once and releases exactly
/// once, whether the operation succeeds, returns an error, or panics.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    datasource: DataSourceHandle,
    handler: Arc<dyn ConnectionHandler>,
}

impl UnitOfWork {
    /// Unit of work that joins the thread's ambient transaction when there is one.
    #[must_use]
    pub fn new(datasource: DataSourceHandle) -> Self {
        Self::with_handler(datasource, Arc::new(AmbientConnectionHandler))
    }

    #[must_use]
    pub fn with_handler(datasource: DataSourceHandle, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            datasource,
            handler,
        }
    }

    #[must_use]
    pub fn datasource(&self) -> &DataSourceHandle {
        &self.datasource
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn ConnectionHandler> {
        &self.handler
    }

    /// Run `op` with a connection and release it afterwards.
    ///
    /// When `op` fails, its error is returned even if the release fails too
    /// (the release failure is logged). When `op` succeeds, a release failure
    /// is returned instead of the value.
    ///
    /// # Errors
    /// Returns the acquisition error, the operation's error, or the release error.
    pub fn execute<T, E, F>(&self, op: F) -> Result<T, SqlDaoError>
    where
        F: FnOnce(&ConnectionHandle) -> Result<T, E>,
        E: Into<SqlDaoError>,
    {
        let connection = self.handler.acquire(&self.datasource)?;
        let mut guard = ReleaseGuard {
            handler: self.handler.as_ref(),
            datasource: &self.datasource,
            connection: Some(Arc::clone(&connection)),
        };

        let outcome = op(&connection).map_err(Into::into);
        drop(connection);
        let released = guard.release();

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                warn!(error = %release_err, "connection release failed after operation error");
                Err(err)
            }
        }
    }
}

/// Releases the connection when dropped, so a panicking operation still gives it back.
struct ReleaseGuard<'a> {
    handler: &'a dyn ConnectionHandler,
    datasource: &'a DataSourceHandle,
    connection: Option<ConnectionHandle>,
}

impl ReleaseGuard<'_> {
    fn release(&mut self) -> Result<(), SqlDaoError> {
        match self.connection.take() {
            Some(connection) => self.handler.release(connection, self.datasource),
            None => Ok(()),
        }
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(error = %err, "connection release failed while unwinding");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::test_utils::RecordingDataSource;

    /// Handler that counts calls and otherwise behaves like the ambient one.
    #[derive(Debug, Default)]
    struct CountingHandler {
        acquired: Mutex<usize>,
        released: Mutex<usize>,
        fail_release: bool,
    }

    impl ConnectionHandler for CountingHandler {
        fn acquire(
            &self,
            datasource: &DataSourceHandle,
        ) -> Result<ConnectionHandle, SqlDaoError> {
            *self.acquired.lock().unwrap() += 1;
            AmbientConnectionHandler.acquire(datasource)
        }

        fn release(
            &self,
            connection: ConnectionHandle,
            datasource: &DataSourceHandle,
        ) -> Result<(), SqlDaoError> {
            *self.released.lock().unwrap() += 1;
            AmbientConnectionHandler.release(connection, datasource)?;
            if self.fail_release {
                Err(SqlDaoError::Other("release failed".into()))
            } else {
                Ok(())
            }
        }
    }

    fn setup(fail_release: bool) -> (Arc<RecordingDataSource>, Arc<CountingHandler>, UnitOfWork) {
        let recording = Arc::new(RecordingDataSource::new("ds"));
        let handler = Arc::new(CountingHandler {
            fail_release,
            ..CountingHandler::default()
        });
        let uow = UnitOfWork::with_handler(recording.clone(), handler.clone());
        (recording, handler, uow)
    }

    fn counts(handler: &CountingHandler) -> (usize, usize) {
        (
            *handler.acquired.lock().unwrap(),
            *handler.released.lock().unwrap(),
        )
    }

    #[test]
    fn success_acquires_and_releases_once() {
        let (recording, handler, uow) = setup(false);
        let n = uow.execute(|_conn| Ok::<_, SqlDaoError>(7)).unwrap();
        assert_eq!(n, 7);
        assert_eq!(counts(&handler), (1, 1));
        assert_eq!(recording.closes(), 1);
    }

    #[test]
    fn operation_error_still_releases() {
        let (recording, handler, uow) = setup(false);
        let err = uow
            .execute(|_conn| Err::<(), _>(SqlDaoError::ExecutionError("bad sql".into())))
            .unwrap_err();
        assert!(matches!(err, SqlDaoError::ExecutionError(_)));
        assert_eq!(counts(&handler), (1, 1));
        assert_eq!(recording.closes(), 1);
    }

    #[test]
    fn panicking_operation_still_releases() {
        let (recording, handler, uow) = setup(false);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            uow.execute(|_conn| -> Result<(), SqlDaoError> { panic!("operation blew up") })
        }));
        assert!(outcome.is_err());
        assert_eq!(counts(&handler), (1, 1));
        assert_eq!(recording.closes(), 1);
    }

    #[test]
    fn operation_error_wins_over_release_error() {
        let (_recording, _handler, uow) = setup(true);
        let err = uow
            .execute(|_conn| Err::<(), _>(SqlDaoError::ExecutionError("bad sql".into())))
            .unwrap_err();
        assert!(matches!(err, SqlDaoError::ExecutionError(_)));

        let err = uow.execute(|_conn| Ok::<_, SqlDaoError>(())).unwrap_err();
        assert!(matches!(err, SqlDaoError::Other(_)));
    }

    #[test]
    fn failed_acquire_releases_nothing() {
        let (recording, handler, uow) = setup(false);
        recording.fail_connect(true);
        let err = uow.execute(|_conn| Ok::<_, SqlDaoError>(())).unwrap_err();
        assert!(matches!(err, SqlDaoError::ConnectionAcquisition(_)));
        assert_eq!(counts(&handler), (1, 0));
    }
}
