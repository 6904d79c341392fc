//! Datasource wrapper that keeps track of the connections it handed out.
//!
//! Every connection is wrapped in a [`TrackedConnection`] that forwards all
//! calls and, on `close`, removes itself from the live set. `close_all`
//! force-closes whatever is still open, e.g. at shutdown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionHandle, DataSource, DataSourceHandle};
use crate::error::SqlDaoError;
use crate::query::Statement;
use crate::results::ResultSet;
use crate::types::IsolationLevel;

type LiveSet = Mutex<BTreeMap<u64, ConnectionHandle>>;

#[derive(Debug)]
pub struct TrackedDataSource {
    inner: DataSourceHandle,
    live: Arc<LiveSet>,
    next_id: AtomicU64,
}

impl TrackedDataSource {
    #[must_use]
    pub fn new(inner: DataSourceHandle) -> Self {
        Self {
            inner,
            live: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Connections handed out and not closed yet.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Close every connection still open. Failures are logged and ignored.
    pub fn close_all(&self) {
        let open: Vec<(u64, ConnectionHandle)> = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *live).into_iter().collect()
        };
        for (id, conn) in open {
            if let Err(err) = conn.close() {
                warn!(connection = id, error = %err, "failed to close tracked connection");
            }
        }
    }
}

impl DataSource for TrackedDataSource {
    fn connection(&self) -> Result<ConnectionHandle, SqlDaoError> {
        let inner = self.inner.connection()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&inner));
        debug!(connection = id, "tracking new connection");
        Ok(Arc::new(TrackedConnection {
            id,
            inner,
            live: Arc::downgrade(&self.live),
        }))
    }
}

impl Drop for TrackedDataSource {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Forwards every call to the wrapped connection; `close` also untracks it.
///
/// Dropping a connection that was never closed untracks and closes it.
#[derive(Debug)]
pub struct TrackedConnection {
    id: u64,
    inner: ConnectionHandle,
    live: Weak<LiveSet>,
}

impl TrackedConnection {
    /// Returns whether the connection was still in the live set.
    fn untrack(&self) -> bool {
        self.live.upgrade().is_some_and(|live| {
            live.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id)
                .is_some()
        })
    }
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        if self.untrack() && !self.inner.is_closed() {
            debug!(connection = self.id, "closing tracked connection dropped while open");
            if let Err(err) = self.inner.close() {
                warn!(connection = self.id, error = %err, "failed to close dropped connection");
            }
        }
    }
}

impl Connection for TrackedConnection {
    fn commit(&self) -> Result<(), SqlDaoError> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<(), SqlDaoError> {
        self.inner.rollback()
    }

    fn close(&self) -> Result<(), SqlDaoError> {
        self.untrack();
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<(), SqlDaoError> {
        self.inner.set_auto_commit(auto_commit)
    }

    fn auto_commit(&self) -> Result<bool, SqlDaoError> {
        self.inner.auto_commit()
    }

    fn set_isolation_level(&self, level: IsolationLevel) -> Result<(), SqlDaoError> {
        self.inner.set_isolation_level(level)
    }

    fn isolation_level(&self) -> Result<IsolationLevel, SqlDaoError> {
        self.inner.isolation_level()
    }

    fn execute(&self, statement: &Statement) -> Result<usize, SqlDaoError> {
        self.inner.execute(statement)
    }

    fn query(&self, statement: &Statement) -> Result<ResultSet, SqlDaoError> {
        self.inner.query(statement)
    }

    fn execute_batch(&self, sql: &str) -> Result<(), SqlDaoError> {
        self.inner.execute_batch(sql)
    }

    fn last_insert_id(&self) -> Option<i64> {
        self.inner.last_insert_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingDataSource;

    #[test]
    fn close_untracks_and_close_all_sweeps_the_rest() {
        let recording = Arc::new(RecordingDataSource::new("tracked"));
        let tracked = TrackedDataSource::new(recording.clone());

        let first = tracked.connection().unwrap();
        let _second = tracked.connection().unwrap();
        assert_eq!(tracked.active_count(), 2);

        first.close().unwrap();
        assert_eq!(tracked.active_count(), 1);

        tracked.close_all();
        assert_eq!(tracked.active_count(), 0);
        assert_eq!(recording.closes(), 2);
    }

    #[test]
    fn close_all_ignores_failures() {
        let recording = Arc::new(RecordingDataSource::new("tracked"));
        let tracked = TrackedDataSource::new(recording.clone());
        let _conn = tracked.connection().unwrap();

        recording.fail_close(true);
        tracked.close_all();
        assert_eq!(tracked.active_count(), 0);
    }

    #[test]
    fn dropping_an_unclosed_connection_untracks_and_closes_it() {
        let recording = Arc::new(RecordingDataSource::new("tracked"));
        let tracked = TrackedDataSource::new(recording.clone());

        let conn = tracked.connection().unwrap();
        let closed_first = tracked.connection().unwrap();
        assert_eq!(tracked.active_count(), 2);

        drop(conn);
        assert_eq!(tracked.active_count(), 1);
        assert_eq!(recording.closes(), 1);

        closed_first.close().unwrap();
        drop(closed_first);
        assert_eq!(tracked.active_count(), 0);
        assert_eq!(recording.closes(), 2);
    }
}
