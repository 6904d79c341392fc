//! In-memory datasource that records every connection-level call.
//!
//! Used by the unit tests and, behind the `test-utils` feature, by integration
//! tests that need to count commits or inject failures without a database.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::connection::{Connection, ConnectionHandle, DataSource};
use crate::error::SqlDaoError;
use crate::query::Statement;
use crate::results::ResultSet;
use crate::types::IsolationLevel;

/// One call observed on a recording connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Opened(usize),
    Commit(usize),
    Rollback(usize),
    Close(usize),
    SetAutoCommit(usize, bool),
    SetIsolation(usize, IsolationLevel),
    Execute(usize, String),
    Query(usize, String),
}

impl Event {
    fn connection_id(&self) -> usize {
        match self {
            Event::Opened(id)
            | Event::Commit(id)
            | Event::Rollback(id)
            | Event::Close(id)
            | Event::SetAutoCommit(id, _)
            | Event::SetIsolation(id, _)
            | Event::Execute(id, _)
            | Event::Query(id, _) => *id,
        }
    }
}

/// Events tagged with the name of the datasource that produced them.
pub type EventLog = Arc<Mutex<Vec<(String, Event)>>>;

#[derive(Debug, Default)]
struct Faults {
    connect: AtomicBool,
    commit: AtomicBool,
    rollback: AtomicBool,
    close: AtomicBool,
}

#[derive(Debug)]
pub struct RecordingDataSource {
    name: String,
    log: EventLog,
    faults: Arc<Faults>,
    next_id: AtomicUsize,
}

impl RecordingDataSource {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_log(name, EventLog::default())
    }

    /// Share one log between several datasources to observe cross-datasource ordering.
    #[must_use]
    pub fn with_log(name: impl Into<String>, log: EventLog) -> Self {
        Self {
            name: name.into(),
            log,
            faults: Arc::new(Faults::default()),
            next_id: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn log(&self) -> EventLog {
        Arc::clone(&self.log)
    }

    pub fn fail_connect(&self, fail: bool) {
        self.faults.connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.faults.commit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self, fail: bool) {
        self.faults.rollback.store(fail, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.faults.close.store(fail, Ordering::SeqCst);
    }

    /// Events produced by this datasource, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(name, _)| *name == self.name)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit(_)))
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback(_)))
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.count(|e| matches!(e, Event::Close(_)))
    }

    #[must_use]
    pub fn opened(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Events of a single connection, oldest first.
    #[must_use]
    pub fn events_for(&self, connection_id: usize) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.connection_id() == connection_id)
            .collect()
    }
}

impl DataSource for RecordingDataSource {
    fn connection(&self) -> Result<ConnectionHandle, SqlDaoError> {
        if self.faults.connect.load(Ordering::SeqCst) {
            return Err(SqlDaoError::Other(format!(
                "{}: injected connect failure",
                self.name
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let conn = RecordingConnection {
            id,
            name: self.name.clone(),
            log: Arc::clone(&self.log),
            faults: Arc::clone(&self.faults),
            state: Mutex::new(ConnState {
                auto_commit: true,
                isolation: IsolationLevel::Serializable,
                closed: false,
            }),
        };
        conn.record(Event::Opened(id));
        Ok(Arc::new(conn))
    }
}

#[derive(Debug)]
struct ConnState {
    auto_commit: bool,
    isolation: IsolationLevel,
    closed: bool,
}

#[derive(Debug)]
pub struct RecordingConnection {
    id: usize,
    name: String,
    log: EventLog,
    faults: Arc<Faults>,
    state: Mutex<ConnState>,
}

impl RecordingConnection {
    fn record(&self, event: Event) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((self.name.clone(), event));
    }

    fn fault(&self, flag: &AtomicBool, what: &str) -> Result<(), SqlDaoError> {
        if flag.load(Ordering::SeqCst) {
            Err(SqlDaoError::Other(format!(
                "{}: injected {what} failure",
                self.name
            )))
        } else {
            Ok(())
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), SqlDaoError> {
        if self.state().closed {
            Err(SqlDaoError::ExecutionError(format!(
                "{}: connection {} is closed",
                self.name, self.id
            )))
        } else {
            Ok(())
        }
    }
}

impl Connection for RecordingConnection {
    fn commit(&self) -> Result<(), SqlDaoError> {
        self.ensure_open()?;
        self.record(Event::Commit(self.id));
        self.fault(&self.faults.commit, "commit")
    }

    fn rollback(&self) -> Result<(), SqlDaoError> {
        self.ensure_open()?;
        self.record(Event::Rollback(self.id));
        self.fault(&self.faults.rollback, "rollback")
    }

    fn close(&self) -> Result<(), SqlDaoError> {
        if self.state().closed {
            return Ok(());
        }
        self.record(Event::Close(self.id));
        self.fault(&self.faults.close, "close")?;
        self.state().closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<(), SqlDaoError> {
        self.ensure_open()?;
        self.record(Event::SetAutoCommit(self.id, auto_commit));
        self.state().auto_commit = auto_commit;
        Ok(())
    }

    fn auto_commit(&self) -> Result<bool, SqlDaoError> {
        self.ensure_open()?;
        Ok(self.state().auto_commit)
    }

    fn set_isolation_level(&self, level: IsolationLevel) -> Result<(), SqlDaoError> {
        self.ensure_open()?;
        self.record(Event::SetIsolation(self.id, level));
        self.state().isolation = level;
        Ok(())
    }

    fn isolation_level(&self) -> Result<IsolationLevel, SqlDaoError> {
        self.ensure_open()?;
        Ok(self.state().isolation)
    }

    fn execute(&self, statement: &Statement) -> Result<usize, SqlDaoError> {
        self.ensure_open()?;
        self.record(Event::Execute(self.id, statement.sql.clone()));
        Ok(1)
    }

    fn query(&self, statement: &Statement) -> Result<ResultSet, SqlDaoError> {
        self.ensure_open()?;
        self.record(Event::Query(self.id, statement.sql.clone()));
        Ok(ResultSet::default())
    }

    fn execute_batch(&self, sql: &str) -> Result<(), SqlDaoError> {
        self.ensure_open()?;
        self.record(Event::Execute(self.id, sql.to_owned()));
        Ok(())
    }
}
