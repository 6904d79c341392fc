use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use super::params::Params;
use super::query::build_result_set;
use crate::connection::Connection;
use crate::error::SqlDaoError;
use crate::query::Statement;
use crate::results::ResultSet;
use crate::types::IsolationLevel;

const ROLLBACK_BUSY_RETRIES: &[Duration] = &[
    Duration::from_millis(10),
    Duration::from_millis(25),
    Duration::from_millis(50),
];

/// `SQLite` connection with JDBC-style auto-commit semantics.
///
/// `SQLite` itself is in auto-commit mode unless a `BEGIN` is open. With
/// auto-commit switched off, the first statement afterwards opens a
/// transaction (`BEGIN IMMEDIATE` at SERIALIZABLE, `BEGIN DEFERRED`
/// otherwise) that stays open until `commit` or `rollback`.
pub struct SqliteConnection {
    state: Mutex<State>,
}

struct State {
    conn: Option<rusqlite::Connection>,
    auto_commit: bool,
    isolation: IsolationLevel,
    in_transaction: bool,
}

impl SqliteConnection {
    #[must_use]
    pub fn new(conn: rusqlite::Connection) -> Self {
        Self {
            state: Mutex::new(State {
                conn: Some(conn),
                auto_commit: true,
                isolation: IsolationLevel::Serializable,
                in_transaction: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `func` on the open connection, opening a transaction first in manual mode.
    fn with_statement_conn<R>(
        &self,
        func: impl FnOnce(&rusqlite::Connection) -> Result<R, SqlDaoError>,
    ) -> Result<R, SqlDaoError> {
        let mut state = self.lock();
        state.begin_if_needed()?;
        func(state.open()?)
    }

    /// Whether a `BEGIN` issued by this wrapper is still open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }
}

impl State {
    fn open(&self) -> Result<&rusqlite::Connection, SqlDaoError> {
        self.conn
            .as_ref()
            .ok_or_else(|| SqlDaoError::ExecutionError("SQLite connection is closed".into()))
    }

    fn begin_if_needed(&mut self) -> Result<(), SqlDaoError> {
        if self.auto_commit || self.in_transaction {
            return Ok(());
        }
        let begin = match self.isolation {
            IsolationLevel::Serializable => "BEGIN IMMEDIATE",
            _ => "BEGIN DEFERRED",
        };
        trace!(begin, "opening SQLite transaction");
        self.open()?.execute_batch(begin)?;
        self.in_transaction = true;
        Ok(())
    }

    fn end_transaction(&mut self, sql: &str) -> Result<(), SqlDaoError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.open()?.execute_batch(sql)?;
        self.in_transaction = false;
        Ok(())
    }

    /// Roll back, sleeping through each delay in `ROLLBACK_BUSY_RETRIES` while the
    /// database reports busy. The last busy error is returned as is.
    fn rollback_with_busy_retries(&mut self) -> Result<(), SqlDaoError> {
        if !self.in_transaction {
            return Ok(());
        }
        let mut delays = ROLLBACK_BUSY_RETRIES.iter().copied();
        loop {
            match self.open()?.execute_batch("ROLLBACK") {
                Ok(()) => {
                    self.in_transaction = false;
                    return Ok(());
                }
                Err(err) if is_busy(&err) => match delays.next() {
                    Some(delay) => thread::sleep(delay),
                    None => return Err(err.into()),
                },
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::DatabaseBusy
    )
}

impl Connection for SqliteConnection {
    fn commit(&self) -> Result<(), SqlDaoError> {
        self.lock().end_transaction("COMMIT")
    }

    fn rollback(&self) -> Result<(), SqlDaoError> {
        self.lock().rollback_with_busy_retries()
    }

    fn close(&self) -> Result<(), SqlDaoError> {
        let mut state = self.lock();
        if state.conn.is_none() {
            return Ok(());
        }
        if let Err(err) = state.rollback_with_busy_retries() {
            debug!(error = %err, "rollback before close failed");
        }
        state.in_transaction = false;
        match state.conn.take() {
            Some(conn) => conn.close().map_err(|(_, err)| SqlDaoError::SqliteError(err)),
            None => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.lock().conn.is_none()
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<(), SqlDaoError> {
        let mut state = self.lock();
        state.open()?;
        if auto_commit && !state.auto_commit {
            state.end_transaction("COMMIT")?;
        }
        state.auto_commit = auto_commit;
        Ok(())
    }

    fn auto_commit(&self) -> Result<bool, SqlDaoError> {
        let state = self.lock();
        state.open()?;
        Ok(state.auto_commit)
    }

    fn set_isolation_level(&self, level: IsolationLevel) -> Result<(), SqlDaoError> {
        let mut state = self.lock();
        let pragma = if level == IsolationLevel::ReadUncommitted {
            "PRAGMA read_uncommitted = 1;"
        } else {
            "PRAGMA read_uncommitted = 0;"
        };
        state.open()?.execute_batch(pragma)?;
        state.isolation = level;
        Ok(())
    }

    fn isolation_level(&self) -> Result<IsolationLevel, SqlDaoError> {
        let state = self.lock();
        state.open()?;
        Ok(state.isolation)
    }

    fn execute(&self, statement: &Statement) -> Result<usize, SqlDaoError> {
        let params = Params::convert(&statement.params);
        self.with_statement_conn(|conn| {
            let mut stmt = conn.prepare(&statement.sql)?;
            Ok(stmt.execute(rusqlite::params_from_iter(params.as_values().iter()))?)
        })
    }

    fn query(&self, statement: &Statement) -> Result<ResultSet, SqlDaoError> {
        let params = Params::convert(&statement.params);
        self.with_statement_conn(|conn| {
            let mut stmt = conn.prepare(&statement.sql)?;
            build_result_set(&mut stmt, params.as_values())
        })
    }

    fn execute_batch(&self, sql: &str) -> Result<(), SqlDaoError> {
        self.with_statement_conn(|conn| Ok(conn.execute_batch(sql)?))
    }

    fn last_insert_id(&self) -> Option<i64> {
        self.lock().conn.as_ref().map(rusqlite::Connection::last_insert_rowid)
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_lock() {
            Ok(state) => f
                .debug_struct("SqliteConnection")
                .field("open", &state.conn.is_some())
                .field("auto_commit", &state.auto_commit)
                .field("isolation", &state.isolation)
                .field("in_transaction", &state.in_transaction)
                .finish(),
            Err(_) => f.debug_struct("SqliteConnection").finish_non_exhaustive(),
        }
    }
}
