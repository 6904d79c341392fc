use std::cell::RefCell;

use tracing::{trace, warn};

use super::state::Transaction;
use super::scope::TransactionScope;
use crate::connection::{ConnectionHandle, DataSourceHandle};
use crate::error::SqlDaoError;
use crate::types::IsolationLevel;

thread_local! {
    static CURRENT: RefCell<Option<Transaction>> = const { RefCell::new(None) };
}

/// Entry points for the ambient transaction of the current thread.
///
/// Every thread has its own slot. The first `begin` on a thread creates the
/// [`Transaction`]; nested `begin` calls reuse it (and its isolation level).
/// The slot is cleared by the `close` that finds no block open anymore.
///
/// ```rust
/// use sql_dao::prelude::*;
///
/// let answer = Transactions::run(|| {
///     // statements issued through a `Dao` or `UnitOfWork` here share one
///     // connection per datasource and commit together
///     Ok(42)
/// })?;
/// assert_eq!(answer, 42);
/// assert!(!Transactions::is_active());
/// # Ok::<(), SqlDaoError>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Transactions;

impl Transactions {
    /// Open a transaction block, creating the thread's transaction if needed.
    ///
    /// # Errors
    /// Returns `SqlDaoError::Other` if the transaction slot is already borrowed
    /// further up the stack.
    pub fn begin(level: IsolationLevel) -> Result<(), SqlDaoError> {
        with_slot(|slot| {
            slot.get_or_insert_with(|| {
                trace!(%level, "initializing transaction");
                Transaction::new(level)
            })
            .begin();
        })
    }

    /// Commit the innermost block. No-op without a transaction.
    ///
    /// # Errors
    /// See [`Transaction::commit`].
    pub fn commit() -> Result<(), SqlDaoError> {
        with_slot(|slot| slot.as_mut().map_or(Ok(()), Transaction::commit))?
    }

    /// Roll back the innermost block. No-op without a transaction.
    ///
    /// # Errors
    /// See [`Transaction::rollback`].
    pub fn rollback() -> Result<(), SqlDaoError> {
        with_slot(|slot| slot.as_mut().map_or(Ok(()), Transaction::rollback))?
    }

    /// Close the transaction's resources once no block is open, then clear the slot.
    ///
    /// No-op without a transaction. Never fails.
    pub fn close() {
        let outcome = with_slot(|slot| {
            if let Some(tx) = slot.as_mut() {
                tx.close();
                if tx.should_close() {
                    trace!("clearing transaction");
                    *slot = None;
                }
            }
        });
        if let Err(err) = outcome {
            warn!(error = %err, "could not close transaction");
        }
    }

    /// Whether this thread currently has a transaction.
    #[must_use]
    pub fn is_active() -> bool {
        CURRENT.with(|cell| cell.try_borrow().map_or(true, |slot| slot.is_some()))
    }

    /// Inspect the current transaction, if any.
    pub fn with_current<R>(f: impl FnOnce(&Transaction) -> R) -> Option<R> {
        CURRENT.with(|cell| {
            let slot = cell.try_borrow().ok()?;
            slot.as_ref().map(f)
        })
    }

    /// Connection for `datasource` from the current transaction, or `None` when
    /// there is no transaction on this thread.
    pub(crate) fn connection(
        datasource: &DataSourceHandle,
    ) -> Option<Result<ConnectionHandle, SqlDaoError>> {
        match with_slot(|slot| slot.as_mut().map(|tx| tx.connection(datasource))) {
            Ok(found) => found,
            Err(err) => Some(Err(err)),
        }
    }

    /// RAII alternative to `begin`/`commit`/`rollback`/`close`.
    ///
    /// # Errors
    /// Same as [`Transactions::begin`].
    pub fn scope(level: IsolationLevel) -> Result<TransactionScope, SqlDaoError> {
        TransactionScope::begin(level)
    }

    /// [`Transactions::run_in_transaction`] at the default isolation level.
    ///
    /// # Errors
    /// See [`Transactions::run_in_transaction`].
    pub fn run<T>(op: impl FnOnce() -> Result<T, SqlDaoError>) -> Result<T, SqlDaoError> {
        Self::run_in_transaction(IsolationLevel::default(), op)
    }

    /// Run `op` inside a transaction block.
    ///
    /// Commits when `op` succeeds; rolls back and returns the operation's error
    /// when it fails. The block is closed on every path, including a panic
    /// unwinding out of `op`.
    ///
    /// # Errors
    /// Returns the error of `op`, or the error of the commit.
    pub fn run_in_transaction<T>(
        level: IsolationLevel,
        op: impl FnOnce() -> Result<T, SqlDaoError>,
    ) -> Result<T, SqlDaoError> {
        let scope = Self::scope(level)?;
        match op() {
            Ok(value) => scope.commit().map(|()| value),
            Err(err) => {
                if let Err(rollback_err) = scope.rollback() {
                    warn!(error = %rollback_err, "rollback after failed operation also failed");
                }
                Err(err)
            }
        }
    }

    /// Run several operations, in order, as one transaction block.
    ///
    /// Stops at the first failing operation.
    ///
    /// # Errors
    /// See [`Transactions::run_in_transaction`].
    pub fn run_in_transaction_all<I, F>(level: IsolationLevel, ops: I) -> Result<(), SqlDaoError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Result<(), SqlDaoError>,
    {
        Self::run_in_transaction(level, || ops.into_iter().try_for_each(|op| op()))
    }
}

fn with_slot<R>(f: impl FnOnce(&mut Option<Transaction>) -> R) -> Result<R, SqlDaoError> {
    CURRENT.with(|cell| {
        let mut slot = cell.try_borrow_mut().map_err(|_| {
            SqlDaoError::Other("transaction context is already in use on this thread".into())
        })?;
        Ok(f(&mut slot))
    })
}
