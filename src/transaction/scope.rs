use std::marker::PhantomData;

use tracing::warn;

use super::context::Transactions;
use crate::error::SqlDaoError;
use crate::types::IsolationLevel;

/// One transaction block on the current thread.
///
/// Finish it with [`commit`](Self::commit) or [`rollback`](Self::rollback);
/// dropping it unfinished (early return, `?`, panic) rolls the block back.
/// Every path closes the block. Not `Send`: the block belongs to the thread
/// that opened it.
#[must_use = "dropping a TransactionScope immediately rolls the block back"]
#[derive(Debug)]
pub struct TransactionScope {
    finished: bool,
    _not_send: PhantomData<*const ()>,
}

impl TransactionScope {
    pub(crate) fn begin(level: IsolationLevel) -> Result<Self, SqlDaoError> {
        Transactions::begin(level)?;
        Ok(Self {
            finished: false,
            _not_send: PhantomData,
        })
    }

    /// Commit and close the block.
    ///
    /// # Errors
    /// See [`Transactions::commit`].
    pub fn commit(mut self) -> Result<(), SqlDaoError> {
        self.finished = true;
        let result = Transactions::commit();
        Transactions::close();
        result
    }

    /// Roll back and close the block.
    ///
    /// # Errors
    /// See [`Transactions::rollback`].
    pub fn rollback(mut self) -> Result<(), SqlDaoError> {
        self.finished = true;
        let result = Transactions::rollback();
        Transactions::close();
        result
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = Transactions::rollback() {
            warn!(error = %err, "rollback of abandoned transaction block failed");
        }
        Transactions::close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connection::DataSourceHandle;
    use crate::test_utils::RecordingDataSource;

    #[test]
    fn dropping_an_unfinished_scope_rolls_back() {
        let recording = Arc::new(RecordingDataSource::new("ds"));
        let ds: DataSourceHandle = recording.clone();

        {
            let _scope = Transactions::scope(IsolationLevel::default()).unwrap();
            Transactions::connection(&ds).unwrap().unwrap();
        }

        assert_eq!(recording.rollbacks(), 1);
        assert_eq!(recording.commits(), 0);
        assert!(!Transactions::is_active());
    }

    #[test]
    fn committed_scope_does_not_roll_back_on_drop() {
        let recording = Arc::new(RecordingDataSource::new("ds"));
        let ds: DataSourceHandle = recording.clone();

        let scope = Transactions::scope(IsolationLevel::default()).unwrap();
        Transactions::connection(&ds).unwrap().unwrap();
        scope.commit().unwrap();

        assert_eq!(recording.commits(), 1);
        assert_eq!(recording.rollbacks(), 0);
        assert_eq!(recording.closes(), 1);
    }
}
