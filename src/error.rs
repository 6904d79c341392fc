use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlDaoError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    /// The connection provider could not hand out a connection.
    #[error("Connection acquisition error: {0}")]
    ConnectionAcquisition(#[source] Box<SqlDaoError>),

    /// A single resource failed to commit.
    #[error("Commit error: {0}")]
    Commit(#[source] Box<SqlDaoError>),

    /// A single resource failed to roll back.
    #[error("Rollback error: {0}")]
    Rollback(#[source] Box<SqlDaoError>),

    /// One or more resources failed during a commit or rollback sweep.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Releasing a connection outside of a transaction failed.
    #[error("Release error: {0}")]
    Release(#[source] Box<SqlDaoError>),

    /// The outermost block committed, but an inner block had already rolled back.
    #[error("Transaction rolled back because an inner block requested rollback")]
    UnexpectedRollback,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlDaoError {
    pub(crate) fn acquisition(err: SqlDaoError) -> Self {
        match err {
            already @ SqlDaoError::ConnectionAcquisition(_) => already,
            other => SqlDaoError::ConnectionAcquisition(Box::new(other)),
        }
    }

    /// Returns every underlying error when this is an aggregate, or just `self` otherwise.
    #[must_use]
    pub fn causes(&self) -> Vec<&SqlDaoError> {
        match self {
            SqlDaoError::Aggregate(agg) => agg.errors().iter().collect(),
            other => vec![other],
        }
    }
}

/// Failures collected while sweeping every resource of a transaction.
///
/// Entries keep the order in which the resources were visited; the first one is
/// the primary cause.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<SqlDaoError>,
}

impl AggregateError {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: SqlDaoError) {
        self.errors.push(err);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn primary(&self) -> Option<&SqlDaoError> {
        self.errors.first()
    }

    #[must_use]
    pub fn errors(&self) -> &[SqlDaoError] {
        &self.errors
    }

    #[must_use]
    pub fn into_errors(self) -> Vec<SqlDaoError> {
        self.errors
    }

    /// `Ok(())` when nothing was collected, otherwise the aggregate as an error.
    ///
    /// # Errors
    /// Returns `SqlDaoError::Aggregate` if at least one failure was pushed.
    pub fn into_result(self) -> Result<(), SqlDaoError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(SqlDaoError::Aggregate(self))
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.primary() {
            Some(primary) => write!(
                f,
                "{} resource(s) failed; first failure: {primary}",
                self.errors.len()
            ),
            None => write!(f, "no resource failures"),
        }
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.primary().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_aggregate_is_ok() {
        assert!(AggregateError::new().into_result().is_ok());
    }

    #[test]
    fn aggregate_keeps_every_entry_and_exposes_first_as_primary() {
        let mut agg = AggregateError::new();
        agg.push(SqlDaoError::Commit(Box::new(SqlDaoError::Other("a".into()))));
        agg.push(SqlDaoError::Commit(Box::new(SqlDaoError::Other("b".into()))));

        let err = agg.into_result().unwrap_err();
        assert_eq!(err.causes().len(), 2);
        let SqlDaoError::Aggregate(agg) = &err else {
            panic!("expected aggregate, got {err:?}");
        };
        assert_eq!(agg.len(), 2);
        assert!(agg.primary().unwrap().to_string().ends_with("error: a"));
        assert!(err.to_string().starts_with("2 resource(s) failed"));
        assert!(std::error::Error::source(agg).is_some());
    }

    #[test]
    fn acquisition_does_not_double_wrap() {
        let once = SqlDaoError::acquisition(SqlDaoError::Other("boom".into()));
        let twice = SqlDaoError::acquisition(once);
        let SqlDaoError::ConnectionAcquisition(inner) = twice else {
            panic!("expected acquisition error");
        };
        assert!(matches!(*inner, SqlDaoError::Other(_)));
    }
}
