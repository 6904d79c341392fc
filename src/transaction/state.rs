use tracing::{debug, trace, warn};

use super::resource::Resource;
use crate::connection::{ConnectionHandle, DataSourceHandle, DataSourceKey};
use crate::error::{AggregateError, SqlDaoError};
use crate::types::IsolationLevel;

/// Nested transaction over every datasource touched while it is open.
///
/// `retain` counts the `begin` calls whose block has not finished yet. Each
/// `begin` also pushes the pre-increment value onto `begin_points`, which
/// `rollback` pops to restore the count the failing block started from. Only
/// when the count reaches zero are the resources actually committed or rolled
/// back.
///
/// A rollback that leaves outer blocks open marks the transaction
/// rollback-only: the outermost commit then rolls everything back and reports
/// [`SqlDaoError::UnexpectedRollback`].
///
/// Not synchronized; it lives in a per-thread slot (see
/// [`Transactions`](super::Transactions)).
#[derive(Debug)]
pub struct Transaction {
    level: IsolationLevel,
    retain: usize,
    begin_points: Vec<usize>,
    resources: Vec<Resource>,
    rollback_only: bool,
}

impl Transaction {
    #[must_use]
    pub fn new(level: IsolationLevel) -> Self {
        Self {
            level,
            retain: 0,
            begin_points: Vec::new(),
            resources: Vec::new(),
            rollback_only: false,
        }
    }

    pub fn begin(&mut self) {
        trace!(depth = self.retain + 1, "starting transaction block");
        self.begin_points.push(self.retain);
        self.retain += 1;
    }

    /// Connection for `datasource`, acquired and configured on first use.
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConnectionAcquisition` if the provider cannot supply
    /// a connection or the new connection cannot be switched to manual commit.
    pub fn connection(
        &mut self,
        datasource: &DataSourceHandle,
    ) -> Result<ConnectionHandle, SqlDaoError> {
        let key = DataSourceKey::of(datasource);
        let existing = self.resources.iter().position(|r| r.key() == key);

        if let Some(idx) = existing
            && !self.resources[idx].connection().is_closed()
        {
            debug!("reusing connection from transaction resource");
            return Ok(self.resources[idx].connection().clone());
        }

        debug!(level = %self.level, "creating transaction resource");
        let resource = Resource::acquire(datasource, self.level)?;
        let connection = resource.connection().clone();
        match existing {
            Some(idx) => self.resources[idx] = resource,
            None => self.resources.push(resource),
        }
        Ok(connection)
    }

    /// Finish the innermost open block successfully.
    ///
    /// # Errors
    /// Returns `SqlDaoError::Aggregate` if any resource failed to commit, or
    /// `SqlDaoError::UnexpectedRollback` if an inner block had rolled back.
    pub fn commit(&mut self) -> Result<(), SqlDaoError> {
        if self.retain == 0 {
            warn!("commit called with no open transaction block");
            return Ok(());
        }
        self.retain -= 1;
        if self.retain > 0 {
            trace!(depth = self.retain, "deferring commit to outer block");
            return Ok(());
        }

        if std::mem::take(&mut self.rollback_only) {
            debug!("outermost commit on a rollback-only transaction; rolling back");
            self.sweep(Resource::rollback)?;
            return Err(SqlDaoError::UnexpectedRollback);
        }
        debug!(resources = self.resources.len(), "committing transaction");
        self.sweep(Resource::commit)
    }

    /// Abandon the innermost open block.
    ///
    /// The count goes back to what it was before that block began. A begin
    /// point left behind by an inner block that already committed is higher
    /// than that, so the restored count is capped at one below the current one.
    ///
    /// # Errors
    /// Returns `SqlDaoError::Aggregate` if any resource failed to roll back.
    pub fn rollback(&mut self) -> Result<(), SqlDaoError> {
        if self.retain == 0 {
            warn!("rollback called with no open transaction block");
            return Ok(());
        }
        let popped = self.begin_points.pop().unwrap_or(0);
        self.retain = popped.min(self.retain - 1);
        if self.retain > 0 {
            trace!(depth = self.retain, "marking transaction rollback-only");
            self.rollback_only = true;
            return Ok(());
        }

        self.rollback_only = false;
        debug!(resources = self.resources.len(), "rolling back transaction");
        self.sweep(Resource::rollback)
    }

    /// Close every resource once no block is open. Failures are logged, never returned.
    pub fn close(&mut self) {
        if self.retain > 0 {
            return;
        }
        for resource in self.resources.drain(..) {
            if let Err(err) = resource.close() {
                debug!(error = %err, "ignoring failure while closing transaction resource");
            }
        }
    }

    #[must_use]
    pub fn should_close(&self) -> bool {
        self.retain == 0
    }

    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.level
    }

    #[must_use]
    pub fn retain(&self) -> usize {
        self.retain
    }

    /// Number of begin points on the stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.begin_points.len()
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Apply `action` to every resource in insertion order, collecting failures.
    fn sweep(
        &self,
        action: impl Fn(&Resource) -> Result<(), SqlDaoError>,
    ) -> Result<(), SqlDaoError> {
        let mut failures = AggregateError::new();
        for resource in &self.resources {
            if let Err(err) = action(resource) {
                warn!(error = %err, "transaction resource failed");
                failures.push(err);
            }
        }
        failures.into_result()
    }
}
