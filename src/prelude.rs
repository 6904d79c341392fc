//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types so a single
//! `use sql_dao::prelude::*;` is enough to get started.

pub use crate::connection::{
    Connection, ConnectionHandle, DataSource, DataSourceHandle, DataSourceKey,
};
pub use crate::dao::Dao;
pub use crate::error::{AggregateError, SqlDaoError};
pub use crate::executor::UnitOfWork;
pub use crate::handler::{
    AmbientConnectionHandler, ConnectionHandler, DelegatedConnectionHandler,
    ExternalTransactionManager,
};
pub use crate::query::Statement;
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::tracked::{TrackedConnection, TrackedDataSource};
pub use crate::transaction::{Transaction, TransactionScope, Transactions};
pub use crate::types::{IsolationLevel, RowValues};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteConnection, SqliteDataSource, SqliteOptions, SqliteOptionsBuilder};
