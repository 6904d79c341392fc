//! Synchronous data-access layer with nested, reference-counted transactions.
//!
//! A [`Transaction`] lives in a per-thread slot. Nested `begin`s share it;
//! only the outermost `commit` reaches the database, and any inner
//! `rollback` forces the whole transaction to end in rollback. The first
//! time a datasource is used inside a transaction one connection is borrowed
//! for it, switched to manual commit at the transaction's isolation level,
//! and reused by every later operation on that datasource.
//!
//! Operations run through a [`UnitOfWork`] (or the [`Dao`] helpers on top of
//! it), whose [`ConnectionHandler`] decides where connections come from.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sql_dao::prelude::*;
//!
//! # fn main() -> Result<(), SqlDaoError> {
//! let dao = Dao::new(Arc::new(SqliteDataSource::builder("app.db").build()?));
//!
//! Transactions::run_in_transaction(IsolationLevel::Serializable, || {
//!     dao.execute(&Statement::new_without_params("UPDATE a SET n = n - 1"))?;
//!     Transactions::run(|| dao.execute(&Statement::new_without_params("UPDATE b SET n = n + 1")))
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod dao;
pub mod error;
pub mod executor;
pub mod handler;
pub mod prelude;
pub mod query;
pub mod results;
pub mod tracked;
pub mod transaction;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use connection::{Connection, ConnectionHandle, DataSource, DataSourceHandle, DataSourceKey};
pub use dao::Dao;
pub use error::{AggregateError, SqlDaoError};
pub use executor::UnitOfWork;
pub use handler::{
    AmbientConnectionHandler, ConnectionHandler, DelegatedConnectionHandler,
    ExternalTransactionManager,
};
pub use query::Statement;
pub use results::{CustomDbRow, ResultSet};
pub use tracked::{TrackedConnection, TrackedDataSource};
pub use transaction::{Transaction, TransactionScope, Transactions};
pub use types::{IsolationLevel, RowValues};
