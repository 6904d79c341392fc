// SQLite module - file-backed datasource for the transaction manager
//
// - config: options, builder and the datasource
// - connection: rusqlite connection with auto-commit/isolation emulation
// - params: parameter conversion between RowValues and SQLite values
// - query: result extraction and building

pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use config::{SqliteDataSource, SqliteOptions, SqliteOptionsBuilder};
pub use connection::SqliteConnection;
pub use params::Params;
pub use query::build_result_set;
