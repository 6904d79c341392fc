use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::connection::SqliteConnection;
use crate::connection::{ConnectionHandle, DataSource};
use crate::error::SqlDaoError;

/// Options for opening `SQLite` connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteOptions {
    #[serde(alias = "url", alias = "jdbcUrl", alias = "path")]
    pub db_path: String,
    #[serde(default, alias = "busyTimeoutMs")]
    pub busy_timeout_ms: Option<u64>,
    #[serde(default)]
    pub wal: bool,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout_ms: None,
            wal: false,
        }
    }

    #[must_use]
    pub fn with_busy_timeout_ms(mut self, millis: u64) -> Self {
        self.busy_timeout_ms = Some(millis);
        self
    }

    #[must_use]
    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    /// Parse options from a JSON object such as `{"url": "jdbc:sqlite:/tmp/app.db"}`.
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConfigError` if the JSON is malformed or has no path.
    pub fn from_json(json: &str) -> Result<Self, SqlDaoError> {
        serde_json::from_str(json)
            .map_err(|e| SqlDaoError::ConfigError(format!("invalid SQLite options: {e}")))
    }

    /// Build options from a property map, e.g. one read from a settings file.
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConfigError` if a required key is missing or mistyped.
    pub fn from_properties(
        properties: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, SqlDaoError> {
        let object = serde_json::Value::Object(properties.into_iter().collect());
        serde_json::from_value(object)
            .map_err(|e| SqlDaoError::ConfigError(format!("invalid SQLite options: {e}")))
    }

    /// Filesystem path with any `jdbc:sqlite:` / `sqlite:` URL prefix removed.
    #[must_use]
    pub fn file_path(&self) -> &str {
        let path = self.db_path.trim();
        let path = path.strip_prefix("jdbc:").unwrap_or(path);
        path.strip_prefix("sqlite:").unwrap_or(path)
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn busy_timeout_ms(mut self, millis: u64) -> Self {
        self.opts.busy_timeout_ms = Some(millis);
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build a `SqliteDataSource` from these options.
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConfigError` if the path is empty.
    pub fn build(self) -> Result<SqliteDataSource, SqlDaoError> {
        SqliteDataSource::new(self.finish())
    }
}

/// Datasource that opens a new `SQLite` connection on every request.
#[derive(Debug, Clone)]
pub struct SqliteDataSource {
    opts: SqliteOptions,
}

impl SqliteDataSource {
    /// # Errors
    /// Returns `SqlDaoError::ConfigError` if the path is empty.
    pub fn new(opts: SqliteOptions) -> Result<Self, SqlDaoError> {
        if opts.file_path().is_empty() {
            return Err(SqlDaoError::ConfigError(
                "SQLite db_path must not be empty".into(),
            ));
        }
        Ok(Self { opts })
    }

    #[must_use]
    pub fn builder(db_path: impl Into<String>) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(db_path)
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.opts
    }

    /// Open a connection with the configured pragmas applied.
    ///
    /// # Errors
    /// Returns `SqlDaoError::SqliteError` if the file cannot be opened or configured.
    pub fn open(&self) -> Result<SqliteConnection, SqlDaoError> {
        let path = self.opts.file_path();
        debug!(path, "opening SQLite connection");
        let conn = rusqlite::Connection::open(path)?;
        if let Some(millis) = self.opts.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(millis))?;
        }
        if self.opts.wal {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        Ok(SqliteConnection::new(conn))
    }
}

impl DataSource for SqliteDataSource {
    fn connection(&self) -> Result<ConnectionHandle, SqlDaoError> {
        Ok(Arc::new(self.open()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_aliases_and_prefixes_are_accepted() {
        let opts =
            SqliteOptions::from_json(r#"{"jdbcUrl": "jdbc:sqlite:/tmp/app.db", "wal": true}"#)
                .unwrap();
        assert_eq!(opts.file_path(), "/tmp/app.db");
        assert!(opts.wal);
        assert_eq!(opts.busy_timeout_ms, None);

        let opts = SqliteOptions::from_json(r#"{"url": "sqlite:data.db"}"#).unwrap();
        assert_eq!(opts.file_path(), "data.db");
    }

    #[test]
    fn properties_map_is_deserialized() {
        let mut props = BTreeMap::new();
        props.insert("path".to_string(), serde_json::json!("/tmp/x.db"));
        props.insert("busy_timeout_ms".to_string(), serde_json::json!(250));
        let opts = SqliteOptions::from_properties(props).unwrap();
        assert_eq!(opts, SqliteOptions::new("/tmp/x.db").with_busy_timeout_ms(250));
    }

    #[test]
    fn missing_or_empty_path_is_a_config_error() {
        assert!(matches!(
            SqliteOptions::from_json(r#"{"wal": true}"#),
            Err(SqlDaoError::ConfigError(_))
        ));
        assert!(matches!(
            SqliteDataSource::builder("jdbc:sqlite:").build(),
            Err(SqlDaoError::ConfigError(_))
        ));
    }

    #[test]
    fn builder_matches_fluent_options() {
        let built = SqliteOptionsBuilder::new("a.db")
            .wal(true)
            .busy_timeout_ms(100)
            .finish();
        assert_eq!(built, SqliteOptions::new("a.db").with_wal(true).with_busy_timeout_ms(100));
    }
}
