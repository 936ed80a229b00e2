//! Configuration for [`crate::sqlite::DatabaseManager`].

use crate::schema::{Schema, DEFAULT_COLUMN_TYPE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "data/database.db";

/// SQLite manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub db_path: PathBuf,
    /// Create missing parent directories of `db_path` on connect
    pub create_missing_dirs: bool,
    /// How long a statement waits on a locked database, in milliseconds
    pub busy_timeout_ms: u64,
    /// Enforce foreign key constraints
    pub foreign_keys: bool,
    /// Type used for columns whose declared type is unusable
    pub default_column_type: String,
    /// Tables created when the manager opens
    pub schema: Schema,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            create_missing_dirs: true,
            busy_timeout_ms: 5_000,
            foreign_keys: true,
            default_column_type: DEFAULT_COLUMN_TYPE.to_string(),
            schema: Schema::default(),
        }
    }
}

impl SqliteConfig {
    /// Create a new SQLite config with path and schema
    pub fn new(db_path: impl Into<PathBuf>, schema: Schema) -> Self {
        Self {
            db_path: db_path.into(),
            schema,
            ..Self::default()
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn with_create_missing_dirs(mut self, enabled: bool) -> Self {
        self.create_missing_dirs = enabled;
        self
    }

    pub fn with_default_column_type(mut self, data_type: impl Into<String>) -> Self {
        self.default_column_type = data_type.into();
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Whether `db_path` names an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.db_path.as_os_str() == ":memory:"
    }
}
