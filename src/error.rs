//! Error types for schema synthesis and database access.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed input handed to the schema builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The table name normalizes to an empty identifier.
    #[error("invalid table name {raw:?}: no identifier can be derived from it")]
    InvalidTableName { raw: String },
    /// The column map was empty.
    #[error("no columns provided for table \"{table}\"")]
    NoColumnsProvided { table: String },
    /// Every supplied column name failed normalization.
    #[error("no valid columns remain for table \"{table}\"")]
    NoValidColumns { table: String },
    /// Two distinct raw column names normalize to the same identifier.
    #[error("columns {first:?} and {second:?} both normalize to \"{column}\" in table \"{table}\"")]
    DuplicateColumn {
        table: String,
        column: String,
        first: String,
        second: String,
    },
}

/// Failure of [`crate::channel::create_table`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateTableError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// The execution channel reported that the statement did not run.
    #[error("failed to execute schema statement for table \"{table}\"")]
    ExecutionFailed { table: String },
}

/// Errors raised by [`crate::sqlite::DatabaseManager`].
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database is not connected")]
    NotConnected,
    #[error("cannot create database directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("statement expects {expected} positional parameters, got {actual}")]
    ParameterCount { expected: usize, actual: usize },
    #[error("statement has no parameter named {0:?}")]
    UnknownParameter(String),
    #[error("no value bound for statement parameter {0}")]
    MissingParameter(String),
    #[error(transparent)]
    CreateTable(#[from] CreateTableError),
}

impl From<SchemaError> for DatabaseError {
    fn from(err: SchemaError) -> Self {
        DatabaseError::CreateTable(CreateTableError::Schema(err))
    }
}

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;
