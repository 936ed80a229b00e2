//! SQLite connection management and dynamic table creation for the Runar ecosystem.
//!
//! # Intention
//!
//! - Own a single SQLite connection with scoped open/close and
//!   rollback-on-error statement execution.
//! - Create tables from caller-supplied column maps, sanitizing every name
//!   and type so user input cannot break out of the generated DDL.
//!
//! # Architectural Boundaries
//!
//! - Only SQLite/database code belongs here.
//! - No pooling, migrations or schema versioning.

pub mod channel;
pub mod config;
pub mod error;
pub mod schema;
pub mod sqlite;

pub use channel::{create_table, ExecutionChannel};
pub use config::SqliteConfig;
pub use error::{CreateTableError, DatabaseError, SchemaError};
pub use schema::{
    build_create_table_statement, normalize_identifier, validate_type_expression, ColumnDefinition,
    ColumnSpec, Identifier, Schema, SchemaBuilder, SchemaObserver, TableDefinition,
};
pub use sqlite::{DatabaseManager, Params, Row, Value};
