use crate::channel::{create_table, ExecutionChannel};
use crate::config::SqliteConfig;
use crate::error::{DatabaseError, Result};
use crate::schema::{
    ColumnSpec, Schema, SchemaBuilder, SchemaObserver, TableDefinition, TracingObserver,
};
use indexmap::IndexMap;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, Statement};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Stored as integer 0 or 1; reads come back as [`Value::Integer`].
    Boolean(bool),
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Boolean(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Parameter bindings for SQL statements
///
/// Positional values bind to `?`/`?N` in order. Named values bind to
/// `:name`, `@name` or `$name`; a bare name is looked up as `:name`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub positional: Vec<Value>,
    pub named: IndexMap<String, Value>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional parameters from any sequence of values
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            positional: values.into_iter().map(Into::into).collect(),
            named: IndexMap::new(),
        }
    }

    /// Append a positional value
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Add a named value
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.named.insert(name.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    fn bind(&self, stmt: &mut Statement<'_>) -> Result<()> {
        let expected = stmt.parameter_count();
        let actual = self.positional.len();
        if (self.named.is_empty() && actual != expected) || actual > expected {
            return Err(DatabaseError::ParameterCount { expected, actual });
        }

        let mut bound = vec![false; expected];
        for (i, value) in self.positional.iter().enumerate() {
            stmt.raw_bind_parameter(i + 1, value)?;
            bound[i] = true;
        }
        for (name, value) in &self.named {
            let index = if name.starts_with([':', '@', '$']) {
                stmt.parameter_index(name)?
            } else {
                stmt.parameter_index(&format!(":{name}"))?
            };
            let index = index.ok_or_else(|| DatabaseError::UnknownParameter(name.clone()))?;
            stmt.raw_bind_parameter(index, value)?;
            bound[index - 1] = true;
        }

        // unbound placeholders would otherwise be written as NULL
        if let Some(missing) = bound.iter().position(|b| !b) {
            let index = missing + 1;
            let name = stmt
                .parameter_name(index)
                .map_or_else(|| format!("?{index}"), str::to_string);
            return Err(DatabaseError::MissingParameter(name));
        }
        Ok(())
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::positional(values)
    }
}

/// A result row, keyed by column name in select order.
pub type Row = IndexMap<String, Value>;

/// Owns one SQLite connection for its lifetime.
///
/// The connection is released on [`DatabaseManager::close`] or on drop,
/// whichever comes first; a pending transaction is committed, or rolled back
/// if the commit fails.
pub struct DatabaseManager {
    config: SqliteConfig,
    path: PathBuf,
    builder: SchemaBuilder,
    connection: Option<Connection>,
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("path", &self.path)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl DatabaseManager {
    /// Create a manager for `config.db_path` without connecting.
    ///
    /// Relative paths are resolved against the current directory.
    pub fn new(config: SqliteConfig) -> Self {
        let path = resolve_path(&config);
        let builder = SchemaBuilder::new().with_default_type(&config.default_column_type);
        tracing::info!(path = %path.display(), "database manager initialized");
        Self {
            config,
            path,
            builder,
            connection: None,
        }
    }

    /// Create a manager, connect, and create every table of the configured schema.
    pub fn open(config: SqliteConfig) -> Result<Self> {
        Self::open_with_observer(config, Arc::new(TracingObserver))
    }

    /// Like [`Self::open`], with builder events for the configured schema
    /// (and every later table) routed to `observer`.
    pub fn open_with_observer(
        config: SqliteConfig,
        observer: Arc<dyn SchemaObserver>,
    ) -> Result<Self> {
        let mut manager = Self::new(config).with_observer(observer);
        manager.connect()?;
        let schema = manager.config.schema.clone();
        manager.initialize_schema(&schema)?;
        Ok(manager)
    }

    /// Open an in-memory database with default settings.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(SqliteConfig::new(":memory:", Schema::new()))
    }

    /// Route schema builder events to `observer` instead of `tracing`.
    pub fn with_observer(mut self, observer: Arc<dyn SchemaObserver>) -> Self {
        self.builder = self.builder.clone().with_observer(observer);
        self
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Resolved location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Whether a transaction is open and not yet committed.
    pub fn in_transaction(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|conn| !conn.is_autocommit())
    }

    /// Open the connection. Does nothing when already connected.
    pub fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        let conn = self.open_connection().inspect_err(|err| {
            tracing::error!(path = %self.path.display(), error = %err, "database connection error");
        })?;
        tracing::info!(
            path = %self.path.display(),
            sqlite_version = rusqlite::version(),
            "connected to database"
        );
        self.connection = Some(conn);
        Ok(())
    }

    fn open_connection(&self) -> Result<Connection> {
        let conn = if self.config.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            if self.config.create_missing_dirs {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).map_err(|source| {
                        DatabaseError::CreateDirectory {
                            path: parent.to_path_buf(),
                            source,
                        }
                    })?;
                }
            }
            Connection::open(&self.path).map_err(|source| DatabaseError::Open {
                path: self.path.clone(),
                source,
            })?
        };
        conn.busy_timeout(self.config.busy_timeout())?;
        conn.pragma_update(None, "foreign_keys", self.config.foreign_keys)?;
        Ok(conn)
    }

    /// Commit any pending transaction and release the connection.
    ///
    /// A failed final commit is rolled back and reported; the manager is
    /// disconnected afterwards either way.
    pub fn close(&mut self) -> Result<()> {
        let Some(conn) = self.connection.take() else {
            tracing::debug!(path = %self.path.display(), "close called without an open connection");
            return Ok(());
        };

        let mut outcome = Ok(());
        if !conn.is_autocommit() {
            tracing::info!("committing pending transaction before close");
            if let Err(err) = conn.execute_batch("COMMIT") {
                tracing::warn!(error = %err, "final commit failed, rolling back");
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    tracing::error!(error = %rollback_err, "rollback during close failed");
                }
                outcome = Err(err.into());
            }
        }

        match conn.close() {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "database connection closed");
                outcome
            }
            Err((_, err)) => {
                tracing::error!(path = %self.path.display(), error = %err, "error closing database connection");
                outcome.and(Err(err.into()))
            }
        }
    }

    /// Run one statement and return the number of changed rows.
    ///
    /// With `commit` set, any pending transaction is committed after the
    /// statement. Without it, an `INSERT`, `UPDATE`, `DELETE` or `REPLACE`
    /// run outside a transaction opens one, so the change stays pending until
    /// [`Self::commit`], a committing `execute`, or [`Self::close`]. Other
    /// statements (DDL, `PRAGMA`, `VACUUM`) run in autocommit mode. Rows
    /// produced by the statement are stepped through and discarded; use
    /// [`Self::query`] to read them. On failure any pending transaction is
    /// rolled back and the original error is returned.
    pub fn execute(&self, sql: &str, params: &Params, commit: bool) -> Result<usize> {
        let conn = self.conn()?;
        tracing::debug!(sql = %sql, commit, "executing statement");
        execute_statement(conn, sql, params, commit).map_err(|err| recover(conn, sql, params, err))
    }

    /// Run a query and collect every row.
    pub fn query(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        let conn = self.conn()?;
        tracing::debug!(sql = %sql, "running query");
        query_rows(conn, sql, params).map_err(|err| recover(conn, sql, params, err))
    }

    /// Commit the pending transaction, if any.
    pub fn commit(&self) -> Result<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// Roll back the pending transaction, if any.
    pub fn rollback(&self) -> Result<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
            tracing::info!("transaction rolled back");
        }
        Ok(())
    }

    /// Create `table` from `columns` unless it already exists.
    ///
    /// Names are sanitized and an `id` primary key is added when no column
    /// normalizes to `id`. An existing table keeps its structure even if
    /// `columns` differ.
    pub fn create_dynamic_table(
        &mut self,
        table: &str,
        columns: &ColumnSpec,
    ) -> Result<TableDefinition> {
        tracing::info!(table = ?table, "create_dynamic_table called");
        let builder = self.builder.clone();
        Ok(create_table(self, &builder, table, columns)?)
    }

    /// Create every table of `schema`, in order, stopping at the first failure.
    pub fn initialize_schema(&mut self, schema: &Schema) -> Result<Vec<TableDefinition>> {
        schema
            .tables()
            .map(|(table, columns)| self.create_dynamic_table(table, columns))
            .collect()
    }

    fn conn(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or_else(|| {
            tracing::error!(path = %self.path.display(), "database is not connected");
            DatabaseError::NotConnected
        })
    }
}

/// Runs the statement with `commit` set. Statements that return rows (for
/// example `PRAGMA journal_mode = WAL`) count as success once stepped.
impl ExecutionChannel for DatabaseManager {
    fn submit(&mut self, statement: &str) -> bool {
        self.execute(statement, &Params::new(), true).is_ok()
    }
}

impl Drop for DatabaseManager {
    fn drop(&mut self) {
        // close() logs its own failures
        let _ = self.close();
    }
}

fn resolve_path(config: &SqliteConfig) -> PathBuf {
    if config.is_in_memory() || config.db_path.is_absolute() {
        return config.db_path.clone();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(&config.db_path),
        Err(err) => {
            tracing::warn!(error = %err, "cannot resolve current directory, keeping relative path");
            config.db_path.clone()
        }
    }
}

fn execute_statement(conn: &Connection, sql: &str, params: &Params, commit: bool) -> Result<usize> {
    let mut stmt = conn.prepare(sql)?;
    params.bind(&mut stmt)?;
    if !commit && conn.is_autocommit() && is_dml(sql) {
        conn.execute_batch("BEGIN DEFERRED")?;
    }
    let changed = if stmt.column_count() > 0 {
        let mut rows = stmt.raw_query();
        while rows.next()?.is_some() {}
        drop(rows);
        if stmt.readonly() {
            0
        } else {
            usize::try_from(conn.changes()).unwrap_or(usize::MAX)
        }
    } else {
        stmt.raw_execute()?
    };
    if commit && !conn.is_autocommit() {
        conn.execute_batch("COMMIT")?;
    }
    Ok(changed)
}

// Leading keyword check, skipping whitespace and comments.
fn is_dml(sql: &str) -> bool {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            break;
        }
    }
    let keyword: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    ["INSERT", "UPDATE", "DELETE", "REPLACE"]
        .iter()
        .any(|dml| keyword.eq_ignore_ascii_case(dml))
}

fn query_rows(conn: &Connection, sql: &str, params: &Params) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    params.bind(&mut stmt)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.raw_query();
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Row::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            map.insert(name.clone(), Value::from(row.get_ref(i)?));
        }
        result.push(map);
    }
    Ok(result)
}

fn recover(conn: &Connection, sql: &str, params: &Params, err: DatabaseError) -> DatabaseError {
    tracing::error!(error = %err, sql = %sql, params = ?params, "database execution error");
    if !conn.is_autocommit() {
        tracing::warn!("rolling back transaction after database error");
        match conn.execute_batch("ROLLBACK") {
            Ok(()) => tracing::info!("transaction rollback completed"),
            Err(rollback_err) => {
                tracing::error!(error = %rollback_err, "rollback attempt failed");
            }
        }
    }
    err
}
