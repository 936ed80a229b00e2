//! Identifier sanitization and `CREATE TABLE` synthesis.
//!
//! # Intention
//!
//! - Turn arbitrary user-supplied table and column names into identifiers that
//!   are safe to splice into DDL.
//! - Turn a caller-supplied column map into a single
//!   `CREATE TABLE IF NOT EXISTS` statement.
//!
//! # Architectural Boundaries
//!
//! - Pure: nothing here touches a connection. Statements are handed to an
//!   [`crate::channel::ExecutionChannel`] by the caller.
//! - Re-applying a different column map to an existing table is not
//!   reconciled; `IF NOT EXISTS` keeps whatever structure the table already has.

use crate::error::SchemaError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type used when a column's declared type is empty after sanitization.
pub const DEFAULT_COLUMN_TYPE: &str = "TEXT";

/// Name of the implicit primary key column.
pub const PRIMARY_KEY_COLUMN: &str = "id";

/// Declaration of the implicit primary key column.
pub const PRIMARY_KEY_TYPE: &str = "INTEGER PRIMARY KEY AUTOINCREMENT";

/// A sanitized SQL table or column name.
///
/// Always non-empty and of the form `[a-z_][a-z0-9_]*`. The only way to obtain
/// one is [`Identifier::normalize`], so every value in circulation is safe to
/// double-quote into a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Normalize `raw` into an identifier.
    ///
    /// Every character other than an ASCII letter, ASCII digit or underscore
    /// becomes `_`, a leading digit gets an `_` prefix and the result is
    /// lower-cased. Returns `None` only for the empty string.
    pub fn normalize(raw: &str) -> Option<Self> {
        let mut name: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if name.is_empty() {
            return None;
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            name.insert(0, '_');
        }
        name.make_ascii_lowercase();
        Some(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier wrapped in double quotes.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Raw column name to raw type expression, in insertion order.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnSpec {
    columns: IndexMap<String, String>,
}

impl ColumnSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column. Re-adding a raw name replaces its type in place.
    pub fn with_column(mut self, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        self.insert(name, data_type);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, data_type: impl Into<String>) {
        self.columns.insert(name.into(), data_type.into());
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ColumnSpec {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A sanitized column and its validated type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: Identifier,
    pub data_type: String,
}

impl ColumnDefinition {
    fn primary_key() -> Self {
        Self {
            name: Identifier(PRIMARY_KEY_COLUMN.to_string()),
            data_type: PRIMARY_KEY_TYPE.to_string(),
        }
    }
}

/// Sanitized table ready to be projected into DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: Identifier,
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    /// The `CREATE TABLE IF NOT EXISTS` statement for this table.
    pub fn statement(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name.quoted(), c.data_type))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            self.name.quoted(),
            columns
        )
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

impl fmt::Display for TableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.statement())
    }
}

/// Tables to create, keyed by raw table name, in insertion order.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    tables: IndexMap<String, ColumnSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(mut self, name: impl Into<String>, columns: ColumnSpec) -> Self {
        self.tables.insert(name.into(), columns);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &ColumnSpec)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Receives notable events while tables are being synthesized.
///
/// All methods default to doing nothing.
pub trait SchemaObserver: Send + Sync {
    /// A column was dropped because its name cannot be normalized.
    fn column_skipped(&self, _table: &Identifier, _raw_column: &str) {}

    /// A column's type sanitized to nothing and fell back to the default.
    fn type_defaulted(&self, _table: &Identifier, _column: &Identifier, _raw_type: &str) {}

    /// The implicit `id` primary key was prepended.
    fn primary_key_injected(&self, _table: &Identifier) {}

    /// A definition was produced.
    fn table_built(&self, _definition: &TableDefinition) {}
}

/// Observer that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SchemaObserver for NoopObserver {}

/// Observer that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SchemaObserver for TracingObserver {
    fn column_skipped(&self, table: &Identifier, raw_column: &str) {
        tracing::warn!(table = %table, column = ?raw_column, "skipping invalid column name");
    }

    fn type_defaulted(&self, table: &Identifier, column: &Identifier, raw_type: &str) {
        tracing::warn!(
            table = %table,
            column = %column,
            declared = ?raw_type,
            "column type empty after sanitization, using default"
        );
    }

    fn primary_key_injected(&self, table: &Identifier) {
        tracing::info!(table = %table, "adding implicit id primary key");
    }

    fn table_built(&self, definition: &TableDefinition) {
        tracing::debug!(table = %definition.name, sql = %definition, "built schema statement");
    }
}

/// Synthesizes table definitions from raw names and column maps.
#[derive(Clone)]
pub struct SchemaBuilder {
    default_type: String,
    observer: Arc<dyn SchemaObserver>,
}

impl fmt::Debug for SchemaBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaBuilder")
            .field("default_type", &self.default_type)
            .finish_non_exhaustive()
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self {
            default_type: DEFAULT_COLUMN_TYPE.to_string(),
            observer: Arc::new(TracingObserver),
        }
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `data_type` for columns whose declared type sanitizes to nothing.
    ///
    /// The fallback itself is sanitized; if nothing survives, `TEXT` is kept.
    pub fn with_default_type(mut self, data_type: &str) -> Self {
        let sanitized = strip_type_expression(data_type);
        if !sanitized.is_empty() {
            self.default_type = sanitized;
        }
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SchemaObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn default_type(&self) -> &str {
        &self.default_type
    }

    /// Sanitize a declared column type, falling back to the default type.
    pub fn validate_type_expression(&self, raw: &str) -> String {
        let sanitized = strip_type_expression(raw);
        if sanitized.is_empty() {
            self.default_type.clone()
        } else {
            sanitized
        }
    }

    /// Build the definition of `table` from `columns`.
    ///
    /// Columns keep their insertion order. Names that cannot be normalized are
    /// skipped and reported to the observer. Unless a column normalizes to
    /// `id`, an auto-incrementing `id` primary key is placed first.
    pub fn build_create_table_statement(
        &self,
        table: &str,
        columns: &ColumnSpec,
    ) -> Result<TableDefinition, SchemaError> {
        let name = Identifier::normalize(table).ok_or_else(|| SchemaError::InvalidTableName {
            raw: table.to_string(),
        })?;
        if columns.is_empty() {
            return Err(SchemaError::NoColumnsProvided {
                table: name.into_string(),
            });
        }

        let mut seen: HashMap<Identifier, &str> = HashMap::with_capacity(columns.len());
        let mut user_columns = Vec::with_capacity(columns.len());
        for (raw_column, raw_type) in columns.iter() {
            let Some(column) = Identifier::normalize(raw_column) else {
                self.observer.column_skipped(&name, raw_column);
                continue;
            };
            if let Some(first) = seen.get(&column) {
                return Err(SchemaError::DuplicateColumn {
                    table: name.into_string(),
                    column: column.into_string(),
                    first: first.to_string(),
                    second: raw_column.to_string(),
                });
            }
            seen.insert(column.clone(), raw_column);

            let data_type = strip_type_expression(raw_type);
            let data_type = if data_type.is_empty() {
                self.observer.type_defaulted(&name, &column, raw_type);
                self.default_type.clone()
            } else {
                data_type
            };
            user_columns.push(ColumnDefinition {
                name: column,
                data_type,
            });
        }

        if user_columns.is_empty() {
            return Err(SchemaError::NoValidColumns {
                table: name.into_string(),
            });
        }

        let mut definition_columns = Vec::with_capacity(user_columns.len() + 1);
        if !user_columns.iter().any(|c| c.name == PRIMARY_KEY_COLUMN) {
            self.observer.primary_key_injected(&name);
            definition_columns.push(ColumnDefinition::primary_key());
        }
        definition_columns.extend(user_columns);

        let definition = TableDefinition {
            name,
            columns: definition_columns,
        };
        self.observer.table_built(&definition);
        Ok(definition)
    }
}

/// Normalize `raw` into an identifier; see [`Identifier::normalize`].
pub fn normalize_identifier(raw: &str) -> Option<Identifier> {
    Identifier::normalize(raw)
}

/// Sanitize a declared column type, falling back to `TEXT`.
pub fn validate_type_expression(raw: &str) -> String {
    let sanitized = strip_type_expression(raw);
    if sanitized.is_empty() {
        DEFAULT_COLUMN_TYPE.to_string()
    } else {
        sanitized
    }
}

/// Build a table definition with a default [`SchemaBuilder`].
pub fn build_create_table_statement(
    table: &str,
    columns: &ColumnSpec,
) -> Result<TableDefinition, SchemaError> {
    SchemaBuilder::default().build_create_table_statement(table, columns)
}

// Keeps ASCII letters, digits, whitespace, `_`, `(` and `)`.
fn strip_type_expression(raw: &str) -> String {
    raw.chars()
        .filter(|&c| {
            c.is_ascii_alphanumeric() || c.is_ascii_whitespace() || matches!(c, '_' | '(' | ')')
        })
        .collect::<String>()
        .trim()
        .to_string()
}
