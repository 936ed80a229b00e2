//! Seam between statement synthesis and whatever runs the statements.

use crate::error::CreateTableError;
use crate::schema::{ColumnSpec, SchemaBuilder, TableDefinition};

/// Something that can run a single SQL statement against a live connection.
///
/// Only success or failure is reported; engine-specific error details stay
/// with the implementor (and its logs).
pub trait ExecutionChannel {
    fn submit(&mut self, statement: &str) -> bool;
}

impl<C: ExecutionChannel + ?Sized> ExecutionChannel for &mut C {
    fn submit(&mut self, statement: &str) -> bool {
        (**self).submit(statement)
    }
}

/// Build the definition of `table` and submit it through `channel`.
///
/// Idempotent for an unchanged column map thanks to `IF NOT EXISTS`. A
/// different column map for an existing table is accepted by the engine
/// without altering the stored structure.
pub fn create_table<C: ExecutionChannel + ?Sized>(
    channel: &mut C,
    builder: &SchemaBuilder,
    table: &str,
    columns: &ColumnSpec,
) -> Result<TableDefinition, CreateTableError> {
    let definition = builder.build_create_table_statement(table, columns)?;
    let statement = definition.statement();
    tracing::info!(table = %definition.name, sql = %statement, "executing schema statement");

    if channel.submit(&statement) {
        tracing::info!(table = %definition.name, "table created or verified");
        Ok(definition)
    } else {
        tracing::error!(table = %definition.name, "failed to execute schema statement");
        Err(CreateTableError::ExecutionFailed {
            table: definition.name.into_string(),
        })
    }
}
