use duckdb::{appender_params_from_iter, Connection, Result as DuckResult};
use tracing::debug;

use crate::ingest::inference::InferredTable;

/// Creates a private in-memory database holding `table` and locks it down for
/// read-only analytical use.
pub fn load_table(table: &InferredTable) -> DuckResult<Connection> {
    let conn = Connection::open_in_memory()?;
    let schema = &table.schema;

    conn.execute_batch(&schema.to_create_table_sql())?;

    {
        // Appender takes the bare table name, not a quoted identifier
        let mut appender = conn.appender(&schema.name)?;
        for row in &table.rows {
            appender.append_row(appender_params_from_iter(row.iter().map(|cell| cell.to_sql_value())))?;
        }
        appender.flush()?;
    }

    // Queries can only ever see the loaded table: no file, network or extension access
    conn.execute_batch("SET enable_external_access = false;")?;

    debug!(
        "Loaded {} rows x {} columns into in-memory table '{}'",
        table.row_count(),
        schema.columns.len(),
        schema.name
    );
    Ok(conn)
}
