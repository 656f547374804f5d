use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType as ArrowType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};
use arrow::util::display::array_value_to_string;
use duckdb::Connection;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::sql::validator::ValidatedSql;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("SQL execution failed: {0}")]
    Execution(String),
    #[error("Query timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("Query task failed: {0}")]
    Internal(String),
}

/// Bounded result of one query: at most `row_cap` rows, `truncated` when more existed.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryResult {
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub truncated: bool,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    row_cap: usize,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(row_cap: usize, timeout: Duration) -> Self {
        Self { row_cap, timeout }
    }

    pub fn row_cap(&self) -> usize {
        self.row_cap
    }

    /// Runs `sql` on a blocking thread under the configured timeout.
    ///
    /// On timeout the blocking work keeps the connection lock until DuckDB
    /// returns, so a later query on the same session waits for it.
    pub async fn execute(&self, conn: Arc<Mutex<Connection>>, sql: &ValidatedSql) -> Result<QueryResult, QueryError> {
        let bounded_sql = format!(
            "SELECT * FROM (\n{}\n) AS bounded_result LIMIT {}",
            sql.sql,
            self.row_cap + 1
        );
        let cap = self.row_cap;
        let start = Instant::now();

        let task = tokio::task::spawn_blocking(move || run_bounded(&conn, &bounded_sql, cap));
        let (columns, rows, truncated) = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                warn!("Query timed out after {:?}: {}", self.timeout, sql.sql);
                return Err(QueryError::Timeout(self.timeout));
            }
            Ok(Err(join_error)) => return Err(QueryError::Internal(join_error.to_string())),
            Ok(Ok(result)) => result?,
        };

        debug!(
            "Query returned {} rows (truncated: {}) in {}ms",
            rows.len(),
            truncated,
            start.elapsed().as_millis()
        );
        Ok(QueryResult {
            sql: sql.sql.clone(),
            columns,
            rows,
            truncated,
        })
    }
}

type BoundedRows = (Vec<String>, Vec<Map<String, Value>>, bool);

fn run_bounded(conn: &Mutex<Connection>, sql: &str, cap: usize) -> Result<BoundedRows, QueryError> {
    let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| QueryError::Execution(e.to_string()))?;
    let batches = stmt
        .query_arrow([])
        .map_err(|e| QueryError::Execution(e.to_string()))?;

    let schema = batches.get_schema();
    let columns = unique_names(schema.fields().iter().map(|field| field.name().as_str()));

    let mut rows = Vec::new();
    let mut truncated = false;
    'batches: for batch in batches {
        for idx in 0..batch.num_rows() {
            if rows.len() == cap {
                truncated = true;
                break 'batches;
            }
            let row: Map<String, Value> = columns
                .iter()
                .zip(batch.columns())
                .map(|(name, array)| (name.clone(), arrow_value_to_json(array, idx)))
                .collect();
            rows.push(row);
        }
    }

    Ok((columns, rows, truncated))
}

/// Result columns become JSON object keys, so repeated names get `_2`, `_3`... suffixes.
fn unique_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .map(|name| {
            let mut candidate = name.to_string();
            let mut n = 1;
            while !seen.insert(candidate.clone()) {
                n += 1;
                candidate = format!("{}_{}", name, n);
            }
            candidate
        })
        .collect()
}

fn float_to_json(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// Converts one Arrow cell to JSON. Types without a direct JSON form go through
/// Arrow's display formatter (dates, timestamps, intervals, lists...).
fn arrow_value_to_json(array: &ArrayRef, idx: usize) -> Value {
    if array.is_null(idx) {
        return Value::Null;
    }
    match array.data_type() {
        ArrowType::Boolean => Value::Bool(array.as_boolean().value(idx)),
        ArrowType::Int8 => Value::from(array.as_primitive::<Int8Type>().value(idx)),
        ArrowType::Int16 => Value::from(array.as_primitive::<Int16Type>().value(idx)),
        ArrowType::Int32 => Value::from(array.as_primitive::<Int32Type>().value(idx)),
        ArrowType::Int64 => Value::from(array.as_primitive::<Int64Type>().value(idx)),
        ArrowType::UInt8 => Value::from(array.as_primitive::<UInt8Type>().value(idx)),
        ArrowType::UInt16 => Value::from(array.as_primitive::<UInt16Type>().value(idx)),
        ArrowType::UInt32 => Value::from(array.as_primitive::<UInt32Type>().value(idx)),
        ArrowType::UInt64 => Value::from(array.as_primitive::<UInt64Type>().value(idx)),
        ArrowType::Float32 => float_to_json(array.as_primitive::<Float32Type>().value(idx) as f64),
        ArrowType::Float64 => float_to_json(array.as_primitive::<Float64Type>().value(idx)),
        ArrowType::Utf8 => Value::String(array.as_string::<i32>().value(idx).to_string()),
        ArrowType::LargeUtf8 => Value::String(array.as_string::<i64>().value(idx).to_string()),
        // SUM over integers comes back as HUGEINT, i.e. a scale-0 decimal
        ArrowType::Decimal128(_, _) | ArrowType::Decimal256(_, _) => match array_value_to_string(array.as_ref(), idx) {
            Ok(text) => text
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| text.parse::<f64>().map(float_to_json))
                .unwrap_or(Value::String(text)),
            Err(_) => Value::Null,
        },
        other => match array_value_to_string(array.as_ref(), idx) {
            Ok(text) => Value::String(text),
            Err(e) => {
                debug!("Could not render {:?} value: {}", other, e);
                Value::Null
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE data (id BIGINT, name VARCHAR, price DOUBLE, day DATE, ok BOOLEAN);
             INSERT INTO data VALUES
               (1, 'a', 1.5, DATE '2024-01-01', true),
               (2, 'b', NULL, DATE '2024-01-02', false),
               (3, 'c', 3.0, NULL, NULL);",
        )
        .unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn sql(text: &str) -> ValidatedSql {
        ValidatedSql { sql: text.to_string() }
    }

    #[tokio::test]
    async fn test_rows_are_json_in_column_order() {
        let executor = QueryExecutor::new(10, Duration::from_secs(5));
        let result = executor
            .execute(connection(), &sql("SELECT id, name, price, day, ok FROM data ORDER BY id"))
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["id", "name", "price", "day", "ok"]);
        assert_eq!(result.row_count(), 3);
        assert!(!result.truncated);
        assert_eq!(result.rows[0]["id"], Value::from(1));
        assert_eq!(result.rows[0]["price"], Value::from(1.5));
        assert_eq!(result.rows[0]["day"], Value::from("2024-01-01"));
        assert_eq!(result.rows[0]["ok"], Value::Bool(true));
        assert_eq!(result.rows[1]["price"], Value::Null);
        let keys: Vec<&String> = result.rows[2].keys().collect();
        assert_eq!(keys, vec!["id", "name", "price", "day", "ok"]);
    }

    #[tokio::test]
    async fn test_aggregates_become_numbers() {
        let executor = QueryExecutor::new(10, Duration::from_secs(5));
        let result = executor
            .execute(connection(), &sql("SELECT COUNT(*) AS n, SUM(id) AS total FROM data"))
            .await
            .unwrap();
        assert_eq!(result.rows[0]["n"], Value::from(3));
        assert_eq!(result.rows[0]["total"], Value::from(6));
    }

    #[tokio::test]
    async fn test_preview_is_capped() {
        let executor = QueryExecutor::new(2, Duration::from_secs(5));
        let result = executor.execute(connection(), &sql("SELECT * FROM data")).await.unwrap();
        assert_eq!(result.row_count(), 2);
        assert!(result.truncated);

        let executor = QueryExecutor::new(3, Duration::from_secs(5));
        let result = executor.execute(connection(), &sql("SELECT * FROM data")).await.unwrap();
        assert_eq!(result.row_count(), 3);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_engine_errors_are_reported() {
        let executor = QueryExecutor::new(10, Duration::from_secs(5));
        let err = executor
            .execute(connection(), &sql("SELECT missing_column FROM data"))
            .await
            .unwrap_err();
        match err {
            QueryError::Execution(message) => assert!(message.contains("missing_column")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_then_connection_still_usable() {
        let executor = QueryExecutor::new(10, Duration::from_millis(50));
        let conn = connection();

        // Hold the connection so the query cannot finish in time
        let held = conn.lock().unwrap();
        let err = executor
            .execute(Arc::clone(&conn), &sql("SELECT * FROM data"))
            .await
            .unwrap_err();
        assert_eq!(err, QueryError::Timeout(Duration::from_millis(50)));
        drop(held);

        let executor = QueryExecutor::new(10, Duration::from_secs(5));
        let result = executor.execute(conn, &sql("SELECT COUNT(*) FROM data")).await.unwrap();
        assert_eq!(result.row_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_column_names_are_kept() {
        let executor = QueryExecutor::new(10, Duration::from_secs(5));
        let result = executor
            .execute(connection(), &sql("SELECT id AS x, name AS x FROM data WHERE id = 1"))
            .await
            .unwrap();
        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.rows[0].len(), 2);
    }

    #[test]
    fn test_unique_names() {
        let names = unique_names(["a", "a", "b", "a"].into_iter());
        assert_eq!(names, vec!["a", "a_2", "b", "a_3"]);
    }
}
