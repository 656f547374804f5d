//! Schema inference over a parsed upload.
//!
//! Every non-null value of a column is examined. A column is numeric when all of
//! them parse as numbers, boolean when all are in the boolean value set, datetime
//! when all parse as dates or timestamps, and otherwise categorical (few distinct
//! values) or text.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::ingest::schema::{CellValue, Column, ColumnKind, DataType, TableSchema};
use crate::ingest::{IngestError, RawTable};

const NULL_MARKERS: [&str; 5] = ["na", "n/a", "nan", "null", "none"];
const TRUE_VALUES: [&str; 2] = ["true", "yes"];
const FALSE_VALUES: [&str; 2] = ["false", "no"];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: [&str; 8] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Row limits applied while inferring.
#[derive(Debug, Clone, Copy)]
pub struct InferenceLimits {
    pub max_rows: usize,
    pub truncate_rows: bool,
    pub preview_rows: usize,
}

/// Preview payload: `{columns, rows, row_count, column_count}`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TablePreview {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub column_count: usize,
}

#[derive(Debug, Clone)]
pub struct InferredTable {
    pub schema: TableSchema,
    pub rows: Vec<Vec<CellValue>>,
}

impl InferredTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The first `n` rows as JSON objects keyed by column name, in column order.
    pub fn json_rows(&self, n: usize) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .take(n)
            .map(|row| {
                self.schema
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(column, cell)| (column.name.clone(), cell.to_json()))
                    .collect()
            })
            .collect()
    }

    pub fn preview(&self, n: usize) -> TablePreview {
        TablePreview {
            columns: self.schema.column_names(),
            rows: self.json_rows(n),
            row_count: self.row_count(),
            column_count: self.schema.columns.len(),
        }
    }
}

/// Infers the schema of `raw` and converts its cells to typed values.
pub fn infer_table(mut raw: RawTable, table_name: &str, limits: InferenceLimits) -> Result<InferredTable, IngestError> {
    if raw.headers.is_empty() || raw.rows.is_empty() {
        return Err(IngestError::EmptyTable);
    }
    if raw.rows.len() > limits.max_rows {
        if limits.truncate_rows {
            info!("Truncating upload to MAX_ROWS={} for performance", limits.max_rows);
            raw.rows.truncate(limits.max_rows);
        } else {
            return Err(IngestError::FileTooLarge(format!(
                "more than {} rows",
                limits.max_rows
            )));
        }
    }
    raw.normalize_width();

    let names = normalize_headers(&raw.headers);
    let row_count = raw.rows.len();

    let mut columns = Vec::with_capacity(names.len());
    for (index, name) in names.into_iter().enumerate() {
        let values: Vec<&str> = raw
            .rows
            .iter()
            .filter_map(|row| non_null(row[index].as_deref()))
            .collect();
        let (kind, data_type) = infer_column(&values, row_count);
        columns.push(Column { name, kind, data_type });
    }

    let rows = raw
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .zip(&columns)
                .map(|(cell, column)| convert_cell(cell.as_deref(), column.data_type))
                .collect()
        })
        .collect();

    Ok(InferredTable {
        schema: TableSchema {
            name: table_name.to_string(),
            columns,
        },
        rows,
    })
}

/// Trims names, fills blanks with `column_<n>` and suffixes duplicates with `_2`, `_3`...
/// DuckDB identifiers are case-insensitive, so `Name` and `name` collide.
fn normalize_headers(headers: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::with_capacity(headers.len());

    for (index, header) in headers.iter().enumerate() {
        let trimmed = header.trim();
        let base = if trimmed.is_empty() {
            format!("column_{}", index + 1)
        } else {
            trimmed.to_string()
        };

        let mut name = base.clone();
        while seen.contains(&name.to_lowercase()) {
            let counter = counters.entry(base.to_lowercase()).or_insert(1);
            *counter += 1;
            name = format!("{}_{}", base, counter);
        }
        seen.insert(name.to_lowercase());
        names.push(name);
    }
    names
}

fn non_null(cell: Option<&str>) -> Option<&str> {
    let value = cell?.trim();
    if value.is_empty() || NULL_MARKERS.iter().any(|m| value.eq_ignore_ascii_case(m)) {
        None
    } else {
        Some(value)
    }
}

fn infer_column(values: &[&str], row_count: usize) -> (ColumnKind, DataType) {
    if values.is_empty() {
        return (ColumnKind::Text, DataType::String);
    }
    if values.iter().all(|v| parse_number(v).is_some()) {
        let data_type = if values.iter().all(|v| v.parse::<i64>().is_ok()) {
            DataType::BigInt
        } else {
            DataType::Double
        };
        return (ColumnKind::Numeric, data_type);
    }
    if values.iter().all(|v| parse_bool(v).is_some()) {
        return (ColumnKind::Boolean, DataType::Boolean);
    }
    if values.iter().all(|v| parse_date(v).is_some()) {
        return (ColumnKind::Datetime, DataType::Date);
    }
    if values.iter().all(|v| parse_timestamp(v).is_some()) {
        return (ColumnKind::Datetime, DataType::Timestamp);
    }

    let distinct: HashSet<&str> = values.iter().copied().collect();
    let threshold = (row_count / 50).max(10);
    if distinct.len() <= threshold {
        (ColumnKind::Categorical, DataType::String)
    } else {
        (ColumnKind::Text, DataType::String)
    }
}

fn convert_cell(cell: Option<&str>, data_type: DataType) -> CellValue {
    let Some(value) = non_null(cell) else {
        return CellValue::Null;
    };
    let converted = match data_type {
        DataType::BigInt => value.parse::<i64>().ok().map(CellValue::Int),
        DataType::Double => parse_number(value).map(CellValue::Float),
        DataType::Boolean => parse_bool(value).map(CellValue::Bool),
        DataType::Date => parse_date(value).map(CellValue::Date),
        DataType::Timestamp => parse_timestamp(value).map(CellValue::Timestamp),
        DataType::String => None,
    };
    // Text columns keep the original spelling, including surrounding whitespace
    converted.unwrap_or_else(|| CellValue::Text(cell.unwrap_or_default().to_string()))
}

fn parse_number(value: &str) -> Option<f64> {
    // Rust accepts "inf" and "nan"; spreadsheets mean text by those
    if value.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_bool(value: &str) -> Option<bool> {
    if TRUE_VALUES.iter().any(|t| value.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if FALSE_VALUES.iter().any(|f| value.eq_ignore_ascii_case(f)) {
        Some(false)
    } else {
        None
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.naive_utc()))
        .or_else(|| parse_date(value).and_then(|d| d.and_hms_opt(0, 0, 0)))
}
