use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Semantic kind of a column, as shown to the user and the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Text,
    Datetime,
    Boolean,
    Categorical,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Text => "text",
            ColumnKind::Datetime => "datetime",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Categorical => "categorical",
        }
    }
}

/// Storage type inferred from the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    BigInt,
    Double,
    Boolean,
    Date,
    Timestamp,
    String,
}

impl DataType {
    pub fn to_sql_type(&self) -> &'static str {
        match self {
            DataType::BigInt => "BIGINT",
            DataType::Double => "DOUBLE",
            DataType::Boolean => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::String => "VARCHAR",
        }
    }

    /// Dataframe-style dtype label reported to clients and used in prompts
    pub fn dtype_label(&self) -> &'static str {
        match self {
            DataType::BigInt => "int64",
            DataType::Double => "float64",
            DataType::Boolean => "bool",
            DataType::Date | DataType::Timestamp => "datetime64[ns]",
            DataType::String => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub data_type: DataType,
}

impl Column {
    pub fn to_sql_definition(&self) -> String {
        format!("{} {}", quote_ident(&self.name), self.data_type.to_sql_type())
    }
}

/// Wire representation: `{name, pandas_dtype, kind}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub pandas_dtype: String,
    pub kind: ColumnKind,
}

impl From<&Column> for ColumnInfo {
    fn from(column: &Column) -> Self {
        Self {
            name: column.name.clone(),
            pandas_dtype: column.data_type.dtype_label().to_string(),
            kind: column.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn to_create_table_sql(&self) -> String {
        let columns_sql: Vec<String> = self.columns.iter().map(|col| col.to_sql_definition()).collect();

        format!(
            "CREATE TABLE {} (\n    {}\n)",
            quote_ident(&self.name),
            columns_sql.join(",\n    ")
        )
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_infos(&self) -> Vec<ColumnInfo> {
        self.columns.iter().map(ColumnInfo::from).collect()
    }
}

/// A typed cell after inference.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl CellValue {
    /// JSON-safe rendering: null for missing, ISO strings for dates, null for non-finite floats
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Int(v) => Value::from(*v),
            CellValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CellValue::Bool(v) => Value::Bool(*v),
            CellValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            CellValue::Timestamp(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            CellValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// Value handed to the loader's appender, matching the column's DuckDB type.
    pub fn to_sql_value(&self) -> duckdb::types::Value {
        use duckdb::types::{TimeUnit, Value as SqlValue};
        match self {
            CellValue::Null => SqlValue::Null,
            CellValue::Int(v) => SqlValue::BigInt(*v),
            CellValue::Float(v) => SqlValue::Double(*v),
            CellValue::Bool(v) => SqlValue::Boolean(*v),
            CellValue::Date(d) => {
                let epoch = chrono::DateTime::UNIX_EPOCH.date_naive();
                SqlValue::Date32(d.signed_duration_since(epoch).num_days() as i32)
            }
            CellValue::Timestamp(ts) => SqlValue::Timestamp(TimeUnit::Microsecond, ts.and_utc().timestamp_micros()),
            CellValue::Text(s) => SqlValue::Text(s.clone()),
        }
    }
}

/// Double-quote an identifier for DuckDB, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
