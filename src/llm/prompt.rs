use serde_json::{Map, Value};

use crate::ingest::schema::TableSchema;

/// System and user message pair sent to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Why the previous candidate is being sent back to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    Rejected { sql: String, reason: String },
    ExecutionError { sql: String, message: String },
}

pub struct PromptContext<'a> {
    pub schema: &'a TableSchema,
    pub sample_rows: &'a [Map<String, Value>],
    pub question: &'a str,
}

fn system_instructions(table_name: &str) -> String {
    format!(
        "You are a senior data analyst translating questions to DuckDB SQL over a single table named \"{}\". \
         Rules: use only the provided columns; quote identifiers with double quotes; use DuckDB syntax; \
         write exactly one read-only statement starting with SELECT or WITH. \
         Return STRICT JSON with keys: sql (string), explanation (short), answer_hint (short, optional). \
         If the question cannot be answered with these columns, set sql to an empty string and explain why.",
        table_name
    )
}

/// One line per column: `- "name" (dtype, kind)`
pub fn format_schema(schema: &TableSchema) -> String {
    schema
        .columns
        .iter()
        .map(|col| {
            format!(
                "- \"{}\" ({}, {})",
                col.name,
                col.data_type.dtype_label(),
                col.kind.as_str()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(context: &PromptContext<'_>, feedback: Option<&Feedback>) -> Prompt {
    let sample_text = serde_json::to_string(context.sample_rows).unwrap_or_else(|_| "[]".to_string());

    let mut user = format!(
        "Table schema (name, pandas dtype, kind):\n{}\n\nSmall data sample (JSON rows):\n{}\n\nQuestion: {}\n\n",
        format_schema(context.schema),
        sample_text,
        context.question
    );

    match feedback {
        Some(Feedback::Rejected { sql, reason }) => {
            user.push_str(&format!(
                "Previous SQL:\n{}\n\nIt was rejected by the safety check: {}\n\n\
                 Produce a corrected query that satisfies the rules.\n\n",
                sql, reason
            ));
        }
        Some(Feedback::ExecutionError { sql, message }) => {
            user.push_str(&format!(
                "Previous SQL:\n{}\n\nExecution error: {}\n\nProduce a corrected query if possible.\n\n",
                sql, message
            ));
        }
        None => {}
    }
    user.push_str("Respond with JSON only, no markdown fences.");

    Prompt {
        system: system_instructions(&context.schema.name),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::schema::{Column, ColumnKind, DataType};

    fn schema() -> TableSchema {
        TableSchema {
            name: "data".to_string(),
            columns: vec![
                Column { name: "city".to_string(), kind: ColumnKind::Categorical, data_type: DataType::String },
                Column { name: "sales".to_string(), kind: ColumnKind::Numeric, data_type: DataType::Double },
            ],
        }
    }

    #[test]
    fn test_schema_lines() {
        assert_eq!(
            format_schema(&schema()),
            "- \"city\" (object, categorical)\n- \"sales\" (float64, numeric)"
        );
    }

    #[test]
    fn test_first_prompt_has_question_and_sample() {
        let schema = schema();
        let mut row = Map::new();
        row.insert("city".to_string(), Value::from("Oslo"));
        let rows = vec![row];
        let prompt = build_prompt(
            &PromptContext { schema: &schema, sample_rows: &rows, question: "Which city sells most?" },
            None,
        );
        assert!(prompt.system.contains("\"data\""));
        assert!(prompt.user.contains("Question: Which city sells most?"));
        assert!(prompt.user.contains("[{\"city\":\"Oslo\"}]"));
        assert!(!prompt.user.contains("Previous SQL"));
    }

    #[test]
    fn test_retry_prompt_carries_feedback() {
        let schema = schema();
        let feedback = Feedback::ExecutionError {
            sql: "SELECT nope FROM data".to_string(),
            message: "Binder Error: column nope not found".to_string(),
        };
        let prompt = build_prompt(
            &PromptContext { schema: &schema, sample_rows: &[], question: "q" },
            Some(&feedback),
        );
        assert!(prompt.user.contains("Previous SQL:\nSELECT nope FROM data"));
        assert!(prompt.user.contains("Execution error: Binder Error"));

        let feedback = Feedback::Rejected { sql: "DROP TABLE data".to_string(), reason: "Keyword `DROP` is not allowed".to_string() };
        let prompt = build_prompt(
            &PromptContext { schema: &schema, sample_rows: &[], question: "q" },
            Some(&feedback),
        );
        assert!(prompt.user.contains("rejected by the safety check: Keyword `DROP`"));
    }
}
