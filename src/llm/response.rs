use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::llm::models::LlmReply;

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^```(?:json)?\s*|\s*```$").expect("static regex"))
}

fn object_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("static regex"))
}

/// Turns raw model text into a reply: strict JSON first, then the outermost
/// `{...}` block, then SQL scraped from code fences or SQL-looking lines.
/// Prose without any SQL is kept as the explanation, e.g. a clarifying question.
pub fn parse_reply(raw: &str) -> LlmReply {
    let cleaned = fence_regex().replace_all(raw.trim(), "");

    if let Some(reply) = reply_from_json(&cleaned) {
        return reply;
    }
    if let Some(block) = object_regex().find(&cleaned) {
        if let Some(reply) = reply_from_json(block.as_str()) {
            debug!("Recovered JSON object embedded in LLM reply");
            return reply;
        }
    }

    let sql = extract_sql(raw);
    debug!("LLM reply was not JSON; SQL scan found: {:?}", sql);
    let explanation = match sql {
        Some(_) => None,
        None => non_empty(raw),
    };
    LlmReply {
        sql,
        explanation,
        answer_hint: None,
    }
}

fn reply_from_json(text: &str) -> Option<LlmReply> {
    let value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    let field = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some(LlmReply {
        sql: field("sql"),
        explanation: field("explanation"),
        answer_hint: field("answer_hint"),
    })
}

/// Pulls SQL out of free text: a ```sql block, any ``` block, or the first run
/// of lines starting with a SQL keyword that parses as a statement.
pub fn extract_sql(content: &str) -> Option<String> {
    if let Some(start) = content.find("```sql") {
        let after = &content[start + 6..];
        if let Some(end) = after.find("```") {
            return non_empty(&after[..end]);
        }
    }

    if let Some(start) = content.find("```") {
        let after = &content[start + 3..];
        if let Some(end) = after.find("```") {
            return non_empty(&after[..end]);
        }
    }

    // Mutating keywords are collected too so that the validator can name the problem
    let sql_keywords = ["SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP"];
    let lines: Vec<&str> = content.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let first_word = line.split_whitespace().next().unwrap_or_default().to_uppercase();
        if !sql_keywords.contains(&first_word.as_str()) {
            continue;
        }
        let mut sql = line.trim().to_string();
        if !sql.ends_with(';') {
            for next_line in lines.iter().skip(i + 1).map(|l| l.trim()) {
                if next_line.is_empty() || next_line.starts_with("```") {
                    break;
                }
                sql.push(' ');
                sql.push_str(next_line);
                if next_line.ends_with(';') {
                    break;
                }
            }
        }
        if is_statement(&sql) {
            return non_empty(&sql);
        }
    }

    None
}

/// Prose such as "With the columns available..." starts like SQL but does not parse.
fn is_statement(text: &str) -> bool {
    Parser::parse_sql(&DuckDbDialect {}, text).is_ok_and(|statements| !statements.is_empty())
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
