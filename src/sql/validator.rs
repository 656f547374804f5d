//! Read-only SQL guard for LLM-proposed queries.
//!
//! A candidate is accepted only when it is a single `SELECT` / `WITH ... SELECT`
//! statement that reads nothing but the session table (and its own CTEs). The
//! keyword checks run on tokens, so words inside string literals, comments or
//! quoted identifiers never trigger a rejection.

use std::collections::HashSet;
use std::ops::ControlFlow;

use sqlparser::ast::{Expr, ObjectName, ObjectNamePart, Query, SetExpr, Statement, Visit, Visitor};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use thiserror::Error;

/// Data-definition and data-modification keywords, rejected anywhere outside
/// literals and quoted identifiers. Statement-only keywords (`LOAD`, `CALL`,
/// `BEGIN`...) stay usable as names: they can only act at the start of a
/// statement, which the leading-keyword and single-query checks already cover.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "ATTACH", "DETACH", "COPY", "PRAGMA",
];

/// Functions that reach outside the session table (files, environment, catalog).
const FORBIDDEN_FUNCTIONS: &[&str] = &[
    "read_csv",
    "read_csv_auto",
    "read_parquet",
    "read_json",
    "read_json_auto",
    "read_text",
    "read_blob",
    "glob",
    "getenv",
    "query",
    "query_table",
    "parquet_scan",
    "sniff_csv",
    "pg_read_file",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsafe SQL: {reason}")]
pub struct SqlRejection {
    pub reason: String,
}

impl SqlRejection {
    fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// A statement that passed validation, rendered in canonical form without a
/// trailing semicolon or comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSql {
    pub sql: String,
}

#[derive(Debug, Clone)]
pub struct SqlValidator {
    table_name: String,
}

impl SqlValidator {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
        }
    }

    pub fn validate(&self, raw_sql: &str) -> Result<ValidatedSql, SqlRejection> {
        if raw_sql.trim().is_empty() {
            return Err(SqlRejection::new("SQL query is empty"));
        }

        let dialect = DuckDbDialect {};
        let tokens = Tokenizer::new(&dialect, raw_sql)
            .tokenize()
            .map_err(|e| SqlRejection::new(format!("SQL could not be tokenized: {}", e)))?;
        let significant: Vec<&Token> = tokens
            .iter()
            .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
            .collect();

        check_single_statement(&significant)?;
        check_leading_keyword(&significant)?;
        check_forbidden_keywords(&significant)?;

        let mut statements = Parser::parse_sql(&dialect, raw_sql)
            .map_err(|e| SqlRejection::new(format!("SQL could not be parsed: {}", e)))?;
        if statements.len() != 1 {
            return Err(SqlRejection::new(
                "Exactly one SELECT statement is allowed",
            ));
        }
        let statement = statements.remove(0);
        if !matches!(statement, Statement::Query(_)) {
            return Err(SqlRejection::new("Only SELECT or WITH ... SELECT statements are allowed"));
        }

        let mut guard = RelationGuard {
            table_name: &self.table_name,
            cte_names: HashSet::new(),
        };
        if let ControlFlow::Break(reason) = statement.visit(&mut guard) {
            return Err(SqlRejection::new(reason));
        }

        Ok(ValidatedSql {
            sql: statement.to_string(),
        })
    }
}

fn check_single_statement(tokens: &[&Token]) -> Result<(), SqlRejection> {
    if let Some(pos) = tokens.iter().position(|t| matches!(t, Token::SemiColon)) {
        let trailing_only = tokens[pos..].iter().all(|t| matches!(t, Token::SemiColon));
        if !trailing_only {
            return Err(SqlRejection::new(
                "Multiple statements are not allowed; submit exactly one SELECT statement",
            ));
        }
    }
    Ok(())
}

fn check_leading_keyword(tokens: &[&Token]) -> Result<(), SqlRejection> {
    match tokens.first() {
        None => Err(SqlRejection::new("SQL query is empty")),
        Some(Token::Word(word))
            if word.quote_style.is_none()
                && (word.value.eq_ignore_ascii_case("SELECT") || word.value.eq_ignore_ascii_case("WITH")) =>
        {
            Ok(())
        }
        Some(other) => Err(SqlRejection::new(format!(
            "Only SELECT or WITH ... SELECT statements are allowed (found `{}`)",
            other
        ))),
    }
}

fn check_forbidden_keywords(tokens: &[&Token]) -> Result<(), SqlRejection> {
    for token in tokens {
        if let Token::Word(word) = token {
            if word.quote_style.is_some() {
                continue;
            }
            if let Some(keyword) = FORBIDDEN_KEYWORDS
                .iter()
                .find(|k| word.value.eq_ignore_ascii_case(k))
            {
                return Err(SqlRejection::new(format!("Keyword `{}` is not allowed", keyword)));
            }
        }
    }
    Ok(())
}

/// `SELECT ... INTO t` creates a table.
fn selects_into(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::SetOperation { left, right, .. } => selects_into(left) || selects_into(right),
        _ => false,
    }
}

fn last_part(name: &ObjectName) -> Option<&str> {
    name.0.last().map(|part| match part {
        ObjectNamePart::Identifier(ident) => ident.value.as_str(),
    })
}

/// Walks the AST and stops at the first relation or function outside the allowed set.
struct RelationGuard<'a> {
    table_name: &'a str,
    cte_names: HashSet<String>,
}

impl Visitor for RelationGuard<'_> {
    type Break = String;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if selects_into(&query.body) {
            return ControlFlow::Break("SELECT ... INTO is not allowed".to_string());
        }
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        let allowed = relation.0.len() == 1
            && last_part(relation).is_some_and(|name| {
                name.eq_ignore_ascii_case(self.table_name) || self.cte_names.contains(&name.to_lowercase())
            });
        if allowed {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(format!(
                "Only the table `{}` may be queried (found `{}`)",
                self.table_name, relation
            ))
        }
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if let Expr::Function(function) = expr {
            if let Some(name) = last_part(&function.name) {
                if FORBIDDEN_FUNCTIONS.iter().any(|f| name.eq_ignore_ascii_case(f)) {
                    return ControlFlow::Break(format!("Function `{}` is not allowed", name));
                }
            }
        }
        ControlFlow::Continue(())
    }
}
