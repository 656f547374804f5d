//! Question -> SQL -> bounded result, for one chat turn.
//!
//! The turn is a small state machine:
//!
//! ```text
//! Translating -> Validating -> Executing -> Done
//!      ^             |             |
//!      +-- retry ----+-------------+   (at most once per turn)
//! ```
//!
//! A single retry budget is shared by validation rejections and execution
//! errors, so a question costs at most two LLM calls. Timeouts and provider
//! failures end the turn immediately.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::db::executor::{QueryError, QueryExecutor, QueryResult};
use crate::db::session_store::Session;
use crate::llm::models::{AttemptOutcome, LlmReply, TranslationAttempt};
use crate::llm::prompt::{build_prompt, Feedback, PromptContext};
use crate::llm::{LlmError, LlmManager};
use crate::sql::validator::{SqlValidator, ValidatedSql};

pub const NOT_CONFIGURED_ANSWER: &str =
    "LLM is not configured. Set OPENAI_API_KEY to enable natural language querying.";
pub const LLM_UNAVAILABLE_ANSWER: &str = "The language model is unavailable right now. Please try again later.";
pub const NO_SQL_ANSWER: &str = "I could not derive a valid SQL for this question.";
pub const NO_SAFE_QUERY_ANSWER: &str = "No safe query could be constructed for this question.";

const RETRY_BUDGET: usize = 1;

#[derive(Debug, Clone)]
pub struct TranslatorSettings {
    pub sample_rows: usize,
    pub enable_sql_output: bool,
    pub retry_on_execution_error: bool,
}

/// Final outcome of a turn, before it is shaped into the wire response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatAnswer {
    pub answer: String,
    pub sql: Option<String>,
    pub result: Option<QueryResult>,
    pub explanation: Option<String>,
}

impl ChatAnswer {
    fn message(answer: impl Into<String>, explanation: Option<String>) -> Self {
        Self {
            answer: answer.into(),
            explanation,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Translation {
    pub answer: ChatAnswer,
    pub attempts: Vec<TranslationAttempt>,
}

enum State {
    Translating { feedback: Option<Feedback> },
    Validating { prompt: String, reply: LlmReply, candidate: String },
    Executing { prompt: String, reply: LlmReply, validated: ValidatedSql },
    Done(ChatAnswer),
}

pub struct Translator {
    llm: Arc<LlmManager>,
    executor: QueryExecutor,
    settings: TranslatorSettings,
}

impl Translator {
    pub fn new(llm: Arc<LlmManager>, executor: QueryExecutor, settings: TranslatorSettings) -> Self {
        Self { llm, executor, settings }
    }

    pub fn llm(&self) -> &LlmManager {
        &self.llm
    }

    /// Runs one turn. Never fails: every problem becomes answer text.
    pub async fn translate(&self, session: &Session, question: &str) -> Translation {
        if !self.llm.is_available() {
            return Translation {
                answer: ChatAnswer::message(NOT_CONFIGURED_ANSWER, None),
                attempts: Vec::new(),
            };
        }

        let sample_len = self.settings.sample_rows.min(session.head_rows.len());
        let context = PromptContext {
            schema: &session.schema,
            sample_rows: &session.head_rows[..sample_len],
            question,
        };
        let validator = SqlValidator::new(session.table_name());

        let mut attempts = Vec::new();
        let mut retries_left = RETRY_BUDGET;
        let mut state = State::Translating { feedback: None };

        let answer = loop {
            state = match state {
                State::Translating { feedback } => {
                    let prompt = build_prompt(&context, feedback.as_ref());
                    debug!("LLM prompt for session {}:\n{}", session.id, prompt.user);
                    match self.llm.complete(&prompt).await {
                        Ok(reply) => match reply.sql.clone() {
                            Some(candidate) => State::Validating {
                                prompt: prompt.user,
                                reply,
                                candidate,
                            },
                            None => {
                                attempts.push(attempt(question, prompt.user, None, AttemptOutcome::NoSql, &reply));
                                let answer = reply
                                    .answer_hint
                                    .clone()
                                    .or_else(|| reply.explanation.clone())
                                    .unwrap_or_else(|| NO_SQL_ANSWER.to_string());
                                State::Done(ChatAnswer::message(answer, reply.explanation))
                            }
                        },
                        Err(LlmError::NotConfigured) => State::Done(ChatAnswer::message(NOT_CONFIGURED_ANSWER, None)),
                        Err(e) => {
                            warn!("LLM call failed for session {}: {}", session.id, e);
                            State::Done(ChatAnswer::message(LLM_UNAVAILABLE_ANSWER, None))
                        }
                    }
                }

                State::Validating { prompt, reply, candidate } => match validator.validate(&candidate) {
                    Ok(validated) => State::Executing { prompt, reply, validated },
                    Err(rejection) => {
                        warn!("Rejected LLM SQL for session {}: {}", session.id, rejection.reason);
                        attempts.push(attempt(
                            question,
                            prompt,
                            Some(candidate.clone()),
                            AttemptOutcome::Rejected {
                                reason: rejection.reason.clone(),
                            },
                            &reply,
                        ));
                        if retries_left > 0 {
                            retries_left -= 1;
                            State::Translating {
                                feedback: Some(Feedback::Rejected {
                                    sql: candidate,
                                    reason: rejection.reason,
                                }),
                            }
                        } else {
                            State::Done(ChatAnswer::message(NO_SAFE_QUERY_ANSWER, Some(rejection.reason)))
                        }
                    }
                },

                State::Executing { prompt, reply, validated } => {
                    match self.executor.execute(session.connection(), &validated).await {
                        Ok(result) => {
                            attempts.push(attempt(
                                question,
                                prompt,
                                Some(validated.sql.clone()),
                                AttemptOutcome::Accepted,
                                &reply,
                            ));
                            State::Done(ChatAnswer {
                                answer: summarize(&result, self.executor.row_cap()),
                                sql: self.reported_sql(&validated),
                                result: Some(result),
                                explanation: reply.explanation,
                            })
                        }
                        Err(QueryError::Execution(message)) => {
                            attempts.push(attempt(
                                question,
                                prompt,
                                Some(validated.sql.clone()),
                                AttemptOutcome::ExecutionFailed {
                                    message: message.clone(),
                                },
                                &reply,
                            ));
                            if self.settings.retry_on_execution_error && retries_left > 0 {
                                retries_left -= 1;
                                State::Translating {
                                    feedback: Some(Feedback::ExecutionError {
                                        sql: validated.sql,
                                        message,
                                    }),
                                }
                            } else {
                                State::Done(ChatAnswer {
                                    answer: QueryError::Execution(message).to_string(),
                                    sql: self.reported_sql(&validated),
                                    result: None,
                                    explanation: reply.explanation,
                                })
                            }
                        }
                        Err(e) => State::Done(ChatAnswer {
                            answer: match &e {
                                QueryError::Timeout(_) => format!("{}.", e),
                                _ => e.to_string(),
                            },
                            sql: self.reported_sql(&validated),
                            result: None,
                            explanation: reply.explanation,
                        }),
                    }
                }

                State::Done(answer) => break answer,
            };
        };

        for (i, a) in attempts.iter().enumerate() {
            debug!("Session {} attempt {}: {:?} sql={:?}", session.id, i + 1, a.outcome, a.candidate_sql);
        }
        Translation { answer, attempts }
    }

    fn reported_sql(&self, validated: &ValidatedSql) -> Option<String> {
        self.settings.enable_sql_output.then(|| validated.sql.clone())
    }
}

fn attempt(
    question: &str,
    prompt: String,
    candidate_sql: Option<String>,
    outcome: AttemptOutcome,
    reply: &LlmReply,
) -> TranslationAttempt {
    TranslationAttempt {
        question: question.to_string(),
        prompt,
        candidate_sql,
        outcome,
        explanation: reply.explanation.clone(),
    }
}

/// One-cell results answer `column = value`; anything else reports its shape.
fn summarize(result: &QueryResult, cap: usize) -> String {
    let column_count = result.columns.len();
    if result.rows.len() == 1 && column_count == 1 && !result.truncated {
        let column = &result.columns[0];
        let value = match result.rows[0].get(column) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "null".to_string(),
            Some(other) => other.to_string(),
        };
        format!("{} = {}", column, value)
    } else if result.truncated {
        format!("Query returned more than {} rows and {} columns.", cap, column_count)
    } else {
        format!("Query returned {} rows and {} columns.", result.rows.len(), column_count)
    }
}
