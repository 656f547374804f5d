use serde::{Deserialize, Serialize};

// Parsed model reply; empty strings are normalised to None
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmReply {
    pub sql: Option<String>,
    pub explanation: Option<String>,
    pub answer_hint: Option<String>,
}

// What happened to one candidate SQL
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    Rejected { reason: String },
    NoSql,
    ExecutionFailed { message: String },
}

// One LLM round trip within a chat turn, kept for debug logging
#[derive(Debug, Clone, Serialize)]
pub struct TranslationAttempt {
    pub question: String,
    pub prompt: String,
    pub candidate_sql: Option<String>,
    pub outcome: AttemptOutcome,
    pub explanation: Option<String>,
}
