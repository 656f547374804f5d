//! Session-scoped query agent: upload -> session, question -> answer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::LimitsConfig;
use crate::db::executor::{QueryExecutor, QueryResult};
use crate::db::loader::load_table;
use crate::db::session_store::SessionStore;
use crate::error::AgentError;
use crate::ingest::inference::{infer_table, InferenceLimits, TablePreview};
use crate::ingest::schema::ColumnInfo;
use crate::ingest::IngestManager;
use crate::llm::translator::{ChatAnswer, Translator, TranslatorSettings};
use crate::llm::LlmManager;

/// Every session holds its upload in a table of this name.
pub const TABLE_NAME: &str = "data";

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub schema: Vec<ColumnInfo>,
    pub preview: TablePreview,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultPreview {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub truncated: bool,
}

impl From<QueryResult> for ResultPreview {
    fn from(result: QueryResult) -> Self {
        Self {
            row_count: result.rows.len(),
            columns: result.columns,
            rows: result.rows,
            truncated: result.truncated,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatResponse {
    pub answer: String,
    pub sql: Option<String>,
    pub result_preview: Option<ResultPreview>,
    pub explanation: Option<String>,
}

impl From<ChatAnswer> for ChatResponse {
    fn from(answer: ChatAnswer) -> Self {
        Self {
            answer: answer.answer,
            sql: answer.sql,
            result_preview: answer.result.map(ResultPreview::from),
            explanation: answer.explanation,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub idle_seconds: u64,
    pub expires_in_seconds: u64,
    pub row_count: usize,
    pub column_count: usize,
    pub schema: Vec<ColumnInfo>,
    pub preview: TablePreview,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub active_sessions: usize,
    pub llm_available: bool,
    pub llm_backend: Option<String>,
    pub session_ttl_seconds: u64,
}

pub struct QueryAgent {
    store: Arc<SessionStore>,
    ingest: Arc<IngestManager>,
    translator: Translator,
    limits: LimitsConfig,
}

impl QueryAgent {
    /// Builds the agent and starts the session sweeper. Must be called inside a tokio runtime.
    pub fn start(limits: LimitsConfig, llm: Arc<LlmManager>) -> Self {
        let store = SessionStore::start(limits.session_ttl(), limits.sweep_interval());
        Self::with_store(store, limits, llm)
    }

    pub fn with_store(store: Arc<SessionStore>, limits: LimitsConfig, llm: Arc<LlmManager>) -> Self {
        let executor = QueryExecutor::new(limits.preview_rows, limits.query_timeout());
        let settings = TranslatorSettings {
            sample_rows: limits.sample_rows_for_llm,
            enable_sql_output: limits.enable_sql_output,
            retry_on_execution_error: limits.retry_on_execution_error,
        };
        Self {
            store,
            ingest: Arc::new(IngestManager::new(limits.max_file_size_bytes())),
            translator: Translator::new(llm, executor, settings),
            limits,
        }
    }

    /// Parses, infers and loads an upload into a new session. Nothing is
    /// registered unless every step succeeds.
    pub async fn create_session(&self, bytes: Vec<u8>, filename: &str) -> Result<UploadResponse, AgentError> {
        let ingest = Arc::clone(&self.ingest);
        let filename = filename.to_string();
        let row_limit = self.limits.max_rows.saturating_add(1);
        let inference_limits = InferenceLimits {
            max_rows: self.limits.max_rows,
            truncate_rows: self.limits.truncate_rows,
            preview_rows: self.limits.preview_rows,
        };

        let (table, conn) = tokio::task::spawn_blocking(move || -> Result<_, AgentError> {
            let raw = ingest.parse_upload(&bytes, &filename, row_limit)?;
            let table = infer_table(raw, TABLE_NAME, inference_limits)?;
            let conn = load_table(&table)?;
            Ok((table, conn))
        })
        .await??;

        let preview = table.preview(self.limits.preview_rows);
        let schema = table.schema.column_infos();
        let session = self.store.create(
            conn,
            table.schema.clone(),
            table.row_count(),
            table.json_rows(self.limits.head_rows()),
        );

        Ok(UploadResponse {
            session_id: session.id.clone(),
            schema,
            preview,
        })
    }

    /// Answers one question. Turns on the same session run one at a time.
    pub async fn ask(&self, session_id: &str, message: &str) -> Result<ChatResponse, AgentError> {
        let question = message.trim();
        if question.is_empty() {
            return Err(AgentError::InvalidRequest("message must not be empty".to_string()));
        }

        let session = self.store.get(session_id)?;
        let _turn = session.begin_turn().await;
        debug!("Session {} question: {}", session.id, question);

        let translation = self.translator.translate(&session, question).await;
        if self.store.touch(session_id).is_err() {
            debug!("Session {} was removed during its turn", session_id);
        }
        Ok(translation.answer.into())
    }

    pub fn session_info(&self, session_id: &str) -> Result<SessionInfo, AgentError> {
        let session = self.store.get(session_id)?;
        let idle = session.idle_for();
        let preview_rows: Vec<Map<String, Value>> = session
            .head_rows
            .iter()
            .take(self.limits.preview_rows)
            .cloned()
            .collect();

        Ok(SessionInfo {
            session_id: session.id.clone(),
            created_at: session.created_at,
            idle_seconds: idle.as_secs(),
            expires_in_seconds: self.store.ttl().saturating_sub(idle).as_secs(),
            row_count: session.row_count,
            column_count: session.schema.columns.len(),
            schema: session.schema.column_infos(),
            preview: TablePreview {
                columns: session.schema.column_names(),
                rows: preview_rows,
                row_count: session.row_count,
                column_count: session.schema.columns.len(),
            },
        })
    }

    pub fn delete_session(&self, session_id: &str) -> Result<(), AgentError> {
        if self.store.remove(session_id) {
            Ok(())
        } else {
            Err(AgentError::SessionNotFound)
        }
    }

    pub fn status(&self) -> AgentStatus {
        let llm = self.translator.llm();
        AgentStatus {
            active_sessions: self.store.len(),
            llm_available: llm.is_available(),
            llm_backend: llm.backend_name().map(str::to_string),
            session_ttl_seconds: self.store.ttl().as_secs(),
        }
    }

    pub fn shutdown(&self) {
        info!("Shutting down query agent");
        self.store.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::ingest::IngestError;
    use crate::llm::prompt::Prompt;
    use crate::llm::translator::NOT_CONFIGURED_ANSWER;
    use crate::llm::{LlmClient, LlmError};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Answers every prompt with the same SQL.
    pub(crate) struct FixedSql(pub &'static str);

    #[async_trait]
    impl LlmClient for FixedSql {
        async fn complete(&self, _prompt: &Prompt) -> Result<String, LlmError> {
            Ok(serde_json::json!({ "sql": self.0, "explanation": "fixed" }).to_string())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    pub(crate) fn limits() -> LimitsConfig {
        AppConfig::default().limits
    }

    pub(crate) fn agent_with(llm: LlmManager, limits: LimitsConfig) -> QueryAgent {
        let store = Arc::new(SessionStore::new(limits.session_ttl()));
        QueryAgent::with_store(store, limits, Arc::new(llm))
    }

    const CSV: &[u8] = b"id,name,price\n1,apple,1.5\n2,pear,2.0\n";

    #[tokio::test]
    async fn test_upload_then_ask() {
        let llm = LlmManager::with_client(Box::new(FixedSql("SELECT COUNT(*) AS n FROM data")), Duration::from_secs(5));
        let agent = agent_with(llm, limits());

        let upload = agent.create_session(CSV.to_vec(), "fruit.csv").await.unwrap();
        assert_eq!(upload.session_id.len(), 32);
        assert_eq!(upload.schema.len(), 3);
        assert_eq!(upload.preview.row_count, 2);

        let response = agent.ask(&upload.session_id, "How many rows?").await.unwrap();
        assert_eq!(response.answer, "n = 2");
        assert_eq!(response.sql.as_deref(), Some("SELECT COUNT(*) AS n FROM data"));
        let preview = response.result_preview.unwrap();
        assert_eq!(preview.row_count, 1);
        assert!(!preview.truncated);
    }

    #[tokio::test]
    async fn test_failed_upload_creates_no_session() {
        let agent = agent_with(LlmManager::disabled(), limits());
        let err = agent.create_session(b"id,name\n".to_vec(), "empty.csv").await.unwrap_err();
        assert!(matches!(err, AgentError::Ingest(IngestError::EmptyTable)));

        let mut small = limits();
        small.max_rows = 1;
        let agent = agent_with(LlmManager::disabled(), small);
        let err = agent.create_session(CSV.to_vec(), "fruit.csv").await.unwrap_err();
        assert!(matches!(err, AgentError::Ingest(IngestError::FileTooLarge(_))));
        assert_eq!(agent.status().active_sessions, 0);
    }

    #[tokio::test]
    async fn test_ask_errors() {
        let agent = agent_with(LlmManager::disabled(), limits());
        assert!(matches!(
            agent.ask("missing", "hello").await,
            Err(AgentError::SessionNotFound)
        ));

        let upload = agent.create_session(CSV.to_vec(), "fruit.csv").await.unwrap();
        assert!(matches!(
            agent.ask(&upload.session_id, "   ").await,
            Err(AgentError::InvalidRequest(_))
        ));
        let response = agent.ask(&upload.session_id, "hello").await.unwrap();
        assert_eq!(response.answer, NOT_CONFIGURED_ANSWER);
        assert!(response.result_preview.is_none());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let llm = LlmManager::with_client(Box::new(FixedSql("SELECT COUNT(*) AS n FROM data")), Duration::from_secs(5));
        let agent = agent_with(llm, limits());
        let a = agent.create_session(CSV.to_vec(), "a.csv").await.unwrap();
        let b = agent
            .create_session(b"x\n1\n2\n3\n4\n".to_vec(), "b.csv")
            .await
            .unwrap();
        assert_ne!(a.session_id, b.session_id);

        assert_eq!(agent.ask(&a.session_id, "count").await.unwrap().answer, "n = 2");
        assert_eq!(agent.ask(&b.session_id, "count").await.unwrap().answer, "n = 4");
    }

    #[tokio::test]
    async fn test_info_delete_status() {
        let agent = agent_with(LlmManager::disabled(), limits());
        let upload = agent.create_session(CSV.to_vec(), "fruit.csv").await.unwrap();

        let info = agent.session_info(&upload.session_id).unwrap();
        assert_eq!(info.row_count, 2);
        assert_eq!(info.column_count, 3);
        assert_eq!(info.preview.rows.len(), 2);
        assert!(info.expires_in_seconds > 0);

        let status = agent.status();
        assert_eq!(status.active_sessions, 1);
        assert!(!status.llm_available);

        agent.delete_session(&upload.session_id).unwrap();
        assert!(matches!(
            agent.delete_session(&upload.session_id),
            Err(AgentError::SessionNotFound)
        ));
        assert!(matches!(
            agent.session_info(&upload.session_id),
            Err(AgentError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_turns_on_one_session() {
        let llm = LlmManager::with_client(Box::new(FixedSql("SELECT SUM(\"price\") AS total FROM data")), Duration::from_secs(5));
        let agent = Arc::new(agent_with(llm, limits()));
        let upload = agent.create_session(CSV.to_vec(), "fruit.csv").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let agent = Arc::clone(&agent);
            let id = upload.session_id.clone();
            handles.push(tokio::spawn(async move { agent.ask(&id, "total?").await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().answer, "total = 3.5");
        }
    }
}
