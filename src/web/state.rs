use crate::agent::QueryAgent;
use crate::config::AppConfig;
use std::sync::Arc;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub agent: Arc<QueryAgent>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, agent: Arc<QueryAgent>) -> Self {
        Self {
            config,
            agent,
            startup_time: chrono::Utc::now(),
        }
    }
}
