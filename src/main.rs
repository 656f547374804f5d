use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod agent;
mod config;
mod db;
mod error;
mod ingest;
mod llm;
mod sql;
mod util;
mod web;

use crate::agent::QueryAgent;
use crate::config::{AppConfig, CliArgs};
use crate::llm::LlmManager;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Initialize logging
    init_tracing(&config.logging.format);

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = Arc::new(LlmManager::new(&config.llm)?);

    info!(
        "Starting query agent (session TTL {} min, max {} rows per upload)",
        config.limits.session_ttl_minutes, config.limits.max_rows
    );
    let agent = Arc::new(QueryAgent::start(config.limits.clone(), llm_manager));
    let app_state = Arc::new(AppState::new(config.clone(), Arc::clone(&agent)));

    // Start the web server
    info!("Starting NL-Table server on {}:{}", config.web.host, config.web.port);
    let result = web::run_server(config.web, app_state).await;
    agent.shutdown();

    match result {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
