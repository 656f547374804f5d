use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    /// Allowed cross-origin callers, `*` allows any origin
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "openai", "ollama" or "disabled"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    pub max_file_size_mb: u64,
    pub max_rows: usize,
    /// Keep the first `max_rows` rows instead of rejecting larger uploads
    pub truncate_rows: bool,
    pub preview_rows: usize,
    pub sample_rows_for_llm: usize,
    pub session_ttl_minutes: u64,
    pub sweep_interval_secs: u64,
    pub query_timeout_secs: u64,
    pub enable_sql_output: bool,
    pub retry_on_execution_error: bool,
}

impl LimitsConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_minutes * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }

    /// Rows kept in memory per session for prompts and session info
    pub fn head_rows(&self) -> usize {
        self.preview_rows.max(self.sample_rows_for_llm)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub format: String, // "text" or "json"
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log output format (text or json)
    #[arg(long)]
    pub log_format: Option<String>,
}

/// Environment variables understood for compatibility with existing deployments,
/// mapped onto their configuration keys.
const COMPAT_ENV_VARS: &[(&str, &str)] = &[
    ("OPENAI_API_KEY", "llm.api_key"),
    ("OPENAI_MODEL", "llm.model"),
    ("MAX_FILE_SIZE_MB", "limits.max_file_size_mb"),
    ("MAX_ROWS", "limits.max_rows"),
    ("PREVIEW_ROWS", "limits.preview_rows"),
    ("SAMPLE_ROWS_FOR_LLM", "limits.sample_rows_for_llm"),
    ("SESSION_TTL_MINUTES", "limits.session_ttl_minutes"),
    ("ENABLE_SQL_OUTPUT", "limits.enable_sql_output"),
];

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Start with the built-in defaults
        let mut config_builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = ["config.toml", "config/config.toml", "/etc/nl-table/config.toml"];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // NLTABLE__LIMITS__MAX_ROWS=5000 style overrides
        config_builder = config_builder.add_source(
            Environment::with_prefix("NLTABLE")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("web.cors_origins")
                .try_parsing(true),
        );

        for (var, key) in COMPAT_ENV_VARS {
            config_builder = config_builder.set_override_option(*key, std::env::var(var).ok())?;
        }
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            let origins: Vec<String> = origins.split(',').map(|o| o.trim().to_string()).collect();
            config_builder = config_builder.set_override("web.cors_origins", origins)?;
        }

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(format) = &args.log_format {
            config.logging.format = format.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        let zero_checks = [
            ("limits.preview_rows", limits.preview_rows as u64),
            ("limits.max_rows", limits.max_rows as u64),
            ("limits.max_file_size_mb", limits.max_file_size_mb),
            ("limits.session_ttl_minutes", limits.session_ttl_minutes),
        ];
        for (key, value) in zero_checks {
            if value == 0 {
                return Err(ConfigError::Message(format!("{} must be greater than zero", key)));
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                cors_origins: vec!["*".to_string()],
            },
            llm: LlmConfig {
                backend: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key: None,
                api_url: None,
                timeout_secs: 60,
                temperature: 0.1,
            },
            limits: LimitsConfig {
                max_file_size_mb: 25,
                max_rows: 100_000,
                truncate_rows: false,
                preview_rows: 20,
                sample_rows_for_llm: 10,
                session_ttl_minutes: 60,
                sweep_interval_secs: 60,
                query_timeout_secs: 30,
                enable_sql_output: true,
                retry_on_execution_error: true,
            },
            logging: LoggingConfig {
                format: "text".to_string(),
            },
        }
    }
}
