//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Polling behaviour of the ingestion loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Sleep between polling cycles.
    pub interval: Duration,
    /// Maximum unread messages listed per mailbox per cycle.
    pub max_per_mailbox: usize,
    /// Only list messages received within the last day.
    pub latest_only: bool,
    /// Bodies shorter than this (after trimming) are skipped.
    pub min_body_chars: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_per_mailbox: 3,
            latest_only: false,
            min_body_chars: 10,
        }
    }
}

impl PollConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: env_parse::<u64>("SUPPORT_POLL_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            max_per_mailbox: env_parse("SUPPORT_MAX_PER_MAILBOX")
                .unwrap_or(defaults.max_per_mailbox),
            latest_only: env_bool("SUPPORT_LATEST_ONLY").unwrap_or(defaults.latest_only),
            min_body_chars: env_parse("SUPPORT_MIN_BODY_CHARS")
                .unwrap_or(defaults.min_body_chars),
        }
    }
}

/// Service configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub knowledge_base: PathBuf,
    pub log_dir: PathBuf,
    pub seed_demo_orders: bool,
    pub poll: PollConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: env_path("SUPPORT_DB_PATH", "./data/support.db"),
            knowledge_base: env_path("SUPPORT_KNOWLEDGE_BASE", "./rag_knowledge_base.txt"),
            log_dir: env_path("SUPPORT_LOG_DIR", "./logs"),
            seed_demo_orders: env_bool("SUPPORT_SEED_DEMO_ORDERS").unwrap_or(true),
            poll: PollConfig::from_env(),
        }
    }
}

/// LLM settings from `SUPPORT_LLM_BACKEND`, the backend's API key variable
/// and `SUPPORT_LLM_MODEL`.
///
/// Fails when the backend name is unknown or its API key is missing.
pub fn llm_config_from_env() -> Result<LlmConfig, ConfigError> {
    let backend = match std::env::var("SUPPORT_LLM_BACKEND") {
        Ok(value) => parse_backend(&value)?,
        Err(_) => LlmBackend::OpenAi,
    };

    let key_var = backend.api_key_var();
    let api_key = std::env::var(key_var)
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

    let model = std::env::var("SUPPORT_LLM_MODEL")
        .unwrap_or_else(|_| backend.default_model().to_string());

    Ok(LlmConfig {
        backend,
        api_key: SecretString::from(api_key),
        model,
    })
}

/// Parse an LLM backend name.
pub fn parse_backend(value: &str) -> Result<LlmBackend, ConfigError> {
    LlmBackend::from_name(value).ok_or_else(|| ConfigError::InvalidValue {
        key: "SUPPORT_LLM_BACKEND".into(),
        message: format!("unknown backend '{}' (expected openai or anthropic)", value.trim()),
    })
}

/// Parse a boolean flag: 1/true/yes/on and 0/false/no/off.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|s| parse_bool(&s))
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}
