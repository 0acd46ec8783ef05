//! Service configuration
//!
//! Read once at startup from the environment (and `.env`, if present).

use crate::error::{GatewayError, Result};
use crate::policy::{Policy, ANALYTICS_TABLES, DEFAULT_MAX_LIMIT};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 30_000;

const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://127.0.0.1:5500",
    "http://localhost:5500",
    "http://127.0.0.1:5173",
    "http://localhost:5173",
    "null",
];

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub database_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub max_limit: u64,
    pub allowed_tables: Vec<String>,
    pub bind_addr: String,
    pub cors_origins: Vec<String>,
    pub statement_timeout: Duration,
    pub generation_attempts: usize,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let max_limit = match get("NLSQL_MAX_LIMIT") {
            Some(raw) => parse_positive("NLSQL_MAX_LIMIT", &raw)?,
            None => DEFAULT_MAX_LIMIT,
        };
        let statement_timeout_ms = match get("NLSQL_STATEMENT_TIMEOUT_MS") {
            Some(raw) => parse_positive("NLSQL_STATEMENT_TIMEOUT_MS", &raw)?,
            None => DEFAULT_STATEMENT_TIMEOUT_MS,
        };
        let generation_attempts = match get("NLSQL_GENERATION_ATTEMPTS") {
            Some(raw) => parse_positive("NLSQL_GENERATION_ATTEMPTS", &raw)? as usize,
            None => 1,
        };

        let allowed_tables = match get("NLSQL_ALLOWED_TABLES") {
            Some(raw) => split_list(&raw),
            None => ANALYTICS_TABLES.iter().map(|(name, _)| name.to_string()).collect(),
        };
        let cors_origins = match get("NLSQL_CORS_ORIGINS") {
            Some(raw) => split_list(&raw),
            None => DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect(),
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_limit,
            allowed_tables,
            bind_addr: get("NLSQL_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            cors_origins,
            statement_timeout: Duration::from_millis(statement_timeout_ms),
            generation_attempts,
        })
    }

    /// Freeze the configured allow-list and limit into a [`Policy`].
    pub fn policy(&self) -> Result<Policy> {
        let mut builder = Policy::builder().max_limit(self.max_limit);
        for table in &self.allowed_tables {
            builder = builder.allow_known_table(table);
        }
        builder.build()
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| GatewayError::Config("DATABASE_URL not set".to_string()))
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| GatewayError::Config("OPENAI_API_KEY not set".to_string()))
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<u64> {
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(GatewayError::Config(format!(
            "{} must be a positive integer, got {:?}",
            key, raw
        ))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
