//! NL-to-SQL HTTP server
//!
//! Run with: cargo run --bin server

use anyhow::{Context, Result};
use nlsql_gateway::db::{init_pool, PgExecutor};
use nlsql_gateway::http::{serve, Router};
use nlsql_gateway::logging::init_tracing;
use nlsql_gateway::{Gateway, GatewayConfig, LlmClient};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

const POOL_SIZE: u32 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = GatewayConfig::from_env()?;
    let policy = Arc::new(config.policy()?);
    info!(
        tables = policy.allowed_tables().count(),
        max_limit = policy.max_limit(),
        "policy loaded"
    );

    let pool = init_pool(config.require_database_url()?, POOL_SIZE)
        .await
        .context("connecting to Postgres")?;
    let llm = LlmClient::new(config.require_api_key()?.to_string())
        .with_base_url(config.openai_base_url.clone())
        .with_model(config.openai_model.clone());

    let gateway = Gateway::new(llm, PgExecutor::new(pool, config.statement_timeout), policy)
        .with_generation_attempts(config.generation_attempts);
    let router = Arc::new(Router::new(gateway, config.cors_origins.clone()));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    serve(listener, router).await?;

    Ok(())
}
