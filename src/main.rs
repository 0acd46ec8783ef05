use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nlsql_gateway::db::{init_pool, PgExecutor};
use nlsql_gateway::logging::init_tracing;
use nlsql_gateway::{validate, Gateway, GatewayConfig, LlmClient, Policy, ValidationOutcome};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "nlsql")]
#[command(about = "Natural-language questions over an allow-listed, read-only SQL gateway")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a SQL string against the configured policy (no database needed)
    Validate {
        sql: String,
    },
    /// Generate, validate and run SQL for a question
    Ask {
        question: String,
    },
    /// Answer a question through the fixed-template intents
    Intent {
        question: String,
    },
}

type CliGateway = Gateway<LlmClient, PgExecutor>;

async fn connect(config: &GatewayConfig, policy: Policy) -> Result<CliGateway> {
    let pool = init_pool(config.require_database_url()?, 2)
        .await
        .context("connecting to Postgres")?;
    let llm = LlmClient::new(config.require_api_key()?.to_string())
        .with_base_url(config.openai_base_url.clone())
        .with_model(config.openai_model.clone());
    let executor = PgExecutor::new(pool, config.statement_timeout);
    Ok(Gateway::new(llm, executor, Arc::new(policy))
        .with_generation_attempts(config.generation_attempts))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = GatewayConfig::from_env()?;
    let policy = config.policy()?;

    match args.command {
        Command::Validate { sql } => match validate(&sql, &policy) {
            ValidationOutcome::Accepted(accepted) => println!("{}", accepted),
            ValidationOutcome::Rejected(reason) => {
                eprintln!("rejected: {}", reason);
                std::process::exit(1);
            }
        },
        Command::Ask { question } => {
            info!("Question: {}", question);
            let gateway = connect(&config, policy).await?;
            let response = gateway.ask(&question).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Intent { question } => {
            info!("Question: {}", question);
            let gateway = connect(&config, policy).await?;
            let response = gateway.ask_intent(&question).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
