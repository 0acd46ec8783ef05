//! Query Executor - the only path from the gateway to the database
//!
//! Executors accept either gateway-approved SQL or a fixed intent template.
//! There is no entry point taking arbitrary text.

use super::rows::{row_to_json, QueryRows};
use crate::error::{GatewayError, Result};
use crate::guard::AcceptedSql;
use crate::intent::{IntentStatement, SqlParam};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Column, Executor, Statement};
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run SQL the gateway accepted.
    async fn run_accepted(&self, sql: &AcceptedSql) -> Result<QueryRows>;

    /// Run a fixed intent template with its bound parameters.
    async fn run_intent(&self, statement: &IntentStatement) -> Result<QueryRows>;
}

/// Postgres executor: every query runs in its own read-only transaction with a
/// statement timeout, and the transaction is always rolled back.
pub struct PgExecutor {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgExecutor {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    async fn fetch(&self, sql: &str, params: &[SqlParam]) -> Result<QueryRows> {
        let mut tx = self.pool.begin().await.map_err(execution_error)?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(execution_error)?;
        let timeout_sql = format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        );
        sqlx::query(&timeout_sql)
            .execute(&mut *tx)
            .await
            .map_err(execution_error)?;

        // Column names come from the prepared statement so empty results keep them.
        let prepared = (&mut *tx).prepare(sql).await.map_err(execution_error)?;
        let columns: Vec<String> = prepared
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();

        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlParam::Int(value) => query.bind(*value),
                SqlParam::Timestamp(value) => query.bind(*value),
            };
        }
        let pg_rows = query.fetch_all(&mut *tx).await.map_err(execution_error)?;
        tx.rollback().await.map_err(execution_error)?;

        let rows = pg_rows
            .iter()
            .map(row_to_json)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(execution_error)?;

        debug!(rows = rows.len(), "query finished");
        Ok(QueryRows { columns, rows })
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn run_accepted(&self, sql: &AcceptedSql) -> Result<QueryRows> {
        info!(sql = %sql, "executing accepted SQL");
        self.fetch(sql.as_str(), &[]).await
    }

    async fn run_intent(&self, statement: &IntentStatement) -> Result<QueryRows> {
        info!(intent = statement.kind.as_str(), "executing intent template");
        self.fetch(statement.sql, &statement.params).await
    }
}

fn execution_error(err: sqlx::Error) -> GatewayError {
    GatewayError::Execution(err.to_string())
}
