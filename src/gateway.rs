//! Gateway Entry Point
//!
//! Orchestrates question → candidate SQL → validation → execution. Candidate
//! SQL only reaches the executor as an [`AcceptedSql`].

use crate::db::{QueryExecutor, QueryRows};
use crate::error::{GatewayError, Result};
use crate::guard::{self, AcceptedSql, ValidationOutcome};
use crate::intent::{Intent, IntentKind};
use crate::llm::SqlGenerator;
use crate::policy::Policy;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Stage timings in milliseconds, rounded to two decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timings {
    pub sql_generate: f64,
    pub db_query: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NlQueryResponse {
    pub question: String,
    pub sql: AcceptedSql,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub timing_ms: Timings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentResponse {
    pub question: String,
    pub intent: IntentKind,
    pub resolved: Intent,
    pub sql: &'static str,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

pub struct Gateway<G, E> {
    generator: G,
    executor: E,
    policy: Arc<Policy>,
    generation_attempts: usize,
}

impl<G: SqlGenerator, E: QueryExecutor> Gateway<G, E> {
    pub fn new(generator: G, executor: E, policy: Arc<Policy>) -> Self {
        Self {
            generator,
            executor,
            policy,
            generation_attempts: 1,
        }
    }

    /// How many candidates to request before giving up on a question.
    pub fn with_generation_attempts(mut self, attempts: usize) -> Self {
        self.generation_attempts = attempts.max(1);
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn validate(&self, candidate: &str) -> ValidationOutcome {
        guard::validate(candidate, &self.policy)
    }

    /// Generate and validate SQL for `question` without running it.
    ///
    /// A rejected candidate is regenerated with the rejection reason as
    /// feedback until the attempt budget runs out.
    pub async fn prepare(&self, question: &str) -> Result<AcceptedSql> {
        let question = question.trim();
        if question.is_empty() {
            return Err(GatewayError::EmptyQuestion);
        }

        let mut feedback: Option<String> = None;
        let mut attempt = 1;
        loop {
            let candidate = self
                .generator
                .generate_sql(question, &self.policy, feedback.as_deref())
                .await?;

            let reason = match self.validate(&candidate) {
                ValidationOutcome::Accepted(sql) => {
                    info!(attempt, sql = %sql, "generated SQL accepted");
                    return Ok(sql);
                }
                ValidationOutcome::Rejected(reason) => reason,
            };

            warn!(attempt, reason = %reason, "generated SQL rejected");
            if attempt >= self.generation_attempts {
                return Err(reason.into());
            }
            feedback = Some(reason.to_string());
            attempt += 1;
        }
    }

    /// Answer a question with generated, validated SQL.
    pub async fn ask(&self, question: &str) -> Result<NlQueryResponse> {
        let span = info_span!("nl_query", request_id = %Uuid::new_v4());
        async {
            let started = Instant::now();

            let sql = self.prepare(question).await?;
            let generated = Instant::now();

            let result = self.executor.run_accepted(&sql).await?;
            let finished = Instant::now();

            info!(rows = result.rows.len(), "query answered");
            Ok::<_, GatewayError>(NlQueryResponse {
                question: question.trim().to_string(),
                sql,
                columns: result.columns,
                rows: result.rows,
                timing_ms: Timings {
                    sql_generate: millis(generated - started),
                    db_query: millis(finished - generated),
                    total: millis(finished - started),
                },
            })
        }
        .instrument(span)
        .await
    }

    /// Answer a question through the fixed-template intent path.
    pub async fn ask_intent(&self, question: &str) -> Result<IntentResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(GatewayError::EmptyQuestion);
        }

        let classification = self.generator.classify_intent(question).await?;
        let intent = Intent::from_classification(&classification, self.policy.max_limit())?;
        let statement = intent.statement();
        info!(intent = statement.kind.as_str(), "question classified");

        let result = self.executor.run_intent(&statement).await?;
        Ok(IntentResponse {
            question: question.to_string(),
            intent: statement.kind,
            resolved: intent,
            sql: statement.sql,
            columns: result.columns,
            rows: result.rows,
        })
    }

    /// Monthly revenue series, oldest first.
    pub async fn monthly_revenue(&self, limit: i64) -> Result<QueryRows> {
        let cap = i64::try_from(self.policy.max_limit()).unwrap_or(i64::MAX);
        let intent = Intent::MonthlyRevenue {
            limit: limit.clamp(1, cap),
        };
        self.executor.run_intent(&intent.statement()).await
    }
}

fn millis(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_rounds_to_two_decimals() {
        assert_eq!(millis(Duration::from_micros(1234)), 1.23);
        assert_eq!(millis(Duration::from_micros(1235_600)), 1235.6);
        assert_eq!(millis(Duration::ZERO), 0.0);
    }
}
