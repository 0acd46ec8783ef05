//! SQL Safety Gateway
//!
//! Decides whether model-generated SQL may reach the database. A candidate is
//! either accepted (possibly with its LIMIT rewritten) or rejected outright;
//! nothing in between. Checks run in a fixed order and stop at the first failure:
//!
//! 1. trim and strip one trailing `;`
//! 2. raw-text keyword ban scan (runs before parsing)
//! 3. Postgres grammar parse
//! 4. single read-only SELECT
//! 5. every table reference schema-qualified
//! 6. every table on the allow-list
//! 7. LIMIT present, literal and within the policy cap
//!
//! This module has no I/O and no logging.

pub mod keywords;
pub mod limit;
pub mod relations;

use crate::error::ValidationError;
use crate::policy::Policy;
use serde::Serialize;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Tokenizer;
use std::fmt;

/// SQL text that passed every gateway check.
///
/// Only this module can construct one, so holding an `AcceptedSql` proves
/// `validate` ran and admitted the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AcceptedSql(String);

impl AcceptedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for AcceptedSql {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AcceptedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of running a candidate through the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted(AcceptedSql),
    Rejected(ValidationError),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }

    /// Accepted SQL text, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            ValidationOutcome::Accepted(sql) => Some(sql.as_str()),
            ValidationOutcome::Rejected(_) => None,
        }
    }

    pub fn into_result(self) -> Result<AcceptedSql, ValidationError> {
        match self {
            ValidationOutcome::Accepted(sql) => Ok(sql),
            ValidationOutcome::Rejected(reason) => Err(reason),
        }
    }
}

impl From<Result<AcceptedSql, ValidationError>> for ValidationOutcome {
    fn from(result: Result<AcceptedSql, ValidationError>) -> Self {
        match result {
            Ok(sql) => ValidationOutcome::Accepted(sql),
            Err(reason) => ValidationOutcome::Rejected(reason),
        }
    }
}

/// Validate a candidate SQL string against `policy`.
///
/// Total over all inputs: any text yields either `Accepted` or `Rejected`.
pub fn validate(candidate: &str, policy: &Policy) -> ValidationOutcome {
    check(candidate, policy).map(AcceptedSql).into()
}

fn check(candidate: &str, policy: &Policy) -> Result<String, ValidationError> {
    let sql = normalize(candidate).ok_or(ValidationError::EmptyInput)?;

    keywords::scan(candidate, policy)?;

    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize_with_location()
        .map_err(|e| ValidationError::UnparsableSql(e.to_string()))?;
    let statements = Parser::parse_sql(&dialect, sql)
        .map_err(|e| ValidationError::UnparsableSql(e.to_string()))?;

    let query = relations::single_select(&statements, &tokens)?;

    let tables = relations::table_references(query)
        .iter()
        .map(relations::qualify)
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(table) = tables.iter().find(|table| !policy.is_allowed(table)) {
        return Err(ValidationError::TableNotAllowed(table.to_string()));
    }

    limit::enforce(sql, query, &tokens, policy.max_limit())
}

/// Trim whitespace and a single trailing statement terminator.
fn normalize(candidate: &str) -> Option<&str> {
    let trimmed = candidate.trim();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
