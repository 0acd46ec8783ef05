//! Policy Store
//!
//! Immutable allow-list, row cap and keyword ban set consulted by the SQL
//! gateway. Built once at startup and shared read-only (usually behind an `Arc`).

use crate::error::{GatewayError, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Mutation and DDL keywords rejected anywhere in candidate SQL text.
pub const DEFAULT_BANNED_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "copy", "grant", "revoke",
];

/// Row cap used when nothing else is configured.
pub const DEFAULT_MAX_LIMIT: u64 = 200;

/// The analytics views with their column hints.
pub const ANALYTICS_TABLES: &[(&str, &[&str])] = &[
    ("analytics.monthly_revenue", &["month", "revenue"]),
    (
        "analytics.invoice_summary",
        &[
            "invoice_no",
            "invoice_date",
            "customer_id",
            "country",
            "invoice_total",
            "is_cancelled",
        ],
    ),
];

/// A `schema.name` pair, stored lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FullyQualifiedName {
    schema: String,
    name: String,
}

impl FullyQualifiedName {
    /// Both parts must be non-empty.
    pub fn new(schema: &str, name: &str) -> Option<Self> {
        let schema = schema.trim();
        let name = name.trim();
        if schema.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self {
            schema: schema.to_lowercase(),
            name: name.to_lowercase(),
        })
    }

    /// Parse a dotted `schema.name`. Anything other than exactly two parts is `None`.
    pub fn parse(qualified: &str) -> Option<Self> {
        let mut parts = qualified.trim().split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(schema), Some(name), None) => Self::new(schema, name),
            _ => None,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for FullyQualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Column hints for one allowed table. Only used to prompt the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableHint {
    pub table: FullyQualifiedName,
    pub columns: Vec<String>,
}

/// Immutable validation policy
#[derive(Debug, Clone)]
pub struct Policy {
    allowed_tables: BTreeSet<FullyQualifiedName>,
    hints: Vec<TableHint>,
    max_limit: u64,
    banned_keywords: BTreeSet<String>,
    banned_pattern: Option<Regex>,
}

impl Policy {
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// The analytics deployment: monthly revenue and invoice summary views.
    pub fn analytics_default() -> Result<Self> {
        ANALYTICS_TABLES
            .iter()
            .fold(Self::builder(), |builder, (table, _)| builder.allow_known_table(table))
            .build()
    }

    pub fn is_allowed(&self, table: &FullyQualifiedName) -> bool {
        self.allowed_tables.contains(table)
    }

    pub fn max_limit(&self) -> u64 {
        self.max_limit
    }

    pub fn allowed_tables(&self) -> impl Iterator<Item = &FullyQualifiedName> {
        self.allowed_tables.iter()
    }

    pub fn hints(&self) -> &[TableHint] {
        &self.hints
    }

    pub fn banned_keywords(&self) -> impl Iterator<Item = &str> {
        self.banned_keywords.iter().map(String::as_str)
    }

    /// First banned keyword occurring as a whole word, lower-cased.
    pub fn find_banned_keyword(&self, text: &str) -> Option<String> {
        self.banned_pattern
            .as_ref()?
            .find(text)
            .map(|m| m.as_str().to_lowercase())
    }
}

/// Collects policy settings; validated and frozen by [`PolicyBuilder::build`].
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    tables: Vec<(String, Vec<String>)>,
    max_limit: u64,
    banned_keywords: Vec<String>,
}

impl Default for PolicyBuilder {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            max_limit: DEFAULT_MAX_LIMIT,
            banned_keywords: DEFAULT_BANNED_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

impl PolicyBuilder {
    pub fn allow_table(mut self, qualified: &str) -> Self {
        self.tables.push((qualified.to_string(), Vec::new()));
        self
    }

    pub fn allow_table_with_columns(mut self, qualified: &str, columns: &[&str]) -> Self {
        self.tables.push((
            qualified.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        ));
        self
    }

    /// Like [`allow_table`](Self::allow_table), but attaches the column hints
    /// from [`ANALYTICS_TABLES`] when the table is one of them.
    pub fn allow_known_table(self, qualified: &str) -> Self {
        let known = ANALYTICS_TABLES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(qualified.trim()));
        match known {
            Some((_, columns)) => self.allow_table_with_columns(qualified, columns),
            None => self.allow_table(qualified),
        }
    }

    pub fn max_limit(mut self, max_limit: u64) -> Self {
        self.max_limit = max_limit;
        self
    }

    pub fn ban_keyword(mut self, keyword: &str) -> Self {
        self.banned_keywords.push(keyword.to_string());
        self
    }

    pub fn build(self) -> Result<Policy> {
        if self.max_limit == 0 {
            return Err(GatewayError::Config(
                "max_limit must be a positive integer".to_string(),
            ));
        }
        if self.tables.is_empty() {
            return Err(GatewayError::Config(
                "allow-list must contain at least one table".to_string(),
            ));
        }

        let mut allowed_tables = BTreeSet::new();
        let mut hints = Vec::new();
        for (qualified, columns) in self.tables {
            let table = FullyQualifiedName::parse(&qualified).ok_or_else(|| {
                GatewayError::Config(format!(
                    "allowed table must be written as schema.name: {}",
                    qualified
                ))
            })?;
            if allowed_tables.insert(table.clone()) {
                hints.push(TableHint { table, columns });
            }
        }

        let banned_keywords: BTreeSet<String> = self
            .banned_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let banned_pattern = compile_ban_pattern(&banned_keywords)?;

        Ok(Policy {
            allowed_tables,
            hints,
            max_limit: self.max_limit,
            banned_keywords,
            banned_pattern,
        })
    }
}

fn compile_ban_pattern(keywords: &BTreeSet<String>) -> Result<Option<Regex>> {
    // An empty alternation would match everywhere.
    if keywords.is_empty() {
        return Ok(None);
    }
    let alternation: Vec<String> = keywords.iter().map(|k| regex::escape(k)).collect();
    let pattern = format!(r"\b(?:{})\b", alternation.join("|"));
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|e| GatewayError::Config(format!("invalid banned keyword pattern: {}", e)))
}
