//! Fixed-template intents
//!
//! The safe path for common questions: the model only picks an intent and its
//! parameters, never SQL. Each intent owns one parameterised statement, so an
//! unknown intent cannot reach the executor.

use crate::error::{GatewayError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const MONTHLY_REVENUE_SQL: &str =
    "SELECT month, revenue FROM analytics.monthly_revenue ORDER BY month LIMIT $1";

const REVENUE_IN_MONTH_SQL: &str =
    "SELECT month, revenue FROM analytics.monthly_revenue WHERE month = $1 LIMIT 1";

const TOP_COUNTRIES_SQL: &str = "SELECT country, SUM(invoice_total) AS revenue \
     FROM analytics.invoice_summary \
     WHERE is_cancelled = FALSE \
     GROUP BY country \
     ORDER BY revenue DESC \
     LIMIT $1";

const DEFAULT_MONTHLY_LIMIT: i64 = 12;
const DEFAULT_TOP_COUNTRIES_LIMIT: i64 = 10;
const DEFAULT_MONTH: &str = "2011-03-01 00:00:00";

/// Names the classifier may answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    MonthlyRevenue,
    RevenueInMonth,
    TopCountries,
}

impl IntentKind {
    pub const ALL: [IntentKind; 3] = [
        IntentKind::MonthlyRevenue,
        IntentKind::RevenueInMonth,
        IntentKind::TopCountries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::MonthlyRevenue => "monthly_revenue",
            IntentKind::RevenueInMonth => "revenue_in_month",
            IntentKind::TopCountries => "top_countries",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name.trim())
    }

    /// Routing rule handed to the classifier.
    pub fn description(&self) -> &'static str {
        match self {
            IntentKind::MonthlyRevenue => "revenue by month",
            IntentKind::RevenueInMonth => {
                "revenue in one specific month; set params.month to \"YYYY-MM-01 00:00:00\""
            }
            IntentKind::TopCountries => "country revenue or top countries",
        }
    }
}

/// Raw classifier answer: `{"intent": "...", "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// A resolved intent with typed parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "intent", content = "params", rename_all = "snake_case")]
pub enum Intent {
    MonthlyRevenue { limit: i64 },
    RevenueInMonth { month: NaiveDateTime },
    TopCountries { limit: i64 },
}

/// Bind parameter for a template statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Int(i64),
    Timestamp(NaiveDateTime),
}

/// Ready-to-run template: fixed SQL plus positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentStatement {
    pub kind: IntentKind,
    pub sql: &'static str,
    pub params: Vec<SqlParam>,
}

impl Intent {
    /// Resolve a classifier answer, filling defaults and clamping limits to
    /// `1..=max_limit`.
    pub fn from_classification(
        classification: &IntentClassification,
        max_limit: u64,
    ) -> Result<Self> {
        let kind = IntentKind::from_name(&classification.intent)
            .ok_or_else(|| GatewayError::UnknownIntent(classification.intent.clone()))?;
        let params = &classification.params;
        let cap = i64::try_from(max_limit).unwrap_or(i64::MAX);

        let intent = match kind {
            IntentKind::MonthlyRevenue => Intent::MonthlyRevenue {
                limit: limit_param(params, DEFAULT_MONTHLY_LIMIT)?.clamp(1, cap),
            },
            IntentKind::RevenueInMonth => Intent::RevenueInMonth {
                month: month_param(params)?,
            },
            IntentKind::TopCountries => Intent::TopCountries {
                limit: limit_param(params, DEFAULT_TOP_COUNTRIES_LIMIT)?.clamp(1, cap),
            },
        };
        Ok(intent)
    }

    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::MonthlyRevenue { .. } => IntentKind::MonthlyRevenue,
            Intent::RevenueInMonth { .. } => IntentKind::RevenueInMonth,
            Intent::TopCountries { .. } => IntentKind::TopCountries,
        }
    }

    pub fn statement(&self) -> IntentStatement {
        let (sql, params) = match self {
            Intent::MonthlyRevenue { limit } => (MONTHLY_REVENUE_SQL, vec![SqlParam::Int(*limit)]),
            Intent::RevenueInMonth { month } => {
                (REVENUE_IN_MONTH_SQL, vec![SqlParam::Timestamp(*month)])
            }
            Intent::TopCountries { limit } => (TOP_COUNTRIES_SQL, vec![SqlParam::Int(*limit)]),
        };
        IntentStatement {
            kind: self.kind(),
            sql,
            params,
        }
    }
}

fn limit_param(params: &Map<String, Value>, default: i64) -> Result<i64> {
    match params.get("limit") {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
            GatewayError::InvalidIntentParams(format!("limit must be an integer, got {}", n))
        }),
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| {
            GatewayError::InvalidIntentParams(format!("limit must be an integer, got {:?}", s))
        }),
        Some(other) => Err(GatewayError::InvalidIntentParams(format!(
            "limit must be an integer, got {}",
            other
        ))),
    }
}

fn month_param(params: &Map<String, Value>) -> Result<NaiveDateTime> {
    let raw = match params.get("month") {
        None | Some(Value::Null) => DEFAULT_MONTH,
        Some(Value::String(s)) => s.as_str(),
        Some(other) => {
            return Err(GatewayError::InvalidIntentParams(format!(
                "month must be a string, got {}",
                other
            )))
        }
    };
    parse_month(raw).ok_or_else(|| {
        GatewayError::InvalidIntentParams(format!(
            "month must look like YYYY-MM-01 00:00:00, got {:?}",
            raw
        ))
    })
}

fn parse_month(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::validate;
    use crate::policy::Policy;
    use serde_json::json;

    fn classification(value: Value) -> IntentClassification {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_when_params_missing() {
        let c = classification(json!({"intent": "monthly_revenue"}));
        assert_eq!(
            Intent::from_classification(&c, 200).unwrap(),
            Intent::MonthlyRevenue { limit: 12 }
        );

        let c = classification(json!({"intent": "top_countries", "params": {}}));
        assert_eq!(
            Intent::from_classification(&c, 200).unwrap(),
            Intent::TopCountries { limit: 10 }
        );

        let c = classification(json!({"intent": "revenue_in_month", "params": {}}));
        let month = NaiveDate::from_ymd_opt(2011, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            Intent::from_classification(&c, 200).unwrap(),
            Intent::RevenueInMonth { month }
        );
    }

    #[test]
    fn test_params_parsed_and_clamped() {
        let c = classification(json!({"intent": "top_countries", "params": {"limit": "5"}}));
        assert_eq!(
            Intent::from_classification(&c, 200).unwrap(),
            Intent::TopCountries { limit: 5 }
        );

        let c = classification(json!({"intent": "monthly_revenue", "params": {"limit": 5000}}));
        assert_eq!(
            Intent::from_classification(&c, 200).unwrap(),
            Intent::MonthlyRevenue { limit: 200 }
        );

        let c = classification(json!({"intent": "monthly_revenue", "params": {"limit": -3}}));
        assert_eq!(
            Intent::from_classification(&c, 200).unwrap(),
            Intent::MonthlyRevenue { limit: 1 }
        );
    }

    #[test]
    fn test_unknown_intent() {
        let c = classification(json!({"intent": "drop_everything", "params": {}}));
        assert!(matches!(
            Intent::from_classification(&c, 200),
            Err(GatewayError::UnknownIntent(name)) if name == "drop_everything"
        ));
    }

    #[test]
    fn test_bad_params() {
        let c = classification(json!({"intent": "top_countries", "params": {"limit": "ten"}}));
        assert!(matches!(
            Intent::from_classification(&c, 200),
            Err(GatewayError::InvalidIntentParams(_))
        ));

        let c = classification(json!({"intent": "revenue_in_month", "params": {"month": "March"}}));
        assert!(matches!(
            Intent::from_classification(&c, 200),
            Err(GatewayError::InvalidIntentParams(_))
        ));
    }

    #[test]
    fn test_month_formats() {
        assert!(parse_month("2011-03-01 00:00:00").is_some());
        assert!(parse_month("2011-03-01T00:00:00").is_some());
        assert!(parse_month("2011-03-01").is_some());
        assert!(parse_month("03/2011").is_none());
    }

    #[test]
    fn test_statement_binds_params() {
        let statement = Intent::TopCountries { limit: 3 }.statement();
        assert_eq!(statement.kind, IntentKind::TopCountries);
        assert_eq!(statement.params, vec![SqlParam::Int(3)]);
        assert!(statement.sql.contains("analytics.invoice_summary"));
    }

    #[test]
    fn test_templates_stay_inside_default_policy() {
        let policy = Policy::analytics_default().unwrap();
        for kind in IntentKind::ALL {
            let c = IntentClassification {
                intent: kind.as_str().to_string(),
                params: Map::new(),
            };
            let statement = Intent::from_classification(&c, 200).unwrap().statement();
            let literal = match &statement.params[0] {
                SqlParam::Int(n) => n.to_string(),
                SqlParam::Timestamp(ts) => format!("'{}'", ts),
            };
            let sql = statement.sql.replace("$1", &literal);
            assert!(validate(&sql, &policy).is_accepted(), "{}", sql);
        }
    }

    #[test]
    fn test_intent_serializes_with_tag() {
        let value = serde_json::to_value(Intent::MonthlyRevenue { limit: 12 }).unwrap();
        assert_eq!(value, json!({"intent": "monthly_revenue", "params": {"limit": 12}}));
    }
}
