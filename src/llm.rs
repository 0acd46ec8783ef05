use crate::error::{GatewayError, Result};
use crate::intent::{IntentClassification, IntentKind};
use crate::policy::Policy;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Source of candidate SQL and intent classifications.
///
/// Injected into the gateway so tests can run without any network.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Propose SQL for `question`. `feedback` carries the reason the previous
    /// candidate was rejected, when regenerating.
    async fn generate_sql(
        &self,
        question: &str,
        policy: &Policy,
        feedback: Option<&str>,
    ) -> Result<String>;

    async fn classify_intent(&self, question: &str) -> Result<IntentClassification>;
}

/// OpenAI-compatible chat-completions client
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn call_llm(&self, system: &str, user: &str, json_mode: bool) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ]
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        debug!(model = %self.model, json_mode, "calling chat completions");
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Generation(format!("LLM API call failed: {}", e)))?
            .error_for_status()
            .map_err(|e| GatewayError::Generation(format!("LLM API returned error: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Generation(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| GatewayError::Generation("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl SqlGenerator for LlmClient {
    async fn generate_sql(
        &self,
        question: &str,
        policy: &Policy,
        feedback: Option<&str>,
    ) -> Result<String> {
        let system = sql_system_prompt(policy);
        let user = match feedback {
            Some(reason) => format!(
                "{}\n\nYour previous SQL was rejected: {}\nReturn corrected SQL.",
                question, reason
            ),
            None => question.to_string(),
        };
        let content = self.call_llm(&system, &user, false).await?;
        Ok(strip_code_fences(&content).to_string())
    }

    async fn classify_intent(&self, question: &str) -> Result<IntentClassification> {
        let content = self.call_llm(&intent_system_prompt(), question, true).await?;
        serde_json::from_str(strip_code_fences(&content)).map_err(|e| {
            GatewayError::Generation(format!("Failed to parse intent classification: {}", e))
        })
    }
}

/// Prompt for free-form SQL generation, listing only allow-listed tables.
pub fn sql_system_prompt(policy: &Policy) -> String {
    let tables: Vec<String> = policy
        .hints()
        .iter()
        .map(|hint| {
            if hint.columns.is_empty() {
                format!("- {}", hint.table)
            } else {
                format!("- {}({})", hint.table, hint.columns.join(", "))
            }
        })
        .collect();

    format!(
        r#"You translate analytics questions into a single PostgreSQL SELECT statement.

Available tables (always write them schema-qualified):
{}

Rules:
- Return exactly one SELECT statement and nothing else. No explanations, no markdown.
- Never modify data or schema.
- Only use the tables listed above.
- Always end with LIMIT n where n is at most {}."#,
        tables.join("\n"),
        policy.max_limit()
    )
}

/// Prompt for the fixed-template intent classifier.
pub fn intent_system_prompt() -> String {
    let names: Vec<&str> = IntentKind::ALL.iter().map(|kind| kind.as_str()).collect();
    let rules: Vec<String> = IntentKind::ALL
        .iter()
        .map(|kind| format!("- If the user asks for {}, use \"{}\".", kind.description(), kind.as_str()))
        .collect();

    format!(
        r#"You are an intent classifier for analytics questions.
Return ONLY valid JSON with keys: intent, params.

Allowed intents: {}

Rules:
{}
- Always include params (can be empty).
- Never output SQL. Never output extra text."#,
        names.join(", "),
        rules.join("\n")
    )
}

/// Remove a surrounding markdown code fence (```sql ... ```), if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "sql") on the opening fence line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("SELECT 1"), "SELECT 1");
        assert_eq!(strip_code_fences("```sql\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(strip_code_fences("  ```\nSELECT 1\n```  "), "SELECT 1");
        assert_eq!(strip_code_fences("```json\n{\"intent\": \"x\"}\n```"), "{\"intent\": \"x\"}");
    }

    #[test]
    fn test_sql_prompt_lists_policy() {
        let policy = Policy::analytics_default().unwrap();
        let prompt = sql_system_prompt(&policy);
        assert!(prompt.contains("- analytics.monthly_revenue(month, revenue)"));
        assert!(prompt.contains("analytics.invoice_summary("));
        assert!(prompt.contains("at most 200"));
    }

    #[test]
    fn test_intent_prompt_lists_every_intent() {
        let prompt = intent_system_prompt();
        for kind in IntentKind::ALL {
            assert!(prompt.contains(kind.as_str()));
        }
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = LlmClient::new("key".to_string()).with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
