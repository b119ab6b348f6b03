use crate::api::middleware::AppError;
use crate::config::LlmConfig;
use crate::validation::OperationValidator;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Turns a natural-language instruction into a query plan object
/// (`{"query": ...}`) for one database.
#[async_trait::async_trait]
pub trait PlanGenerator: Send + Sync {
    /// `db_kind` is `mongo` or `sql`; `sources` are the available
    /// collection or table names.
    async fn generate(&self, db_kind: &str, prompt: &str, sources: &[String])
        -> Result<Value, AppError>;
}

/// Plan generator backed by an OpenAI-compatible chat-completions API
pub struct LlmService {
    api_base: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    http_client: HttpClient,
    permits: Arc<Semaphore>,
}

impl LlmService {
    pub fn new(config: &LlmConfig) -> Result<Self, AppError> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            model: config.model.clone(),
            temperature: config.temperature,
            http_client,
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
        })
    }

    /// Instruction sent as the system message
    pub fn build_prompt(db_kind: &str, prompt: &str, sources: &[String]) -> String {
        let functions = OperationValidator::allowed_functions().join("|");
        match db_kind {
            "sql" => format!(
                r#"You are an expert PostgreSQL engineer.

User instruction: {prompt}
Available tables: {sources:?}

Return a **valid JSON object** in one of these formats:

{{"query": "SELECT ..."}}

{{"query": "SELECT ... WHERE id = $1", "params": [1], "action": "read|write"}}

Rules:
1. Always return valid JSON, with no markdown and no explanations.
2. Use only the tables listed above.
3. Use $1, $2, ... placeholders when passing values through "params".
4. Set "action" to "read" for statements that return rows.
"#
            ),
            _ => format!(
                r#"You are an expert MongoDB engineer.

Database type: {db_kind}.
User instruction: {prompt}
Available collections: {sources:?}

Return a **valid JSON object** in this format:

{{
  "query": [
    {{
      "collection": "collection_name",
      "function": "{functions}",
      "parameters": {{}}
    }}
  ]
}}

Rules:
1. Always return valid JSON, with no markdown and no explanations.
2. Use correct key names: "collection", "function", "parameters".
3. Only include collections requested by the user.
4. Apply filters, updates, or transformations according to the user instruction.
5. Use "now" for the current time, or {{"$date": "<ISO-8601>"}} for fixed dates.
6. For update, put the filter under "filter" and the update document under "update".
"#
            ),
        }
    }

    async fn call_llm_api(&self, system_prompt: &str) -> Result<String, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::LlmService("LLM API key is not configured".to_string()))?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| AppError::Internal(format!("LLM concurrency gate closed: {}", e)))?;

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.model,
                "temperature": self.temperature,
                "messages": [{"role": "system", "content": system_prompt}],
            }))
            .send()
            .await
            .map_err(|e| AppError::LlmService(format!("Failed to call LLM service: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::LlmService(format!(
                "LLM service returned error {}: {}",
                status, error_text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::LlmService(format!("Failed to parse LLM response: {}", e)))?;

        Self::extract_content(&body)
    }

    /// Text of the first choice (`message.content`, or `text` for completion-style replies)
    fn extract_content(body: &Value) -> Result<String, AppError> {
        let choice = &body["choices"][0];
        choice["message"]["content"]
            .as_str()
            .or_else(|| choice["text"].as_str())
            .map(str::to_string)
            .ok_or_else(|| AppError::LlmService("LLM response does not contain any content".to_string()))
    }
}

/// Remove a surrounding markdown code fence (with optional language tag)
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => rest
            .strip_suffix("```")
            .unwrap_or(rest)
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
            .trim(),
        None => trimmed,
    }
}

/// Parse the model's text into a plan object.
///
/// Any JSON object is passed through as is, so one without a `query` member
/// reaches the executor as an empty plan. Text that is not a JSON object
/// degrades to a single placeholder operation carrying the raw text, which
/// the executor rejects for its missing collection.
pub fn parse_plan_response(text: &str) -> Value {
    match serde_json::from_str::<Value>(strip_code_fences(text)) {
        Ok(plan @ Value::Object(_)) => plan,
        _ => {
            tracing::warn!("LLM output is not a valid query plan, using fallback");
            json!({
                "query": [
                    {"collection": "", "function": "find", "parameters": {"raw": text}}
                ]
            })
        }
    }
}

#[async_trait::async_trait]
impl PlanGenerator for LlmService {
    async fn generate(
        &self,
        db_kind: &str,
        prompt: &str,
        sources: &[String],
    ) -> Result<Value, AppError> {
        let system_prompt = Self::build_prompt(db_kind, prompt, sources);
        let text = self.call_llm_api(&system_prompt).await?;
        tracing::debug!("LLM output: {}", text);
        Ok(parse_plan_response(&text))
    }
}
