use crate::config::LlmConfig;
use crate::error::{QueryError, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for a financial data analysis system.
Answer questions based ONLY on the provided context. Be concise and accurate.
If the context doesn't contain the answer, say so clearly.";

const MAX_TOKENS: u32 = 1500;

/// External text generator: question + context (+ optional system prompt) in,
/// generated text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(
        &self,
        question: &str,
        context: &str,
        system_prompt: Option<&str>,
    ) -> Result<String>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (OpenAI, Groq,
/// Ollama).
pub struct LlmClient {
    api_key: Option<String>,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: Option<String>, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.model.clone(),
            config.base_url.clone(),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, system: &str, user: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": 0.0,
            "max_tokens": MAX_TOKENS
        })
    }

    pub async fn call_llm(&self, system: &str, user: &str) -> Result<String> {
        let body = self.request_body(system, user);

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        debug!("Calling {} at {}", self.model, self.base_url);
        let response = request
            .send()
            .await
            .map_err(|e| QueryError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(QueryError::Llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| QueryError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(QueryError::Llm(format!("LLM API error: {}", error)));
        }

        let choice = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| QueryError::Llm("No choices in LLM response".to_string()))?;

        if choice.get("finish_reason").and_then(|r| r.as_str()) == Some("length") {
            warn!("LLM response was truncated due to length limit");
        }

        let content = choice["message"]["content"]
            .as_str()
            .ok_or_else(|| QueryError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate_text(
        &self,
        question: &str,
        context: &str,
        system_prompt: Option<&str>,
    ) -> Result<String> {
        let user = format!("Context:\n{}\n\nQuestion: {}", context, question);
        self.call_llm(system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT), &user)
            .await
    }
}
