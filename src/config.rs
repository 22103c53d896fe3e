//! Runtime configuration, read from the environment (and `.env`).

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_ROW_CAP: usize = 200;
pub const DEFAULT_MAX_ATTEMPTS: u8 = 3;
pub const DEFAULT_GENERATION_ATTEMPTS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    OpenAi,
    Groq,
    Ollama,
}

impl FromStr for LlmBackend {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmBackend::OpenAi),
            "groq" => Ok(LlmBackend::Groq),
            "ollama" => Ok(LlmBackend::Ollama),
            other => Err(QueryError::Config(format!("Unsupported LLM_BACKEND: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl LlmConfig {
    /// Resolves the backend settings through `lookup`. Returns `None` when the
    /// backend lacks credentials.
    pub fn resolve<F>(lookup: F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup("LLM_BACKEND") {
            Some(b) => b.parse()?,
            None => LlmBackend::OpenAi,
        };

        let config = match backend {
            LlmBackend::OpenAi => LlmConfig {
                backend,
                api_key: lookup("OPENAI_API_KEY"),
                base_url: lookup("OPENAI_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                model: lookup("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            },
            LlmBackend::Groq => LlmConfig {
                backend,
                api_key: lookup("GROQ_API_KEY").or_else(|| lookup("OPENAI_API_KEY")),
                base_url: lookup("GROQ_BASE_URL")
                    .or_else(|| lookup("OPENAI_BASE_URL"))
                    .unwrap_or_else(|| "https://api.groq.com/openai/v1".to_string()),
                model: lookup("GROQ_MODEL")
                    .or_else(|| lookup("OPENAI_MODEL"))
                    .unwrap_or_else(|| "llama-3.3-70b-versatile".to_string()),
            },
            LlmBackend::Ollama => LlmConfig {
                backend,
                api_key: None,
                base_url: lookup("OLLAMA_BASE_URL")
                    .unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
                model: lookup("OLLAMA_MODEL").unwrap_or_else(|| "llama3.1".to_string()),
            },
        };

        Ok(config.is_available().then_some(config))
    }

    pub fn is_available(&self) -> bool {
        match self.backend {
            LlmBackend::Ollama => true,
            LlmBackend::OpenAi | LlmBackend::Groq => {
                self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub trades_csv: PathBuf,
    pub holdings_csv: PathBuf,
    pub row_cap: usize,
    pub max_attempts: u8,
    pub generation_attempts: u8,
    pub llm: Option<LlmConfig>,
}

impl AppConfig {
    /// Loads `.env` (if any) and reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::resolve(|key| std::env::var(key).ok())
    }

    pub fn resolve<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            trades_csv: lookup("TRADES_CSV")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/trades.csv")),
            holdings_csv: lookup("HOLDINGS_CSV")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/holdings.csv")),
            row_cap: parse_or(&lookup, "SQL_ROW_CAP", DEFAULT_ROW_CAP)?,
            max_attempts: parse_or(&lookup, "SQL_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            generation_attempts: parse_or(
                &lookup,
                "SQL_GENERATION_ATTEMPTS",
                DEFAULT_GENERATION_ATTEMPTS,
            )?,
            llm: LlmConfig::resolve(&lookup)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| QueryError::Config(format!("{} must be a positive integer, got {:?}", key, raw))),
        None => Ok(default),
    }
}
