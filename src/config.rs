//! Pipeline configuration
//!
//! Read once at startup from the environment (after `dotenv`), then passed
//! by value into the pipeline. Nothing here is consulted at request time.

use crate::error::{Nl2SqlError, Result};
use crate::llm::CompletionOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl ModelSettings {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            Nl2SqlError::Config(
                "OPENAI_API_KEY is not set (add it to the environment or a .env file)".to_string(),
            )
        })?;
        Ok(Self {
            api_key,
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Sampling for reasoning, generation and correction calls.
    pub generation: CompletionOptions,
    /// Sampling for the explanation call.
    pub answer: CompletionOptions,
    /// Sampling for the benchmark judge.
    pub judge: CompletionOptions,
    /// Corrections after the first generation; generator runs at most `1 + this`.
    pub max_correction_attempts: u32,
    /// Reformat retries for unparseable reasoning output.
    pub reasoning_format_retries: u32,
    pub max_input_length: usize,
    pub max_output_length: usize,
    /// Optional JSON file overriding the built-in prompt templates.
    pub prompt_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let timeout = Duration::from_secs(60);
        Self {
            generation: CompletionOptions {
                max_tokens: 4096,
                temperature: 0.1,
                timeout,
            },
            answer: CompletionOptions {
                max_tokens: 512,
                temperature: 0.1,
                timeout,
            },
            judge: CompletionOptions {
                max_tokens: 1500,
                temperature: 0.0,
                timeout,
            },
            max_correction_attempts: 2,
            reasoning_format_retries: 1,
            max_input_length: 10_000,
            max_output_length: 10_000,
            prompt_file: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `NL2SQL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("NL2SQL_MODEL_TIMEOUT_SECS")? {
            let timeout = Duration::from_secs(secs);
            config.generation.timeout = timeout;
            config.answer.timeout = timeout;
            config.judge.timeout = timeout;
        }
        if let Some(tokens) = env_parse::<u32>("NL2SQL_MAX_TOKENS")? {
            config.generation.max_tokens = tokens;
        }
        if let Some(temperature) = env_parse::<f32>("NL2SQL_TEMPERATURE")? {
            config.generation.temperature = temperature;
        }
        if let Some(attempts) = env_parse::<u32>("NL2SQL_MAX_CORRECTIONS")? {
            config.max_correction_attempts = attempts;
        }
        if let Some(len) = env_parse::<usize>("NL2SQL_MAX_INPUT_LENGTH")? {
            config.max_input_length = len;
        }
        if let Ok(path) = std::env::var("NL2SQL_PROMPTS_FILE") {
            config.prompt_file = Some(PathBuf::from(path));
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Nl2SqlError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_limits() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_correction_attempts, 2);
        assert_eq!(config.reasoning_format_retries, 1);
        assert_eq!(config.max_input_length, 10_000);
        assert_eq!(config.answer.max_tokens, 512);
        assert_eq!(config.judge.temperature, 0.0);
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        std::env::set_var("NL2SQL_TEST_ENV_PARSE", "abc");
        let parsed = env_parse::<u32>("NL2SQL_TEST_ENV_PARSE");
        assert!(matches!(parsed, Err(Nl2SqlError::Config(_))));
        std::env::remove_var("NL2SQL_TEST_ENV_PARSE");

        assert_eq!(env_parse::<u32>("NL2SQL_TEST_ENV_UNSET").unwrap(), None);
    }
}
