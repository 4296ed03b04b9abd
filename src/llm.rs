use crate::config::ModelSettings;
use crate::error::{ModelError, Nl2SqlError, Result, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Sampling parameters and the bounded wait for one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

/// Text-completion capability the pipeline depends on. The core treats the
/// response as plain text and assumes nothing about its shape.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> std::result::Result<String, ModelError>;
}

/// Call the model on behalf of `stage`, enforcing the per-call timeout no
/// matter how the client is implemented.
pub async fn call_model(
    model: &dyn ModelClient,
    stage: Stage,
    prompt: &str,
    options: &CompletionOptions,
) -> Result<String> {
    debug!(%stage, prompt_chars = prompt.len(), "Calling model");
    match tokio::time::timeout(options.timeout, model.complete(prompt, options)).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => {
            warn!(%stage, "Model call failed: {}", e);
            Err(Nl2SqlError::model(stage, e))
        }
        Err(_) => {
            warn!(%stage, "Model call timed out after {:?}", options.timeout);
            Err(Nl2SqlError::model(stage, ModelError::Timeout(options.timeout)))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &ModelSettings) -> Self {
        Self::new(
            settings.api_key.clone(),
            settings.model.clone(),
            settings.base_url.clone(),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ModelClient for LlmClient {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> std::result::Result<String, ModelError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout(options.timeout)
                } else {
                    ModelError::Unavailable(format!("LLM API call failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let hint = match status.as_u16() {
                401 | 403 => "check OPENAI_API_KEY",
                404 => "check OPENAI_MODEL and OPENAI_BASE_URL",
                429 => "rate limit exceeded, retry later",
                _ => "upstream error",
            };
            return Err(ModelError::Unavailable(format!(
                "HTTP {} ({}): {}",
                status,
                hint,
                text.chars().take(300).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(options.timeout)
            } else {
                ModelError::Unavailable(format!("Failed to parse LLM response: {}", e))
            }
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::Unavailable("No content in LLM response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowModel;

    #[async_trait]
    impl ModelClient for SlowModel {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> std::result::Result<String, ModelError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    struct DownModel;

    #[async_trait]
    impl ModelClient for DownModel {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> std::result::Result<String, ModelError> {
            Err(ModelError::Unavailable("connection refused".to_string()))
        }
    }

    fn options(timeout: Duration) -> CompletionOptions {
        CompletionOptions {
            max_tokens: 16,
            temperature: 0.0,
            timeout,
        }
    }

    #[tokio::test]
    async fn test_call_model_times_out() {
        let err = call_model(&SlowModel, Stage::Generation, "p", &options(Duration::from_millis(20)))
            .await
            .unwrap_err();
        match err {
            Nl2SqlError::Model { stage, source: ModelError::Timeout(_) } => {
                assert_eq!(stage, Stage::Generation)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_call_model_tags_unavailable_with_stage() {
        let err = call_model(&DownModel, Stage::Explanation, "p", &options(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Explanation));
        assert!(err.is_model_outage());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = LlmClient::new("k".into(), "m".into(), "http://localhost:8000/v1/".into());
        assert_eq!(client.base_url, "http://localhost:8000/v1");
        assert_eq!(client.model(), "m");
    }
}
