//! LLM-as-judge semantic equivalence.

use super::exact_match;
use crate::error::{Nl2SqlError, Result, Stage};
use crate::llm::{call_model, CompletionOptions, ModelClient};
use crate::prompts::{render, PromptTemplates};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

lazy_static! {
    static ref JSON_FENCE: Regex = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub is_equivalent: bool,
    #[serde(default = "default_confidence")]
    pub confidence: String,
    #[serde(default)]
    pub total_score: f64,
    #[serde(default)]
    pub summary: String,
    /// Decided without a model call.
    #[serde(default)]
    pub short_circuit: bool,
}

fn default_confidence() -> String {
    "low".to_string()
}

impl JudgeVerdict {
    fn decided(is_equivalent: bool, summary: &str) -> Self {
        Self {
            is_equivalent,
            confidence: "high".to_string(),
            total_score: if is_equivalent { 5.0 } else { 0.0 },
            summary: summary.to_string(),
            short_circuit: true,
        }
    }
}

/// Decide without the model when the answer is obvious.
pub fn quick_equivalence(gold_sql: &str, predicted_sql: &str) -> Option<JudgeVerdict> {
    if predicted_sql.trim().is_empty() {
        return Some(JudgeVerdict::decided(false, "No SQL was generated."));
    }
    if exact_match::matches(gold_sql, predicted_sql) {
        return Some(JudgeVerdict::decided(true, "Queries are identical after normalization."));
    }
    None
}

/// Parse the judge's JSON reply. Code fences are stripped; if the reply
/// still is not JSON, the first `{ ... }` span inside it is tried.
pub fn parse_verdict(response: &str) -> Result<JudgeVerdict> {
    let body = match JSON_FENCE.captures(response) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).to_string(),
        None => response.trim().to_string(),
    };

    if let Ok(verdict) = serde_json::from_str::<JudgeVerdict>(&body) {
        return Ok(verdict);
    }

    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if start < end {
            if let Ok(verdict) = serde_json::from_str::<JudgeVerdict>(&body[start..=end]) {
                return Ok(verdict);
            }
        }
    }

    Err(Nl2SqlError::UnusableOutput {
        stage: Stage::Judge,
        reason: format!(
            "judge reply is not a JSON verdict: {}",
            response.chars().take(120).collect::<String>()
        ),
    })
}

pub struct LlmJudge {
    model: Arc<dyn ModelClient>,
    templates: Arc<PromptTemplates>,
    options: CompletionOptions,
}

impl LlmJudge {
    pub fn new(
        model: Arc<dyn ModelClient>,
        templates: Arc<PromptTemplates>,
        options: CompletionOptions,
    ) -> Self {
        Self {
            model,
            templates,
            options,
        }
    }

    pub async fn judge(
        &self,
        question: &str,
        schema: &str,
        gold_sql: &str,
        predicted_sql: &str,
    ) -> Result<JudgeVerdict> {
        if let Some(verdict) = quick_equivalence(gold_sql, predicted_sql) {
            debug!(equivalent = verdict.is_equivalent, "Judge short-circuited");
            return Ok(verdict);
        }

        let prompt = render(
            &self.templates.judge,
            &[
                ("question", question),
                ("schema", schema),
                ("gold_sql", gold_sql),
                ("predicted_sql", predicted_sql),
            ],
        );
        let raw = call_model(self.model.as_ref(), Stage::Judge, &prompt, &self.options).await?;
        let mut verdict = parse_verdict(&raw)?;
        verdict.short_circuit = false;
        Ok(verdict)
    }
}
