//! Answer Generator - plain-language explanation of the final query

use crate::error::{Nl2SqlError, Result, Stage};
use crate::generator::{starts_statement, GeneratedQuery, QueryStatus};
use crate::llm::{call_model, CompletionOptions, ModelClient};
use crate::prompts::{render, PromptTemplates};
use crate::security::OutputValidator;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

const LEAD_IN_PREFIXES: &[&str] = &[
    "here's the explanation:",
    "here is the explanation:",
    "explanation:",
    "answer:",
    "summary:",
];

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```.*?(```|$)").unwrap();
    /// Lines that carry on an unfenced statement.
    static ref SQL_CONTINUATION: Regex = Regex::new(
        r"(?i)^(?:(?:from|where|join|inner|left|right|full|cross|on|and|or|group\s+by|order\s+by|having|limit|offset|union|intersect|except)\b|[),])"
    )
    .unwrap();
}

/// Strip code (fenced or bare statements) and lead-in prefixes from a
/// model explanation.
pub fn clean_explanation(raw: &str) -> String {
    let without_code = CODE_FENCE.replace_all(raw, "\n");

    let mut kept = Vec::new();
    let mut in_statement = false;
    for line in without_code.lines().map(str::trim) {
        if starts_statement(line) || (in_statement && SQL_CONTINUATION.is_match(line)) {
            in_statement = !line.ends_with(';');
            continue;
        }
        in_statement = false;
        if !line.is_empty() {
            kept.push(line);
        }
    }
    let mut text = kept.join(" ");

    loop {
        let lower = text.to_lowercase();
        match LEAD_IN_PREFIXES.iter().find(|p| lower.starts_with(*p)) {
            Some(prefix) => text = text[prefix.len()..].trim().to_string(),
            None => break,
        }
    }
    text
}

pub struct AnswerGenerator {
    model: Arc<dyn ModelClient>,
    templates: Arc<PromptTemplates>,
    options: CompletionOptions,
    validator: OutputValidator,
}

impl AnswerGenerator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        templates: Arc<PromptTemplates>,
        options: CompletionOptions,
        validator: OutputValidator,
    ) -> Self {
        Self {
            model,
            templates,
            options,
            validator,
        }
    }

    /// Explain `query`. A failed query is explained with its outstanding
    /// errors and an explicit statement that it is not verified.
    pub async fn explain(
        &self,
        question: &str,
        query: &GeneratedQuery,
        outstanding: &[String],
    ) -> Result<String> {
        let prompt = if query.status == QueryStatus::Failed {
            let errors = outstanding
                .iter()
                .map(|e| format!("- {}", e))
                .collect::<Vec<_>>()
                .join("\n");
            render(
                &self.templates.failed_answer,
                &[
                    ("question", question),
                    ("sql", query.sql.as_str()),
                    ("errors", errors.as_str()),
                ],
            )
        } else {
            render(
                &self.templates.answer,
                &[("question", question), ("sql", query.sql.as_str())],
            )
        };

        let raw = call_model(self.model.as_ref(), Stage::Explanation, &prompt, &self.options).await?;
        let cleaned = clean_explanation(&raw);
        if cleaned.is_empty() {
            return Err(Nl2SqlError::UnusableOutput {
                stage: Stage::Explanation,
                reason: "model returned an empty explanation".to_string(),
            });
        }

        debug!(chars = cleaned.len(), "Explanation ready");
        self.validator.validate(Stage::Explanation, &cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_explanation() {
        let raw = "Explanation: This query totals revenue per product.\n\n```sql\nSELECT 1\n```\nThe highest earners come first.";
        assert_eq!(
            clean_explanation(raw),
            "This query totals revenue per product. The highest earners come first."
        );
        assert_eq!(clean_explanation("Answer:   It counts users."), "It counts users.");
        assert_eq!(clean_explanation("```sql\nSELECT 1\n```"), "");
    }

    #[test]
    fn test_bare_sql_lines_are_dropped() {
        let raw = "It lists every user email.\nSELECT email\nFROM users\nWHERE email IS NOT NULL;\nRows without an email are skipped.";
        assert_eq!(
            clean_explanation(raw),
            "It lists every user email. Rows without an email are skipped."
        );
        assert_eq!(
            clean_explanation("With this query you see totals.\nSELECT SUM(total) FROM orders"),
            "With this query you see totals."
        );
    }
}
