//! Output Validator
//!
//! Model text is screened before it reaches the user: responses that echo
//! the hidden prompt or look like credentials are rejected outright, and
//! overlong text is cut with a visible marker.

use crate::error::{Nl2SqlError, Result, Stage};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

pub const TRUNCATION_MARKER: &str = " … [truncated]";

lazy_static! {
    static ref LEAKAGE_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("system prompt echo", Regex::new(r"(?i)system\s*prompt\s*:").unwrap()),
        ("api key", Regex::new(r"(?i)api[_\s]?key\s*[:=]").unwrap()),
        ("instruction echo", Regex::new(r"(?i)instructions?\s*:\s*\d+\.").unwrap()),
        ("numbered rule echo", Regex::new(r"(?i)(instruction|rule)\s*\d+\s*:").unwrap()),
        ("security rules block", Regex::new(r"(?i)===\s*security\s+rules").unwrap()),
        ("password", Regex::new(r"(?i)password\s*[:=]\s*\w+").unwrap()),
        ("secret", Regex::new(r"(?i)secret\s*[:=]\s*\w+").unwrap()),
        ("token", Regex::new(r"(?i)token\s*[:=]\s*\w+").unwrap()),
        ("openai key", Regex::new(r"\bsk-[A-Za-z0-9]{16,}").unwrap()),
    ];
}

#[derive(Debug, Clone)]
pub struct OutputValidator {
    max_length: usize,
}

impl OutputValidator {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Reject leaked prompt text or credentials. Returns the names of the
    /// patterns that matched inside the error reason.
    pub fn check(&self, stage: Stage, text: &str) -> Result<()> {
        let hits: Vec<&str> = LEAKAGE_PATTERNS
            .iter()
            .filter(|(_, regex)| regex.is_match(text))
            .map(|(label, _)| *label)
            .collect();

        if hits.is_empty() {
            return Ok(());
        }

        warn!(
            event = "security.output_leakage",
            %stage,
            patterns = ?hits,
            "Model output rejected"
        );
        Err(Nl2SqlError::UnusableOutput {
            stage,
            reason: format!("output contains sensitive content ({})", hits.join(", ")),
        })
    }

    /// `check`, then cut to the configured length with a visible marker.
    pub fn validate(&self, stage: Stage, text: &str) -> Result<String> {
        self.check(stage, text)?;
        Ok(truncate_with_marker(text, self.max_length))
    }
}

impl OutputValidator {
    /// `check` for generated SQL. Truncated SQL is useless, so an overlong
    /// query is rejected instead of cut.
    pub fn check_sql(&self, sql: &str) -> Result<()> {
        self.check(Stage::Generation, sql)?;
        let chars = sql.chars().count();
        if chars > self.max_length {
            return Err(Nl2SqlError::UnusableOutput {
                stage: Stage::Generation,
                reason: format!(
                    "generated SQL is {} characters, limit is {}",
                    chars, self.max_length
                ),
            });
        }
        Ok(())
    }
}

pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}
