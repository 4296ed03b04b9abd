use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Security,
    SchemaParsing,
    Reasoning,
    Generation,
    Verification,
    Correction,
    Explanation,
    Judge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Security => "security",
            Stage::SchemaParsing => "schema_parsing",
            Stage::Reasoning => "reasoning",
            Stage::Generation => "generation",
            Stage::Verification => "verification",
            Stage::Correction => "correction",
            Stage::Explanation => "explanation",
            Stage::Judge => "judge",
        };
        f.write_str(name)
    }
}

/// Which user input tripped the security gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputField {
    Question,
    Schema,
}

impl fmt::Display for InputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputField::Question => f.write_str("question"),
            InputField::Schema => f.write_str("schema"),
        }
    }
}

/// Failures of the model boundary. Kept apart from `Nl2SqlError` so a
/// "model is down" failure is never confused with unusable model output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum Nl2SqlError {
    #[error("Input rejected ({field}): {reason}")]
    InjectionDetected {
        field: InputField,
        reason: String,
        patterns: Vec<String>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Schema parse error: {0}")]
    SchemaParse(String),

    #[error("Reasoning output unparseable after {attempts} attempts: {reason}")]
    ReasoningFormat { attempts: u32, reason: String },

    #[error("{stage} stage: {source}")]
    Model {
        stage: Stage,
        #[source]
        source: ModelError,
    },

    #[error("{stage} stage produced unusable output: {reason}")]
    UnusableOutput { stage: Stage, reason: String },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Nl2SqlError {
    pub fn model(stage: Stage, source: ModelError) -> Self {
        Nl2SqlError::Model { stage, source }
    }

    /// Stage to blame in user-visible failures. `None` for errors raised
    /// outside the request pipeline (datasets, configuration, IO).
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Nl2SqlError::InjectionDetected { .. } | Nl2SqlError::InvalidInput(_) => {
                Some(Stage::Security)
            }
            Nl2SqlError::SchemaParse(_) => Some(Stage::SchemaParsing),
            Nl2SqlError::ReasoningFormat { .. } => Some(Stage::Reasoning),
            Nl2SqlError::Model { stage, .. } | Nl2SqlError::UnusableOutput { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }

    /// True when the model itself could not be reached in time, as opposed
    /// to the model answering with something unusable.
    pub fn is_model_outage(&self) -> bool {
        matches!(self, Nl2SqlError::Model { .. })
    }
}

pub type Result<T> = std::result::Result<T, Nl2SqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_attribution() {
        let err = Nl2SqlError::model(Stage::Reasoning, ModelError::Timeout(Duration::from_secs(3)));
        assert_eq!(err.stage(), Some(Stage::Reasoning));
        assert!(err.is_model_outage());
        assert!(err.to_string().starts_with("reasoning stage"));

        let err = Nl2SqlError::SchemaParse("no CREATE TABLE statement found".to_string());
        assert_eq!(err.stage(), Some(Stage::SchemaParsing));
        assert!(!err.is_model_outage());

        let err = Nl2SqlError::Dataset("missing file".to_string());
        assert_eq!(err.stage(), None);
    }
}
