//! Web boundary types and the request handler shared by the server binary.

use crate::error::{Nl2SqlError, Stage};
use crate::generator::QueryStatus;
use crate::pipeline::{Nl2SqlPipeline, PipelineResult, RunOptions};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const SQL_SAFETY_DISCLAIMER: &str = "Generated SQL is not executed. Review it before running it against a real database, and run it with read-only credentials.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub question: String,
    #[serde(alias = "schema")]
    pub schema_text: String,
    #[serde(default = "default_true")]
    pub include_explanation: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub final_sql: String,
    pub explanation: Option<String>,
    pub reasoning_steps: Vec<String>,
    pub status: QueryStatus,
    pub errors: Vec<String>,
    pub notes: Vec<String>,
    pub corrections_made: u32,
    pub disclaimer: String,
}

impl From<PipelineResult> for GenerateResponse {
    fn from(result: PipelineResult) -> Self {
        Self {
            final_sql: result.final_sql,
            explanation: result.explanation,
            reasoning_steps: result.reasoning.step_texts(),
            status: result.status,
            errors: result.errors,
            notes: result.notes,
            corrections_made: result.corrections_made,
            disclaimer: SQL_SAFETY_DISCLAIMER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Failing stage; absent for failures outside the pipeline.
    pub stage: Option<Stage>,
    pub error: String,
}

impl ErrorResponse {
    /// HTTP status for this failure: rejected input is the caller's fault,
    /// a model outage is upstream.
    pub fn http_status(&self) -> u16 {
        match self.stage {
            Some(Stage::Security) | Some(Stage::SchemaParsing) | None => 400,
            Some(_) => 502,
        }
    }
}

impl From<&Nl2SqlError> for ErrorResponse {
    fn from(err: &Nl2SqlError) -> Self {
        Self {
            stage: err.stage(),
            error: err.to_string(),
        }
    }
}

/// Run one request through the pipeline.
pub async fn handle_generate(
    pipeline: &Nl2SqlPipeline,
    request: GenerateRequest,
) -> Result<GenerateResponse, ErrorResponse> {
    let options = RunOptions {
        include_explanation: request.include_explanation,
    };
    match pipeline.run(&request.question, &request.schema_text, &options).await {
        Ok(result) => Ok(result.into()),
        Err(e) => {
            warn!(stage = ?e.stage(), "Request failed: {}", e);
            Err(ErrorResponse::from(&e))
        }
    }
}
