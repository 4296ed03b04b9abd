//! NL-to-SQL Pipeline
//!
//! security gate → schema parsing → reasoning → generation →
//! verification/correction → explanation
//!
//! Stages run strictly in order for each request. The pipeline holds only
//! immutable configuration and shared handles, so one instance serves any
//! number of concurrent requests.

use crate::config::{ModelSettings, PipelineConfig};
use crate::error::{Result, Stage};
use crate::explain::AnswerGenerator;
use crate::generator::{CorrectionAttempt, QueryStatus, SqlGenerator};
use crate::llm::{LlmClient, ModelClient};
use crate::prompts::PromptTemplates;
use crate::reasoning::{ReasoningPlan, ReasoningStage};
use crate::schema;
use crate::security::{OutputValidator, SecurityGate};
use crate::verifier::{format_sql, Corrector, Verifier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageLatency {
    pub stage: Stage,
    pub millis: u64,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub include_explanation: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            include_explanation: true,
        }
    }
}

/// Everything a request produced. Built once at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub request_id: String,
    pub question: String,
    pub final_sql: String,
    pub explanation: Option<String>,
    pub reasoning: ReasoningPlan,
    pub status: QueryStatus,
    /// Outstanding verification errors; empty unless `status` is failed.
    pub errors: Vec<String>,
    pub notes: Vec<String>,
    pub corrections_made: u32,
    pub history: Vec<CorrectionAttempt>,
    pub syntax_valid: bool,
    pub schema_warnings: Vec<String>,
    pub latencies: Vec<StageLatency>,
    pub total_ms: u64,
}

#[derive(Default)]
struct StageTimer {
    latencies: Vec<StageLatency>,
}

impl StageTimer {
    fn record(&mut self, stage: Stage, started: Instant) {
        self.latencies.push(StageLatency {
            stage,
            millis: started.elapsed().as_millis() as u64,
        });
    }
}

pub struct Nl2SqlPipeline {
    gate: SecurityGate,
    reasoning: ReasoningStage,
    generator: SqlGenerator,
    corrector: Corrector,
    answers: AnswerGenerator,
    output: OutputValidator,
}

impl Nl2SqlPipeline {
    pub fn new(
        model: Arc<dyn ModelClient>,
        config: PipelineConfig,
        templates: Arc<PromptTemplates>,
    ) -> Self {
        let validator = OutputValidator::new(config.max_output_length);
        Self {
            gate: SecurityGate::new(config.max_input_length),
            reasoning: ReasoningStage::new(
                Arc::clone(&model),
                Arc::clone(&templates),
                config.generation.clone(),
                config.reasoning_format_retries,
                validator.clone(),
            ),
            generator: SqlGenerator::new(
                Arc::clone(&model),
                Arc::clone(&templates),
                config.generation.clone(),
            ),
            corrector: Corrector::new(Verifier::new(), config.max_correction_attempts),
            answers: AnswerGenerator::new(model, templates, config.answer.clone(), validator.clone()),
            output: validator,
        }
    }

    /// Pipeline backed by the OpenAI-compatible client, configured from the
    /// environment.
    pub fn from_env() -> Result<Self> {
        let settings = ModelSettings::from_env()?;
        let config = PipelineConfig::from_env()?;
        let templates = match &config.prompt_file {
            Some(path) => PromptTemplates::load(path)?,
            None => PromptTemplates::default(),
        };
        info!(model = %settings.model, base_url = %settings.base_url, "Pipeline configured");
        Ok(Self::new(
            Arc::new(LlmClient::from_settings(&settings)),
            config,
            Arc::new(templates),
        ))
    }

    pub async fn run(
        &self,
        question: &str,
        schema_text: &str,
        options: &RunOptions,
    ) -> Result<PipelineResult> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("nl2sql_request", request_id = %request_id);
        self.run_stages(request_id, question, schema_text, options)
            .instrument(span)
            .await
    }

    async fn run_stages(
        &self,
        request_id: String,
        question: &str,
        schema_text: &str,
        options: &RunOptions,
    ) -> Result<PipelineResult> {
        let started = Instant::now();
        let mut timer = StageTimer::default();

        let t = Instant::now();
        let input = self.gate.screen(question, schema_text)?;
        timer.record(Stage::Security, t);

        let t = Instant::now();
        let schema = schema::parse(&input.schema_text)?;
        timer.record(Stage::SchemaParsing, t);
        info!(tables = schema.tables.len(), warnings = schema.warnings.len(), "Schema parsed");

        let t = Instant::now();
        let plan = self.reasoning.reason(&input.question, &schema).await?;
        timer.record(Stage::Reasoning, t);

        let t = Instant::now();
        let query = self.generator.generate(&input.question, &schema, &plan).await?;
        timer.record(Stage::Generation, t);

        let t = Instant::now();
        let (mut query, verification) = self
            .corrector
            .verify_and_correct(&self.generator, &input.question, &schema, query)
            .await?;
        timer.record(Stage::Verification, t);

        let syntax_valid = match format_sql(&query.sql) {
            Some(formatted) => {
                query.sql = formatted;
                true
            }
            None => false,
        };
        self.output.check_sql(&query.sql)?;

        let errors: Vec<String> = if query.status == QueryStatus::Failed {
            verification.issues.iter().map(|i| i.to_string()).collect()
        } else {
            Vec::new()
        };

        let explanation = if options.include_explanation {
            let t = Instant::now();
            let text = self.answers.explain(&input.question, &query, &errors).await?;
            timer.record(Stage::Explanation, t);
            Some(text)
        } else {
            None
        };

        let total_ms = started.elapsed().as_millis() as u64;
        info!(
            status = %query.status,
            attempts = query.attempts,
            total_ms,
            "Pipeline finished"
        );

        Ok(PipelineResult {
            request_id,
            question: input.question,
            syntax_valid,
            final_sql: query.sql,
            explanation,
            reasoning: query.plan,
            status: query.status,
            errors,
            notes: verification.notes,
            corrections_made: query.attempts.saturating_sub(1),
            history: query.history,
            schema_warnings: schema.warnings,
            latencies: timer.latencies,
            total_ms,
        })
    }
}
