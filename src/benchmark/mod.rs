//! Benchmark Harness
//!
//! Runs labeled samples through the pipeline and scores each one on up to
//! three independent metrics: exact match, execution accuracy and an LLM
//! judge. Per-sample failures are recorded, never raised, so a run always
//! produces a report.

pub mod dataset;
pub mod exact_match;
pub mod execution;
pub mod judge;
pub mod report;

pub use dataset::{load_samples, sample, BenchmarkSample};
pub use judge::{JudgeVerdict, LlmJudge};
pub use report::{BenchmarkReport, BenchmarkSummary, MetricSummary};

use crate::generator::QueryStatus;
use crate::pipeline::{Nl2SqlPipeline, RunOptions};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum MetricOutcome {
    Match,
    Mismatch,
    Error(String),
}

impl MetricOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, MetricOutcome::Match)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkOptions {
    pub execution: bool,
    pub llm_judge: bool,
    pub databases_dir: Option<PathBuf>,
    pub concurrency: usize,
    pub include_explanation: bool,
    pub execution_timeout: Duration,
    pub seed: u64,
    /// Requested sample count; `None` for the full dataset.
    pub samples: Option<usize>,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            execution: false,
            llm_judge: false,
            databases_dir: None,
            concurrency: 4,
            include_explanation: false,
            execution_timeout: Duration::from_secs(30),
            seed: 42,
            samples: Some(100),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub sample_id: usize,
    pub question: String,
    pub gold_sql: String,
    pub db_id: String,
    pub generated_sql: Option<String>,
    pub status: Option<QueryStatus>,
    pub exact_match: MetricOutcome,
    pub execution: Option<MetricOutcome>,
    pub judge: Option<MetricOutcome>,
    pub judge_verdict: Option<JudgeVerdict>,
    pub syntax_valid: bool,
    pub latency_ms: u64,
    pub pipeline_error: Option<String>,
}

impl BenchmarkRecord {
    fn pending(sample: &BenchmarkSample, latency_ms: u64) -> Self {
        Self {
            sample_id: sample.id,
            question: sample.question.clone(),
            gold_sql: sample.gold_sql.clone(),
            db_id: sample.db_id.clone(),
            generated_sql: None,
            status: None,
            exact_match: MetricOutcome::Mismatch,
            execution: None,
            judge: None,
            judge_verdict: None,
            syntax_valid: false,
            latency_ms,
            pipeline_error: None,
        }
    }

    /// Every enabled metric becomes an error carrying `reason`.
    fn fail(&mut self, reason: String, options: &BenchmarkOptions) {
        self.exact_match = MetricOutcome::Error(reason.clone());
        self.execution = options.execution.then(|| MetricOutcome::Error(reason.clone()));
        self.judge = options.llm_judge.then(|| MetricOutcome::Error(reason.clone()));
        self.pipeline_error = Some(reason);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct BenchmarkHarness {
    pipeline: Arc<Nl2SqlPipeline>,
    judge: Option<LlmJudge>,
}

impl BenchmarkHarness {
    pub fn new(pipeline: Arc<Nl2SqlPipeline>, judge: Option<LlmJudge>) -> Self {
        Self { pipeline, judge }
    }

    pub async fn run(&self, samples: Vec<BenchmarkSample>, options: &BenchmarkOptions) -> BenchmarkReport {
        let started_at = Utc::now();
        let total = samples.len();
        let done = AtomicUsize::new(0);
        info!(
            samples = total,
            concurrency = options.concurrency,
            execution = options.execution,
            llm_judge = options.llm_judge,
            "Starting benchmark run"
        );

        let records: Vec<BenchmarkRecord> = stream::iter(samples)
            .map(|sample| {
                let done = &done;
                async move {
                    let started = Instant::now();
                    let record = match AssertUnwindSafe(self.evaluate(sample.clone(), options))
                        .catch_unwind()
                        .await
                    {
                        Ok(record) => record,
                        Err(panic) => {
                            let reason = panic_message(panic.as_ref());
                            warn!(sample = sample.id, "Sample evaluation panicked: {}", reason);
                            let mut record = BenchmarkRecord::pending(&sample, elapsed_ms(started));
                            record.fail(format!("evaluation panicked: {}", reason), options);
                            record
                        }
                    };
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if n % 10 == 0 || n == total {
                        info!("Evaluated {}/{} samples", n, total);
                    }
                    record
                }
            })
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;

        BenchmarkReport::new(started_at, options.clone(), records)
    }

    async fn evaluate(&self, sample: BenchmarkSample, options: &BenchmarkOptions) -> BenchmarkRecord {
        let started = Instant::now();
        let run_options = RunOptions {
            include_explanation: options.include_explanation,
        };
        let outcome = self
            .pipeline
            .run(&sample.question, &sample.schema, &run_options)
            .await;
        let mut record = BenchmarkRecord::pending(&sample, elapsed_ms(started));

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(sample = sample.id, stage = ?e.stage(), "Pipeline failed: {}", e);
                record.fail(format!("pipeline failed: {}", e), options);
                return record;
            }
        };

        let predicted = result.final_sql;
        record.status = Some(result.status);
        record.syntax_valid = result.syntax_valid;
        record.exact_match = if exact_match::matches(&sample.gold_sql, &predicted) {
            MetricOutcome::Match
        } else {
            MetricOutcome::Mismatch
        };

        if options.execution {
            record.execution = Some(self.execution_outcome(&sample, &predicted, options).await);
        }

        if options.llm_judge {
            let (outcome, verdict) = self.judge_outcome(&sample, &predicted).await;
            record.judge = Some(outcome);
            record.judge_verdict = verdict;
        }

        debug!(sample = sample.id, exact = record.exact_match.passed(), "Sample scored");
        record.generated_sql = Some(predicted);
        record
    }

    async fn execution_outcome(
        &self,
        sample: &BenchmarkSample,
        predicted: &str,
        options: &BenchmarkOptions,
    ) -> MetricOutcome {
        let Some(dir) = options.databases_dir.as_deref() else {
            return MetricOutcome::Error("no databases directory configured".to_string());
        };
        match execution::resolve_database(dir, &sample.db_id) {
            Some(db) => {
                execution::compare_on_database(&db, &sample.gold_sql, predicted, options.execution_timeout)
                    .await
            }
            None => MetricOutcome::Error(format!("database '{}' not found", sample.db_id)),
        }
    }

    async fn judge_outcome(
        &self,
        sample: &BenchmarkSample,
        predicted: &str,
    ) -> (MetricOutcome, Option<JudgeVerdict>) {
        let Some(judge) = &self.judge else {
            return (MetricOutcome::Error("judge is not configured".to_string()), None);
        };
        match judge
            .judge(&sample.question, &sample.schema, &sample.gold_sql, predicted)
            .await
        {
            Ok(verdict) => {
                let outcome = if verdict.is_equivalent {
                    MetricOutcome::Match
                } else {
                    MetricOutcome::Mismatch
                };
                (outcome, Some(verdict))
            }
            Err(e) => {
                warn!(sample = sample.id, "Judge failed: {}", e);
                (MetricOutcome::Error(e.to_string()), None)
            }
        }
    }
}
