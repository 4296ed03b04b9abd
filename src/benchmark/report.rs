//! Aggregate benchmark results and persist them.

use super::{BenchmarkOptions, BenchmarkRecord, MetricOutcome};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub passed: usize,
    pub mismatched: usize,
    pub errors: usize,
    /// `passed` over every sample in the run; errors count as failures.
    pub rate: f64,
}

impl MetricSummary {
    fn from_outcomes<'a>(outcomes: impl Iterator<Item = &'a MetricOutcome>, total: usize) -> Self {
        let mut summary = MetricSummary::default();
        for outcome in outcomes {
            match outcome {
                MetricOutcome::Match => summary.passed += 1,
                MetricOutcome::Mismatch => summary.mismatched += 1,
                MetricOutcome::Error(_) => summary.errors += 1,
            }
        }
        summary.rate = ratio(summary.passed, total);
        summary
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub total: usize,
    pub exact_match: MetricSummary,
    pub execution: Option<MetricSummary>,
    pub judge: Option<MetricSummary>,
    pub valid_sql_rate: f64,
    pub avg_latency_ms: f64,
    pub pipeline_failures: usize,
}

impl BenchmarkSummary {
    pub fn from_records(records: &[BenchmarkRecord], options: &BenchmarkOptions) -> Self {
        let total = records.len();
        let exact_match = MetricSummary::from_outcomes(records.iter().map(|r| &r.exact_match), total);
        let execution = options.execution.then(|| {
            MetricSummary::from_outcomes(records.iter().filter_map(|r| r.execution.as_ref()), total)
        });
        let judge = options.llm_judge.then(|| {
            MetricSummary::from_outcomes(records.iter().filter_map(|r| r.judge.as_ref()), total)
        });
        let valid = records.iter().filter(|r| r.syntax_valid).count();
        let latency: u64 = records.iter().map(|r| r.latency_ms).sum();

        Self {
            total,
            exact_match,
            execution,
            judge,
            valid_sql_rate: ratio(valid, total),
            avg_latency_ms: if total == 0 { 0.0 } else { latency as f64 / total as f64 },
            pipeline_failures: records.iter().filter(|r| r.pipeline_error.is_some()).count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub options: BenchmarkOptions,
    pub summary: BenchmarkSummary,
    /// Sorted by sample id.
    pub records: Vec<BenchmarkRecord>,
}

impl BenchmarkReport {
    pub fn new(
        started_at: DateTime<Utc>,
        options: BenchmarkOptions,
        mut records: Vec<BenchmarkRecord>,
    ) -> Self {
        records.sort_by_key(|r| r.sample_id);
        let summary = BenchmarkSummary::from_records(&records, &options);
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            finished_at: Utc::now(),
            options,
            summary,
            records,
        }
    }

    /// Fixed-format console summary.
    pub fn render_summary(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        let rule = "=".repeat(60);
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "NL2SQL BENCHMARK RESULTS");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Run ID:              {}", self.run_id);
        let _ = writeln!(
            out,
            "Finished:            {}",
            self.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(out, "Samples:             {}", s.total);
        let _ = writeln!(out, "{}", "-".repeat(60));
        write_metric(&mut out, "Exact Match", Some(&s.exact_match));
        write_metric(&mut out, "Execution Accuracy", s.execution.as_ref());
        write_metric(&mut out, "LLM Judge", s.judge.as_ref());
        let _ = writeln!(out, "{}", "-".repeat(60));
        let _ = writeln!(out, "Valid SQL Rate:      {:.1}%", s.valid_sql_rate * 100.0);
        let _ = writeln!(out, "Avg Latency:         {:.0} ms", s.avg_latency_ms);
        let _ = writeln!(out, "Pipeline Failures:   {}", s.pipeline_failures);
        let _ = write!(out, "{}", rule);
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Benchmark report saved");
        Ok(())
    }
}

fn write_metric(out: &mut String, label: &str, metric: Option<&MetricSummary>) {
    let padded = format!("{}:", label);
    match metric {
        Some(m) => {
            let _ = writeln!(
                out,
                "{:<21}{:.1}% ({} passed, {} mismatched, {} errors)",
                padded,
                m.rate * 100.0,
                m.passed,
                m.mismatched,
                m.errors
            );
        }
        None => {
            let _ = writeln!(out, "{:<21}disabled", padded);
        }
    }
}
