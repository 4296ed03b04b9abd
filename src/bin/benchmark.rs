//! Benchmark runner: scores the pipeline against a labeled dataset.

use anyhow::{bail, Result};
use clap::Parser;
use nl2sql::benchmark::{self, execution, BenchmarkHarness, BenchmarkOptions, LlmJudge};
use nl2sql::config::{ModelSettings, PipelineConfig};
use nl2sql::llm::{LlmClient, ModelClient};
use nl2sql::prompts::PromptTemplates;
use nl2sql::Nl2SqlPipeline;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nl2sql-benchmark")]
#[command(about = "Benchmark the NL-to-SQL pipeline on a Spider-style dataset")]
struct Args {
    /// Dataset JSON (array of {question, query|gold_sql, db_id, schema?})
    #[arg(long)]
    dataset: PathBuf,

    /// Spider tables.json used to build schemas
    #[arg(long)]
    tables: Option<PathBuf>,

    /// Number of samples to evaluate
    #[arg(long, default_value_t = 100, conflicts_with = "full")]
    samples: usize,

    /// Evaluate the whole dataset
    #[arg(long)]
    full: bool,

    /// Seed for sample selection
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Compare result sets on the SQLite databases
    #[arg(long)]
    execution: bool,

    /// Score semantic equivalence with an LLM judge
    #[arg(long)]
    llm_judge: bool,

    /// Directory holding <db_id>/<db_id>.sqlite databases
    #[arg(long)]
    databases_dir: Option<PathBuf>,

    /// Samples evaluated at once
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Per-sample SQL execution timeout in seconds
    #[arg(long, default_value_t = 30)]
    execution_timeout: u64,

    /// Write the JSON report here
    #[arg(long)]
    output: Option<PathBuf>,

    /// Also generate explanations (extra model call per sample)
    #[arg(long)]
    explain: bool,

    /// Check the setup without calling the model
    #[arg(long)]
    dry_run: bool,

    /// Only log warnings
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let default_level = if args.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    if !args.dataset.is_file() {
        bail!("dataset not found: {}", args.dataset.display());
    }
    if let Some(tables) = &args.tables {
        if !tables.is_file() {
            bail!("tables file not found: {}", tables.display());
        }
    }
    if args.execution && args.databases_dir.is_none() {
        bail!("--execution requires --databases-dir");
    }

    let all = benchmark::load_samples(
        &args.dataset,
        args.tables.as_deref(),
        args.databases_dir.as_deref(),
    )?;
    let dataset_size = all.len();
    let requested = (!args.full).then_some(args.samples);
    let samples = benchmark::sample(all, requested, args.seed);

    let options = BenchmarkOptions {
        execution: args.execution,
        llm_judge: args.llm_judge,
        databases_dir: args.databases_dir.clone(),
        concurrency: args.concurrency,
        include_explanation: args.explain,
        execution_timeout: Duration::from_secs(args.execution_timeout),
        seed: args.seed,
        samples: requested,
    };

    if args.dry_run {
        let missing_schema = samples.iter().filter(|s| s.schema.trim().is_empty()).count();
        println!("Dataset:          {} ({} samples)", args.dataset.display(), dataset_size);
        println!("Selected:         {} samples (seed {})", samples.len(), args.seed);
        println!("Missing schemas:  {}", missing_schema);
        if let Some(dir) = &args.databases_dir {
            let found = samples
                .iter()
                .filter(|s| execution::resolve_database(dir, &s.db_id).is_some())
                .count();
            println!("Databases found:  {}/{}", found, samples.len());
        }
        println!(
            "Model key:        {}",
            if std::env::var("OPENAI_API_KEY").is_ok() { "set" } else { "missing" }
        );
        println!("Dry run complete; no model calls made.");
        return Ok(());
    }

    let settings = ModelSettings::from_env()?;
    let config = PipelineConfig::from_env()?;
    let templates = Arc::new(match &config.prompt_file {
        Some(path) => PromptTemplates::load(path)?,
        None => PromptTemplates::default(),
    });
    let model: Arc<dyn ModelClient> = Arc::new(LlmClient::from_settings(&settings));
    info!(model = %settings.model, samples = samples.len(), "Benchmark configured");

    let judge = args
        .llm_judge
        .then(|| LlmJudge::new(Arc::clone(&model), Arc::clone(&templates), config.judge.clone()));
    let pipeline = Arc::new(Nl2SqlPipeline::new(model, config, templates));
    let harness = BenchmarkHarness::new(pipeline, judge);

    let report = harness.run(samples, &options).await;
    println!("{}", report.render_summary());

    if let Some(path) = &args.output {
        report.save(path)?;
        println!("Report written to {}", path.display());
    }

    Ok(())
}
