use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nl2sql::{schema, Nl2SqlPipeline, RunOptions};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nl2sql")]
#[command(about = "Translate natural-language questions into verified SQL")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate SQL for a question against a schema file
    Generate {
        /// The question in natural language
        question: String,

        /// File holding the CREATE TABLE statements
        #[arg(short, long)]
        schema: PathBuf,

        /// Skip the plain-language explanation
        #[arg(long)]
        no_explain: bool,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse a schema file and print its canonical form
    Schema {
        /// File holding the CREATE TABLE statements
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    match Args::parse().command {
        Command::Generate {
            question,
            schema,
            no_explain,
            json,
        } => {
            let schema_text = std::fs::read_to_string(&schema)
                .with_context(|| format!("reading schema file {}", schema.display()))?;
            let pipeline = Nl2SqlPipeline::from_env()?;
            let options = RunOptions {
                include_explanation: !no_explain,
            };

            info!("Question: {}", question);
            let result = pipeline.run(&question, &schema_text, &options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            println!("\n=== Reasoning ===");
            for step in result.reasoning.step_texts() {
                println!("  {}", step);
            }
            println!("\n=== SQL ({}) ===", result.status);
            println!("{}", result.final_sql);
            if !result.errors.is_empty() {
                println!("\n=== Outstanding errors ===");
                for err in &result.errors {
                    println!("  - {}", err);
                }
            }
            if let Some(explanation) = &result.explanation {
                println!("\n=== Explanation ===");
                println!("{}", explanation);
            }
            println!("\n({} corrections, {} ms)", result.corrections_made, result.total_ms);
        }
        Command::Schema { path } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading schema file {}", path.display()))?;
            let parsed = schema::parse(&text)?;
            println!("{}", parsed.canonical_text());
            for warning in &parsed.warnings {
                eprintln!("warning: {}", warning);
            }
        }
    }

    Ok(())
}
