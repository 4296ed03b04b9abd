pub mod api;
pub mod benchmark;
pub mod config;
pub mod error;
pub mod explain;
pub mod generator;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod reasoning;
pub mod schema;
pub mod security;
pub mod verifier;

pub use error::{ModelError, Nl2SqlError, Result, Stage};
pub use llm::{CompletionOptions, LlmClient, ModelClient};
pub use pipeline::{Nl2SqlPipeline, PipelineResult, RunOptions};
