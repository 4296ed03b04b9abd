//! Scripted model client shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use nl2sql::config::PipelineConfig;
use nl2sql::llm::{CompletionOptions, ModelClient};
use nl2sql::prompts::PromptTemplates;
use nl2sql::{ModelError, Nl2SqlPipeline};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REASONING: &str = "planning a query";
/// Correction prompts embed the generation prompt, so this rule must be
/// registered before `GENERATION`.
pub const CORRECTION: &str = "previous attempt failed verification";
pub const GENERATION: &str = "Write one SQL query";
pub const ANSWER: &str = "Explain the SQL query below";
pub const FAILED_ANSWER: &str = "FAILED automatic verification";
pub const JUDGE: &str = "SEMANTICALLY EQUIVALENT";
/// A scripted reply that makes the client panic instead of answering.
pub const PANIC: &str = "<panic>";

struct Rule {
    marker: String,
    replies: Vec<String>,
    served: AtomicUsize,
}

/// Answers each prompt from the first rule whose marker it contains. A rule
/// serves its replies in order and repeats the last one once exhausted.
/// A prompt that matches no rule fails as an unavailable model.
#[derive(Default)]
pub struct ScriptedModel {
    rules: Vec<Rule>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, marker: &str, replies: &[&str]) -> Self {
        self.rules.push(Rule {
            marker: marker.to_string(),
            replies: replies.iter().map(|r| r.to_string()).collect(),
            served: AtomicUsize::new(0),
        });
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn calls_matching(&self, marker: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(marker))
            .count()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let rule = self
            .rules
            .iter()
            .find(|r| prompt.contains(&r.marker))
            .ok_or_else(|| ModelError::Unavailable("no scripted reply".to_string()))?;
        let n = rule.served.fetch_add(1, Ordering::SeqCst);
        let reply = rule
            .replies
            .get(n.min(rule.replies.len().saturating_sub(1)))
            .cloned()
            .unwrap_or_default();
        if reply == PANIC {
            panic!("scripted client panicked on purpose");
        }
        Ok(reply)
    }
}

pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    for options in [&mut config.generation, &mut config.answer, &mut config.judge] {
        options.timeout = Duration::from_secs(5);
    }
    config
}

pub fn pipeline(model: &Arc<ScriptedModel>) -> Nl2SqlPipeline {
    let client: Arc<dyn ModelClient> = model.clone();
    Nl2SqlPipeline::new(client, test_config(), Arc::new(PromptTemplates::default()))
}

pub const SHOP_SCHEMA: &str = "
CREATE TABLE customers (
    id INTEGER PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    email VARCHAR(255)
);
CREATE TABLE products (
    id INTEGER PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    category VARCHAR(50)
);
CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    customer_id INTEGER REFERENCES customers(id),
    product_id INTEGER REFERENCES products(id),
    total_amount DECIMAL(10, 2),
    created_at DATE
);
";

pub const USERS_SCHEMA: &str =
    "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT NOT NULL, email TEXT);";
