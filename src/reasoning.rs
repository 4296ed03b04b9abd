//! Reasoning Stage - Chain-of-thought planning before SQL generation
//!
//! The model is asked for numbered, tagged steps (`1. [tables_needed] ...`).
//! Its answer is parsed into a [`ReasoningPlan`]; an answer that cannot be
//! parsed gets one stricter retry before the request fails.

use crate::error::{Nl2SqlError, Result, Stage};
use crate::llm::{call_model, CompletionOptions, ModelClient};
use crate::prompts::{render, PromptTemplates};
use crate::schema::Schema;
use crate::security::OutputValidator;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTag {
    TablesNeeded,
    JoinPath,
    Filter,
    Aggregation,
    Ordering,
    Other,
}

impl StepTag {
    /// Map a tag label to a tag, accepting common synonyms. Unrecognized
    /// labels become `Other`.
    pub fn from_label(label: &str) -> StepTag {
        let key = label
            .trim()
            .to_lowercase()
            .replace([' ', '-'], "_");
        match key.as_str() {
            "tables_needed" | "tables" | "table" | "tables_required" | "source_tables" => {
                StepTag::TablesNeeded
            }
            "join_path" | "join" | "joins" | "join_paths" | "relationships" => StepTag::JoinPath,
            "filter" | "filters" | "where" | "condition" | "conditions" => StepTag::Filter,
            "aggregation" | "aggregations" | "aggregate" | "group" | "grouping" | "group_by" => {
                StepTag::Aggregation
            }
            "ordering" | "order" | "order_by" | "sort" | "sorting" | "limit" => StepTag::Ordering,
            _ => StepTag::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepTag::TablesNeeded => "tables_needed",
            StepTag::JoinPath => "join_path",
            StepTag::Filter => "filter",
            StepTag::Aggregation => "aggregation",
            StepTag::Ordering => "ordering",
            StepTag::Other => "other",
        }
    }
}

impl fmt::Display for StepTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub tag: StepTag,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningPlan {
    pub steps: Vec<ReasoningStep>,
    /// Schema tables mentioned anywhere in the plan, by their schema name.
    pub tables: BTreeSet<String>,
    /// Model output exactly as received.
    pub raw: String,
    /// Earlier drafts replaced by the reformat retry.
    pub superseded: Vec<String>,
}

impl ReasoningPlan {
    pub fn steps_with(&self, tag: StepTag) -> impl Iterator<Item = &ReasoningStep> {
        self.steps.iter().filter(move |s| s.tag == tag)
    }

    /// Join-path statements from the plan, if the model gave any.
    pub fn join_path(&self) -> Option<String> {
        let joins: Vec<&str> = self
            .steps_with(StepTag::JoinPath)
            .map(|s| s.text.as_str())
            .collect();
        if joins.is_empty() {
            None
        } else {
            Some(joins.join("; "))
        }
    }

    /// Steps as numbered `N. [tag] text` lines.
    pub fn render_steps(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. [{}] {}", i + 1, s.tag, s.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn step_texts(&self) -> Vec<String> {
        self.steps
            .iter()
            .map(|s| format!("[{}] {}", s.tag, s.text))
            .collect()
    }
}

/// Result of parsing one model answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(ReasoningPlan),
    Failed(String),
}

lazy_static! {
    static ref STEP_LINE: Regex = Regex::new(
        r"^\s*(?:[-*•]\s*)?(?:\d+[.)]\s*)?\*{0,2}\[\s*([A-Za-z_ \-]+?)\s*\]\*{0,2}\s*[:\-]?\s*(.+)$"
    )
    .unwrap();
}

/// Parse a model answer. Well-formed means at least one tagged step and at
/// least one `tables_needed` step; untagged lines after a step continue it.
pub fn parse_plan(raw: &str, schema: &Schema) -> ParseOutcome {
    let mut steps: Vec<ReasoningStep> = Vec::new();

    for line in raw.lines() {
        if let Some(caps) = STEP_LINE.captures(line) {
            steps.push(ReasoningStep {
                tag: StepTag::from_label(&caps[1]),
                text: caps[2].trim().to_string(),
            });
        } else if let Some(last) = steps.last_mut() {
            let extra = line.trim();
            if !extra.is_empty() && !extra.starts_with("```") {
                last.text.push(' ');
                last.text.push_str(extra);
            }
        }
    }

    if steps.is_empty() {
        return ParseOutcome::Failed("no tagged steps found".to_string());
    }
    if !steps.iter().any(|s| s.tag == StepTag::TablesNeeded) {
        return ParseOutcome::Failed("no [tables_needed] step".to_string());
    }

    let tables = mentioned_tables(&steps, schema);
    ParseOutcome::Parsed(ReasoningPlan {
        steps,
        tables,
        raw: raw.to_string(),
        superseded: Vec::new(),
    })
}

fn mentioned_tables(steps: &[ReasoningStep], schema: &Schema) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    for table in &schema.tables {
        let pattern = format!(
            r"(?i)(?:^|[^A-Za-z0-9_]){}(?:$|[^A-Za-z0-9_])",
            regex::escape(&table.name)
        );
        let Ok(re) = Regex::new(&pattern) else { continue };
        if steps.iter().any(|s| re.is_match(&s.text)) {
            found.insert(table.name.clone());
        }
    }
    found
}

pub struct ReasoningStage {
    model: Arc<dyn ModelClient>,
    templates: Arc<PromptTemplates>,
    options: CompletionOptions,
    format_retries: u32,
    validator: OutputValidator,
}

impl ReasoningStage {
    pub fn new(
        model: Arc<dyn ModelClient>,
        templates: Arc<PromptTemplates>,
        options: CompletionOptions,
        format_retries: u32,
        validator: OutputValidator,
    ) -> Self {
        Self {
            model,
            templates,
            options,
            format_retries,
            validator,
        }
    }

    pub async fn reason(&self, question: &str, schema: &Schema) -> Result<ReasoningPlan> {
        let canonical = schema.canonical_text();
        let base_prompt = render(
            &self.templates.reasoning,
            &[("schema", canonical.as_str()), ("question", question)],
        );

        let attempts = 1 + self.format_retries;
        let mut superseded = Vec::new();
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            let prompt = if attempt == 1 {
                base_prompt.clone()
            } else {
                format!("{}{}", base_prompt, self.templates.reasoning_strict_suffix)
            };

            let raw = call_model(self.model.as_ref(), Stage::Reasoning, &prompt, &self.options).await?;
            self.validator.check(Stage::Reasoning, &raw)?;

            match parse_plan(&raw, schema) {
                ParseOutcome::Parsed(mut plan) => {
                    plan.superseded = superseded;
                    info!(
                        steps = plan.steps.len(),
                        tables = ?plan.tables,
                        attempt,
                        "Reasoning plan ready"
                    );
                    return Ok(plan);
                }
                ParseOutcome::Failed(reason) => {
                    warn!(attempt, %reason, "Reasoning output not in the expected format");
                    superseded.push(raw);
                    last_reason = reason;
                }
            }
        }

        Err(Nl2SqlError::ReasoningFormat {
            attempts,
            reason: last_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Replies(Mutex<VecDeque<String>>);

    #[async_trait]
    impl ModelClient for Replies {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> std::result::Result<String, ModelError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ModelError::Unavailable("no reply scripted".into()))
        }
    }

    fn schema() -> Schema {
        crate::schema::parse(
            "CREATE TABLE orders (id INT PRIMARY KEY, product_id INT, total_amount REAL);\n\
             CREATE TABLE products (id INT PRIMARY KEY, name TEXT);",
        )
        .unwrap()
    }

    fn stage(replies: &[&str]) -> ReasoningStage {
        let model = Replies(Mutex::new(replies.iter().map(|s| s.to_string()).collect()));
        ReasoningStage::new(
            Arc::new(model),
            Arc::new(PromptTemplates::default()),
            CompletionOptions {
                max_tokens: 100,
                temperature: 0.0,
                timeout: Duration::from_secs(1),
            },
            1,
            OutputValidator::new(10_000),
        )
    }

    #[test]
    fn test_parse_plan_with_synonyms_and_continuations() {
        let raw = "Here is the plan:\n\
                   1. [tables] orders holds the totals\n\
                   2) [Join] orders.product_id = products.id\n   joined once\n\
                   - [group by] sum total_amount per product\n\
                   4. [sort]: highest first";
        let ParseOutcome::Parsed(plan) = parse_plan(raw, &schema()) else {
            panic!("plan should parse");
        };
        let tags: Vec<StepTag> = plan.steps.iter().map(|s| s.tag).collect();
        assert_eq!(
            tags,
            vec![
                StepTag::TablesNeeded,
                StepTag::JoinPath,
                StepTag::Aggregation,
                StepTag::Ordering
            ]
        );
        assert_eq!(plan.steps[1].text, "orders.product_id = products.id joined once");
        assert_eq!(plan.steps[3].text, "highest first");
        assert_eq!(
            plan.tables.iter().cloned().collect::<Vec<_>>(),
            vec!["orders".to_string(), "products".to_string()]
        );
        assert_eq!(plan.raw, raw);
        assert_eq!(plan.join_path().unwrap(), "orders.product_id = products.id joined once");
    }

    #[test]
    fn test_parse_plan_failures() {
        assert_eq!(
            parse_plan("Just sum the orders.", &schema()),
            ParseOutcome::Failed("no tagged steps found".to_string())
        );
        assert!(matches!(
            parse_plan("1. [filter] status = 'paid'", &schema()),
            ParseOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_reason_retries_once_then_keeps_draft() {
        let stage = stage(&["I would sum the orders.", "1. [tables_needed] orders"]);
        let plan = stage.reason("total revenue", &schema()).await.unwrap();
        assert_eq!(plan.superseded, vec!["I would sum the orders.".to_string()]);
        assert!(plan.tables.contains("orders"));
    }

    #[tokio::test]
    async fn test_reason_fails_after_retry() {
        let stage = stage(&["prose", "more prose"]);
        match stage.reason("total revenue", &schema()).await {
            Err(Nl2SqlError::ReasoningFormat { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
