//! SQL Generator
//!
//! Turns the question, canonical schema and reasoning plan into a single
//! SQL query. The model's answer is treated as untrusted text: the query is
//! cut out of whatever prose or fencing surrounds it.

use crate::error::{Result, Stage};
use crate::llm::{call_model, CompletionOptions, ModelClient};
use crate::prompts::{render, PromptTemplates};
use crate::reasoning::ReasoningPlan;
use crate::schema::Schema;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Unverified,
    Valid,
    Corrected,
    Failed,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryStatus::Unverified => "unverified",
            QueryStatus::Valid => "valid",
            QueryStatus::Corrected => "corrected",
            QueryStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A rejected attempt, kept for transparency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionAttempt {
    pub sql: String,
    pub issue: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub sql: String,
    pub plan: ReasoningPlan,
    /// Generator invocations so far, the first generation included.
    pub attempts: u32,
    pub status: QueryStatus,
    pub history: Vec<CorrectionAttempt>,
}

lazy_static! {
    static ref SQL_FENCE: Regex = Regex::new(r"(?is)```[ \t]*sql[ \t]*\r?\n?(.*?)```").unwrap();
    /// A line opening a query: SELECT, or WITH followed by `name AS (`.
    static ref STATEMENT_START_LINE: Regex = Regex::new(
        r#"(?im)^[ \t]*(?:select\b|with\s+(?:recursive\s+)?[\w"`\[\]]+(?:\s*\([^)]*\))?\s+as\s*\()"#
    )
    .unwrap();
    static ref SELECT_WORD: Regex = Regex::new(r"(?i)\bselect\b").unwrap();
}

/// Pull the SQL out of a model answer: the first ```sql block, else the
/// first statement starting with SELECT or WITH, else the trimmed answer.
pub fn extract_sql(response: &str) -> String {
    if let Some(caps) = SQL_FENCE.captures(response) {
        let sql = strip_terminator(caps[1].trim());
        if !sql.is_empty() {
            return sql;
        }
    }

    let start = STATEMENT_START_LINE
        .find(response)
        .map(|m| m.start())
        .or_else(|| SELECT_WORD.find(response).map(|m| m.start()));
    if let Some(start) = start {
        let candidate = &response[start..];
        let end = statement_end(candidate);
        return strip_terminator(candidate[..end].trim());
    }

    strip_terminator(response.trim())
}

/// True when `line` opens a SELECT or WITH query.
pub fn starts_statement(line: &str) -> bool {
    STATEMENT_START_LINE
        .find(line)
        .map_or(false, |m| line[..m.start()].trim().is_empty())
}

/// Byte offset of the first top-level `;` or closing fence.
fn statement_end(text: &str) -> usize {
    let mut quote: Option<char> = None;
    let mut depth = 0i32;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth -= 1,
            ';' if depth <= 0 => return i,
            _ => {}
        }
        if text[i..].starts_with("```") {
            return i;
        }
    }
    text.len()
}

fn strip_terminator(sql: &str) -> String {
    sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .trim()
        .to_string()
}

/// Join path text for the prompt: the plan's own join steps, else the
/// foreign keys connecting the planned tables.
pub fn describe_join_path(plan: &ReasoningPlan, schema: &Schema) -> String {
    if let Some(path) = plan.join_path() {
        return path;
    }
    let planned = |name: &str| plan.tables.iter().any(|t| t.eq_ignore_ascii_case(name));
    let edges: Vec<String> = schema
        .foreign_keys()
        .into_iter()
        .filter(|(t, _, r)| planned(&t.name) && planned(&r.table))
        .map(|(t, c, r)| format!("{}.{} = {}.{}", t.name, c.name, r.table, r.column))
        .collect();
    if edges.is_empty() {
        "no joins required".to_string()
    } else {
        edges.join("; ")
    }
}

pub struct SqlGenerator {
    model: Arc<dyn ModelClient>,
    templates: Arc<PromptTemplates>,
    options: CompletionOptions,
}

impl SqlGenerator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        templates: Arc<PromptTemplates>,
        options: CompletionOptions,
    ) -> Self {
        Self {
            model,
            templates,
            options,
        }
    }

    fn generation_prompt(&self, question: &str, schema: &Schema, plan: &ReasoningPlan) -> String {
        let canonical = schema.canonical_text();
        let steps = plan.render_steps();
        let join_path = describe_join_path(plan, schema);
        render(
            &self.templates.generation,
            &[
                ("schema", canonical.as_str()),
                ("question", question),
                ("plan", steps.as_str()),
                ("join_path", join_path.as_str()),
            ],
        )
    }

    /// First generation. One model call; the query starts `Unverified`.
    pub async fn generate(
        &self,
        question: &str,
        schema: &Schema,
        plan: &ReasoningPlan,
    ) -> Result<GeneratedQuery> {
        let prompt = self.generation_prompt(question, schema, plan);
        let response = call_model(self.model.as_ref(), Stage::Generation, &prompt, &self.options).await?;
        let sql = extract_sql(&response);
        info!(sql_chars = sql.len(), "Generated SQL");

        Ok(GeneratedQuery {
            sql,
            plan: plan.clone(),
            attempts: 1,
            status: QueryStatus::Unverified,
            history: Vec::new(),
        })
    }

    /// Correction call: the generation prompt plus the detected error, the
    /// schema and the faulty SQL. Returns the new candidate SQL.
    pub async fn regenerate(
        &self,
        question: &str,
        schema: &Schema,
        query: &GeneratedQuery,
        error: &str,
        attempt: u32,
        max_attempts: u32,
    ) -> Result<String> {
        let canonical = schema.canonical_text();
        let attempt = attempt.to_string();
        let max_attempts = max_attempts.to_string();
        let correction = render(
            &self.templates.correction,
            &[
                ("sql", query.sql.as_str()),
                ("error", error),
                ("schema", canonical.as_str()),
                ("attempt", attempt.as_str()),
                ("max_attempts", max_attempts.as_str()),
            ],
        );
        let prompt = format!(
            "{}{}",
            self.generation_prompt(question, schema, &query.plan),
            correction
        );

        let response = call_model(self.model.as_ref(), Stage::Correction, &prompt, &self.options).await?;
        let sql = extract_sql(&response);
        debug!(%error, "Regenerated SQL after verification failure");
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_sql_fence() {
        let response = "Sure! Here it is:\n```sql\nSELECT name FROM users;\n```\nThis lists names.";
        assert_eq!(extract_sql(response), "SELECT name FROM users");
    }

    #[test]
    fn test_extract_statement_from_prose() {
        let response = "The query is:\nSELECT a, ';' AS sep FROM t WHERE b IN (SELECT 1; ) ;\nIt returns a.";
        assert_eq!(extract_sql(response), "SELECT a, ';' AS sep FROM t WHERE b IN (SELECT 1; )");

        let with = "WITH x AS (SELECT 1 AS v)\nSELECT v FROM x";
        assert_eq!(extract_sql(with), with);

        let unlabeled = "```\nSELECT 1\n```";
        assert_eq!(extract_sql(unlabeled), "SELECT 1");
    }

    #[test]
    fn test_prose_opening_with_with_is_not_sql() {
        let response = "With the users table we can count rows.\nSELECT count(*) FROM users;";
        assert_eq!(extract_sql(response), "SELECT count(*) FROM users");

        let recursive = "Here:\nWITH RECURSIVE r(n) AS (SELECT 1) SELECT n FROM r";
        assert_eq!(extract_sql(recursive), "WITH RECURSIVE r(n) AS (SELECT 1) SELECT n FROM r");

        assert!(starts_statement("  select id from users"));
        assert!(starts_statement("WITH totals AS ("));
        assert!(!starts_statement("With this query you get totals"));
        assert!(!starts_statement("The query uses SELECT"));
    }

    #[test]
    fn test_extract_falls_back_to_trimmed_text() {
        assert_eq!(extract_sql("  I cannot answer that.  "), "I cannot answer that.");
    }

    #[test]
    fn test_join_path_from_foreign_keys() {
        let schema = crate::schema::parse(
            "CREATE TABLE users (id INT PRIMARY KEY);\nCREATE TABLE orders (id INT PRIMARY KEY, user_id INT REFERENCES users(id));",
        )
        .unwrap();
        let crate::reasoning::ParseOutcome::Parsed(plan) =
            crate::reasoning::parse_plan("1. [tables_needed] users and orders", &schema)
        else {
            panic!("plan should parse");
        };
        assert_eq!(describe_join_path(&plan, &schema), "orders.user_id = users.id");
    }
}
