//! SQL Verifier
//!
//! Deterministic checks on generated SQL, no model involved:
//! 1. syntax: exactly one read-only statement that sqlparser accepts
//! 2. tables: every referenced table exists (CTEs and derived tables count)
//! 3. columns: every column resolves to exactly one source in scope
//!
//! Checking stops at the first failing stage. The bounded correction loop
//! driven by these results lives in [`corrector`].

pub mod corrector;
mod scope;

pub use corrector::{CorrectionState, Corrector};

use crate::generator::GeneratedQuery;
use crate::reasoning::ReasoningPlan;
use crate::schema::Schema;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Query, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Syntax,
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerificationIssue {
    Empty,
    Syntax {
        message: String,
        line: Option<u64>,
        column: Option<u64>,
    },
    MultipleStatements {
        count: usize,
    },
    NotReadOnly {
        statement: String,
    },
    UnknownTable {
        table: String,
        suggestion: Option<String>,
    },
    UnknownColumn {
        table: Option<String>,
        column: String,
        suggestion: Option<String>,
    },
    AmbiguousColumn {
        column: String,
        tables: Vec<String>,
    },
}

impl VerificationIssue {
    pub fn kind(&self) -> IssueKind {
        match self {
            VerificationIssue::Empty
            | VerificationIssue::Syntax { .. }
            | VerificationIssue::MultipleStatements { .. }
            | VerificationIssue::NotReadOnly { .. } => IssueKind::Syntax,
            VerificationIssue::UnknownTable { .. }
            | VerificationIssue::UnknownColumn { .. }
            | VerificationIssue::AmbiguousColumn { .. } => IssueKind::Reference,
        }
    }
}

fn did_you_mean(f: &mut fmt::Formatter<'_>, suggestion: &Option<String>) -> fmt::Result {
    match suggestion {
        Some(s) => write!(f, " (did you mean '{}'?)", s),
        None => Ok(()),
    }
}

impl fmt::Display for VerificationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationIssue::Empty => write!(f, "SQL query is empty"),
            VerificationIssue::Syntax {
                message,
                line: Some(line),
                column: Some(column),
            } => write!(f, "Syntax error at line {}, column {}: {}", line, column, message),
            VerificationIssue::Syntax { message, .. } => write!(f, "Syntax error: {}", message),
            VerificationIssue::MultipleStatements { count } => write!(
                f,
                "Expected exactly one statement, found {}",
                count
            ),
            VerificationIssue::NotReadOnly { statement } => write!(
                f,
                "Only read-only SELECT queries are allowed, found {}",
                statement
            ),
            VerificationIssue::UnknownTable { table, suggestion } => {
                write!(f, "Unknown table '{}'", table)?;
                did_you_mean(f, suggestion)
            }
            VerificationIssue::UnknownColumn {
                table: Some(table),
                column,
                suggestion,
            } => {
                write!(f, "Unknown column '{}' in table '{}'", column, table)?;
                did_you_mean(f, suggestion)
            }
            VerificationIssue::UnknownColumn {
                table: None,
                column,
                suggestion,
            } => {
                write!(f, "Unknown column '{}'", column)?;
                did_you_mean(f, suggestion)
            }
            VerificationIssue::AmbiguousColumn { column, tables } => write!(
                f,
                "Ambiguous column '{}' exists in {}; qualify it with a table name or alias",
                column,
                tables.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    /// At most one entry: the first, most specific failure.
    pub issues: Vec<VerificationIssue>,
    /// Advisory observations that do not fail verification.
    pub notes: Vec<String>,
    /// The accepted SQL when it came from a correction.
    pub corrected_sql: Option<String>,
}

impl VerificationResult {
    fn pass(notes: Vec<String>) -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
            notes,
            corrected_sql: None,
        }
    }

    fn fail(issue: VerificationIssue) -> Self {
        Self {
            passed: false,
            issues: vec![issue],
            notes: Vec::new(),
            corrected_sql: None,
        }
    }

    pub fn issue(&self) -> Option<&VerificationIssue> {
        self.issues.first()
    }
}

lazy_static! {
    static ref ERROR_POSITION: Regex = Regex::new(r"Line: (\d+), Column:? (\d+)").unwrap();
}

#[derive(Debug, Default, Clone)]
pub struct Verifier;

impl Verifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify(&self, query: &GeneratedQuery, schema: &Schema) -> VerificationResult {
        self.verify_sql(&query.sql, schema, Some(&query.plan))
    }

    pub fn verify_sql(
        &self,
        sql: &str,
        schema: &Schema,
        plan: Option<&ReasoningPlan>,
    ) -> VerificationResult {
        let query = match check_syntax(sql) {
            Ok(query) => query,
            Err(issue) => {
                debug!(%issue, "Syntax check failed");
                return VerificationResult::fail(issue);
            }
        };

        let report = scope::ReferenceChecker::new(schema).check(&query);
        if let Some(issue) = report.issue {
            debug!(%issue, "Reference check failed");
            return VerificationResult::fail(issue);
        }

        let notes = plan
            .map(|p| {
                p.tables
                    .iter()
                    .filter(|t| !report.tables.contains(*t))
                    .map(|t| format!("Plan mentions table '{}' but the query does not use it", t))
                    .collect()
            })
            .unwrap_or_default();
        VerificationResult::pass(notes)
    }
}

/// Canonical rendering of a query that passes `check_syntax`: one line,
/// keywords upper-cased, identifiers and literals as written. `None` when
/// the text does not parse.
pub fn format_sql(sql: &str) -> Option<String> {
    check_syntax(sql).ok().map(|query| query.to_string())
}

/// Parse `sql` as exactly one read-only query.
pub fn check_syntax(sql: &str) -> std::result::Result<Box<Query>, VerificationIssue> {
    let trimmed = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if trimmed.is_empty() {
        return Err(VerificationIssue::Empty);
    }

    let statements = Parser::parse_sql(&GenericDialect {}, trimmed).map_err(|e| {
        let text = e.to_string();
        let position = ERROR_POSITION.captures(&text).map(|caps| {
            (
                caps[1].parse::<u64>().ok(),
                caps[2].parse::<u64>().ok(),
            )
        });
        let (line, column) = position.unwrap_or((None, None));
        VerificationIssue::Syntax {
            message: text.trim_start_matches("sql parser error: ").to_string(),
            line,
            column,
        }
    })?;

    match statements.len() {
        0 => return Err(VerificationIssue::Empty),
        1 => {}
        count => return Err(VerificationIssue::MultipleStatements { count }),
    }

    match statements.into_iter().next() {
        Some(Statement::Query(query)) => Ok(query),
        Some(other) => Err(VerificationIssue::NotReadOnly {
            statement: other
                .to_string()
                .split_whitespace()
                .next()
                .unwrap_or("statement")
                .to_uppercase(),
        }),
        None => Err(VerificationIssue::Empty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        crate::schema::parse(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT, email TEXT);\n\
             CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), product_id INTEGER, total_amount REAL, status TEXT);\n\
             CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, price REAL);",
        )
        .unwrap()
    }

    fn issue(sql: &str) -> Option<VerificationIssue> {
        Verifier::new().verify_sql(sql, &schema(), None).issues.into_iter().next()
    }

    #[test]
    fn test_valid_queries_pass() {
        for sql in [
            "SELECT p.name, SUM(o.total_amount) AS revenue FROM orders o JOIN products p ON o.product_id = p.id GROUP BY p.name ORDER BY revenue DESC;",
            "SELECT username FROM users WHERE id IN (SELECT user_id FROM orders WHERE status = 'paid')",
            "SELECT u.username FROM users u WHERE EXISTS (SELECT 1 FROM orders o WHERE o.user_id = u.id)",
            "WITH big AS (SELECT user_id, SUM(total_amount) AS spent FROM orders GROUP BY user_id) SELECT b.spent, u.email FROM big b JOIN users u ON u.id = b.user_id",
            "SELECT t.n FROM (SELECT COUNT(*) AS n FROM products) AS t",
            "SELECT * FROM users WHERE username = \"alice\"",
            "SELECT id FROM users UNION SELECT user_id FROM orders",
            "SELECT COUNT(*) FROM orders JOIN users USING (id)",
            "SELECT name, price * 2 AS double_price FROM products ORDER BY double_price",
        ] {
            assert_eq!(issue(sql), None, "{sql}");
        }
    }

    #[test]
    fn test_syntax_failures() {
        assert_eq!(issue("  ;  "), Some(VerificationIssue::Empty));
        assert!(matches!(
            issue("SELECT FROM WHERE"),
            Some(VerificationIssue::Syntax { .. })
        ));
        assert_eq!(
            issue("SELECT 1; SELECT 2"),
            Some(VerificationIssue::MultipleStatements { count: 2 })
        );
        assert_eq!(
            issue("DELETE FROM users"),
            Some(VerificationIssue::NotReadOnly {
                statement: "DELETE".to_string()
            })
        );
    }

    #[test]
    fn test_syntax_error_carries_position() {
        match issue("SELECT id\nFROM users WHERE id = = 1") {
            Some(VerificationIssue::Syntax { message, line, .. }) => {
                assert!(!message.is_empty());
                if let Some(line) = line {
                    assert_eq!(line, 2);
                }
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_table_names_identifier() {
        let found = issue("SELECT * FROM customers").unwrap();
        assert_eq!(
            found,
            VerificationIssue::UnknownTable {
                table: "customers".to_string(),
                suggestion: None
            }
        );
        let found = issue("SELECT * FROM user").unwrap();
        assert!(found.to_string().contains("did you mean 'users'"), "{found}");
    }

    #[test]
    fn test_unknown_column_names_identifier_and_suggests() {
        let found = issue("SELECT user_name FROM users").unwrap();
        assert_eq!(
            found,
            VerificationIssue::UnknownColumn {
                table: Some("users".to_string()),
                column: "user_name".to_string(),
                suggestion: Some("username".to_string()),
            }
        );
        assert_eq!(found.kind(), IssueKind::Reference);
        assert!(found.to_string().contains("'user_name'"));

        let found = issue("SELECT o.price FROM orders o").unwrap();
        assert!(matches!(
            found,
            VerificationIssue::UnknownColumn { table: Some(ref t), ref column, .. } if t == "orders" && column == "price"
        ));
    }

    #[test]
    fn test_table_errors_reported_before_column_errors() {
        let found = issue("SELECT bogus FROM users JOIN invoices ON invoices.id = users.id").unwrap();
        assert!(matches!(found, VerificationIssue::UnknownTable { ref table, .. } if table == "invoices"));
    }

    #[test]
    fn test_alias_qualifier_rules() {
        let found = issue("SELECT users.email FROM users u").unwrap();
        assert_eq!(
            found,
            VerificationIssue::UnknownTable {
                table: "users".to_string(),
                suggestion: Some("u".to_string())
            }
        );
        assert!(matches!(
            issue("SELECT x.id FROM users"),
            Some(VerificationIssue::UnknownTable { .. })
        ));
    }

    #[test]
    fn test_ambiguous_unqualified_column() {
        let found = issue("SELECT id FROM orders JOIN users ON orders.user_id = users.id").unwrap();
        match found {
            VerificationIssue::AmbiguousColumn { column, tables } => {
                assert_eq!(column, "id");
                assert_eq!(tables, vec!["orders".to_string(), "users".to_string()]);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_plan_tables_unused_become_notes() {
        let plan = match crate::reasoning::parse_plan(
            "1. [tables_needed] orders and products",
            &schema(),
        ) {
            crate::reasoning::ParseOutcome::Parsed(plan) => plan,
            other => panic!("unexpected: {other:?}"),
        };
        let result = Verifier::new().verify_sql("SELECT SUM(total_amount) FROM orders", &schema(), Some(&plan));
        assert!(result.passed);
        assert_eq!(result.notes.len(), 1);
        assert!(result.notes[0].contains("products"));
    }

    #[test]
    fn test_format_sql_uppercases_keywords() {
        assert_eq!(
            format_sql("select  u.username\nfrom users u\nwhere u.email like '%@x.com'\norder by 1 desc;").as_deref(),
            Some("SELECT u.username FROM users AS u WHERE u.email LIKE '%@x.com' ORDER BY 1 DESC")
        );
        assert_eq!(format_sql("SELECT FROM WHERE"), None);
    }
}
