//! Schema Processor
//!
//! Structured view of the user's CREATE TABLE text. Parsing lives in
//! [`parser`]; this module holds the model, case-insensitive lookups,
//! foreign-key resolution and the canonical DDL rendering embedded in
//! every prompt.

pub mod parser;

pub use parser::parse;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub table: String,
    /// Empty when the declaration named no column and the target has no
    /// single primary key to default to.
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Normalized type text; empty when the column was declared untyped.
    pub data_type: String,
    pub primary_key: bool,
    pub nullable: bool,
    pub references: Option<ForeignKeyRef>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            primary_key: false,
            nullable: true,
            references: None,
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        self.references.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_key(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// A parsed schema. Equality compares tables only: warnings are
/// diagnostics about the source text, not schema content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
    pub warnings: Vec<String>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.tables == other.tables
    }
}

impl Eq for Schema {}

impl Schema {
    /// Build a schema from parsed tables: drops duplicates (first wins),
    /// resolves column-less foreign keys and records consistency warnings.
    pub fn new(tables: Vec<Table>, mut warnings: Vec<String>) -> Self {
        let mut kept: Vec<Table> = Vec::with_capacity(tables.len());
        for mut table in tables {
            if kept.iter().any(|t| t.name.eq_ignore_ascii_case(&table.name)) {
                warnings.push(format!(
                    "Duplicate table '{}' ignored (first definition kept)",
                    table.name
                ));
                continue;
            }
            let mut seen = HashSet::new();
            let mut columns = Vec::with_capacity(table.columns.len());
            for column in table.columns.drain(..) {
                if seen.insert(column.name.to_lowercase()) {
                    columns.push(column);
                } else {
                    warnings.push(format!(
                        "Duplicate column '{}.{}' ignored (first definition kept)",
                        table.name, column.name
                    ));
                }
            }
            table.columns = columns;
            kept.push(table);
        }

        let mut schema = Schema {
            tables: kept,
            warnings,
        };
        schema.resolve_foreign_keys();
        schema
    }

    fn resolve_foreign_keys(&mut self) {
        // Column-less references default to the target's single primary key.
        let defaults: Vec<(usize, usize, String)> = self
            .tables
            .iter()
            .enumerate()
            .flat_map(|(ti, table)| {
                table.columns.iter().enumerate().filter_map(move |(ci, column)| {
                    column
                        .references
                        .as_ref()
                        .filter(|r| r.column.is_empty())
                        .map(|r| (ti, ci, r.table.clone()))
                })
            })
            .collect();

        for (ti, ci, target) in defaults {
            let resolved = self.table(&target).and_then(|t| {
                let pk = t.primary_key();
                if pk.len() == 1 {
                    Some(pk[0].name.clone())
                } else {
                    None
                }
            });
            if let (Some(column), Some(r)) = (resolved, self.tables[ti].columns[ci].references.as_mut()) {
                r.column = column;
            }
        }

        let mut problems = Vec::new();
        for table in &self.tables {
            for column in &table.columns {
                let Some(r) = &column.references else { continue };
                let problem = match self.table(&r.table) {
                    None => Some(format!("unknown table '{}'", r.table)),
                    Some(_) if r.column.is_empty() => Some(format!(
                        "table '{}' without a column, and it has no single primary key",
                        r.table
                    )),
                    Some(t) if !t.has_column(&r.column) => {
                        Some(format!("unknown column '{}.{}'", r.table, r.column))
                    }
                    Some(_) => None,
                };
                if let Some(problem) = problem {
                    problems.push(format!(
                        "Foreign key {}.{} references {}",
                        table.name, column.name, problem
                    ));
                }
            }
        }
        self.warnings.extend(problems);
    }

    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// True when every foreign key resolves to an existing table and column.
    pub fn is_consistent(&self) -> bool {
        self.tables.iter().flat_map(|t| &t.columns).all(|c| match &c.references {
            None => true,
            Some(r) => self
                .table(&r.table)
                .map(|t| !r.column.is_empty() && t.has_column(&r.column))
                .unwrap_or(false),
        })
    }

    /// `(table, column, reference)` for every foreign key, in schema order.
    pub fn foreign_keys(&self) -> Vec<(&Table, &Column, &ForeignKeyRef)> {
        self.tables
            .iter()
            .flat_map(|t| {
                t.columns
                    .iter()
                    .filter_map(move |c| c.references.as_ref().map(|r| (t, c, r)))
            })
            .collect()
    }

    /// One compact CREATE TABLE per line. Parsing this text yields an
    /// equal schema.
    pub fn canonical_text(&self) -> String {
        self.tables
            .iter()
            .map(render_table)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn render_table(table: &Table) -> String {
    let pk = table.primary_key();
    let inline_pk = pk.len() == 1;

    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut def = quote_ident(&c.name);
            if !c.data_type.is_empty() {
                def.push(' ');
                def.push_str(&c.data_type);
            }
            if c.primary_key && inline_pk {
                def.push_str(" PRIMARY KEY");
            }
            if !c.nullable && !c.primary_key {
                def.push_str(" NOT NULL");
            }
            if let Some(r) = &c.references {
                def.push_str(" REFERENCES ");
                def.push_str(&quote_ident(&r.table));
                if !r.column.is_empty() {
                    def.push_str(&format!("({})", quote_ident(&r.column)));
                }
            }
            def
        })
        .collect();

    if pk.len() > 1 {
        let names: Vec<String> = pk.iter().map(|c| quote_ident(&c.name)).collect();
        parts.push(format!("PRIMARY KEY ({})", names.join(", ")));
    }

    format!("CREATE TABLE {} ({});", quote_ident(&table.name), parts.join(", "))
}

lazy_static! {
    static ref SIMPLE_IDENT: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref RESERVED: HashSet<&'static str> = [
        "all", "alter", "and", "as", "asc", "between", "by", "case", "check", "collate",
        "column", "constraint", "create", "cross", "current_date", "current_time",
        "current_timestamp", "default", "delete", "desc", "distinct", "drop", "else", "end",
        "except", "exists", "false", "foreign", "from", "full", "group", "having", "if", "in",
        "index", "inner", "insert", "intersect", "into", "is", "join", "key", "left", "like",
        "limit", "natural", "not", "null", "offset", "on", "or", "order", "outer", "primary",
        "references", "right", "select", "set", "table", "then", "to", "true", "union",
        "unique", "update", "user", "using", "values", "when", "where", "with",
    ]
    .into_iter()
    .collect();
}

/// Double-quote an identifier when it is not a plain word or collides with
/// a keyword.
pub fn quote_ident(name: &str) -> String {
    if SIMPLE_IDENT.is_match(name) && !RESERVED.contains(name.to_lowercase().as_str()) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_orders() -> Schema {
        parse(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n\
             CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users, total DECIMAL(10, 2));",
        )
        .unwrap()
    }

    #[test]
    fn test_lookups_are_case_insensitive() {
        let schema = users_orders();
        assert!(schema.has_table("USERS"));
        assert_eq!(schema.table("Orders").unwrap().name, "orders");
        assert!(schema.table("orders").unwrap().has_column("USER_ID"));
    }

    #[test]
    fn test_columnless_reference_resolves_to_primary_key() {
        let schema = users_orders();
        let user_id = schema.table("orders").unwrap().column("user_id").unwrap();
        assert_eq!(
            user_id.references,
            Some(ForeignKeyRef {
                table: "users".into(),
                column: "id".into()
            })
        );
        assert!(user_id.is_foreign_key());
        assert!(schema.is_consistent());
        assert!(schema.warnings.is_empty());
    }

    #[test]
    fn test_dangling_reference_is_a_warning() {
        let schema = parse("CREATE TABLE orders (id INT PRIMARY KEY, sku TEXT REFERENCES products(sku));").unwrap();
        assert!(!schema.is_consistent());
        assert_eq!(schema.warnings.len(), 1);
        assert!(schema.warnings[0].contains("unknown table 'products'"));
    }

    #[test]
    fn test_duplicates_keep_first() {
        let schema = parse(
            "CREATE TABLE a (x INT, X TEXT);\nCREATE TABLE A (y INT);",
        )
        .unwrap();
        assert_eq!(schema.tables.len(), 1);
        assert_eq!(schema.tables[0].columns.len(), 1);
        assert_eq!(schema.tables[0].columns[0].data_type, "INT");
        assert_eq!(schema.warnings.len(), 2);
    }

    #[test]
    fn test_canonical_text() {
        let schema = users_orders();
        assert_eq!(
            schema.canonical_text(),
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n\
             CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), total DECIMAL(10,2));"
        );
    }

    #[test]
    fn test_canonical_text_composite_key_and_quoting() {
        let schema = parse(
            r#"CREATE TABLE "order" ("unit price" REAL, a INT, b INT, PRIMARY KEY (a, b));"#,
        )
        .unwrap();
        let text = schema.canonical_text();
        assert_eq!(
            text,
            r#"CREATE TABLE "order" ("unit price" REAL, a INT, b INT, PRIMARY KEY (a, b));"#
        );
        assert_eq!(parse(&text).unwrap(), schema);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "users");
        assert_eq!(quote_ident("order"), "\"order\"");
        assert_eq!(quote_ident("unit price"), "\"unit price\"");
        assert_eq!(quote_ident("1st"), "\"1st\"");
    }
}
