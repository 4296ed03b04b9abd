//! CREATE TABLE parsing
//!
//! Each statement goes through `sqlparser` first. Statements it rejects
//! (SQLite-only syntax, bracket quoting, untyped columns) fall back to a
//! tolerant token scanner that keeps whatever columns it can recognize.

use super::{Column, ForeignKeyRef, Schema, Table};
use crate::error::{Nl2SqlError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::{ColumnOption, ObjectName, Statement, TableConstraint};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::debug;

lazy_static! {
    static ref CREATE_TABLE: Regex =
        Regex::new(r"(?is)^create\s+(?:(?:temp|temporary)\s+)?table\b").unwrap();
    static ref CREATE_TABLE_HEAD: Regex = Regex::new(
        r"(?is)^create\s+(?:(?:temp|temporary)\s+)?table\s+(?:if\s+not\s+exists\s+)?"
    )
    .unwrap();
    static ref TABLE_PRIMARY_KEY: Regex =
        Regex::new(r"(?is)^(?:constraint\s+\S+\s+)?primary\s+key\s*\((.*?)\)").unwrap();
    static ref TABLE_FOREIGN_KEY: Regex = Regex::new(
        r"(?is)^(?:constraint\s+\S+\s+)?foreign\s+key\s*\((.*?)\)\s*references\s+(.*)$"
    )
    .unwrap();
}

/// Keywords that end a column's type in the fallback scanner.
const COLUMN_CONSTRAINT_WORDS: &[&str] = &[
    "PRIMARY", "NOT", "NULL", "REFERENCES", "UNIQUE", "DEFAULT", "CHECK", "CONSTRAINT",
    "COLLATE", "AUTOINCREMENT", "AUTO_INCREMENT", "GENERATED", "AS", "ON",
];

/// Leading words of a table-level constraint item.
const TABLE_CONSTRAINT_WORDS: &[&str] = &[
    "CONSTRAINT", "PRIMARY", "FOREIGN", "UNIQUE", "CHECK", "KEY", "INDEX",
];

/// Parse schema text into a [`Schema`]. Fails only when no CREATE TABLE
/// statement can be recognized.
pub fn parse(schema_text: &str) -> Result<Schema> {
    let mut tables = Vec::new();
    let mut warnings = Vec::new();
    let mut skipped = 0usize;

    for statement in split_statements(schema_text) {
        if !CREATE_TABLE.is_match(&statement) {
            skipped += 1;
            continue;
        }

        match parse_with_sqlparser(&statement) {
            Ok((table, table_warnings)) => {
                tables.push(table);
                warnings.extend(table_warnings);
            }
            Err(e) => {
                debug!("sqlparser rejected statement ({}), using fallback scanner", e);
                match parse_fallback(&statement) {
                    Some((table, table_warnings)) => {
                        tables.push(table);
                        warnings.extend(table_warnings);
                    }
                    None => warnings.push(format!(
                        "Could not parse statement: {}",
                        statement.chars().take(60).collect::<String>()
                    )),
                }
            }
        }
    }

    if tables.is_empty() {
        return Err(Nl2SqlError::SchemaParse(
            "no CREATE TABLE statement found in schema text".to_string(),
        ));
    }

    debug!(tables = tables.len(), skipped, "Parsed schema");
    Ok(Schema::new(tables, warnings))
}

/// Split at top-level `;`, honouring quotes and dropping comments.
pub fn split_statements(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                current.push(c);
                i += 1;
                while i < chars.len() {
                    current.push(chars[i]);
                    if chars[i] == close {
                        if close != ']' && chars.get(i + 1) == Some(&close) {
                            current.push(close);
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                current.push('\n');
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 1;
                current.push(' ');
            }
            ';' => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            _ => current.push(c),
        }
        i += 1;
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

/// Uppercase, single spaces, no padding inside parentheses or after commas.
pub fn normalize_type(raw: &str) -> String {
    raw.to_uppercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(", ", ",")
        .replace(" (", "(")
        .replace("( ", "(")
        .replace(" )", ")")
}

fn last_part(name: &ObjectName) -> String {
    name.0.last().map(|i| i.value.clone()).unwrap_or_default()
}

fn parse_with_sqlparser(statement: &str) -> std::result::Result<(Table, Vec<String>), String> {
    let ast = Parser::parse_sql(&GenericDialect {}, statement).map_err(|e| e.to_string())?;
    let Some(Statement::CreateTable {
        name,
        columns: defs,
        constraints,
        ..
    }) = ast.into_iter().next()
    else {
        return Err("not a CREATE TABLE statement".to_string());
    };

    let mut table = Table {
        name: last_part(&name),
        columns: Vec::with_capacity(defs.len()),
    };
    let mut warnings = Vec::new();

    for def in defs {
        let mut column = Column::new(def.name.value.clone(), normalize_type(&def.data_type.to_string()));
        for option in &def.options {
            match &option.option {
                ColumnOption::NotNull => column.nullable = false,
                ColumnOption::Unique {
                    is_primary: true, ..
                } => column.primary_key = true,
                ColumnOption::ForeignKey {
                    foreign_table,
                    referred_columns,
                    ..
                } => {
                    column.references = Some(ForeignKeyRef {
                        table: last_part(foreign_table),
                        column: referred_columns
                            .first()
                            .map(|c| c.value.clone())
                            .unwrap_or_default(),
                    });
                }
                _ => {}
            }
        }
        table.columns.push(column);
    }

    for constraint in &constraints {
        match constraint {
            TableConstraint::Unique {
                columns,
                is_primary: true,
                ..
            } => {
                let names: Vec<String> = columns.iter().map(|c| c.value.clone()).collect();
                mark_primary_key(&mut table, &names, &mut warnings);
            }
            TableConstraint::ForeignKey {
                columns,
                foreign_table,
                referred_columns,
                ..
            } => {
                let local: Vec<String> = columns.iter().map(|c| c.value.clone()).collect();
                let referred: Vec<String> =
                    referred_columns.iter().map(|c| c.value.clone()).collect();
                attach_foreign_key(&mut table, &local, &last_part(foreign_table), &referred, &mut warnings);
            }
            _ => {}
        }
    }

    finish_table(&mut table);
    Ok((table, warnings))
}

fn mark_primary_key(table: &mut Table, names: &[String], warnings: &mut Vec<String>) {
    for name in names {
        match table.columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case(name)) {
            Some(column) => column.primary_key = true,
            None => warnings.push(format!(
                "PRIMARY KEY on {} names unknown column '{}'",
                table.name, name
            )),
        }
    }
}

fn attach_foreign_key(
    table: &mut Table,
    local: &[String],
    target: &str,
    referred: &[String],
    warnings: &mut Vec<String>,
) {
    for (i, name) in local.iter().enumerate() {
        match table.columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case(name)) {
            Some(column) => {
                column.references = Some(ForeignKeyRef {
                    table: target.to_string(),
                    column: referred.get(i).cloned().unwrap_or_default(),
                })
            }
            None => warnings.push(format!(
                "FOREIGN KEY on {} names unknown column '{}'",
                table.name, name
            )),
        }
    }
}

fn finish_table(table: &mut Table) {
    for column in &mut table.columns {
        if column.primary_key {
            column.nullable = false;
        }
    }
}

fn parse_fallback(statement: &str) -> Option<(Table, Vec<String>)> {
    let head = CREATE_TABLE_HEAD.find(statement)?;
    let rest = &statement[head.end()..];
    let open = find_top_level(rest, '(')?;
    let close = matching_paren(rest, open)?;

    let name = qualified_last(rest[..open].trim())?;
    let body = &rest[open + 1..close];

    let mut table = Table {
        name,
        columns: Vec::new(),
    };
    let mut warnings = Vec::new();

    for item in split_top_level(body, ',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let tokens = tokenize(item);
        let Some(first) = tokens.first() else { continue };

        let is_quoted = first.starts_with(['"', '`', '[']);
        if !is_quoted && TABLE_CONSTRAINT_WORDS.contains(&first.to_uppercase().as_str()) {
            if let Some(caps) = TABLE_PRIMARY_KEY.captures(item) {
                mark_primary_key(&mut table, &ident_list(&caps[1]), &mut warnings);
            } else if let Some(caps) = TABLE_FOREIGN_KEY.captures(item) {
                let local = ident_list(&caps[1]);
                if let Some((target, referred)) = parse_reference(&tokenize(&caps[2])) {
                    attach_foreign_key(&mut table, &local, &target, &referred, &mut warnings);
                }
            }
            continue;
        }

        table.columns.push(parse_column_tokens(&tokens));
    }

    if table.name.is_empty() {
        return None;
    }
    finish_table(&mut table);
    Some((table, warnings))
}

fn parse_column_tokens(tokens: &[String]) -> Column {
    let is_keyword = |t: &str| {
        let first_word = t.split('(').next().unwrap_or(t).to_uppercase();
        COLUMN_CONSTRAINT_WORDS.contains(&first_word.as_str())
    };

    let mut idx = 1;
    let mut type_parts = Vec::new();
    while idx < tokens.len() && !is_keyword(&tokens[idx]) {
        type_parts.push(tokens[idx].as_str());
        idx += 1;
    }

    let mut column = Column::new(unquote(&tokens[0]), normalize_type(&type_parts.join(" ")));
    while idx < tokens.len() {
        let word = tokens[idx].to_uppercase();
        let next = tokens.get(idx + 1).map(|t| t.to_uppercase());
        match word.as_str() {
            "PRIMARY" if next.as_deref().map_or(false, |n| n.starts_with("KEY")) => {
                column.primary_key = true;
            }
            "NOT" if next.as_deref() == Some("NULL") => column.nullable = false,
            "REFERENCES" => {
                if let Some((target, referred)) = parse_reference(&tokens[idx + 1..]) {
                    column.references = Some(ForeignKeyRef {
                        table: target,
                        column: referred.into_iter().next().unwrap_or_default(),
                    });
                }
            }
            _ => {}
        }
        idx += 1;
    }
    column
}

/// `target [(cols)]` following a REFERENCES keyword.
fn parse_reference(tokens: &[String]) -> Option<(String, Vec<String>)> {
    let first = tokens.first()?;
    match find_top_level(first, '(') {
        Some(open) => {
            let table = qualified_last(&first[..open])?;
            let close = matching_paren(first, open).unwrap_or(first.len());
            Some((table, ident_list(&first[open + 1..close])))
        }
        None => {
            let table = qualified_last(first)?;
            let columns = tokens
                .get(1)
                .filter(|t| t.starts_with('('))
                .map(|t| ident_list(t.trim_start_matches('(').trim_end_matches(')')))
                .unwrap_or_default();
            Some((table, columns))
        }
    }
}

fn ident_list(text: &str) -> Vec<String> {
    split_top_level(text, ',')
        .iter()
        .filter_map(|part| tokenize(part.trim()).into_iter().next())
        .map(|t| unquote(&t))
        .collect()
}

fn qualified_last(text: &str) -> Option<String> {
    let last = split_top_level(text.trim(), '.').into_iter().last()?;
    let name = unquote(last.trim());
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn unquote(token: &str) -> String {
    let t = token.trim();
    let mut chars = t.chars();
    match (chars.next(), t.chars().last()) {
        (Some('"'), Some('"')) if t.len() >= 2 => t[1..t.len() - 1].replace("\"\"", "\""),
        (Some('`'), Some('`')) if t.len() >= 2 => t[1..t.len() - 1].replace("``", "`"),
        (Some('['), Some(']')) if t.len() >= 2 => t[1..t.len() - 1].to_string(),
        (Some('\''), Some('\'')) if t.len() >= 2 => t[1..t.len() - 1].replace("''", "'"),
        _ => t.to_string(),
    }
}

/// Walk `text` yielding (byte offset, char, depth) for characters outside
/// quotes. Depth counts open parentheses before the character.
fn top_level_chars(text: &str) -> Vec<(usize, char, usize)> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '[' => quote = Some(']'),
            '(' => {
                out.push((i, c, depth));
                depth += 1;
                continue;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                out.push((i, c, depth));
                continue;
            }
            _ => {}
        }
        if quote.is_none() {
            out.push((i, c, depth));
        }
    }
    out
}

fn find_top_level(text: &str, target: char) -> Option<usize> {
    top_level_chars(text)
        .into_iter()
        .find(|(_, c, depth)| *c == target && *depth == 0)
        .map(|(i, _, _)| i)
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let open_depth = top_level_chars(text)
        .into_iter()
        .find(|(i, _, _)| *i == open)
        .map(|(_, _, d)| d)?;
    top_level_chars(text)
        .into_iter()
        .find(|(i, c, d)| *i > open && *c == ')' && *d == open_depth)
        .map(|(i, _, _)| i)
}

fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c, depth) in top_level_chars(text) {
        if c == sep && depth == 0 {
            parts.push(text[start..i].to_string());
            start = i + c.len_utf8();
        }
    }
    parts.push(text[start..].to_string());
    parts
}

/// Whitespace-separated tokens, keeping quoted identifiers and
/// parenthesized groups whole.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in text.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '[' => quote = Some(']'),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_statements_respects_quotes_and_comments() {
        let text = "-- users; table\nCREATE TABLE a (x TEXT DEFAULT 'a;b'); /* ; */ CREATE TABLE \"b;c\" (y INT);;\n";
        let statements = split_statements(text);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "CREATE TABLE a (x TEXT DEFAULT 'a;b')");
        assert!(statements[1].starts_with("CREATE TABLE \"b;c\""));
    }

    #[test]
    fn test_parse_inline_and_table_constraints() {
        let schema = parse(
            "CREATE TABLE IF NOT EXISTS shop.customers (\n  customer_id INT,\n  email VARCHAR (255) NOT NULL,\n  PRIMARY KEY (customer_id)\n);\n\
             CREATE TABLE orders (\n  order_id INT PRIMARY KEY,\n  customer_id INT,\n  amount numeric(10, 2),\n  CONSTRAINT fk_c FOREIGN KEY (customer_id) REFERENCES customers(customer_id)\n);",
        )
        .unwrap();

        let customers = schema.table("customers").unwrap();
        let id = customers.column("customer_id").unwrap();
        assert!(id.primary_key);
        assert!(!id.nullable);
        assert_eq!(customers.column("email").unwrap().data_type, "VARCHAR(255)");
        assert!(!customers.column("email").unwrap().nullable);

        let orders = schema.table("orders").unwrap();
        assert_eq!(orders.column("amount").unwrap().data_type, "NUMERIC(10,2)");
        let fk = orders.column("customer_id").unwrap().references.clone().unwrap();
        assert_eq!(fk.table, "customers");
        assert_eq!(fk.column, "customer_id");
        assert!(schema.is_consistent());
    }

    #[test]
    fn test_fallback_handles_sqlite_and_bracket_syntax() {
        let schema = parse(
            "CREATE TABLE [order items] (\n  [item id] integer PRIMARY KEY AUTOINCREMENT,\n  `sku` text NOT NULL REFERENCES products (sku),\n  notes\n) WITHOUT ROWID;\n\
             CREATE TABLE products (sku TEXT PRIMARY KEY);",
        )
        .unwrap();

        let items = schema.table("order items").unwrap();
        assert_eq!(items.column_names(), vec!["item id", "sku", "notes"]);
        assert!(items.column("item id").unwrap().primary_key);
        assert_eq!(items.column("item id").unwrap().data_type, "INTEGER");
        assert_eq!(items.column("notes").unwrap().data_type, "");
        let sku = items.column("sku").unwrap();
        assert!(!sku.nullable);
        assert_eq!(sku.references.as_ref().unwrap().table, "products");
        assert_eq!(sku.references.as_ref().unwrap().column, "sku");
    }

    #[test]
    fn test_skips_non_create_statements() {
        let schema = parse(
            "CREATE TABLE t (a INT);\nINSERT INTO t VALUES (1);\nCREATE INDEX idx ON t(a);",
        )
        .unwrap();
        assert_eq!(schema.table_names(), vec!["t"]);
    }

    #[test]
    fn test_no_create_table_is_an_error() {
        let err = parse("SELECT 1; INSERT INTO t VALUES (2);").unwrap_err();
        assert!(matches!(err, Nl2SqlError::SchemaParse(_)));
        assert!(matches!(parse("   "), Err(Nl2SqlError::SchemaParse(_))));
    }

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("varchar ( 20 )"), "VARCHAR(20)");
        assert_eq!(normalize_type("decimal(10, 2)"), "DECIMAL(10,2)");
        assert_eq!(normalize_type("double   precision"), "DOUBLE PRECISION");
    }
}
