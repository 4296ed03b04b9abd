//! Reference resolution over the sqlparser AST.
//!
//! Every SELECT gets a scope of row sources (base tables, CTEs, derived
//! tables) keyed by their binding name. Column references are resolved
//! innermost scope first, so correlated subqueries see their outer query.
//! The first unknown table and the first bad column are recorded; table
//! problems win when both occur.

use super::VerificationIssue;
use crate::schema::Schema;
use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, GroupByExpr, Ident, JoinConstraint,
    JoinOperator, ListAggOnOverflow, ObjectName, OrderByExpr, Query, Select, SelectItem, SetExpr,
    TableFactor, TableWithJoins, WindowFrameBound, WindowType,
};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Bare words SQLite resolves without a table.
const BUILTIN_NAMES: &[&str] = &[
    "current_date", "current_time", "current_timestamp", "null", "true", "false", "rowid",
    "oid", "_rowid_",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SourceColumns {
    Known(Vec<String>),
    /// Column set unknown (table functions, `SELECT *` over such sources).
    Open,
}

#[derive(Debug)]
struct Source {
    binding: String,
    table: Option<String>,
    columns: SourceColumns,
}

impl Source {
    fn has_column(&self, name: &str) -> bool {
        match &self.columns {
            SourceColumns::Known(cols) => cols.iter().any(|c| c.eq_ignore_ascii_case(name)),
            SourceColumns::Open => false,
        }
    }

    fn label(&self) -> String {
        self.table.clone().unwrap_or_else(|| self.binding.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Projection,
    Filter,
    /// GROUP BY, HAVING and ORDER BY, where select aliases come first.
    GroupOrder,
}

struct Scope<'p> {
    sources: Vec<Source>,
    aliases: Vec<String>,
    /// Columns merged by `USING (...)`; unqualified use is not ambiguous.
    merged: HashSet<String>,
    natural: bool,
    parent: Option<&'p Scope<'p>>,
}

impl<'p> Scope<'p> {
    fn new(parent: Option<&'p Scope<'p>>) -> Self {
        Self {
            sources: Vec::new(),
            aliases: Vec::new(),
            merged: HashSet::new(),
            natural: false,
            parent,
        }
    }

    fn has_alias(&self, name: &str) -> bool {
        self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    fn has_open_source(&self) -> bool {
        self.sources
            .iter()
            .any(|s| matches!(s.columns, SourceColumns::Open))
    }
}

/// Outcome of a reference check.
#[derive(Debug, Default)]
pub(crate) struct ReferenceReport {
    pub issue: Option<VerificationIssue>,
    /// Schema tables the query reads, by schema name.
    pub tables: BTreeSet<String>,
}

pub(crate) struct ReferenceChecker<'s> {
    schema: &'s Schema,
    ctes: Vec<HashMap<String, SourceColumns>>,
    table_issue: Option<VerificationIssue>,
    column_issue: Option<VerificationIssue>,
    tables: BTreeSet<String>,
}

impl<'s> ReferenceChecker<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            ctes: Vec::new(),
            table_issue: None,
            column_issue: None,
            tables: BTreeSet::new(),
        }
    }

    pub fn check(mut self, query: &Query) -> ReferenceReport {
        self.walk_query(query, None);
        ReferenceReport {
            issue: self.table_issue.or(self.column_issue),
            tables: self.tables,
        }
    }

    fn record(&mut self, issue: VerificationIssue) {
        let slot = match issue {
            VerificationIssue::UnknownTable { .. } => &mut self.table_issue,
            _ => &mut self.column_issue,
        };
        if slot.is_none() {
            *slot = Some(issue);
        }
    }

    fn lookup_cte(&self, name: &str) -> Option<SourceColumns> {
        let key = name.to_lowercase();
        self.ctes.iter().rev().find_map(|m| m.get(&key).cloned())
    }

    fn walk_query(&mut self, query: &Query, parent: Option<&Scope<'_>>) -> SourceColumns {
        let pushed = if let Some(with) = &query.with {
            self.ctes.push(HashMap::new());
            for cte in &with.cte_tables {
                let key = cte.alias.name.value.to_lowercase();
                if with.recursive {
                    if let Some(frame) = self.ctes.last_mut() {
                        frame.insert(key.clone(), SourceColumns::Open);
                    }
                }
                let mut columns = self.walk_query(&cte.query, parent);
                if !cte.alias.columns.is_empty() {
                    columns = SourceColumns::Known(
                        cte.alias.columns.iter().map(|c| c.value.clone()).collect(),
                    );
                }
                if let Some(frame) = self.ctes.last_mut() {
                    frame.insert(key, columns);
                }
            }
            true
        } else {
            false
        };

        let columns = self.walk_set_expr(&query.body, parent, &query.order_by);

        if pushed {
            self.ctes.pop();
        }
        columns
    }

    fn walk_set_expr(
        &mut self,
        body: &SetExpr,
        parent: Option<&Scope<'_>>,
        order_by: &[OrderByExpr],
    ) -> SourceColumns {
        match body {
            SetExpr::Select(select) => self.walk_select(select, parent, order_by),
            SetExpr::Query(query) => self.walk_query(query, parent),
            SetExpr::SetOperation { left, right, .. } => {
                let columns = self.walk_set_expr(left, parent, &[]);
                self.walk_set_expr(right, parent, &[]);
                columns
            }
            SetExpr::Values(values) => {
                let scope = Scope::new(parent);
                for row in &values.rows {
                    for expr in row {
                        self.resolve_expr(expr, &scope, Clause::Projection);
                    }
                }
                SourceColumns::Open
            }
            _ => SourceColumns::Open,
        }
    }

    fn walk_select(
        &mut self,
        select: &Select,
        parent: Option<&Scope<'_>>,
        order_by: &[OrderByExpr],
    ) -> SourceColumns {
        let mut scope = Scope::new(parent);
        let mut join_conditions: Vec<&Expr> = Vec::new();

        for twj in &select.from {
            self.add_table_with_joins(twj, &mut scope, parent, &mut join_conditions);
        }

        scope.aliases = select
            .projection
            .iter()
            .filter_map(|item| match item {
                SelectItem::ExprWithAlias { alias, .. } => Some(alias.value.clone()),
                _ => None,
            })
            .collect();

        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.resolve_expr(expr, &scope, Clause::Projection);
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = last_ident(name);
                    if !scope
                        .sources
                        .iter()
                        .any(|s| s.binding.eq_ignore_ascii_case(&qualifier.value))
                    {
                        self.unknown_qualifier(&qualifier.value, &scope);
                    }
                }
                SelectItem::Wildcard(_) => {}
            }
        }

        for expr in join_conditions {
            self.resolve_expr(expr, &scope, Clause::Filter);
        }
        if let Some(selection) = &select.selection {
            self.resolve_expr(selection, &scope, Clause::Filter);
        }
        if let GroupByExpr::Expressions(exprs) = &select.group_by {
            for expr in exprs {
                self.resolve_expr(expr, &scope, Clause::GroupOrder);
            }
        }
        if let Some(having) = &select.having {
            self.resolve_expr(having, &scope, Clause::GroupOrder);
        }
        for ob in order_by {
            self.resolve_expr(&ob.expr, &scope, Clause::GroupOrder);
        }

        output_columns(select, &scope)
    }

    fn add_table_with_joins<'q>(
        &mut self,
        twj: &'q TableWithJoins,
        scope: &mut Scope<'_>,
        parent: Option<&Scope<'_>>,
        conditions: &mut Vec<&'q Expr>,
    ) {
        self.add_factor(&twj.relation, scope, parent, conditions);
        for join in &twj.joins {
            self.add_factor(&join.relation, scope, parent, conditions);
            let constraint = match &join.join_operator {
                JoinOperator::Inner(c)
                | JoinOperator::LeftOuter(c)
                | JoinOperator::RightOuter(c)
                | JoinOperator::FullOuter(c) => Some(c),
                _ => None,
            };
            match constraint {
                Some(JoinConstraint::On(expr)) => conditions.push(expr),
                Some(JoinConstraint::Using(columns)) => {
                    for column in columns {
                        if !scope.sources.iter().any(|s| s.has_column(&column.value))
                            && !scope.has_open_source()
                        {
                            self.unknown_column(column, scope);
                        }
                        scope.merged.insert(column.value.to_lowercase());
                    }
                }
                Some(JoinConstraint::Natural) => scope.natural = true,
                _ => {}
            }
        }
    }

    fn add_factor<'q>(
        &mut self,
        factor: &'q TableFactor,
        scope: &mut Scope<'_>,
        parent: Option<&Scope<'_>>,
        conditions: &mut Vec<&'q Expr>,
    ) {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                let table_name = last_ident(name).value.clone();
                let binding = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| table_name.clone());
                let alias_columns = alias
                    .as_ref()
                    .filter(|a| !a.columns.is_empty())
                    .map(|a| a.columns.iter().map(|c| c.value.clone()).collect::<Vec<_>>());

                let (table, columns) = if args.is_some() {
                    (None, SourceColumns::Open)
                } else if let Some(cte) = self.lookup_cte(&table_name).filter(|_| name.0.len() == 1) {
                    (None, cte)
                } else if let Some(t) = self.schema.table(&table_name) {
                    self.tables.insert(t.name.clone());
                    let cols = t.columns.iter().map(|c| c.name.clone()).collect();
                    (Some(t.name.clone()), SourceColumns::Known(cols))
                } else {
                    let candidates: Vec<String> = self
                        .schema
                        .tables
                        .iter()
                        .map(|t| t.name.clone())
                        .chain(self.ctes.iter().flat_map(|m| m.keys().cloned()))
                        .collect();
                    self.record(VerificationIssue::UnknownTable {
                        suggestion: suggest(&table_name, candidates.iter().map(String::as_str)),
                        table: table_name.clone(),
                    });
                    (None, SourceColumns::Open)
                };

                scope.sources.push(Source {
                    binding,
                    table,
                    columns: alias_columns.map(SourceColumns::Known).unwrap_or(columns),
                });
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let mut columns = self.walk_query(subquery, parent);
                let binding = alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_default();
                if let Some(a) = alias.as_ref().filter(|a| !a.columns.is_empty()) {
                    columns = SourceColumns::Known(a.columns.iter().map(|c| c.value.clone()).collect());
                }
                scope.sources.push(Source {
                    binding,
                    table: None,
                    columns,
                });
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.add_table_with_joins(table_with_joins, scope, parent, conditions);
            }
            _ => {
                scope.sources.push(Source {
                    binding: String::new(),
                    table: None,
                    columns: SourceColumns::Open,
                });
            }
        }
    }

    fn resolve_expr(&mut self, expr: &Expr, scope: &Scope<'_>, clause: Clause) {
        match expr {
            Expr::Identifier(ident) => self.resolve_unqualified(ident, scope, clause),
            Expr::CompoundIdentifier(parts) => {
                if parts.len() >= 2 {
                    let qualifier = &parts[parts.len() - 2];
                    let column = &parts[parts.len() - 1];
                    self.resolve_qualified(qualifier, column, scope);
                } else if let Some(ident) = parts.first() {
                    self.resolve_unqualified(ident, scope, clause);
                }
            }
            Expr::Function(func) => self.resolve_function(func, scope, clause),
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                self.resolve_opt(operand.as_deref(), scope, clause);
                self.resolve_all(conditions, scope, clause);
                self.resolve_all(results, scope, clause);
                self.resolve_opt(else_result.as_deref(), scope, clause);
            }
            Expr::BinaryOp { left, right, .. }
            | Expr::AnyOp { left, right, .. }
            | Expr::AllOp { left, right, .. }
            | Expr::JsonAccess { left, right, .. }
            | Expr::IsDistinctFrom(left, right)
            | Expr::IsNotDistinctFrom(left, right) => {
                self.resolve_expr(left, scope, clause);
                self.resolve_expr(right, scope, clause);
            }
            Expr::UnaryOp { expr, .. }
            | Expr::Nested(expr)
            | Expr::IsNull(expr)
            | Expr::IsNotNull(expr)
            | Expr::IsTrue(expr)
            | Expr::IsNotTrue(expr)
            | Expr::IsFalse(expr)
            | Expr::IsNotFalse(expr)
            | Expr::IsUnknown(expr)
            | Expr::IsNotUnknown(expr)
            | Expr::Cast { expr, .. }
            | Expr::TryCast { expr, .. }
            | Expr::SafeCast { expr, .. }
            | Expr::Extract { expr, .. }
            | Expr::Ceil { expr, .. }
            | Expr::Floor { expr, .. }
            | Expr::Collate { expr, .. }
            | Expr::CompositeAccess { expr, .. }
            | Expr::Named { expr, .. }
            | Expr::AtTimeZone {
                timestamp: expr, ..
            } => self.resolve_expr(expr, scope, clause),
            Expr::Like { expr, pattern, .. }
            | Expr::ILike { expr, pattern, .. }
            | Expr::SimilarTo { expr, pattern, .. }
            | Expr::RLike { expr, pattern, .. } => {
                self.resolve_expr(expr, scope, clause);
                self.resolve_expr(pattern, scope, clause);
            }
            Expr::Position { expr, r#in } => {
                self.resolve_expr(expr, scope, clause);
                self.resolve_expr(r#in, scope, clause);
            }
            Expr::InUnnest {
                expr, array_expr, ..
            } => {
                self.resolve_expr(expr, scope, clause);
                self.resolve_expr(array_expr, scope, clause);
            }
            Expr::AggregateExpressionWithFilter { expr, filter } => {
                self.resolve_expr(expr, scope, clause);
                self.resolve_expr(filter, scope, clause);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.resolve_expr(expr, scope, clause);
                self.resolve_expr(low, scope, clause);
                self.resolve_expr(high, scope, clause);
            }
            Expr::InList { expr, list, .. } => {
                self.resolve_expr(expr, scope, clause);
                self.resolve_all(list, scope, clause);
            }
            Expr::Substring {
                expr,
                substring_from,
                substring_for,
                ..
            } => {
                self.resolve_expr(expr, scope, clause);
                self.resolve_opt(substring_from.as_deref(), scope, clause);
                self.resolve_opt(substring_for.as_deref(), scope, clause);
            }
            Expr::Trim {
                expr,
                trim_what,
                trim_characters,
                ..
            } => {
                self.resolve_expr(expr, scope, clause);
                self.resolve_opt(trim_what.as_deref(), scope, clause);
                if let Some(chars) = trim_characters {
                    self.resolve_all(chars, scope, clause);
                }
            }
            Expr::Overlay {
                expr,
                overlay_what,
                overlay_from,
                overlay_for,
            } => {
                self.resolve_expr(expr, scope, clause);
                self.resolve_expr(overlay_what, scope, clause);
                self.resolve_expr(overlay_from, scope, clause);
                self.resolve_opt(overlay_for.as_deref(), scope, clause);
            }
            Expr::MapAccess { column, keys } => {
                self.resolve_expr(column, scope, clause);
                self.resolve_all(keys, scope, clause);
            }
            Expr::ArrayIndex { obj, indexes } => {
                self.resolve_expr(obj, scope, clause);
                self.resolve_all(indexes, scope, clause);
            }
            Expr::ListAgg(agg) => {
                self.resolve_expr(&agg.expr, scope, clause);
                self.resolve_opt(agg.separator.as_deref(), scope, clause);
                if let Some(ListAggOnOverflow::Truncate { filler, .. }) = &agg.on_overflow {
                    self.resolve_opt(filler.as_deref(), scope, clause);
                }
                self.resolve_order_by(&agg.within_group, scope, clause);
            }
            Expr::ArrayAgg(agg) => {
                self.resolve_expr(&agg.expr, scope, clause);
                if let Some(order_by) = &agg.order_by {
                    self.resolve_order_by(order_by, scope, clause);
                }
                self.resolve_opt(agg.limit.as_deref(), scope, clause);
            }
            Expr::GroupingSets(sets) | Expr::Cube(sets) | Expr::Rollup(sets) => {
                for set in sets {
                    self.resolve_all(set, scope, clause);
                }
            }
            Expr::Tuple(exprs) | Expr::Struct { values: exprs, .. } => {
                self.resolve_all(exprs, scope, clause);
            }
            Expr::Array(array) => self.resolve_all(&array.elem, scope, clause),
            Expr::Interval(interval) => self.resolve_expr(&interval.value, scope, clause),
            Expr::MatchAgainst { columns, .. } => {
                for column in columns {
                    self.resolve_unqualified(column, scope, clause);
                }
            }
            Expr::InSubquery { expr, subquery, .. } => {
                self.resolve_expr(expr, scope, clause);
                self.walk_query(subquery, Some(scope));
            }
            Expr::Exists { subquery, .. }
            | Expr::Subquery(subquery)
            | Expr::ArraySubquery(subquery) => {
                self.walk_query(subquery, Some(scope));
            }
            // Leaves: no column can hide in these.
            Expr::Value(_) | Expr::IntroducedString { .. } | Expr::TypedString { .. } => {}
        }
    }

    fn resolve_function(&mut self, func: &Function, scope: &Scope<'_>, clause: Clause) {
        for arg in &func.args {
            match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                | FunctionArg::Named {
                    arg: FunctionArgExpr::Expr(e),
                    ..
                } => self.resolve_expr(e, scope, clause),
                FunctionArg::Unnamed(_) | FunctionArg::Named { .. } => {}
            }
        }
        self.resolve_opt(func.filter.as_deref(), scope, clause);
        self.resolve_order_by(&func.order_by, scope, clause);
        if let Some(WindowType::WindowSpec(spec)) = &func.over {
            self.resolve_all(&spec.partition_by, scope, clause);
            self.resolve_order_by(&spec.order_by, scope, clause);
            if let Some(frame) = &spec.window_frame {
                for bound in std::iter::once(&frame.start_bound).chain(frame.end_bound.as_ref()) {
                    if let WindowFrameBound::Preceding(Some(e)) | WindowFrameBound::Following(Some(e)) =
                        bound
                    {
                        self.resolve_expr(e, scope, clause);
                    }
                }
            }
        }
    }

    fn resolve_all(&mut self, exprs: &[Expr], scope: &Scope<'_>, clause: Clause) {
        for e in exprs {
            self.resolve_expr(e, scope, clause);
        }
    }

    fn resolve_opt(&mut self, expr: Option<&Expr>, scope: &Scope<'_>, clause: Clause) {
        if let Some(e) = expr {
            self.resolve_expr(e, scope, clause);
        }
    }

    fn resolve_order_by(&mut self, order_by: &[OrderByExpr], scope: &Scope<'_>, clause: Clause) {
        for ob in order_by {
            self.resolve_expr(&ob.expr, scope, clause);
        }
    }

    fn resolve_unqualified(&mut self, ident: &Ident, scope: &Scope<'_>, clause: Clause) {
        let name = ident.value.as_str();
        if BUILTIN_NAMES.contains(&name.to_lowercase().as_str()) {
            return;
        }
        if clause == Clause::GroupOrder && scope.has_alias(name) {
            return;
        }

        let mut current = Some(scope);
        while let Some(s) = current {
            let matches: Vec<&Source> = s.sources.iter().filter(|src| src.has_column(name)).collect();
            if matches.len() == 1 {
                return;
            }
            if matches.len() > 1 {
                if !s.natural && !s.merged.contains(&name.to_lowercase()) {
                    let tables = matches.iter().map(|m| m.label()).collect();
                    self.record(VerificationIssue::AmbiguousColumn {
                        column: name.to_string(),
                        tables,
                    });
                }
                return;
            }
            if s.has_alias(name) || s.has_open_source() {
                return;
            }
            current = s.parent;
        }

        // An unresolved "double quoted" word is a string literal to SQLite.
        if ident.quote_style == Some('"') {
            return;
        }
        self.unknown_column(ident, scope);
    }

    fn unknown_column(&mut self, ident: &Ident, scope: &Scope<'_>) {
        let candidates: Vec<&str> = scope
            .sources
            .iter()
            .filter_map(|s| match &s.columns {
                SourceColumns::Known(cols) => Some(cols.iter().map(String::as_str)),
                SourceColumns::Open => None,
            })
            .flatten()
            .collect();
        let table = if scope.sources.len() == 1 {
            Some(scope.sources[0].label())
        } else {
            None
        };
        self.record(VerificationIssue::UnknownColumn {
            table,
            column: ident.value.clone(),
            suggestion: suggest(&ident.value, candidates),
        });
    }

    fn resolve_qualified(&mut self, qualifier: &Ident, column: &Ident, scope: &Scope<'_>) {
        let mut current = Some(scope);
        while let Some(s) = current {
            if let Some(src) = s
                .sources
                .iter()
                .find(|src| src.binding.eq_ignore_ascii_case(&qualifier.value))
            {
                if let SourceColumns::Known(cols) = &src.columns {
                    if !cols.iter().any(|c| c.eq_ignore_ascii_case(&column.value)) {
                        self.record(VerificationIssue::UnknownColumn {
                            table: Some(src.label()),
                            column: column.value.clone(),
                            suggestion: suggest(&column.value, cols.iter().map(String::as_str)),
                        });
                    }
                }
                return;
            }
            current = s.parent;
        }
        self.unknown_qualifier(&qualifier.value, scope);
    }

    /// A qualifier that names no source in scope.
    fn unknown_qualifier(&mut self, qualifier: &str, scope: &Scope<'_>) {
        let mut bindings = Vec::new();
        let mut aliased_as = None;
        let mut current = Some(scope);
        while let Some(s) = current {
            for src in &s.sources {
                if src
                    .table
                    .as_deref()
                    .map_or(false, |t| t.eq_ignore_ascii_case(qualifier))
                    && aliased_as.is_none()
                {
                    aliased_as = Some(src.binding.clone());
                }
                if !src.binding.is_empty() {
                    bindings.push(src.binding.clone());
                }
            }
            current = s.parent;
        }

        let suggestion = aliased_as.or_else(|| {
            let candidates = bindings
                .iter()
                .map(String::as_str)
                .chain(self.schema.tables.iter().map(|t| t.name.as_str()));
            suggest(qualifier, candidates)
        });
        self.record(VerificationIssue::UnknownTable {
            table: qualifier.to_string(),
            suggestion,
        });
    }
}

fn last_ident(name: &ObjectName) -> Ident {
    name.0.last().cloned().unwrap_or_else(|| Ident::new(""))
}

fn output_columns(select: &Select, scope: &Scope<'_>) -> SourceColumns {
    let mut names = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => names.push(ident.value.clone()),
            SelectItem::UnnamedExpr(Expr::CompoundIdentifier(parts)) => {
                if let Some(last) = parts.last() {
                    names.push(last.value.clone());
                }
            }
            SelectItem::UnnamedExpr(expr) => names.push(expr.to_string()),
            SelectItem::ExprWithAlias { alias, .. } => names.push(alias.value.clone()),
            SelectItem::Wildcard(_) => {
                for src in &scope.sources {
                    match &src.columns {
                        SourceColumns::Known(cols) => names.extend(cols.iter().cloned()),
                        SourceColumns::Open => return SourceColumns::Open,
                    }
                }
            }
            SelectItem::QualifiedWildcard(name, _) => {
                let qualifier = last_ident(name);
                match scope
                    .sources
                    .iter()
                    .find(|s| s.binding.eq_ignore_ascii_case(&qualifier.value))
                    .map(|s| &s.columns)
                {
                    Some(SourceColumns::Known(cols)) => names.extend(cols.iter().cloned()),
                    _ => return SourceColumns::Open,
                }
            }
        }
    }
    SourceColumns::Known(names)
}

/// Closest candidate by Jaro-Winkler similarity, if any is close enough.
pub(crate) fn suggest<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let target = name.to_lowercase();
    candidates
        .into_iter()
        .map(|c| (strsim::jaro_winkler(&target, &c.to_lowercase()), c))
        .filter(|(score, _)| *score >= 0.8)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
        .map(|(_, c)| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::check_syntax;

    fn report(sql: &str) -> ReferenceReport {
        let schema = crate::schema::parse(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT, email TEXT, score REAL);",
        )
        .unwrap();
        let query = check_syntax(sql).unwrap();
        ReferenceChecker::new(&schema).check(&query)
    }

    fn unknown_column(sql: &str) -> Option<String> {
        match report(sql).issue {
            Some(VerificationIssue::UnknownColumn { column, .. }) => Some(column),
            other => {
                assert!(other.is_none(), "{sql}: {other:?}");
                None
            }
        }
    }

    #[test]
    fn test_window_specs_are_resolved() {
        for sql in [
            "SELECT ROW_NUMBER() OVER (ORDER BY bogus) FROM users",
            "SELECT count(*) OVER (PARTITION BY bogus) FROM users",
            "SELECT SUM(score) OVER (PARTITION BY username ORDER BY bogus DESC) FROM users",
        ] {
            assert_eq!(unknown_column(sql).as_deref(), Some("bogus"), "{sql}");
        }
        assert_eq!(
            unknown_column("SELECT RANK() OVER (PARTITION BY username ORDER BY score) FROM users"),
            None
        );
    }

    #[test]
    fn test_special_function_forms_are_resolved() {
        for sql in [
            "SELECT CEIL(bogus) FROM users",
            "SELECT FLOOR(bogus) FROM users",
            "SELECT POSITION('a' IN bogus) FROM users",
            "SELECT TRIM(bogus) FROM users",
            "SELECT username FROM users WHERE id = ANY(bogus)",
            "SELECT CASE WHEN score > 1 THEN bogus END FROM users",
        ] {
            assert_eq!(unknown_column(sql).as_deref(), Some("bogus"), "{sql}");
        }
        assert_eq!(
            unknown_column("SELECT CEIL(score), POSITION('a' IN email) FROM users"),
            None
        );
    }

    #[test]
    fn test_report_lists_schema_tables() {
        let report = report("SELECT u.username FROM users u");
        assert!(report.issue.is_none());
        assert!(report.tables.contains("users"));
    }

    #[test]
    fn test_suggest_threshold() {
        assert_eq!(suggest("user_name", ["username", "email"]), Some("username".to_string()));
        assert_eq!(suggest("zzz", ["username", "email"]), None);
    }
}
