//! Labeled benchmark samples.
//!
//! A dataset is a JSON array of `{question, query|gold_sql, db_id, schema?}`
//! objects (Spider's `dev.json` layout). Schema text comes from the inline
//! field, a Spider `tables.json`, or the database's `sqlite_master`.

use super::execution::{open_read_only, resolve_database};
use crate::error::{Nl2SqlError, Result};
use crate::schema::{Column, ForeignKeyRef, Schema, Table};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSample {
    /// Position in the source dataset; stable across sampling.
    pub id: usize,
    pub question: String,
    pub gold_sql: String,
    pub db_id: String,
    pub schema: String,
}

#[derive(Debug, Deserialize)]
struct RawSample {
    question: String,
    #[serde(alias = "query", alias = "SQL")]
    gold_sql: String,
    #[serde(default)]
    db_id: String,
    #[serde(default)]
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeySpec {
    One(i64),
    Many(Vec<i64>),
}

impl KeySpec {
    fn indexes(&self) -> Vec<i64> {
        match self {
            KeySpec::One(i) => vec![*i],
            KeySpec::Many(v) => v.clone(),
        }
    }
}

/// One entry of a Spider `tables.json`.
#[derive(Debug, Deserialize)]
struct SpiderDatabase {
    db_id: String,
    table_names_original: Vec<String>,
    column_names_original: Vec<(i64, String)>,
    #[serde(default)]
    column_types: Vec<String>,
    #[serde(default)]
    primary_keys: Vec<KeySpec>,
    #[serde(default)]
    foreign_keys: Vec<(i64, i64)>,
}

impl SpiderDatabase {
    fn into_schema(self) -> Schema {
        let mut tables: Vec<Table> = self
            .table_names_original
            .iter()
            .map(|name| Table {
                name: name.clone(),
                columns: Vec::new(),
            })
            .collect();

        // Global column index -> (table index, position in table)
        let mut positions: HashMap<i64, (usize, usize)> = HashMap::new();
        for (idx, (table_idx, name)) in self.column_names_original.iter().enumerate() {
            let Ok(t) = usize::try_from(*table_idx) else {
                continue;
            };
            let Some(table) = tables.get_mut(t) else {
                continue;
            };
            let data_type = self
                .column_types
                .get(idx)
                .map(|t| t.to_uppercase())
                .unwrap_or_default();
            positions.insert(idx as i64, (t, table.columns.len()));
            table.columns.push(Column::new(name.clone(), data_type));
        }

        for key in &self.primary_keys {
            for idx in key.indexes() {
                if let Some(&(t, c)) = positions.get(&idx) {
                    let column = &mut tables[t].columns[c];
                    column.primary_key = true;
                    column.nullable = false;
                }
            }
        }

        for &(from, to) in &self.foreign_keys {
            let (Some(&(ft, fc)), Some(&(tt, tc))) = (positions.get(&from), positions.get(&to)) else {
                continue;
            };
            let target = ForeignKeyRef {
                table: tables[tt].name.clone(),
                column: tables[tt].columns[tc].name.clone(),
            };
            tables[ft].columns[fc].references = Some(target);
        }

        Schema::new(tables, Vec::new())
    }
}

/// Read a Spider `tables.json` into canonical DDL keyed by lowercase db id.
pub fn load_spider_tables(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)?;
    let databases: Vec<SpiderDatabase> = serde_json::from_str(&content).map_err(|e| {
        Nl2SqlError::Dataset(format!("cannot parse {}: {}", path.display(), e))
    })?;
    Ok(databases
        .into_iter()
        .map(|db| (db.db_id.to_lowercase(), db.into_schema().canonical_text()))
        .collect())
}

/// CREATE TABLE statements stored in a database's `sqlite_master`.
pub fn schema_from_sqlite(database: &Path) -> Result<String> {
    let conn = open_read_only(database)?;
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master \
         WHERE type = 'table' AND sql IS NOT NULL AND name NOT LIKE 'sqlite_%' \
         ORDER BY rowid",
    )?;
    let statements = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(statements
        .iter()
        .map(|s| format!("{};", s.trim().trim_end_matches(';')))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Load every sample of `dataset`, resolving schema text per sample.
/// A sample whose schema cannot be found keeps an empty schema; the pipeline
/// rejects it at run time and the harness records the failure.
pub fn load_samples(
    dataset: &Path,
    tables: Option<&Path>,
    databases_dir: Option<&Path>,
) -> Result<Vec<BenchmarkSample>> {
    let content = std::fs::read_to_string(dataset).map_err(|e| {
        Nl2SqlError::Dataset(format!("cannot read {}: {}", dataset.display(), e))
    })?;
    let raw: Vec<RawSample> = serde_json::from_str(&content).map_err(|e| {
        Nl2SqlError::Dataset(format!("cannot parse {}: {}", dataset.display(), e))
    })?;

    let spider = match tables {
        Some(path) => load_spider_tables(path)?,
        None => HashMap::new(),
    };
    let mut from_sqlite: HashMap<String, String> = HashMap::new();

    let mut samples = Vec::with_capacity(raw.len());
    for (id, sample) in raw.into_iter().enumerate() {
        let key = sample.db_id.to_lowercase();
        let schema = match sample.schema.filter(|s| !s.trim().is_empty()) {
            Some(inline) => inline,
            None => match spider.get(&key) {
                Some(ddl) => ddl.clone(),
                None => {
                    if !from_sqlite.contains_key(&key) {
                        let database = databases_dir.and_then(|dir| resolve_database(dir, &sample.db_id));
                        let ddl = match database.map(|db| schema_from_sqlite(&db)) {
                            Some(Ok(ddl)) => ddl,
                            Some(Err(e)) => {
                                warn!(db_id = %sample.db_id, "Cannot read sqlite_master: {}", e);
                                String::new()
                            }
                            None => String::new(),
                        };
                        if ddl.is_empty() {
                            warn!(sample = id, db_id = %sample.db_id, "No schema found for sample");
                        }
                        from_sqlite.insert(key.clone(), ddl);
                    }
                    from_sqlite.get(&key).cloned().unwrap_or_default()
                }
            },
        };

        samples.push(BenchmarkSample {
            id,
            question: sample.question,
            gold_sql: sample.gold_sql,
            db_id: sample.db_id,
            schema,
        });
    }

    info!(samples = samples.len(), dataset = %dataset.display(), "Dataset loaded");
    Ok(samples)
}

/// Seeded random subset of `n` samples, kept in dataset order. `None` or
/// an `n` at least the dataset size keeps everything.
pub fn sample(samples: Vec<BenchmarkSample>, n: Option<usize>, seed: u64) -> Vec<BenchmarkSample> {
    let n = match n {
        Some(n) if n < samples.len() => n,
        _ => return samples,
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, samples.len(), n).into_vec();
    picked.sort_unstable();

    let mut slots: Vec<Option<BenchmarkSample>> = samples.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TABLES_JSON: &str = r#"[{
        "db_id": "concert_singer",
        "table_names_original": ["stadium", "concert"],
        "column_names_original": [[-1, "*"], [0, "Stadium_ID"], [0, "Name"], [1, "concert_ID"], [1, "Stadium_ID"]],
        "column_types": ["text", "number", "text", "number", "text"],
        "primary_keys": [1, [3]],
        "foreign_keys": [[4, 1]]
    }]"#;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_spider_tables_become_ddl() {
        let file = write_temp(TABLES_JSON);
        let schemas = load_spider_tables(file.path()).unwrap();
        let ddl = &schemas["concert_singer"];
        let schema = crate::schema::parse(ddl).unwrap();

        let stadium = schema.table("stadium").unwrap();
        assert!(stadium.column("Stadium_ID").unwrap().primary_key);
        let concert = schema.table("concert").unwrap();
        let fk = concert.column("Stadium_ID").unwrap().references.clone().unwrap();
        assert_eq!(fk.table, "stadium");
        assert_eq!(fk.column, "Stadium_ID");
        assert!(schema.is_consistent());
    }

    #[test]
    fn test_load_samples_accepts_query_alias() {
        let dataset = write_temp(
            r#"[{"question": "How many stadiums?", "query": "SELECT count(*) FROM stadium", "db_id": "concert_singer"},
                {"question": "Names?", "gold_sql": "SELECT name FROM t", "db_id": "x", "schema": "CREATE TABLE t (name TEXT);"}]"#,
        );
        let tables = write_temp(TABLES_JSON);
        let samples = load_samples(dataset.path(), Some(tables.path()), None).unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].gold_sql, "SELECT count(*) FROM stadium");
        assert!(samples[0].schema.contains("CREATE TABLE stadium"));
        assert_eq!(samples[1].schema, "CREATE TABLE t (name TEXT);");
        assert_eq!(samples[1].id, 1);
    }

    #[test]
    fn test_sampling_is_seeded() {
        let make = || {
            (0..50)
                .map(|id| BenchmarkSample {
                    id,
                    question: format!("q{}", id),
                    gold_sql: String::new(),
                    db_id: String::new(),
                    schema: String::new(),
                })
                .collect::<Vec<_>>()
        };
        let a: Vec<usize> = sample(make(), Some(10), 42).iter().map(|s| s.id).collect();
        let b: Vec<usize> = sample(make(), Some(10), 42).iter().map(|s| s.id).collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        assert!(a.windows(2).all(|w| w[0] < w[1]));

        assert_eq!(sample(make(), None, 42).len(), 50);
        assert_eq!(sample(make(), Some(500), 42).len(), 50);
    }
}
