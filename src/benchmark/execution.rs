//! Execution accuracy against read-only SQLite test databases.
//!
//! Gold and generated SQL run on the same database; result sets are compared
//! as unordered multisets of rows, columns matched by position.

use super::MetricOutcome;
use crate::error::{Nl2SqlError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// A result row with every value in canonical text form.
pub type Row = Vec<String>;

/// Locate the SQLite file for `db_id`: `<dir>/<db_id>/<db_id>.sqlite`, then
/// `<dir>/<db_id>.sqlite`, then `<dir>/<db_id>.db`.
pub fn resolve_database(databases_dir: &Path, db_id: &str) -> Option<PathBuf> {
    [
        databases_dir.join(db_id).join(format!("{}.sqlite", db_id)),
        databases_dir.join(format!("{}.sqlite", db_id)),
        databases_dir.join(format!("{}.db", db_id)),
    ]
    .into_iter()
    .find(|p| p.is_file())
}

pub fn open_read_only(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

fn canonical_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "null".to_string(),
        ValueRef::Integer(i) => format!("i:{}", i),
        ValueRef::Real(r) => {
            if r.fract() == 0.0 && r.abs() < 9.0e15 {
                format!("i:{}", r as i64)
            } else {
                format!("r:{:.9}", r)
            }
        }
        ValueRef::Text(bytes) => format!("t:{}", String::from_utf8_lossy(bytes)),
        ValueRef::Blob(bytes) => format!("b:{}", hex::encode(bytes)),
    }
}

/// Run one read-only statement and collect its rows.
pub fn run_query(conn: &Connection, sql: &str) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(Nl2SqlError::Execution(
            "statement is not read-only".to_string(),
        ));
    }
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns);
        for i in 0..columns {
            values.push(canonical_value(row.get_ref(i)?));
        }
        out.push(values);
    }
    Ok(out)
}

/// Multiset equality of two result sets.
pub fn results_match(gold: &[Row], predicted: &[Row]) -> bool {
    if gold.len() != predicted.len() {
        return false;
    }
    let mut a = gold.to_vec();
    let mut b = predicted.to_vec();
    a.sort();
    b.sort();
    a == b
}

fn compare_on(conn: &Connection, gold_sql: &str, predicted_sql: &str) -> MetricOutcome {
    let gold = match run_query(conn, gold_sql) {
        Ok(rows) => rows,
        Err(e) => return MetricOutcome::Error(format!("gold query failed: {}", e)),
    };
    let predicted = match run_query(conn, predicted_sql) {
        Ok(rows) => rows,
        Err(e) => return MetricOutcome::Error(format!("generated query failed: {}", e)),
    };
    debug!(gold_rows = gold.len(), predicted_rows = predicted.len(), "Compared result sets");
    if results_match(&gold, &predicted) {
        MetricOutcome::Match
    } else {
        MetricOutcome::Mismatch
    }
}

/// Execute both queries on `database` off the async runtime. The connection
/// is interrupted when `timeout` elapses.
pub async fn compare_on_database(
    database: &Path,
    gold_sql: &str,
    predicted_sql: &str,
    timeout: Duration,
) -> MetricOutcome {
    if predicted_sql.trim().is_empty() {
        return MetricOutcome::Error("no SQL was generated".to_string());
    }
    let conn = match open_read_only(database) {
        Ok(conn) => conn,
        Err(e) => {
            return MetricOutcome::Error(format!(
                "cannot open {}: {}",
                database.display(),
                e
            ))
        }
    };
    let interrupt = conn.get_interrupt_handle();
    let gold_sql = gold_sql.to_string();
    let predicted_sql = predicted_sql.to_string();
    let task = tokio::task::spawn_blocking(move || compare_on(&conn, &gold_sql, &predicted_sql));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => MetricOutcome::Error(format!("execution task failed: {}", e)),
        Err(_) => {
            interrupt.interrupt();
            warn!(database = %database.display(), "Execution timed out after {:?}", timeout);
            MetricOutcome::Error(format!("execution timed out after {:?}", timeout))
        }
    }
}
