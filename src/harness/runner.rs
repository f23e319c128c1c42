//! Test Case Runner — executes one task's preprocess / predicted / cleanup
//! phases inside a single transaction that is always rolled back, so a task
//! never leaves side effects on the shared database.
//!
//! Uses a fresh, pool-bypassing connection carrying one transaction per
//! task, so every phase runs under the same isolation and statement
//! timeout as the agent loop.

use sqlx::{Connection, Row};

use crate::db::Database;
use crate::harness::metrics::ResultSet;

/// Outcome of running one task's three phases.
#[derive(Debug, Clone, Default)]
pub struct TestCaseResult {
    /// True iff every preprocess statement executed without error.
    pub preprocess_ok: bool,
    /// 0-based index of the first preprocess statement that failed, if any.
    pub failing_preprocess_index: Option<usize>,
    /// True iff the predicted statement executed without error.
    pub predicted_ok: bool,
    /// True iff every cleanup statement executed without error (best
    /// effort; cleanup failures never fail the task).
    pub cleanup_ok: bool,
    /// Captured rows, present only when the predicted statement was a
    /// `SELECT`.
    pub result_set: Option<ResultSet>,
    /// Rows affected, present only when the predicted statement was a
    /// DML/DDL statement.
    pub affected_rows: Option<u64>,
    /// The first error message encountered, if any, for diagnostics.
    pub error: Option<String>,
}

/// Runs one task's statements inside an isolated, always-rolled-back
/// transaction on a fresh connection.
pub struct TestCaseRunner {
    statement_timeout_ms: u64,
}

impl TestCaseRunner {
    /// Build a runner enforcing `statement_timeout_ms` on the connection for
    /// the whole transaction.
    pub fn new(statement_timeout_ms: u64) -> Self {
        Self { statement_timeout_ms }
    }

    /// Run `preprocess_sql`, then `predicted_sql`, then `clean_up_sql`, all
    /// inside one transaction that is rolled back regardless of outcome.
    pub async fn run(
        &self,
        db: &Database,
        preprocess_sql: &[String],
        predicted_sql: &str,
        clean_up_sql: &[String],
    ) -> crate::error::Result<TestCaseResult> {
        let mut conn = db.fresh_connection().await?;
        db.set_statement_timeout(&mut conn, self.statement_timeout_ms).await?;
        let mut tx = conn
            .begin()
            .await
            .map_err(crate::db::error::DbError::from)?;

        let mut result = TestCaseResult::default();

        result.preprocess_ok = true;
        for (i, stmt) in preprocess_sql.iter().enumerate() {
            if let Err(e) = run_statement(&mut tx, stmt).await {
                let message = e.to_string();
                // A preprocess statement that conflicts with existing state
                // (e.g. the index it creates already exists) is not a task
                // failure -- it means a prior run already established the
                // precondition.
                if message.to_lowercase().contains("already exists") {
                    continue;
                }
                result.preprocess_ok = false;
                result.failing_preprocess_index = Some(i);
                result.error = Some(message);
                break;
            }
        }

        if result.preprocess_ok {
            match run_predicted(&mut tx, predicted_sql).await {
                Ok((rows, affected)) => {
                    result.predicted_ok = true;
                    result.result_set = rows;
                    result.affected_rows = affected;
                }
                Err(e) => {
                    result.predicted_ok = false;
                    result.error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        result.cleanup_ok = true;
        for stmt in clean_up_sql {
            if run_statement(&mut tx, stmt).await.is_err() {
                result.cleanup_ok = false;
            }
        }

        // Always roll back: the runner never leaves side effects behind.
        let _ = tx.rollback().await;

        Ok(result)
    }
}

async fn run_statement(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    stmt: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(stmt).execute(&mut **tx).await.map(|_| ())
}

/// Run the predicted statement, returning captured rows for a `SELECT` or
/// the affected-row count otherwise.
async fn run_predicted(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    sql: &str,
) -> Result<(Option<ResultSet>, Option<u64>), sqlx::Error> {
    if is_select(sql) {
        // Wrap in row_to_json so arbitrary result shapes are captured
        // without needing per-column type information up front (same
        // approach as Database::query_sample_rows).
        let wrapped = format!("SELECT row_to_json(t) AS row FROM ({sql}) t");
        let rows = sqlx::query(&wrapped).fetch_all(&mut **tx).await?;
        let mut columns: Vec<String> = Vec::new();
        let mut out_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let value: serde_json::Value = row.try_get("row")?;
            if let serde_json::Value::Object(map) = value {
                if columns.is_empty() {
                    columns = map.keys().cloned().collect();
                }
                out_rows.push(columns.iter().map(|c| map.get(c).cloned().unwrap_or(serde_json::Value::Null)).collect());
            }
        }
        Ok((Some(ResultSet { columns, rows: out_rows }), None))
    } else {
        let result = sqlx::query(sql).execute(&mut **tx).await?;
        Ok((None, Some(result.rows_affected())))
    }
}

fn is_select(sql: &str) -> bool {
    sql.trim_start().to_uppercase().starts_with("SELECT")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_select_case_insensitively() {
        assert!(is_select("  select * from t"));
        assert!(is_select("SELECT 1"));
        assert!(!is_select("INSERT INTO t VALUES (1)"));
        assert!(!is_select("UPDATE t SET x = 1"));
    }

    #[test]
    fn runner_default_timeout_is_positive() {
        let runner = TestCaseRunner::new(5_000);
        assert_eq!(runner.statement_timeout_ms, 5_000);
    }
}
