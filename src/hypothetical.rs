//! Hypothetical Index Prover — scores a candidate index via the `hypopg`
//! extension without ever building the real thing.
//!
//! Thin wrapper over `hypopg`'s `hypopg_create_index` / `hypopg_reset`
//! functions: probe availability once, remember the answer, never re-probe
//! per call.

use crate::db::Database;
use crate::error::Result;
use sqlx::Row;

/// Outcome of testing a hypothetical index against a probe query.
#[derive(Debug, Clone, PartialEq)]
pub struct HypotheticalResult {
    /// Estimated total cost before the hypothetical index existed.
    pub cost_before: f64,
    /// Estimated total cost with the hypothetical index in place.
    pub cost_after: f64,
    /// `(cost_before - cost_after) / cost_before`, as a fraction.
    pub improvement: f64,
    /// True when `improvement >= 0.10`; below that, the index is
    /// reported as not beneficial.
    pub beneficial: bool,
}

/// Probes `hypopg` availability once and scores hypothetical indexes.
#[derive(Debug)]
pub struct HypotheticalIndexProver {
    available: Option<bool>,
}

impl Default for HypotheticalIndexProver {
    fn default() -> Self {
        Self { available: None }
    }
}

impl HypotheticalIndexProver {
    /// Create a prover that hasn't probed availability yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `hypopg` is installed on the target database, probing once
    /// and caching the result for the lifetime of this prover (one per
    /// worker).
    pub async fn is_available(&mut self, db: &Database) -> bool {
        if let Some(a) = self.available {
            return a;
        }
        let a = db.hypopg_available().await;
        self.available = Some(a);
        a
    }

    /// Score `ddl` (a `CREATE INDEX ...` statement) against `probe_query`
    /// without building the real index.
    ///
    /// Returns `Ok(None)` when `hypopg` is unavailable -- callers must
    /// report "unavailable" and the Planner must not emit `TestIndex`
    /// again this run.
    pub async fn test_index(
        &mut self,
        db: &Database,
        ddl: &str,
        probe_query: &str,
    ) -> Result<Option<HypotheticalResult>> {
        if !self.is_available(db).await {
            return Ok(None);
        }

        let mut conn = db.fresh_connection().await?;
        use sqlx::Connection;
        use sqlx::Executor;

        let before_plan = db.explain_estimated(probe_query).await?;
        let cost_before = before_plan.root.total_cost;

        let hypo_ddl = format!("SELECT * FROM hypopg_create_index('{}')", escape_sql_literal(ddl));
        let created = conn
            .fetch_one(hypo_ddl.as_str())
            .await
            .map_err(crate::db::error::DbError::from)?;
        let indexrelid: i64 = created.try_get("indexrelid").unwrap_or_default();

        let after_row = sqlx::query(&format!("EXPLAIN (FORMAT JSON) {probe_query}"))
            .fetch_one(&mut conn)
            .await
            .map_err(crate::db::error::DbError::from)?;
        let plan_json: serde_json::Value = after_row
            .try_get("QUERY PLAN")
            .map_err(|e| crate::db::error::DbError::Query(e.to_string()))?;
        let cost_after = crate::plan::ExecutionPlan::from_json(&plan_json)
            .map(|p| p.root.total_cost)
            .unwrap_or(cost_before);

        let _ = conn
            .execute(format!("SELECT hypopg_drop_index({indexrelid})").as_str())
            .await;
        let _ = conn.close().await;

        let improvement = if cost_before > 0.0 {
            (cost_before - cost_after) / cost_before
        } else {
            0.0
        };

        Ok(Some(HypotheticalResult {
            cost_before,
            cost_after,
            improvement,
            beneficial: improvement >= 0.10,
        }))
    }
}

/// Escape single quotes for embedding `ddl` inside a `hypopg_create_index`
/// string literal.
fn escape_sql_literal(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn improvement_below_ten_percent_is_not_beneficial() {
        let result = HypotheticalResult {
            cost_before: 100.0,
            cost_after: 95.0,
            improvement: 0.05,
            beneficial: 0.05 >= 0.10,
        };
        assert!(!result.beneficial);
    }

    #[test]
    fn improvement_at_or_above_ten_percent_is_beneficial() {
        let improvement = (100.0 - 88.0) / 100.0;
        assert!(improvement >= 0.10);
    }

    #[test]
    fn escapes_embedded_quotes() {
        let ddl = "CREATE INDEX idx ON t(c) WHERE c = 'x'";
        assert_eq!(
            escape_sql_literal(ddl),
            "CREATE INDEX idx ON t(c) WHERE c = ''x''"
        );
    }
}
