//! Executor — applies an [`Action`] against the database.
//!
//! Dispatches on the `Action` tag: one `match`, no trait-object hierarchy.
//! Every DDL/ANALYZE path runs on a fresh connection outside the evaluation
//! transaction and under a per-statement timeout; engine errors surface as
//! `Result::Err` rather than panicking, so the caller can record
//! `outcome=error`.

use crate::db::Database;
use crate::error::Result;
use crate::hypothetical::{HypotheticalIndexProver, HypotheticalResult};
use crate::planner::action::Action;
use tracing::info;

/// Result of applying one [`Action`].
#[derive(Debug, Clone)]
pub struct ExecutorOutcome {
    /// The query set to use for the next Analyze phase.
    pub query_set: Vec<String>,
    /// Whether the database's persistent state was mutated (DDL ran, or
    /// statistics were refreshed).
    pub mutated: bool,
    /// Populated only for `TestIndex`: cost before/after as a percentage
    /// improvement.
    pub hypothetical_result: Option<HypotheticalResult>,
}

impl ExecutorOutcome {
    fn unchanged(query_set: &[String]) -> Self {
        Self {
            query_set: query_set.to_vec(),
            mutated: false,
            hypothetical_result: None,
        }
    }
}

/// Applies Actions against a [`Database`] under a fixed statement timeout.
pub struct Executor {
    statement_timeout_ms: u64,
}

impl Executor {
    /// Build an executor enforcing `statement_timeout_ms` on every DDL,
    /// ANALYZE, and hypothetical-index statement it runs.
    pub fn new(statement_timeout_ms: u64) -> Self {
        Self { statement_timeout_ms }
    }

    /// Apply `action` to `db`, given the current query set and a
    /// per-worker hypothetical-index prover.
    pub async fn execute(
        &self,
        action: &Action,
        db: &Database,
        current_sql: &[String],
        prover: &mut HypotheticalIndexProver,
    ) -> Result<ExecutorOutcome> {
        match action {
            Action::CreateIndex { ddl, .. } => {
                info!(ddl = %ddl, "executing CreateIndex");
                db.execute_ddl(ddl, self.statement_timeout_ms).await?;
                Ok(ExecutorOutcome {
                    query_set: current_sql.to_vec(),
                    mutated: true,
                    hypothetical_result: None,
                })
            }
            Action::RunAnalyze { table, .. } => {
                info!(table = %table, "executing RunAnalyze");
                db.run_analyze(table, self.statement_timeout_ms).await?;
                Ok(ExecutorOutcome {
                    query_set: current_sql.to_vec(),
                    mutated: true,
                    hypothetical_result: None,
                })
            }
            Action::RewriteQuery { new_sql, .. } => {
                let statements = split_statements(new_sql);
                info!(count = statements.len(), "executing RewriteQuery");
                Ok(ExecutorOutcome {
                    query_set: statements,
                    mutated: false,
                    hypothetical_result: None,
                })
            }
            Action::TestIndex { ddl, probe_query, .. } => {
                info!(ddl = %ddl, "executing TestIndex");
                let result = prover.test_index(db, ddl, probe_query).await?;
                Ok(ExecutorOutcome {
                    query_set: current_sql.to_vec(),
                    mutated: false,
                    hypothetical_result: result,
                })
            }
            Action::Done { .. } | Action::Failed { .. } => Ok(ExecutorOutcome::unchanged(current_sql)),
        }
    }

    /// Execute a Management-category batch of syntactically-valid
    /// statements in a single transaction. Returns `true` on full success.
    pub async fn execute_batch(&self, db: &Database, statements: &[String]) -> Result<bool> {
        let mut conn = db.fresh_connection().await?;
        db.set_statement_timeout(&mut conn, self.statement_timeout_ms).await?;
        use sqlx::Connection;
        let mut tx = conn
            .begin()
            .await
            .map_err(crate::db::error::DbError::from)?;
        for stmt in statements {
            use sqlx::Executor as _;
            tx.execute(stmt.as_str())
                .await
                .map_err(crate::db::error::DbError::from)?;
        }
        tx.commit().await.map_err(crate::db::error::DbError::from)?;
        Ok(true)
    }
}

/// Split a possibly multi-statement SQL string on top-level semicolons,
/// dropping empty trailing fragments.
fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_multi_statement_rewrite_on_semicolons() {
        let statements = split_statements("CREATE TABLE a(x int); CREATE TABLE b(y int);");
        assert_eq!(
            statements,
            vec!["CREATE TABLE a(x int)".to_string(), "CREATE TABLE b(y int)".to_string()]
        );
    }

    #[test]
    fn single_statement_rewrite_yields_one_element() {
        let statements = split_statements("SELECT 1");
        assert_eq!(statements, vec!["SELECT 1".to_string()]);
    }

    #[test]
    fn blank_and_whitespace_fragments_are_dropped() {
        let statements = split_statements("SELECT 1;  ;\n");
        assert_eq!(statements, vec!["SELECT 1".to_string()]);
    }
}
