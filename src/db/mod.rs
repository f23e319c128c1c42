//! Database module for the agent.
//!
//! Handles connection management, EXPLAIN retrieval, schema introspection,
//! and the DDL/ANALYZE execution paths the Executor needs: fresh
//! (pool-bypassing) connections for DDL so it never rides the evaluation
//! transaction, and catalog introspection for the Schema Oracle.

pub mod error;

use error::DbError;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Executor as SqlxExecutor, PgConnection, Pool, Postgres, Row};
use std::time::Duration;

use crate::error::Result;
use crate::plan::ExecutionPlan;
use crate::schema::{ColumnInfo, ForeignKey, IndexInfo};

/// Database connection manager.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Postgres>,
    connection_string: String,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(connection_string)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            connection_string: connection_string.to_string(),
        })
    }

    /// Create a Database instance from an existing connection pool.
    pub fn from_pool(pool: Pool<Postgres>, connection_string: impl Into<String>) -> Self {
        Self {
            pool,
            connection_string: connection_string.into(),
        }
    }

    /// Open a fresh, dedicated connection outside the pool. DDL and ANALYZE
    /// must never ride the evaluation transaction.
    pub async fn fresh_connection(&self) -> Result<PgConnection> {
        use sqlx::Connection;
        let conn = PgConnection::connect(&self.connection_string)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(conn)
    }

    /// Estimated-only EXPLAIN (no ANALYZE, no execution). Always run first
    /// in the Analyze phase.
    pub async fn explain_estimated(&self, query: &str) -> Result<ExecutionPlan> {
        self.run_explain(query, "EXPLAIN (FORMAT JSON)").await
    }

    /// ANALYZE-augmented EXPLAIN with a per-statement timeout that is
    /// scoped to this one query and does not leak to later statements on
    /// the same connection.
    pub async fn explain_analyzed(&self, query: &str, timeout_ms: u64) -> Result<ExecutionPlan> {
        let mut conn = self.fresh_connection().await?;
        self.set_statement_timeout(&mut conn, timeout_ms).await?;
        let result = self
            .run_explain_on(&mut conn, query, "EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON)")
            .await;
        // Best-effort reset so the connection (about to be dropped anyway)
        // never leaves a surprising timeout behind if pooled in the future.
        let _ = self.set_statement_timeout(&mut conn, 0).await;
        result
    }

    async fn run_explain(&self, query: &str, prefix: &str) -> Result<ExecutionPlan> {
        let explain_query = format!("{prefix} {query}");
        let row = sqlx::query(&explain_query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DbError::from(e))?;
        parse_explain_row(&row)
    }

    async fn run_explain_on(
        &self,
        conn: &mut PgConnection,
        query: &str,
        prefix: &str,
    ) -> Result<ExecutionPlan> {
        let explain_query = format!("{prefix} {query}");
        let row = sqlx::query(&explain_query)
            .fetch_one(conn)
            .await
            .map_err(|e| DbError::from(e))?;
        parse_explain_row(&row)
    }

    /// Set (or clear, with `timeout_ms == 0`) `statement_timeout` for the
    /// lifetime of `conn` only.
    pub async fn set_statement_timeout(&self, conn: &mut PgConnection, timeout_ms: u64) -> Result<()> {
        let stmt = format!("SET statement_timeout = {timeout_ms}");
        conn.execute(stmt.as_str())
            .await
            .map_err(|e| DbError::from(e))?;
        Ok(())
    }

    /// Execute a DDL statement (e.g. `CREATE INDEX ...`) on a fresh
    /// connection, outside the evaluation transaction.
    pub async fn execute_ddl(&self, ddl: &str, timeout_ms: u64) -> Result<()> {
        let mut conn = self.fresh_connection().await?;
        self.set_statement_timeout(&mut conn, timeout_ms).await?;
        conn.execute(ddl)
            .await
            .map_err(|e| DbError::from(e))?;
        Ok(())
    }

    /// Run `ANALYZE <table>` on a fresh connection.
    pub async fn run_analyze(&self, table: &str, timeout_ms: u64) -> Result<()> {
        let stmt = format!("ANALYZE {table}");
        self.execute_ddl(&stmt, timeout_ms).await
    }

    /// List user tables in the `public` schema.
    pub async fn query_table_names(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(rows
            .iter()
            .map(|r| r.try_get::<String, _>("table_name").unwrap_or_default())
            .collect())
    }

    /// Columns for one table, in declared order.
    pub async fn query_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = $1 ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(rows.iter().map(column_info).collect())
    }

    /// Primary key columns for one table.
    pub async fn query_primary_key(&self, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT a.attname AS column_name \
             FROM pg_index i \
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
             WHERE i.indrelid = $1::regclass AND i.indisprimary",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(rows
            .iter()
            .map(|r| r.try_get::<String, _>("column_name").unwrap_or_default())
            .collect())
    }

    /// Foreign keys declared on one table.
    pub async fn query_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let rows = sqlx::query(
            "SELECT \
                kcu.column_name, \
                ccu.table_name AS foreign_table_name, \
                ccu.column_name AS foreign_column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
                ON tc.constraint_name = kcu.constraint_name \
             JOIN information_schema.constraint_column_usage ccu \
                ON tc.constraint_name = ccu.constraint_name \
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_name = $1",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(rows
            .iter()
            .map(|r| ForeignKey {
                column: r.try_get::<String, _>("column_name").unwrap_or_default(),
                references_table: r
                    .try_get::<String, _>("foreign_table_name")
                    .unwrap_or_default(),
                references_column: r
                    .try_get::<String, _>("foreign_column_name")
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Existing indexes on one table; refreshed after every
    /// `CreateIndex` action.
    pub async fn query_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        let rows = sqlx::query(
            "SELECT \
                i.relname AS index_name, \
                ix.indisunique AS is_unique, \
                array_agg(a.attname ORDER BY array_position(ix.indkey, a.attnum)) AS columns \
             FROM pg_index ix \
             JOIN pg_class t ON t.oid = ix.indrelid \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
             WHERE t.relname = $1 \
             GROUP BY i.relname, ix.indisunique",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(rows
            .iter()
            .map(|r| IndexInfo {
                name: r.try_get::<String, _>("index_name").unwrap_or_default(),
                is_unique: r.try_get::<bool, _>("is_unique").unwrap_or(false),
                columns: r
                    .try_get::<Vec<String>, _>("columns")
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Up to `limit` sample rows from `table`, each as a JSON object.
    pub async fn query_sample_rows(&self, table: &str, limit: i64) -> Result<Vec<Value>> {
        let stmt = format!(
            "SELECT row_to_json(t) AS row FROM (SELECT * FROM {table} LIMIT {limit}) t"
        );
        let rows = sqlx::query(&stmt)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(rows
            .iter()
            .filter_map(|r| r.try_get::<Value, _>("row").ok())
            .collect())
    }

    /// Whether the `hypopg` extension's functions are installed, probed
    /// once per worker.
    pub async fn hypopg_available(&self) -> bool {
        sqlx::query("SELECT 1 FROM pg_proc WHERE proname = 'hypopg_create_index'")
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten()
            .is_some()
    }

    /// A direct handle to the underlying pool, for components (the Test
    /// Case Runner) that need to open and manage their own transaction.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

fn column_info(row: &PgRow) -> ColumnInfo {
    ColumnInfo {
        name: row.try_get::<String, _>("column_name").unwrap_or_default(),
        data_type: row.try_get::<String, _>("data_type").unwrap_or_default(),
        nullable: row
            .try_get::<String, _>("is_nullable")
            .map(|s| s == "YES")
            .unwrap_or(true),
    }
}

fn parse_explain_row(row: &PgRow) -> Result<ExecutionPlan> {
    let plan_json: Value = row
        .try_get("QUERY PLAN")
        .map_err(|e| DbError::Query(e.to_string()))?;
    ExecutionPlan::from_json(&plan_json)
        .map_err(DbError::PlanError)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    async fn get_test_db() -> Option<Database> {
        dotenv::from_filename(".env").ok();
        dotenv::from_filename("tests/test.env").ok();
        dotenv::dotenv().ok();

        let database_url = match env::var("TEST_DATABASE_URL") {
            Ok(u) => u,
            Err(_) => return None,
        };

        let mut retries = 3;
        loop {
            match Database::new(&database_url).await {
                Ok(db) => return Some(db),
                Err(_) if retries > 0 => {
                    retries -= 1;
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
                Err(_) => return None,
            }
        }
    }

    #[tokio::test]
    async fn explain_estimated_returns_a_plan() {
        let Some(db) = get_test_db().await else {
            eprintln!("skipping: TEST_DATABASE_URL not set");
            return;
        };
        let plan = db.explain_estimated("SELECT 1").await.unwrap();
        assert!(plan.root.total_cost >= 0.0);
    }

    #[tokio::test]
    async fn statement_timeout_does_not_leak_to_next_statement() {
        let Some(db) = get_test_db().await else {
            eprintln!("skipping: TEST_DATABASE_URL not set");
            return;
        };
        let mut conn = db.fresh_connection().await.unwrap();
        db.set_statement_timeout(&mut conn, 1).await.unwrap();
        // Give the 1ms timeout a moment to matter, then clear it and run a
        // normal query -- it must succeed, proving the setting didn't leak.
        db.set_statement_timeout(&mut conn, 0).await.unwrap();
        use sqlx::Executor;
        conn.execute("SELECT 1").await.unwrap();
    }
}
