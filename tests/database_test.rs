//! Integration tests for the database module against a real PostgreSQL
//! instance, gated on `TEST_DATABASE_URL` (skip, don't fail, if unset).

mod test_utils;

use pg_repair_agent::db::Database;
use test_utils::{has_test_database, with_test_database};

#[tokio::test]
async fn explain_estimated_returns_a_valid_plan() -> anyhow::Result<()> {
    if !has_test_database() {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return Ok(());
    }
    with_test_database(|pool| async move {
        let db = Database::from_pool(pool, "");
        let plan = db.explain_estimated("SELECT * FROM users WHERE id = 1").await?;
        assert!(!plan.root.node_type.is_empty());
        assert!(plan.root.total_cost >= 0.0);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn explain_estimated_detects_join_node() -> anyhow::Result<()> {
    if !has_test_database() {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return Ok(());
    }
    with_test_database(|pool| async move {
        let db = Database::from_pool(pool, "");
        let plan = db
            .explain_estimated(
                "SELECT u.name, p.title FROM users u \
                 JOIN posts p ON u.id = p.user_id \
                 WHERE p.published = true",
            )
            .await?;
        let has_join = plan.root.node_type.contains("Join")
            || plan.logical_children().iter().any(|p| p.node_type.contains("Join"));
        assert!(has_join, "expected a join in the execution plan");
        Ok(())
    })
    .await
}

#[tokio::test]
async fn schema_oracle_introspects_fixture_tables() -> anyhow::Result<()> {
    if !has_test_database() {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return Ok(());
    }
    with_test_database(|pool| async move {
        let db = Database::from_pool(pool, "");
        let tables = db.query_table_names().await?;
        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"posts".to_string()));

        let columns = db.query_columns("users").await?;
        assert!(columns.iter().any(|c| c.name == "email"));

        let foreign_keys = db.query_foreign_keys("posts").await?;
        assert!(foreign_keys.iter().any(|fk| fk.references_table == "users"));

        let indexes = db.query_indexes("posts").await?;
        assert!(indexes.iter().any(|i| i.columns.contains(&"user_id".to_string())));

        Ok(())
    })
    .await
}

#[tokio::test]
async fn execute_ddl_creates_a_usable_index() -> anyhow::Result<()> {
    if !has_test_database() {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return Ok(());
    }
    with_test_database(|pool| async move {
        let db = Database::from_pool(pool, std::env::var("TEST_DATABASE_URL").unwrap());
        db.execute_ddl("CREATE INDEX idx_users_email_test ON users(email)", 5_000)
            .await?;
        let indexes = db.query_indexes("users").await?;
        assert!(indexes.iter().any(|i| i.name == "idx_users_email_test"));
        Ok(())
    })
    .await
}
