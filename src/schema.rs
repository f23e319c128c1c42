//! Schema Oracle — fetches and caches a per-task canonical view of a
//! database's tables, columns, keys, indexes, and a few sample rows.

use crate::db::Database;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One column of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// PostgreSQL type name.
    pub data_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
}

/// A foreign key reference from one table/column to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Column on this table.
    pub column: String,
    /// Referenced table.
    pub references_table: String,
    /// Referenced column.
    pub references_column: String,
}

/// An existing index on a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether this index enforces uniqueness.
    pub is_unique: bool,
}

/// One table's full schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns, in declared order.
    pub columns: Vec<ColumnInfo>,
    /// Primary key columns, if any.
    pub primary_key: Vec<String>,
    /// Foreign key references.
    pub foreign_keys: Vec<ForeignKey>,
    /// Existing indexes.
    pub indexes: Vec<IndexInfo>,
    /// Up to N sample rows, each a JSON object keyed by column name.
    pub sample_rows: Vec<serde_json::Value>,
}

/// The full per-database schema snapshot the Planner is grounded against.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Schema {
    /// Tables, keyed by name.
    pub tables: Vec<TableSchema>,
}

impl Schema {
    /// Find a table by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// True if `table.column` (or just `column` against any table) exists
    /// in this schema -- used for the suggestion-groundedness invariant.
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table)
            .map(|t| t.columns.iter().any(|c| c.name == column))
            .unwrap_or(false)
    }

    /// True if `table` exists in this schema.
    pub fn has_table(&self, table: &str) -> bool {
        self.table(table).is_some()
    }
}

/// Caches a [`Schema`] per task, invalidating only on `CreateIndex` or an
/// explicit task change.
#[derive(Debug, Default)]
pub struct SchemaOracle {
    cached: Option<Schema>,
    dirty: bool,
}

const MAX_SAMPLE_ROWS: i64 = 3;

impl SchemaOracle {
    /// Create an empty oracle with nothing cached yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the schema if not cached (or if the index catalog was marked
    /// dirty by a prior `CreateIndex`), otherwise return the cached copy.
    pub async fn load(&mut self, db: &Database) -> Result<&Schema> {
        if self.cached.is_none() || self.dirty {
            let schema = fetch_schema(db).await?;
            self.cached = Some(schema);
            self.dirty = false;
        }
        Ok(self.cached.as_ref().unwrap())
    }

    /// Mark the index catalog portion stale; the next `load` re-fetches
    /// it after every `CreateIndex` action.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Drop the cache entirely -- used when the agent moves to a new task.
    pub fn reset(&mut self) {
        self.cached = None;
        self.dirty = false;
    }
}

async fn fetch_schema(db: &Database) -> Result<Schema> {
    let table_names = db.query_table_names().await?;
    let mut tables = Vec::with_capacity(table_names.len());
    for name in table_names {
        let columns = db.query_columns(&name).await?;
        let primary_key = db.query_primary_key(&name).await?;
        let foreign_keys = db.query_foreign_keys(&name).await?;
        let indexes = db.query_indexes(&name).await?;
        let sample_rows = db.query_sample_rows(&name, MAX_SAMPLE_ROWS).await.unwrap_or_default();
        tables.push(TableSchema {
            name,
            columns,
            primary_key,
            foreign_keys,
            indexes,
            sample_rows,
        });
    }
    Ok(Schema { tables })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema {
            tables: vec![TableSchema {
                name: "users".into(),
                columns: vec![ColumnInfo {
                    name: "email".into(),
                    data_type: "text".into(),
                    nullable: false,
                }],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
                indexes: vec![],
                sample_rows: vec![],
            }],
        }
    }

    #[test]
    fn has_column_checks_table_and_name() {
        let schema = sample_schema();
        assert!(schema.has_column("users", "email"));
        assert!(!schema.has_column("users", "missing"));
        assert!(!schema.has_column("orders", "email"));
    }

    #[test]
    fn oracle_starts_empty_and_marks_dirty_on_invalidate() {
        let mut oracle = SchemaOracle::new();
        assert!(oracle.cached.is_none());
        oracle.invalidate();
        assert!(oracle.dirty);
    }
}
