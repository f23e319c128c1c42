//! Benchmark task data model.

use serde::{Deserialize, Serialize};

/// Which metric applies to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TaskCategory {
    /// Result-equivalence tasks, scored with soft-ex.
    Query,
    /// Multi-statement DDL/workflow tasks, scored with tcv.
    Management,
    /// Cost-improvement tasks, scored with qep.
    Efficiency,
    /// Result-equivalence tasks scoped to a user, scored with soft-ex.
    Personalization,
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskCategory::Query => "Query",
            TaskCategory::Management => "Management",
            TaskCategory::Efficiency => "Efficiency",
            TaskCategory::Personalization => "Personalization",
        };
        write!(f, "{s}")
    }
}

fn one_if_missing() -> Vec<String> {
    Vec::new()
}

/// One benchmark task.
///
/// *Invariants*: `preprocess_sql` and `clean_up_sql` are ordered; `category`
/// determines which metric applies; `category == Efficiency` implies
/// `efficiency == true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub instance_id: i64,
    /// Database name this task runs against.
    pub db_id: String,
    /// Natural-language description of the intended fix.
    pub query: String,
    /// One or more buggy SQL statements. The legacy singular `buggy_sql`
    /// field is accepted as a one-element array alias.
    #[serde(alias = "buggy_sql")]
    pub issue_sql: Vec<String>,
    /// Ordered statements to run before the predicted query.
    #[serde(default = "one_if_missing")]
    pub preprocess_sql: Vec<String>,
    /// Ordered statements to run after scoring, regardless of outcome.
    #[serde(default = "one_if_missing")]
    pub clean_up_sql: Vec<String>,
    /// Which metric family this task belongs to.
    pub category: TaskCategory,
    /// Whether this task is scored on execution efficiency.
    #[serde(default)]
    pub efficiency: bool,
    /// Optional reference solution used by soft-ex when present.
    #[serde(default)]
    pub reference_solution: Option<String>,
}

impl Task {
    /// Validate the category/efficiency-flag invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.category == TaskCategory::Efficiency && !self.efficiency {
            return Err(format!(
                "task {}: category=Efficiency requires efficiency=true",
                self.instance_id
            ));
        }
        if self.issue_sql.is_empty() {
            return Err(format!("task {}: issue_sql must not be empty", self.instance_id));
        }
        Ok(())
    }

    /// Parse a JSON-lines task file's contents into a list of tasks.
    /// Unknown fields are ignored; a malformed line is reported with its
    /// 1-based line number rather than aborting the whole load.
    pub fn parse_jsonl(contents: &str) -> Result<Vec<Task>, String> {
        let mut tasks = Vec::new();
        for (i, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let task: Task = serde_json::from_str(line)
                .map_err(|e| format!("line {}: {e}", i + 1))?;
            task.validate()?;
            tasks.push(task);
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legacy_buggy_sql_alias_as_singleton() {
        let json = r#"{"instance_id":1,"db_id":"db","query":"fix it","buggy_sql":["SELECT 1"],"category":"Query"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.issue_sql, vec!["SELECT 1".to_string()]);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = r#"{"instance_id":1,"db_id":"db","query":"q","issue_sql":["SELECT 1"],"category":"Query","mystery_field":42}"#;
        assert!(serde_json::from_str::<Task>(json).is_ok());
    }

    #[test]
    fn efficiency_category_without_flag_is_invalid() {
        let json = r#"{"instance_id":1,"db_id":"db","query":"q","issue_sql":["SELECT 1"],"category":"Efficiency","efficiency":false}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert!(task.validate().is_err());
    }

    #[test]
    fn parses_multiple_lines_and_skips_blank() {
        let jsonl = "{\"instance_id\":1,\"db_id\":\"d\",\"query\":\"q\",\"issue_sql\":[\"SELECT 1\"],\"category\":\"Query\"}\n\n{\"instance_id\":2,\"db_id\":\"d\",\"query\":\"q\",\"issue_sql\":[\"SELECT 2\"],\"category\":\"Management\"}\n";
        let tasks = Task::parse_jsonl(jsonl).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].category, TaskCategory::Management);
    }
}
