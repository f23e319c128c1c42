//! The `Action` tagged variant the Planner emits and the Executor
//! dispatches on.

use serde::{Deserialize, Serialize};

/// A single action the Planner can choose for the next iteration.
///
/// Modelled as a tagged variant rather than a trait-object hierarchy: the
/// Executor performs one `match` on the tag.
///
/// *Invariant*: terminal variants ([`Action::Done`], [`Action::Failed`]) may
/// not appear as non-final entries in a Solution's action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Create a real index via the given DDL statement.
    CreateIndex {
        /// The `CREATE INDEX ...` statement to execute.
        ddl: String,
        /// Why the planner chose this action.
        rationale: String,
        /// Planner's confidence in this action, in `[0, 1]`.
        confidence: f64,
    },
    /// Replace the current query set with `new_sql`.
    RewriteQuery {
        /// One or more semicolon-separated replacement statements.
        #[serde(rename = "newSQL")]
        new_sql: String,
        /// Why the planner chose this rewrite.
        rationale: String,
        /// Planner's confidence in this action, in `[0, 1]`.
        confidence: f64,
    },
    /// Refresh planner statistics for a table.
    RunAnalyze {
        /// Table to analyze.
        table: String,
        /// Why the planner chose this action.
        rationale: String,
        /// Planner's confidence in this action, in `[0, 1]`.
        confidence: f64,
    },
    /// Score a hypothetical index without building it.
    TestIndex {
        /// The `CREATE INDEX ...` statement to test hypothetically.
        ddl: String,
        /// The query to re-run EXPLAIN against after the hypothetical
        /// index is in place.
        probe_query: String,
        /// Why the planner chose to test this index.
        rationale: String,
        /// Planner's confidence in this action, in `[0, 1]`.
        confidence: f64,
    },
    /// Terminal: the query is correct and within budget.
    Done {
        /// Why the planner believes the task is complete.
        rationale: String,
    },
    /// Terminal: no productive action remains.
    Failed {
        /// Why the planner gave up.
        rationale: String,
    },
}

impl Action {
    /// True for the two terminal variants.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Done { .. } | Action::Failed { .. })
    }

    /// A short kind name, used for the action-kind histogram and for
    /// `IterationRecord` summaries.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::CreateIndex { .. } => "CreateIndex",
            Action::RewriteQuery { .. } => "RewriteQuery",
            Action::RunAnalyze { .. } => "RunAnalyze",
            Action::TestIndex { .. } => "TestIndex",
            Action::Done { .. } => "Done",
            Action::Failed { .. } => "Failed",
        }
    }

    /// The action's primary target (table name or a query snippet),
    /// used by iteration-memory compression.
    pub fn target(&self) -> String {
        match self {
            Action::CreateIndex { ddl, .. } => ddl.clone(),
            Action::RewriteQuery { new_sql, .. } => truncate(new_sql, 40),
            Action::RunAnalyze { table, .. } => table.clone(),
            Action::TestIndex { ddl, .. } => ddl.clone(),
            Action::Done { rationale } | Action::Failed { rationale } => truncate(rationale, 40),
        }
    }

    /// Summarise to roughly 16 tokens, approximated by word count.
    pub fn summarize(&self) -> String {
        let words: Vec<&str> = self.target().split_whitespace().take(16).collect();
        format!("{}({})", self.kind_name(), words.join(" "))
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max_chars).collect();
        t.push('…');
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_and_failed_are_terminal() {
        assert!(Action::Done { rationale: "ok".into() }.is_terminal());
        assert!(Action::Failed { rationale: "stuck".into() }.is_terminal());
        assert!(!Action::RunAnalyze { table: "t".into(), rationale: "r".into(), confidence: 0.5 }.is_terminal());
    }

    #[test]
    fn serializes_with_tagged_action_field() {
        let action = Action::CreateIndex {
            ddl: "CREATE INDEX idx_x ON t(x)".into(),
            rationale: "missing index".into(),
            confidence: 0.9,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "create_index");
        assert_eq!(json["ddl"], "CREATE INDEX idx_x ON t(x)");
    }

    #[test]
    fn deserializes_rewrite_query_camel_case_field() {
        let json = r#"{"action":"rewrite_query","newSQL":"SELECT 1","rationale":"fix syntax","confidence":0.7}"#;
        let action: Action = serde_json::from_str(json).unwrap();
        assert!(matches!(action, Action::RewriteQuery { .. }));
    }
}
