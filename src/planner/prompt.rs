//! Planner prompt construction.

use crate::memory::IterationMemory;
use crate::schema::Schema;
use crate::task::TaskCategory;
use crate::translator::Feedback;

/// Everything the Planner needs to produce its next [`super::action::Action`].
pub struct PlannerContext<'a> {
    /// Natural-language intent of the task.
    pub intent: &'a str,
    /// The current SQL statement(s), in order.
    pub current_sql: &'a [String],
    /// Latest Feedback from the Analyze phase.
    pub feedback: &'a Feedback,
    /// Compressed iteration history (last H records).
    pub memory: &'a IterationMemory,
    /// Canonical schema for the task's database.
    pub schema: &'a Schema,
    /// Which metric category this task belongs to.
    pub category: TaskCategory,
    /// Ceiling on the total number of iterations for this task.
    pub max_iterations: u32,
}

/// Build the single structured planner message.
pub fn build(ctx: &PlannerContext<'_>) -> String {
    let mut out = String::new();

    out.push_str("## Intent\n");
    out.push_str(ctx.intent);
    out.push_str("\n\n## Current SQL\n");
    for (i, stmt) in ctx.current_sql.iter().enumerate() {
        out.push_str(&format!("{}: {stmt}\n", i + 1));
    }

    out.push_str("\n## Feedback\n");
    out.push_str(&format!(
        "status: {:?}\nreason: {}\nsuggestion: {}\npriority: {:?}\n",
        ctx.feedback.status, ctx.feedback.reason, ctx.feedback.suggestion, ctx.feedback.priority
    ));

    out.push_str("\n## Iteration history (most recent first H=2)\n");
    let history = ctx.memory.render_for_prompt();
    if history.is_empty() {
        out.push_str("(none yet)\n");
    } else {
        for line in history {
            out.push_str(&line);
            out.push('\n');
        }
    }

    out.push_str("\n## Schema\n");
    for table in &ctx.schema.tables {
        out.push_str(&format!("table {}(", table.name));
        let cols: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect();
        out.push_str(&cols.join(", "));
        out.push_str(")\n");
        if !table.primary_key.is_empty() {
            out.push_str(&format!("  primary key: {}\n", table.primary_key.join(", ")));
        }
        for fk in &table.foreign_keys {
            out.push_str(&format!(
                "  foreign key: {} -> {}.{}\n",
                fk.column, fk.references_table, fk.references_column
            ));
        }
        for idx in &table.indexes {
            out.push_str(&format!(
                "  index {} on ({}){}\n",
                idx.name,
                idx.columns.join(", "),
                if idx.is_unique { " unique" } else { "" }
            ));
        }
        for row in table.sample_rows.iter().take(3) {
            out.push_str(&format!("  sample: {row}\n"));
        }
    }

    out.push_str("\n## Action grammar\n");
    out.push_str(
        "Respond with a single JSON object, one of:\n\
         {\"action\":\"create_index\",\"ddl\":\"...\",\"rationale\":\"...\",\"confidence\":0.0-1.0}\n\
         {\"action\":\"rewrite_query\",\"newSQL\":\"...\",\"rationale\":\"...\",\"confidence\":0.0-1.0}\n\
         {\"action\":\"run_analyze\",\"table\":\"...\",\"rationale\":\"...\",\"confidence\":0.0-1.0}\n\
         {\"action\":\"test_index\",\"ddl\":\"...\",\"probe_query\":\"...\",\"rationale\":\"...\",\"confidence\":0.0-1.0}\n\
         {\"action\":\"done\",\"rationale\":\"...\"}\n\
         {\"action\":\"failed\",\"rationale\":\"...\"}\n",
    );

    out.push_str("\n## Category-specific rules\n");
    match ctx.category {
        TaskCategory::Management if ctx.current_sql.len() > 1 => out.push_str(
            "This is a Management task with multiple statements: you may emit a single \
             rewrite_query containing the full ordered sequence; the executor applies \
             statements in order.\n",
        ),
        TaskCategory::Management => {}
        TaskCategory::Efficiency => out.push_str(
            "This is an Efficiency task: prefer create_index or run_analyze over rewrites.\n",
        ),
        TaskCategory::Query | TaskCategory::Personalization => {}
    }
    if looks_like_update_returning_with_join(ctx.current_sql) {
        out.push_str(
            "Note: PostgreSQL does not support joins directly inside an UPDATE...RETURNING \
             clause against another table's columns; use a common-table-expression that \
             UPDATEs and RETURNS the base columns, then SELECT with the join.\n",
        );
    }
    if ctx.feedback.reason.to_lowercase().contains("syntax") {
        out.push_str(
            "The previous attempt failed with a syntax error: you must propose a \
             rewrite_query that fixes the syntax. DDL actions are forbidden until the query \
             is syntactically valid.\n",
        );
    }

    out.push_str("\n## Learning directives\n");
    out.push_str(
        "Do not repeat an action recorded as regressed or unchanged above. If an index was \
         created but the planner is not using it, try run_analyze on that table. Emit done \
         when status is pass or no further improvement is plausible. Emit failed when no \
         productive action remains.\n",
    );

    out.push_str(&format!(
        "\nIteration {} of at most {}.\n",
        ctx.memory.len() + 1,
        ctx.max_iterations
    ));

    out
}

fn looks_like_update_returning_with_join(sql: &[String]) -> bool {
    sql.iter().any(|s| {
        let upper = s.to_uppercase();
        upper.contains("UPDATE") && upper.contains("RETURNING") && upper.contains("JOIN")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalysisReport, PlanMetrics};
    use crate::translator::{Priority, Status};

    fn feedback() -> Feedback {
        Feedback {
            status: Status::Fail,
            reason: "sequential scan".to_string(),
            suggestion: "CREATE INDEX idx_users_email ON users(email)".to_string(),
            priority: Priority::High,
            report: AnalysisReport {
                bottlenecks: vec![],
                metrics: PlanMetrics {
                    total_cost: 100.0,
                    execution_time_ms: None,
                    planning_time_ms: None,
                },
                warning: None,
            },
        }
    }

    #[test]
    fn includes_all_required_sections() {
        let fb = feedback();
        let memory = IterationMemory::default();
        let schema = Schema::default();
        let ctx = PlannerContext {
            intent: "fix slow query",
            current_sql: &["SELECT * FROM users".to_string()],
            feedback: &fb,
            memory: &memory,
            schema: &schema,
            category: TaskCategory::Query,
            max_iterations: 5,
        };
        let prompt = build(&ctx);
        assert!(prompt.contains("## Intent"));
        assert!(prompt.contains("## Feedback"));
        assert!(prompt.contains("## Action grammar"));
        assert!(prompt.contains("## Learning directives"));
    }

    #[test]
    fn management_multi_statement_gets_batch_rule() {
        let fb = feedback();
        let memory = IterationMemory::default();
        let schema = Schema::default();
        let ctx = PlannerContext {
            intent: "apply migration",
            current_sql: &["CREATE TABLE a(x int)".to_string(), "CREATE TABLE b(y int)".to_string()],
            feedback: &fb,
            memory: &memory,
            schema: &schema,
            category: TaskCategory::Management,
            max_iterations: 5,
        };
        let prompt = build(&ctx);
        assert!(prompt.contains("single rewrite_query containing the full ordered sequence"));
    }
}
