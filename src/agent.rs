//! Agent Controller — the ReAct loop: Analyze → Plan → Act → Re-probe,
//! bounded by iteration and wall-clock budgets.
//!
//! One sequential state machine with a typed record log; every failure is
//! captured as data rather than propagated or panicked on. See DESIGN.md.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::analyzer::PlanAnalyzer;
use crate::db::Database;
use crate::error::Result;
use crate::executor::Executor;
use crate::hypothetical::HypotheticalIndexProver;
use crate::memory::{IterationMemory, IterationRecord};
use crate::planner::action::Action;
use crate::planner::prompt::PlannerContext;
use crate::planner::Planner;
use crate::schema::SchemaOracle;
use crate::task::{Task, TaskCategory};
use crate::translator::{Constraints, RuleBasedTranslator};

/// Budgets and thresholds bounding a single task's agent run.
#[derive(Debug, Clone, Copy)]
pub struct AgentBudgets {
    /// Hard ceiling on iteration count.
    pub max_iterations: u32,
    /// Floor below which the controller will not emit Done even if the
    /// Planner would.
    pub min_iterations: u32,
    /// Per-task wall-clock budget; expiry yields failure("timeout").
    pub wall_clock: Duration,
    /// Maximum estimated total cost at which an ANALYZE-augmented EXPLAIN
    /// is still attempted.
    pub analyze_cost_threshold: f64,
    /// Maximum acceptable estimated total cost for the Translator's status
    /// rule.
    pub max_cost: f64,
    /// Per-statement timeout in milliseconds for DDL/ANALYZE/EXPLAIN ANALYZE.
    pub statement_timeout_ms: u64,
}

impl Default for AgentBudgets {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            min_iterations: 0,
            wall_clock: Duration::from_secs(120),
            analyze_cost_threshold: 100_000.0,
            max_cost: 1_000.0,
            statement_timeout_ms: 5_000,
        }
    }
}

/// Outcome of a completed agent run for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    /// The task's original query (first issue_sql statement).
    pub initial_query: String,
    /// The query set at termination.
    pub final_query: Vec<String>,
    /// Whether the task was solved within budget.
    pub success: bool,
    /// Human-readable termination reason.
    pub reason: String,
    /// Ordered list of action kinds taken, for the harness's action histogram.
    pub actions: Vec<String>,
    /// Per-iteration records retained at termination (bounded by H).
    pub iterations: Vec<IterationRecord>,
    /// Total iterations actually run (may exceed len(iterations) once H
    /// records have been evicted).
    pub iteration_count: u32,
}

/// The ReAct Agent Controller.
pub struct Agent<P: Planner> {
    planner: P,
    analyzer: PlanAnalyzer,
    translator: RuleBasedTranslator,
    executor: Executor,
    budgets: AgentBudgets,
}

impl<P: Planner> Agent<P> {
    /// Build a controller around `planner` with the given budgets.
    pub fn new(planner: P, budgets: AgentBudgets) -> Self {
        Self {
            planner,
            analyzer: PlanAnalyzer::default(),
            translator: RuleBasedTranslator,
            executor: Executor::new(budgets.statement_timeout_ms),
            budgets,
        }
    }

    /// Run the full ReAct loop for `task` against `db`.
    pub async fn run(&self, task: &Task, db: &Database) -> Result<Solution> {
        match tokio::time::timeout(self.budgets.wall_clock, self.run_inner(task, db)).await {
            Ok(result) => result,
            Err(_) => Ok(Solution {
                initial_query: task.issue_sql.first().cloned().unwrap_or_default(),
                final_query: task.issue_sql.clone(),
                success: false,
                reason: "timeout".to_string(),
                actions: vec![],
                iterations: vec![],
                iteration_count: 0,
            }),
        }
    }

    async fn run_inner(&self, task: &Task, db: &Database) -> Result<Solution> {
        let initial_query = task.issue_sql.first().cloned().unwrap_or_default();
        let mut current_sql = task.issue_sql.clone();
        let mut memory = IterationMemory::default();
        let mut schema_oracle = SchemaOracle::new();
        let mut prover = HypotheticalIndexProver::new();
        let mut action_kinds = Vec::new();

        if task.category == TaskCategory::Management
            && current_sql.len() > 1
            && all_syntactically_valid(&current_sql)
        {
            match self.executor.execute_batch(db, &current_sql).await {
                Ok(true) => {
                    action_kinds.push("Done".to_string());
                    return Ok(Solution {
                        initial_query,
                        final_query: current_sql,
                        success: true,
                        reason: "management batch executed successfully".to_string(),
                        actions: action_kinds,
                        iterations: memory.snapshot(),
                        iteration_count: 1,
                    });
                }
                Ok(false) | Err(_) => {
                    warn!("management batch pre-flight passed but execution failed, falling back to the normal loop");
                }
            }
        }

        schema_oracle.load(db).await?;
        let constraints = Constraints {
            max_cost: self.budgets.max_cost,
        };

        let mut iter: u32 = 0;
        loop {
            iter += 1;

            let query = current_sql.first().cloned().unwrap_or_default();
            let (feedback, cost_before, schema_stale) = if is_ddl(&query) {
                (
                    self.translator.from_ddl_syntax_check(&query),
                    0.0,
                    false,
                )
            } else {
                match db.explain_estimated(&query).await {
                    Ok(estimated) => {
                        let cost_before = estimated.root.total_cost;
                        let plan = if cost_before <= self.budgets.analyze_cost_threshold {
                            db.explain_analyzed(&query, self.budgets.statement_timeout_ms)
                                .await
                                .unwrap_or(estimated)
                        } else {
                            estimated
                        };
                        let report = self.analyzer.analyze(&plan);
                        if let Some(reason) = &report.warning {
                            warn!(reason = %reason, "analyzer could not fully evaluate this plan");
                        }
                        let stale = report
                            .bottlenecks
                            .iter()
                            .any(|b| b.reason.to_lowercase().contains("does not exist"));
                        (
                            self.translator.translate(&report, constraints),
                            cost_before,
                            stale,
                        )
                    }
                    Err(e) => {
                        let message = e.to_string();
                        let stale = message.to_lowercase().contains("does not exist");
                        (self.translator.from_explain_error(message), 0.0, stale)
                    }
                }
            };

            if schema_stale {
                schema_oracle.invalidate();
                schema_oracle.reset();
            }
            let schema = schema_oracle.load(db).await?;

            let ctx = PlannerContext {
                intent: &task.query,
                current_sql: &current_sql,
                feedback: &feedback,
                memory: &memory,
                schema,
                category: task.category,
                max_iterations: self.budgets.max_iterations,
            };
            let action = self.planner.plan(&ctx).await?;

            if action.is_terminal() && iter > self.budgets.min_iterations {
                action_kinds.push(action.kind_name().to_string());
                let success = matches!(action, Action::Done { .. });
                let reason = match &action {
                    Action::Done { rationale } | Action::Failed { rationale } => rationale.clone(),
                    _ => unreachable!(),
                };
                return Ok(Solution {
                    initial_query,
                    final_query: current_sql,
                    success,
                    reason,
                    actions: action_kinds,
                    iterations: memory.snapshot(),
                    iteration_count: iter,
                });
            }

            if iter >= self.budgets.max_iterations {
                action_kinds.push(action.kind_name().to_string());
                return Ok(Solution {
                    initial_query,
                    final_query: current_sql,
                    success: false,
                    reason: "max iterations reached".to_string(),
                    actions: action_kinds,
                    iterations: memory.snapshot(),
                    iteration_count: iter,
                });
            }

            action_kinds.push(action.kind_name().to_string());

            let exec_result = self
                .executor
                .execute(&action, db, &current_sql, &mut prover)
                .await;

            match exec_result {
                Ok(outcome) => {
                    if matches!(action, Action::CreateIndex { .. }) && outcome.mutated {
                        schema_oracle.invalidate();
                    }
                    current_sql = outcome.query_set;

                    let next_query = current_sql.first().cloned().unwrap_or_default();
                    let cost_after = if is_ddl(&next_query) {
                        cost_before
                    } else {
                        db.explain_estimated(&next_query)
                            .await
                            .map(|p| p.root.total_cost)
                            .unwrap_or(cost_before)
                    };
                    memory.push(IterationRecord::new(iter, &action, cost_before, cost_after));
                }
                Err(e) => {
                    warn!(error = %e, "executor error; recording outcome=error");
                    memory.push(IterationRecord::error(iter, &action, cost_before, e.to_string()));
                }
            }
        }
    }
}

/// Whether `sql` is a DDL statement; ANALYZE-augmented EXPLAIN is skipped
/// entirely for these, since PostgreSQL can't EXPLAIN them meaningfully.
fn is_ddl(sql: &str) -> bool {
    let trimmed = sql.trim_start().to_uppercase();
    [
        "CREATE ", "ALTER ", "DROP ", "TRUNCATE ", "ANALYZE ", "GRANT ", "REVOKE ",
    ]
    .iter()
    .any(|kw| trimmed.starts_with(kw))
}

/// Pre-flight syntax check for each statement in a Management batch: uses
/// `sqlparser` rather than a live EXPLAIN, so a batch can be validated
/// before touching the database.
fn all_syntactically_valid(statements: &[String]) -> bool {
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;
    statements
        .iter()
        .all(|s| Parser::parse_sql(&PostgreSqlDialect {}, s).is_ok())
}
