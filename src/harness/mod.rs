//! Benchmark Harness — loads a task dataset, runs each task through the
//! Agent Controller under a bounded worker pool, scores it with the metric
//! its category selects, and writes an append-only intermediate log plus an
//! atomic final report.
//!
//! The dispatch loop fans out onto a `tokio::sync::Semaphore`-bounded worker
//! pool sized by `worker_pool_size` rather than a fixed-size `join_all`.

pub mod metrics;
pub mod report;
pub mod runner;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::agent::{Agent, AgentBudgets};
use crate::db::Database;
use crate::error::Result;
use crate::planner::Planner;
use crate::task::{Task, TaskCategory};
use metrics::{qep, select_metric, soft_ex, tcv, Metric};
use report::{aggregate, task_result, write_final_atomic, AggregateReport, ResultLog, TaskResult};
use runner::TestCaseRunner;

/// Everything the Harness needs to run a dataset.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Path the JSONL task dataset was read from, recorded in the report.
    pub dataset_path: String,
    /// Connection string template; `{db_id}` is replaced with each task's
    /// `db_id`. A template with no placeholder is used verbatim for every
    /// task (single-database datasets).
    pub connection_template: String,
    /// Where the final report is written.
    pub output_path: String,
    /// Path for the append-only intermediate log.
    pub intermediate_log_path: String,
    /// Optional cap on the number of tasks run.
    pub limit: Option<usize>,
    /// Optional category filter.
    pub category_filter: Option<TaskCategory>,
    /// Maximum concurrent tasks.
    pub worker_pool_size: usize,
    /// Per-task agent budgets.
    pub agent_budgets: AgentBudgets,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            dataset_path: String::new(),
            connection_template: String::new(),
            output_path: "report.json".to_string(),
            intermediate_log_path: "report.jsonl".to_string(),
            limit: None,
            category_filter: None,
            worker_pool_size: 4,
            agent_budgets: AgentBudgets::default(),
        }
    }
}

fn resolve_connection_string(template: &str, db_id: &str) -> String {
    if template.contains("{db_id}") {
        template.replace("{db_id}", db_id)
    } else {
        template.to_string()
    }
}

/// Run every task in `tasks` against a fresh planner built by `build_planner`
/// for each worker, bounded to `config.worker_pool_size` concurrent tasks.
pub async fn run<P, F>(config: HarnessConfig, tasks: Vec<Task>, build_planner: F) -> Result<AggregateReport>
where
    P: Planner + 'static,
    F: Fn() -> P,
{
    let started = Instant::now();
    let mut tasks = tasks;
    if let Some(category) = config.category_filter {
        tasks.retain(|t| t.category == category);
    }
    if let Some(limit) = config.limit {
        tasks.truncate(limit);
    }

    let log = Arc::new(ResultLog::create(&config.intermediate_log_path).await?);
    let semaphore = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
    let budgets = config.agent_budgets;
    let template = config.connection_template.clone();

    let mut handles = Vec::with_capacity(tasks.len());
    for task in tasks {
        let semaphore = Arc::clone(&semaphore);
        let log = Arc::clone(&log);
        let template = template.clone();
        let planner = build_planner();
        let agent = Arc::new(Agent::new(planner, budgets));

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let outcome = run_one_task(&agent, &task, &template).await;
            match outcome {
                Ok(result) => {
                    if let Err(e) = log.append(&result).await {
                        warn!(error = %e, task = task.instance_id, "failed to append intermediate result");
                    }
                    Some(result)
                }
                Err(e) => {
                    warn!(error = %e, task = task.instance_id, "task failed before scoring");
                    None
                }
            }
        });
        handles.push(handle);
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(Some(result)) = handle.await {
            results.push(result);
        }
    }

    let aggregate = aggregate(&results);
    let report = AggregateReport {
        dataset: config.dataset_path,
        total_time_seconds: started.elapsed().as_secs_f64(),
        aggregate,
        results,
    };
    write_final_atomic(&config.output_path, &report).await?;
    info!(
        tasks = report.results.len(),
        pass_rate = report.aggregate.pass_rate,
        "harness run complete"
    );
    Ok(report)
}

async fn run_one_task<P: Planner>(
    agent: &Agent<P>,
    task: &Task,
    connection_template: &str,
) -> Result<TaskResult> {
    let started = Instant::now();
    let connection_string = resolve_connection_string(connection_template, &task.db_id);
    let db = Database::new(&connection_string).await?;

    let solution = agent.run(task, &db).await?;
    let metric = select_metric(task.category);
    let (score, metric_pass) = score_task(task, &solution, &db, metric).await;

    Ok(task_result(
        task.instance_id,
        task.db_id.clone(),
        task.category,
        metric,
        score,
        metric_pass,
        started.elapsed().as_secs_f64(),
        &solution,
    ))
}

async fn score_task(
    task: &Task,
    solution: &crate::agent::Solution,
    db: &Database,
    metric: Metric,
) -> (f64, bool) {
    match metric {
        Metric::Qep => {
            let original = task.issue_sql.join("; ");
            let predicted = solution.final_query.join("; ");
            let original_cost = db
                .explain_estimated(&original)
                .await
                .map(|p| p.root.total_cost)
                .unwrap_or(0.0);
            let predicted_cost = db
                .explain_estimated(&predicted)
                .await
                .map(|p| p.root.total_cost)
                .unwrap_or(original_cost);
            let result = qep(original_cost, predicted_cost);
            (result.score, result.pass)
        }
        Metric::Tcv => {
            let runner = TestCaseRunner::new(5_000);
            let predicted = solution.final_query.join("; ");
            match runner
                .run(db, &task.preprocess_sql, &predicted, &task.clean_up_sql)
                .await
            {
                Ok(outcome) => {
                    let score = tcv(
                        outcome.preprocess_ok,
                        outcome.predicted_ok,
                        outcome.cleanup_ok,
                        true,
                    );
                    (score, score >= 1.0)
                }
                Err(_) => (0.0, false),
            }
        }
        Metric::SoftEx => {
            let runner = TestCaseRunner::new(5_000);
            let predicted = solution.final_query.join("; ");
            let predicted_outcome = runner
                .run(db, &task.preprocess_sql, &predicted, &task.clean_up_sql)
                .await
                .ok();

            let Some(reference_sql) = &task.reference_solution else {
                // No reference solution means soft-ex can't be computed
                // numerically: fall back to the agent's own success flag.
                return (
                    if solution.success { 1.0 } else { 0.0 },
                    solution.success,
                );
            };

            let reference_outcome = runner
                .run(db, &task.preprocess_sql, reference_sql, &task.clean_up_sql)
                .await
                .ok();

            match (predicted_outcome, reference_outcome) {
                (Some(p), Some(r)) if p.predicted_ok && r.predicted_ok => {
                    match (p.result_set, r.result_set) {
                        (Some(p_set), Some(r_set)) => {
                            let score = soft_ex(&p_set, &r_set);
                            (score, score >= 1.0)
                        }
                        _ => (0.0, false),
                    }
                }
                _ => (0.0, false),
            }
        }
    }
}
