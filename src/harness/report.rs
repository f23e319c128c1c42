//! Aggregate report: a per-task append-only intermediate log behind a
//! single mutex, plus an atomically-written final report.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::agent::Solution;
use crate::harness::metrics::{mean, percentile, Metric};
use crate::task::TaskCategory;

/// One task's full outcome, as written to the intermediate log and embedded
/// in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The originating task's id.
    pub instance_id: i64,
    /// The originating task's database.
    pub db_id: String,
    /// The originating task's category.
    pub category: TaskCategory,
    /// Which metric scored this task.
    pub metric: Metric,
    /// The metric's scalar score in `[0.0, 1.0]`.
    pub score: f64,
    /// Whether the agent itself reported success.
    pub agent_success: bool,
    /// Whether the scored metric passed.
    pub metric_pass: bool,
    /// Total agent iterations run.
    pub iteration_count: u32,
    /// Wall-clock seconds spent on this task.
    pub elapsed_seconds: f64,
    /// Action-kind sequence taken by the agent.
    pub actions: Vec<String>,
    /// Termination reason as reported by the agent.
    pub reason: String,
}

impl Serialize for Metric {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            Metric::SoftEx => "soft_ex",
            Metric::Tcv => "tcv",
            Metric::Qep => "qep",
        };
        serializer.serialize_str(s)
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "soft_ex" => Ok(Metric::SoftEx),
            "tcv" => Ok(Metric::Tcv),
            "qep" => Ok(Metric::Qep),
            other => Err(serde::de::Error::custom(format!("unknown metric {other}"))),
        }
    }
}

/// Per-category rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    /// Number of tasks in this category.
    pub count: usize,
    /// Mean score across the category.
    pub mean_score: f64,
    /// Fraction of tasks that passed their scored metric.
    pub pass_rate: f64,
}

/// The full aggregate over a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    /// Total tasks scored.
    pub total_tasks: usize,
    /// Fraction of tasks whose scored metric passed.
    pub pass_rate: f64,
    /// Mean score across all tasks.
    pub mean_score: f64,
    /// p50 score across all tasks.
    pub p50_score: f64,
    /// p90 score across all tasks.
    pub p90_score: f64,
    /// Mean iteration count across all tasks.
    pub mean_iterations: f64,
    /// Mean wall-clock seconds per task.
    pub mean_elapsed_seconds: f64,
    /// Rollup by category.
    pub by_category: HashMap<String, CategoryBreakdown>,
    /// Count of each action kind taken across every task.
    pub action_histogram: HashMap<String, u64>,
}

/// The complete run report written to the output path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Path the task dataset was read from.
    pub dataset: String,
    /// Total wall-clock seconds for the whole run.
    pub total_time_seconds: f64,
    /// The computed aggregate.
    pub aggregate: Aggregate,
    /// Every task's individual result.
    pub results: Vec<TaskResult>,
}

/// Compute the aggregate over a completed set of task results.
pub fn aggregate(results: &[TaskResult]) -> Aggregate {
    let scores: Vec<f64> = results.iter().map(|r| r.score).collect();
    let iterations: Vec<f64> = results.iter().map(|r| r.iteration_count as f64).collect();
    let elapsed: Vec<f64> = results.iter().map(|r| r.elapsed_seconds).collect();
    let passes = results.iter().filter(|r| r.metric_pass).count();

    let mut by_category: HashMap<String, Vec<&TaskResult>> = HashMap::new();
    for r in results {
        by_category.entry(r.category.to_string()).or_default().push(r);
    }
    let by_category = by_category
        .into_iter()
        .map(|(k, v)| {
            let category_scores: Vec<f64> = v.iter().map(|r| r.score).collect();
            let category_passes = v.iter().filter(|r| r.metric_pass).count();
            (
                k,
                CategoryBreakdown {
                    count: v.len(),
                    mean_score: mean(&category_scores),
                    pass_rate: category_passes as f64 / v.len().max(1) as f64,
                },
            )
        })
        .collect();

    let mut action_histogram: HashMap<String, u64> = HashMap::new();
    for r in results {
        for action in &r.actions {
            *action_histogram.entry(action.clone()).or_insert(0) += 1;
        }
    }

    Aggregate {
        total_tasks: results.len(),
        pass_rate: passes as f64 / results.len().max(1) as f64,
        mean_score: mean(&scores),
        p50_score: percentile(&scores, 50.0),
        p90_score: percentile(&scores, 90.0),
        mean_iterations: mean(&iterations),
        mean_elapsed_seconds: mean(&elapsed),
        by_category,
        action_histogram,
    }
}

/// An append-only intermediate log, one JSON line per task, guarded by a
/// single mutex so concurrent workers never interleave partial writes.
pub struct ResultLog {
    file: Arc<Mutex<tokio::fs::File>>,
}

impl ResultLog {
    /// Open (creating or truncating) the log file at `path`.
    pub async fn create(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let file = tokio::fs::File::create(path)
            .await
            .map_err(crate::error::AgentError::Io)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Append one task result as a JSON line.
    pub async fn append(&self, result: &TaskResult) -> crate::error::Result<()> {
        let mut line = serde_json::to_string(result).map_err(crate::error::AgentError::Json)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(crate::error::AgentError::Io)?;
        file.flush().await.map_err(crate::error::AgentError::Io)?;
        Ok(())
    }
}

/// Write the final report atomically: serialize to a sibling temp file,
/// then rename over `path`, so a reader never observes a partial file.
pub async fn write_final_atomic(path: impl AsRef<Path>, report: &AggregateReport) -> crate::error::Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(report).map_err(crate::error::AgentError::Json)?;
    tokio::fs::write(&tmp_path, body)
        .await
        .map_err(crate::error::AgentError::Io)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(crate::error::AgentError::Io)?;
    Ok(())
}

/// Build a [`TaskResult`] from a completed [`Solution`] and its metric score.
pub fn task_result(
    instance_id: i64,
    db_id: String,
    category: TaskCategory,
    metric: Metric,
    score: f64,
    metric_pass: bool,
    elapsed_seconds: f64,
    solution: &Solution,
) -> TaskResult {
    TaskResult {
        instance_id,
        db_id,
        category,
        metric,
        score,
        agent_success: solution.success,
        metric_pass,
        iteration_count: solution.iteration_count,
        elapsed_seconds,
        actions: solution.actions.clone(),
        reason: solution.reason.clone(),
    }
}
