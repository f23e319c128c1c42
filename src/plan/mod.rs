//! Data structures for PostgreSQL execution plans.
//!
//! `PlanNode` mirrors the JSON shape PostgreSQL emits for
//! `EXPLAIN (FORMAT JSON)`, with or without `ANALYZE`. Fields PostgreSQL
//! doesn't always include (actual rows/timings, sort keys, filter text)
//! stay optional and are read out of the flattened `extra` bag rather than
//! forcing every node kind to carry every field.

use serde::{Deserialize, Serialize};

/// A single node in a PostgreSQL execution plan tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    /// Type of the plan node (e.g. "Seq Scan", "Hash Join", "Sort").
    #[serde(rename = "Node Type")]
    pub node_type: String,

    /// Name of the relation being accessed, if any.
    #[serde(rename = "Relation Name", default)]
    pub relation_name: Option<String>,

    /// Alias for the relation, if one was used in the query.
    #[serde(rename = "Alias", default)]
    pub alias: Option<String>,

    /// Estimated startup cost.
    #[serde(rename = "Startup Cost", default)]
    pub startup_cost: f64,

    /// Estimated total cost.
    #[serde(rename = "Total Cost", default)]
    pub total_cost: f64,

    /// Estimated number of rows the planner expects this node to return.
    #[serde(rename = "Plan Rows", default)]
    pub plan_rows: u64,

    /// Estimated average row width in bytes.
    #[serde(rename = "Plan Width", default)]
    pub plan_width: u64,

    /// Actual startup time in milliseconds (ANALYZE only).
    #[serde(rename = "Actual Startup Time", default)]
    pub actual_startup_time: Option<f64>,

    /// Actual total time in milliseconds (ANALYZE only).
    #[serde(rename = "Actual Total Time", default)]
    pub actual_total_time: Option<f64>,

    /// Actual number of rows returned by this node (ANALYZE only).
    #[serde(rename = "Actual Rows", default)]
    pub actual_rows: Option<u64>,

    /// Number of times this node was executed (ANALYZE only).
    #[serde(rename = "Actual Loops", default = "default_loops")]
    pub actual_loops: u64,

    /// Child nodes in the execution plan.
    #[serde(default, rename = "Plans")]
    pub plans: Vec<PlanNode>,

    /// Everything else PostgreSQL includes for this node kind: `Filter`,
    /// `Join Filter`, `Index Cond`, `Sort Key`, `Sort Method`,
    /// `Hash Cond`, `Workers Planned`, etc.
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

fn default_loops() -> u64 {
    1
}

impl PlanNode {
    /// The node's filter predicate text, if PostgreSQL reported one under
    /// any of the filter-shaped keys.
    pub fn filter(&self) -> Option<&str> {
        for key in ["Filter", "Join Filter", "Index Cond", "Hash Cond", "Merge Cond"] {
            if let Some(s) = self.extra.get(key).and_then(|v| v.as_str()) {
                return Some(s);
            }
        }
        None
    }

    /// Ordered sort-key column expressions, if this is a sort node.
    pub fn sort_keys(&self) -> Vec<String> {
        self.extra
            .get("Sort Key")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The sort method PostgreSQL chose ("quicksort", "external merge", …).
    pub fn sort_method(&self) -> Option<&str> {
        self.extra.get("Sort Method").and_then(|v| v.as_str())
    }

    /// Whether an ANALYZE-augmented EXPLAIN populated actual timing/rows.
    pub fn has_actuals(&self) -> bool {
        self.actual_rows.is_some()
    }

    /// Ratio of actual to estimated rows, used by the estimate-error rule.
    /// Returns `None` when either side is unavailable or zero (can't divide).
    pub fn estimate_error_ratio(&self) -> Option<f64> {
        let actual = self.actual_rows? as f64;
        let estimated = self.plan_rows as f64;
        if estimated <= 0.0 || actual <= 0.0 {
            return None;
        }
        Some(if actual >= estimated {
            actual / estimated
        } else {
            estimated / actual
        })
    }

    /// True for Gather/Gather Merge wrapper nodes, which are transparent:
    /// parallel-worker variants are treated as their sequential
    /// equivalents.
    pub fn is_parallel_wrapper(&self) -> bool {
        matches!(self.node_type.as_str(), "Gather" | "Gather Merge")
    }

    /// The row count to use for threshold comparisons: actual if present
    /// (ANALYZE ran), otherwise the planner's estimate.
    pub fn effective_rows(&self) -> u64 {
        self.actual_rows.unwrap_or(self.plan_rows)
    }

    /// Walks children, transparently skipping parallel wrapper nodes so
    /// detection rules see the same tree shape with or without `Gather`.
    pub fn logical_children(&self) -> Vec<&PlanNode> {
        if self.is_parallel_wrapper() {
            self.plans.iter().flat_map(|p| p.logical_children()).collect()
        } else {
            vec![self]
        }
    }
}

/// One element of PostgreSQL's top-level `EXPLAIN (FORMAT JSON)` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainPlan {
    /// The execution plan tree.
    #[serde(rename = "Plan")]
    pub plan: PlanNode,

    /// Planning time in milliseconds (ANALYZE only).
    #[serde(rename = "Planning Time", default)]
    pub planning_time: Option<f64>,

    /// Execution time in milliseconds (ANALYZE only).
    #[serde(rename = "Execution Time", default)]
    pub execution_time: Option<f64>,
}

/// Top-level shape PostgreSQL returns for `EXPLAIN (FORMAT JSON)`: an array
/// with one element. Normalisation also accepts a bare map for a
/// single-statement response from older callers.
pub type ExplainOutput = Vec<ExplainPlan>;

/// A complete, already-normalised execution plan: `PlanNode` root plus
/// top-level metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// The root node of the execution plan.
    pub root: PlanNode,

    /// Total planning time in milliseconds, if available.
    pub planning_time: Option<f64>,

    /// Total execution time in milliseconds, if available.
    pub execution_time: Option<f64>,
}

impl ExecutionPlan {
    /// Parse a raw `EXPLAIN (FORMAT JSON)` result value into a normalised
    /// `ExecutionPlan`. Accepts both the standard singleton-array form and a
    /// bare object.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        let obj = match value {
            serde_json::Value::Array(arr) => {
                arr.first().ok_or("empty EXPLAIN output array")?
            }
            serde_json::Value::Object(_) => value,
            _ => return Err("unexpected EXPLAIN output shape".to_string()),
        };

        if let Some(err) = obj.get("error").and_then(|e| e.as_str()) {
            return Err(format!("database error: {err}"));
        }

        let plan = obj
            .get("Plan")
            .ok_or("no 'Plan' field in EXPLAIN output")?;
        let root: PlanNode =
            serde_json::from_value(plan.clone()).map_err(|e| format!("malformed plan node: {e}"))?;

        Ok(ExecutionPlan {
            root,
            planning_time: obj.get("Planning Time").and_then(|v| v.as_f64()),
            execution_time: obj.get("Execution Time").and_then(|v| v.as_f64()),
        })
    }
}
