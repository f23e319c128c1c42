//! Plan Analyzer — deterministic rule engine over PostgreSQL EXPLAIN output.
//!
//! Converts a parsed [`crate::plan::ExecutionPlan`] into an ordered list of
//! [`Bottleneck`]s via a single post-order traversal. Pure, synchronous, and
//! never panics: a plan tree with a nonsensical node (empty node type, or a
//! non-finite/negative cost) is reported via [`AnalysisReport::warning`]
//! rather than run through the detection rules.

pub mod column_extract;

use crate::plan::{ExecutionPlan, PlanNode};
use column_extract::Connective;
use serde::{Deserialize, Serialize};

/// Severity of a detected bottleneck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Low priority, minor optimisation opportunity.
    Low,
    /// Moderate performance impact.
    Medium,
    /// Significant performance impact.
    High,
}

/// The rule that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BottleneckKind {
    /// Sequential scan over a relation above the large-table threshold.
    SeqScanLargeTable,
    /// Any node whose cost dominates the plan's total cost.
    HighCostNode,
    /// Actual/estimated row count diverges by more than the configured factor.
    EstimateError,
    /// Nested loop whose inner side returns more than the threshold rows.
    NestedLoopLarge,
    /// Sort spilled to disk, or its working-set exceeds the memory budget.
    ExternalSort,
    /// Hash/nested-loop join whose inner side is an unindexed filtered scan.
    MissingJoinIndex,
    /// A sequential scan with a filter predicate that could use an index.
    FilterOnUnindexedColumn,
}

/// A single localised performance issue with its canonical remedy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    /// How severe the issue is.
    pub severity: Severity,
    /// Which rule detected it.
    pub kind: BottleneckKind,
    /// The relation this bottleneck concerns, if any.
    pub target_relation: Option<String>,
    /// Columns implicated in the canonical suggestion.
    pub target_columns: Vec<String>,
    /// One-sentence, human-readable explanation.
    pub reason: String,
    /// A single DDL statement (or `RUN_ANALYZE <table>`), always
    /// syntactically well-formed on PostgreSQL and grounded only in
    /// identifiers actually seen in the plan (hallucination guard: later
    /// stages must prefer this over any free-text LLM suggestion).
    pub suggestion: String,
}

/// Tunable thresholds for the detection rules.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Row-count threshold above which a leaf scan is "large" (default
    /// 1,000; tune upward for larger datasets).
    pub large_scan_threshold: u64,
    /// Fraction of root total cost above which a node is "high cost"
    /// (default 0.70; see DESIGN.md for how this default was chosen).
    pub high_cost_fraction: f64,
    /// Actual/estimated ratio above which an estimate is "wrong" (default 5.0).
    pub estimate_error_factor: f64,
    /// Working-memory budget in bytes used to flag an in-memory sort as
    /// effectively an external sort by estimated width * rows.
    pub work_mem_bytes: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            large_scan_threshold: 1_000,
            high_cost_fraction: 0.70,
            estimate_error_factor: 5.0,
            work_mem_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Top-level metrics extracted alongside the bottleneck list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetrics {
    /// Root node's estimated total cost.
    pub total_cost: f64,
    /// Execution time in milliseconds, if an ANALYZE-augmented plan was given.
    pub execution_time_ms: Option<f64>,
    /// Planning time in milliseconds, if available.
    pub planning_time_ms: Option<f64>,
}

/// Result of analysing one execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Ordered bottleneck list (post-order traversal order).
    pub bottlenecks: Vec<Bottleneck>,
    /// Plan-level metrics.
    pub metrics: PlanMetrics,
    /// Set when the plan tree contained a node the detection rules can't
    /// reason about; the Analyzer still returns successfully with an empty
    /// bottleneck list rather than running rules against garbage data.
    pub warning: Option<String>,
}

/// The deterministic Plan Analyzer.
#[derive(Debug, Clone)]
pub struct PlanAnalyzer {
    config: AnalyzerConfig,
}

impl Default for PlanAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl PlanAnalyzer {
    /// Create an analyzer with the given thresholds.
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Analyze a parsed execution plan. Never fails: a tree containing a
    /// node the rules can't reason about yields an empty bottleneck list
    /// plus a warning instead of running the rules against it.
    pub fn analyze(&self, plan: &ExecutionPlan) -> AnalysisReport {
        let metrics = PlanMetrics {
            total_cost: plan.root.total_cost,
            execution_time_ms: plan.execution_time,
            planning_time_ms: plan.planning_time,
        };

        if let Some(reason) = malformed_reason(&plan.root) {
            return AnalysisReport {
                bottlenecks: vec![],
                metrics,
                warning: Some(reason),
            };
        }

        let mut bottlenecks = Vec::new();
        self.visit(&plan.root, plan.root.total_cost, &mut bottlenecks);

        AnalysisReport {
            bottlenecks,
            metrics,
            warning: None,
        }
    }

    /// Post-order traversal applying every detection rule at each node.
    fn visit(&self, node: &PlanNode, root_total_cost: f64, out: &mut Vec<Bottleneck>) {
        for child in &node.plans {
            self.visit(child, root_total_cost, out);
        }

        if node.is_parallel_wrapper() {
            return;
        }

        self.check_seq_scan_large_table(node, out);
        self.check_high_cost_node(node, root_total_cost, out);
        self.check_estimate_error(node, out);
        self.check_nested_loop_large_inner(node, out);
        self.check_external_sort(node, out);
        self.check_missing_join_index(node, out);
    }

    fn check_seq_scan_large_table(&self, node: &PlanNode, out: &mut Vec<Bottleneck>) {
        if node.node_type != "Seq Scan" {
            return;
        }
        if node.effective_rows() <= self.config.large_scan_threshold {
            return;
        }
        let relation = node.relation_name.clone().unwrap_or_else(|| "unknown".into());
        let (columns, connective) = node
            .filter()
            .map(column_extract::extract_columns)
            .unwrap_or_default();

        let suggestion = if columns.is_empty() {
            format!("RUN_ANALYZE {relation}")
        } else {
            synthesize_index_suggestion(&relation, &columns, connective)
        };

        out.push(Bottleneck {
            severity: Severity::High,
            kind: BottleneckKind::SeqScanLargeTable,
            target_relation: Some(relation.clone()),
            target_columns: columns,
            reason: format!(
                "sequential scan on '{relation}' touches {} rows, above the {}-row threshold",
                node.effective_rows(),
                self.config.large_scan_threshold
            ),
            suggestion,
        });
    }

    fn check_high_cost_node(&self, node: &PlanNode, root_total_cost: f64, out: &mut Vec<Bottleneck>) {
        if root_total_cost <= 0.0 {
            return;
        }
        // The root itself trivially satisfies the 70% rule; skip it.
        if node.total_cost >= root_total_cost {
            return;
        }
        if node.total_cost / root_total_cost < self.config.high_cost_fraction {
            return;
        }
        let relation = node.relation_name.clone();
        out.push(Bottleneck {
            severity: Severity::Medium,
            kind: BottleneckKind::HighCostNode,
            target_relation: relation.clone(),
            target_columns: vec![],
            reason: format!(
                "{} has total cost {:.2}, {:.0}% of the query's total cost {:.2}",
                node.node_type,
                node.total_cost,
                (node.total_cost / root_total_cost) * 100.0,
                root_total_cost
            ),
            suggestion: relation
                .map(|r| format!("RUN_ANALYZE {r}"))
                .unwrap_or_else(|| "RUN_ANALYZE".to_string()),
        });
    }

    fn check_estimate_error(&self, node: &PlanNode, out: &mut Vec<Bottleneck>) {
        let Some(ratio) = node.estimate_error_ratio() else {
            return;
        };
        if ratio <= self.config.estimate_error_factor {
            return;
        }
        let relation = node.relation_name.clone().unwrap_or_else(|| "unknown".into());
        out.push(Bottleneck {
            severity: Severity::Low,
            kind: BottleneckKind::EstimateError,
            target_relation: Some(relation.clone()),
            target_columns: vec![],
            reason: format!(
                "planner estimate for {} is off by {:.1}x (estimated {}, actual {})",
                node.node_type,
                ratio,
                node.plan_rows,
                node.actual_rows.unwrap_or_default()
            ),
            suggestion: format!("RUN_ANALYZE {relation}"),
        });
    }

    fn check_nested_loop_large_inner(&self, node: &PlanNode, out: &mut Vec<Bottleneck>) {
        if node.node_type != "Nested Loop" {
            return;
        }
        let Some(inner) = node.plans.get(1) else {
            return;
        };
        if inner.effective_rows() <= self.config.large_scan_threshold {
            return;
        }
        let relation = inner.relation_name.clone().unwrap_or_else(|| "unknown".into());
        let (columns, _) = inner
            .filter()
            .map(column_extract::extract_columns)
            .unwrap_or_default();
        let join_column = columns.into_iter().next();

        let suggestion = match &join_column {
            Some(col) => format!("CREATE INDEX idx_{relation}_{col} ON {relation}({col})"),
            None => format!("RUN_ANALYZE {relation}"),
        };

        out.push(Bottleneck {
            severity: Severity::High,
            kind: BottleneckKind::NestedLoopLarge,
            target_relation: Some(relation),
            target_columns: join_column.into_iter().collect(),
            reason: format!(
                "nested loop's inner side returns {} rows, above the {}-row threshold",
                inner.effective_rows(),
                self.config.large_scan_threshold
            ),
            suggestion,
        });
    }

    fn check_external_sort(&self, node: &PlanNode, out: &mut Vec<Bottleneck>) {
        if node.node_type != "Sort" {
            return;
        }
        let spills = node
            .sort_method()
            .map(|m| m.to_lowercase().contains("external"))
            .unwrap_or(false);
        let over_budget =
            (node.plan_width as u64).saturating_mul(node.plan_rows) > self.config.work_mem_bytes;
        if !spills && !over_budget {
            return;
        }
        let sort_keys = node.sort_keys();
        let columns: Vec<String> = sort_keys
            .iter()
            .filter_map(|k| k.rsplit('.').next().map(str::to_string))
            .collect();
        let relation = node
            .relation_name
            .clone()
            .or_else(|| node.plans.first().and_then(|c| c.relation_name.clone()))
            .unwrap_or_else(|| "unknown".into());

        let suggestion = if columns.is_empty() {
            format!("RUN_ANALYZE {relation}")
        } else {
            format!(
                "CREATE INDEX idx_{relation}_sort ON {relation}({})",
                columns.join(",")
            )
        };

        out.push(Bottleneck {
            severity: Severity::Medium,
            kind: BottleneckKind::ExternalSort,
            target_relation: Some(relation),
            target_columns: columns,
            reason: if spills {
                "sort spilled to disk (external merge)".to_string()
            } else {
                format!(
                    "sort's estimated working set ({} rows x {} bytes) exceeds the work_mem budget",
                    node.plan_rows, node.plan_width
                )
            },
            suggestion,
        });
    }

    fn check_missing_join_index(&self, node: &PlanNode, out: &mut Vec<Bottleneck>) {
        if !matches!(node.node_type.as_str(), "Hash Join" | "Nested Loop") {
            return;
        }
        let Some(inner) = node.plans.get(1) else {
            return;
        };
        if inner.node_type != "Seq Scan" {
            return;
        }
        let Some(filter) = inner.filter() else {
            return;
        };
        let relation = inner.relation_name.clone().unwrap_or_else(|| "unknown".into());
        let (filter_columns, connective) = column_extract::extract_columns(filter);

        let join_columns: Vec<String> = node
            .extra
            .get("Hash Cond")
            .or_else(|| node.extra.get("Join Filter"))
            .and_then(|v| v.as_str())
            .map(|s| column_extract::extract_columns(s).0)
            .unwrap_or_default();

        let mut all_columns = join_columns.clone();
        for c in &filter_columns {
            if !all_columns.contains(c) {
                all_columns.push(c.clone());
            }
        }
        if all_columns.is_empty() {
            return;
        }

        let suggestion = synthesize_index_suggestion(&relation, &all_columns, connective);

        out.push(Bottleneck {
            severity: Severity::High,
            kind: BottleneckKind::MissingJoinIndex,
            target_relation: Some(relation),
            target_columns: all_columns,
            reason: format!(
                "{} joins against an unindexed sequential scan with a filter",
                node.node_type
            ),
            suggestion,
        });
    }
}

/// Walks the whole tree looking for a node the detection rules can't
/// meaningfully reason about: an empty node type, or a cost that isn't a
/// finite, non-negative number. Returns the first one found.
fn malformed_reason(node: &PlanNode) -> Option<String> {
    if node.node_type.trim().is_empty() {
        return Some("plan contains a node with an empty node type".to_string());
    }
    if !node.total_cost.is_finite() || node.total_cost < 0.0 {
        return Some(format!(
            "'{}' has a non-finite or negative total cost ({})",
            node.node_type, node.total_cost
        ));
    }
    node.plans.iter().find_map(malformed_reason)
}

/// Build a canonical `CREATE INDEX` suggestion:
/// - one column  -> a single-column index;
/// - multiple AND-joined columns -> one composite index;
/// - multiple OR-joined columns -> one single-column index per column,
///   semicolon-joined.
pub fn synthesize_index_suggestion(relation: &str, columns: &[String], connective: Connective) -> String {
    match (columns.len(), connective) {
        (0, _) => format!("RUN_ANALYZE {relation}"),
        (1, _) => format!(
            "CREATE INDEX idx_{relation}_{} ON {relation}({})",
            columns[0], columns[0]
        ),
        (_, Connective::Or) => columns
            .iter()
            .map(|c| format!("CREATE INDEX idx_{relation}_{c} ON {relation}({c})"))
            .collect::<Vec<_>>()
            .join("; "),
        (_, _) => format!(
            "CREATE INDEX idx_{relation}_composite ON {relation}({})",
            columns.join(",")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan_from(value: serde_json::Value) -> ExecutionPlan {
        ExecutionPlan::from_json(&value).unwrap()
    }

    #[test]
    fn seq_scan_on_large_table_is_high_severity() {
        let plan = plan_from(json!([{
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "users",
                "Total Cost": 2500.0,
                "Plan Rows": 100000,
                "Plan Width": 64,
                "Actual Rows": 100000,
                "Filter": "(email = 'alice@example.com'::text)"
            }
        }]));
        let report = PlanAnalyzer::default().analyze(&plan);
        assert_eq!(report.bottlenecks.len(), 1);
        let b = &report.bottlenecks[0];
        assert_eq!(b.severity, Severity::High);
        assert_eq!(b.kind, BottleneckKind::SeqScanLargeTable);
        assert_eq!(b.suggestion, "CREATE INDEX idx_users_email ON users(email)");
    }

    #[test]
    fn composite_predicate_yields_single_multicolumn_index() {
        let plan = plan_from(json!([{
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "orders",
                "Total Cost": 900.0,
                "Plan Rows": 5000,
                "Plan Width": 40,
                "Actual Rows": 5000,
                "Filter": "((o_custkey = 123) AND (o_orderstatus = 'F'::bpchar))"
            }
        }]));
        let report = PlanAnalyzer::default().analyze(&plan);
        let b = &report.bottlenecks[0];
        assert_eq!(
            b.suggestion,
            "CREATE INDEX idx_orders_composite ON orders(o_custkey,o_orderstatus)"
        );
    }

    #[test]
    fn disjunctive_predicate_yields_two_single_column_indexes() {
        let plan = plan_from(json!([{
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "orders",
                "Total Cost": 900.0,
                "Plan Rows": 5000,
                "Plan Width": 40,
                "Actual Rows": 5000,
                "Filter": "((o_custkey = 123) OR (o_orderpriority = '1-URGENT'::text))"
            }
        }]));
        let report = PlanAnalyzer::default().analyze(&plan);
        let b = &report.bottlenecks[0];
        assert_eq!(
            b.suggestion,
            "CREATE INDEX idx_orders_o_custkey ON orders(o_custkey); \
             CREATE INDEX idx_orders_o_orderpriority ON orders(o_orderpriority)"
        );
    }

    #[test]
    fn estimate_error_is_low_severity_and_recommends_analyze() {
        let plan = plan_from(json!([{
            "Plan": {
                "Node Type": "Index Scan",
                "Relation Name": "lineitem",
                "Total Cost": 50.0,
                "Plan Rows": 10,
                "Plan Width": 16,
                "Actual Rows": 1000
            }
        }]));
        let report = PlanAnalyzer::default().analyze(&plan);
        assert!(report
            .bottlenecks
            .iter()
            .any(|b| b.kind == BottleneckKind::EstimateError
                && b.severity == Severity::Low
                && b.suggestion == "RUN_ANALYZE lineitem"));
    }

    #[test]
    fn nested_loop_over_large_inner_recommends_join_index() {
        let plan = plan_from(json!([{
            "Plan": {
                "Node Type": "Nested Loop",
                "Total Cost": 5000.0,
                "Plan Rows": 2000,
                "Plan Width": 32,
                "Actual Rows": 2000,
                "Plans": [
                    { "Node Type": "Seq Scan", "Relation Name": "customers", "Total Cost": 10.0, "Plan Rows": 1, "Plan Width": 32, "Actual Rows": 1 },
                    { "Node Type": "Seq Scan", "Relation Name": "orders", "Total Cost": 4000.0, "Plan Rows": 2000, "Plan Width": 32, "Actual Rows": 2000, "Filter": "(customer_id = customers.id)" }
                ]
            }
        }]));
        let report = PlanAnalyzer::default().analyze(&plan);
        assert!(report.bottlenecks.iter().any(|b| b.kind == BottleneckKind::NestedLoopLarge
            && b.target_relation.as_deref() == Some("orders")));
    }

    #[test]
    fn seq_scan_bottleneck_kind_sequence_is_stable() {
        // The same EXPLAIN fixture always yields the same ordered
        // bottleneck-kind sequence.
        let plan = plan_from(json!([{
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "users",
                "Total Cost": 2500.0,
                "Plan Rows": 100000,
                "Plan Width": 64,
                "Actual Rows": 100000,
                "Filter": "(email = 'alice@example.com'::text)"
            }
        }]));
        let report = PlanAnalyzer::default().analyze(&plan);
        let kinds: Vec<BottleneckKind> = report.bottlenecks.iter().map(|b| b.kind).collect();
        insta::assert_debug_snapshot!(kinds, @r###"
        [
            SeqScanLargeTable,
        ]
        "###);
    }

    #[test]
    fn malformed_plan_never_panics() {
        let value = json!({ "not_a_plan": true });
        assert!(ExecutionPlan::from_json(&value).is_err());
    }

    #[test]
    fn analyzer_is_pure_given_same_input() {
        let value = json!([{
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "t",
                "Total Cost": 2000.0,
                "Plan Rows": 5000,
                "Plan Width": 8,
                "Actual Rows": 5000,
                "Filter": "(x = 1)"
            }
        }]);
        let plan = plan_from(value);
        let a = PlanAnalyzer::default().analyze(&plan);
        let b = PlanAnalyzer::default().analyze(&plan);
        assert_eq!(
            serde_json::to_string(&a.bottlenecks).unwrap(),
            serde_json::to_string(&b.bottlenecks).unwrap()
        );
    }
}
