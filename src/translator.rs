//! Semantic Translator — converts a [`Bottleneck`] list plus cost/time
//! constraints into a [`Feedback`] record for the Planner.

use crate::analyzer::{AnalysisReport, Bottleneck, Severity};
use serde::{Deserialize, Serialize};

/// Overall verdict for the current query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Query is correct and within budget; the agent may stop.
    Pass,
    /// Minor issues remain but the query is within budget.
    Warning,
    /// Query exceeds budget or has a HIGH-severity bottleneck.
    Fail,
    /// EXPLAIN itself failed (syntax error, unknown column, …).
    Error,
}

/// How urgently the suggestion should be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Low priority.
    Low,
    /// Medium priority.
    Medium,
    /// High priority.
    High,
}

/// Feedback produced on each Analyze phase. Not persisted across
/// iterations -- only its summary survives, in [`crate::memory::IterationRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    /// Overall verdict.
    pub status: Status,
    /// One sentence citing the most severe bottleneck and the numeric gap
    /// to budget.
    pub reason: String,
    /// The canonical suggestion of the most severe bottleneck, verbatim, or
    /// `"no action"` when the query already passes.
    pub suggestion: String,
    /// Priority of the suggested action.
    pub priority: Priority,
    /// The full bottleneck list, for downstream grounding (e.g. the
    /// Planner's schema-aware rewrite instructions).
    pub report: AnalysisReport,
}

/// Cost/time constraints a task must satisfy to pass.
#[derive(Debug, Clone, Copy)]
pub struct Constraints {
    /// Maximum acceptable estimated total cost.
    pub max_cost: f64,
}

fn severity_priority(s: Severity) -> Priority {
    match s {
        Severity::High => Priority::High,
        Severity::Medium => Priority::Medium,
        Severity::Low => Priority::Low,
    }
}

fn most_severe(bottlenecks: &[Bottleneck]) -> Option<&Bottleneck> {
    bottlenecks.iter().max_by_key(|b| b.severity)
}

/// Deterministic Semantic Translator, a pure function with no LLM call,
/// safe to use in tests and CI.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedTranslator;

impl RuleBasedTranslator {
    /// Translate an [`AnalysisReport`] into [`Feedback`] under the given
    /// [`Constraints`].
    ///
    /// Status rule: fail iff total cost > max_cost or any bottleneck is
    /// HIGH; warning iff only MEDIUM/LOW bottlenecks exist; pass iff the
    /// bottleneck list is empty and total cost <= max_cost.
    pub fn translate(&self, report: &AnalysisReport, constraints: Constraints) -> Feedback {
        let over_budget = report.metrics.total_cost > constraints.max_cost;
        let has_high = report
            .bottlenecks
            .iter()
            .any(|b| b.severity == Severity::High);

        let status = if over_budget || has_high {
            Status::Fail
        } else if !report.bottlenecks.is_empty() {
            Status::Warning
        } else {
            Status::Pass
        };

        let top = most_severe(&report.bottlenecks);

        let reason = match (status, top) {
            (Status::Pass, _) => format!(
                "query is within budget (cost {:.2} <= {:.2})",
                report.metrics.total_cost, constraints.max_cost
            ),
            (_, Some(b)) if over_budget => format!(
                "{} ({}); total cost {:.2} exceeds budget of {:.2} by {:.2}",
                b.reason,
                format_kind(b),
                report.metrics.total_cost,
                constraints.max_cost,
                report.metrics.total_cost - constraints.max_cost
            ),
            (_, Some(b)) => format!("{} ({})", b.reason, format_kind(b)),
            (_, None) => "query exceeds the cost budget with no specific bottleneck identified"
                .to_string(),
        };

        let suggestion = top
            .map(|b| b.suggestion.clone())
            .unwrap_or_else(|| "no action".to_string());

        let priority = top
            .map(|b| severity_priority(b.severity))
            .unwrap_or(Priority::Low);

        Feedback {
            status,
            reason,
            suggestion,
            priority,
            report: report.clone(),
        }
    }

    /// Static-only Feedback for a DDL statement: ANALYZE-augmented EXPLAIN
    /// of DDL is not meaningful, so the Agent derives Feedback from syntax
    /// validity alone -- pass if `sql` parses, fail with a syntax-specific
    /// reason otherwise. No plan tree exists here, so `warning` stays
    /// `None`.
    pub fn from_ddl_syntax_check(&self, sql: &str) -> Feedback {
        use sqlparser::dialect::PostgreSqlDialect;
        use sqlparser::parser::Parser;

        let valid = Parser::parse_sql(&PostgreSqlDialect {}, sql).is_ok();
        Feedback {
            status: if valid { Status::Pass } else { Status::Fail },
            reason: if valid {
                "DDL statement is syntactically valid".to_string()
            } else {
                "syntax error in DDL statement".to_string()
            },
            suggestion: "no action".to_string(),
            priority: Priority::Low,
            report: AnalysisReport {
                bottlenecks: vec![],
                metrics: crate::analyzer::PlanMetrics {
                    total_cost: 0.0,
                    execution_time_ms: None,
                    planning_time_ms: None,
                },
                warning: None,
            },
        }
    }

    /// Build a Feedback for an EXPLAIN-phase failure; status error is
    /// reserved for these. No plan tree exists here, so `warning` stays
    /// `None`.
    pub fn from_explain_error(&self, reason: impl Into<String>) -> Feedback {
        Feedback {
            status: Status::Error,
            reason: reason.into(),
            suggestion: "no action".to_string(),
            priority: Priority::High,
            report: AnalysisReport {
                bottlenecks: vec![],
                metrics: crate::analyzer::PlanMetrics {
                    total_cost: 0.0,
                    execution_time_ms: None,
                    planning_time_ms: None,
                },
                warning: None,
            },
        }
    }
}

fn format_kind(b: &Bottleneck) -> &'static str {
    use crate::analyzer::BottleneckKind::*;
    match b.kind {
        SeqScanLargeTable => "sequential scan on a large table",
        HighCostNode => "a high-cost plan node",
        EstimateError => "a planner estimate error",
        NestedLoopLarge => "a nested loop over a large inner relation",
        ExternalSort => "an external (disk-spilling) sort",
        MissingJoinIndex => "a missing index on a join's inner relation",
        FilterOnUnindexedColumn => "a filter on an unindexed column",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{BottleneckKind, PlanMetrics};

    fn bottleneck(severity: Severity) -> Bottleneck {
        Bottleneck {
            severity,
            kind: BottleneckKind::SeqScanLargeTable,
            target_relation: Some("users".to_string()),
            target_columns: vec!["email".to_string()],
            reason: "sequential scan on 'users' touches 100000 rows".to_string(),
            suggestion: "CREATE INDEX idx_users_email ON users(email)".to_string(),
        }
    }

    fn report(bottlenecks: Vec<Bottleneck>, total_cost: f64) -> AnalysisReport {
        AnalysisReport {
            bottlenecks,
            metrics: PlanMetrics {
                total_cost,
                execution_time_ms: None,
                planning_time_ms: None,
            },
            warning: None,
        }
    }

    #[test]
    fn empty_bottlenecks_within_budget_is_pass() {
        let fb = RuleBasedTranslator
            .translate(&report(vec![], 10.0), Constraints { max_cost: 100.0 });
        assert_eq!(fb.status, Status::Pass);
        assert_eq!(fb.suggestion, "no action");
    }

    #[test]
    fn high_severity_bottleneck_is_fail_even_within_budget() {
        let fb = RuleBasedTranslator.translate(
            &report(vec![bottleneck(Severity::High)], 10.0),
            Constraints { max_cost: 1000.0 },
        );
        assert_eq!(fb.status, Status::Fail);
        assert_eq!(fb.suggestion, "CREATE INDEX idx_users_email ON users(email)");
        assert_eq!(fb.priority, Priority::High);
    }

    #[test]
    fn over_budget_with_no_bottleneck_is_fail() {
        let fb = RuleBasedTranslator.translate(&report(vec![], 500.0), Constraints { max_cost: 100.0 });
        assert_eq!(fb.status, Status::Fail);
    }

    #[test]
    fn medium_only_bottleneck_within_budget_is_warning() {
        let mut b = bottleneck(Severity::Medium);
        b.kind = BottleneckKind::HighCostNode;
        let fb = RuleBasedTranslator.translate(&report(vec![b], 10.0), Constraints { max_cost: 100.0 });
        assert_eq!(fb.status, Status::Warning);
    }

    #[test]
    fn translator_never_invents_identifiers() {
        // The suggestion is taken verbatim from the bottleneck; the
        // Translator has no path that edits table/column names.
        let b = bottleneck(Severity::High);
        let fb = RuleBasedTranslator.translate(&report(vec![b.clone()], 10.0), Constraints { max_cost: 1.0 });
        assert_eq!(fb.suggestion, b.suggestion);
    }
}
