//! Metrics: soft-ex (result equivalence), tcv (workflow validation), qep
//! (plan-cost comparison). The cost-ratio/percentile/mean arithmetic
//! follows the same shape as a cost-benchmarking suite, reused here against
//! this crate's Task/Solution model.

use crate::task::TaskCategory;
use serde_json::Value;

/// Floating-point comparison tolerance for `soft-ex`.
pub const FLOAT_EPSILON: f64 = 1e-6;

/// Minimum cost-ratio improvement to pass `qep` (>= 10% improvement).
pub const QEP_PASS_COST_RATIO: f64 = 0.9;

/// Which of the three metrics applies to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Result equivalence.
    SoftEx,
    /// Test-case/workflow validation.
    Tcv,
    /// Plan-cost comparison.
    Qep,
}

/// Category ↦ metric. Callers may override manually.
pub fn select_metric(category: TaskCategory) -> Metric {
    match category {
        TaskCategory::Efficiency => Metric::Qep,
        TaskCategory::Management => Metric::Tcv,
        TaskCategory::Query | TaskCategory::Personalization => Metric::SoftEx,
    }
}

/// A query result set: column names plus row values, used for `soft-ex`
/// comparison and the Test Case Runner's captured output.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResultSet {
    /// Column names, in order.
    pub columns: Vec<String>,
    /// Row values, each the same length as `columns`.
    pub rows: Vec<Vec<Value>>,
}

/// Compare two JSON scalar values for `soft-ex` purposes: numeric values
/// within `FLOAT_EPSILON`, NULL equals NULL, everything else structural
/// equality.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Number(x), Value::Number(y)) => {
            let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) else {
                return x == y;
            };
            (x - y).abs() <= FLOAT_EPSILON
        }
        _ => a == b,
    }
}

fn row_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| value_eq(x, y))
}

/// `soft-ex`: order-insensitive multiset comparison of `predicted` against
/// `reference`. Returns `1.0` on an exact multiset match, `0.0` otherwise.
pub fn soft_ex(predicted: &ResultSet, reference: &ResultSet) -> f64 {
    if predicted.rows.len() != reference.rows.len() {
        return 0.0;
    }
    let mut used = vec![false; reference.rows.len()];
    'outer: for p_row in &predicted.rows {
        for (i, r_row) in reference.rows.iter().enumerate() {
            if !used[i] && row_eq(p_row, r_row) {
                used[i] = true;
                continue 'outer;
            }
        }
        return 0.0;
    }
    1.0
}

/// `tcv`: 1 iff preprocess, predicted, and cleanup all succeeded and any
/// expected post-condition queries returned the required rows; 0 otherwise.
pub fn tcv(preprocess_ok: bool, predicted_ok: bool, cleanup_ok: bool, postconditions_ok: bool) -> f64 {
    if preprocess_ok && predicted_ok && cleanup_ok && postconditions_ok {
        1.0
    } else {
        0.0
    }
}

/// Outcome of the `qep` metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QepResult {
    /// `cost(predicted) / cost(original)`.
    pub cost_ratio: f64,
    /// `max(0, 1 - cost_ratio)`.
    pub score: f64,
    /// True iff `cost_ratio <= QEP_PASS_COST_RATIO`.
    pub pass: bool,
}

/// `qep`: compare estimated total cost of the original query against the
/// predicted query.
pub fn qep(original_cost: f64, predicted_cost: f64) -> QepResult {
    let cost_ratio = if original_cost > 0.0 {
        predicted_cost / original_cost
    } else if predicted_cost > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    let score = (1.0 - cost_ratio).max(0.0);
    QepResult {
        cost_ratio,
        score,
        pass: cost_ratio <= QEP_PASS_COST_RATIO,
    }
}

/// Arithmetic mean, `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// The `p`-th percentile (`0.0..=100.0`) of `values` via nearest-rank.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rs(rows: Vec<Vec<Value>>) -> ResultSet {
        ResultSet {
            columns: vec!["a".to_string()],
            rows,
        }
    }

    #[test]
    fn soft_ex_is_order_insensitive() {
        let predicted = rs(vec![vec![json!(1)], vec![json!(2)]]);
        let reference = rs(vec![vec![json!(2)], vec![json!(1)]]);
        assert_eq!(soft_ex(&predicted, &reference), 1.0);
    }

    #[test]
    fn soft_ex_tolerates_float_rounding() {
        let predicted = rs(vec![vec![json!(1.0000001)]]);
        let reference = rs(vec![vec![json!(1.0)]]);
        assert_eq!(soft_ex(&predicted, &reference), 1.0);
    }

    #[test]
    fn soft_ex_treats_null_as_equal_to_null() {
        let predicted = rs(vec![vec![json!(null)]]);
        let reference = rs(vec![vec![json!(null)]]);
        assert_eq!(soft_ex(&predicted, &reference), 1.0);
    }

    #[test]
    fn soft_ex_mismatched_row_count_is_zero() {
        let predicted = rs(vec![vec![json!(1)]]);
        let reference = rs(vec![vec![json!(1)], vec![json!(2)]]);
        assert_eq!(soft_ex(&predicted, &reference), 0.0);
    }

    #[test]
    fn qep_scores_ten_percent_improvement_as_passing() {
        let result = qep(100.0, 90.0);
        assert!(result.pass);
        assert!((result.score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn qep_below_threshold_does_not_pass() {
        let result = qep(100.0, 95.0);
        assert!(!result.pass);
    }

    #[test]
    fn selector_maps_categories_to_metrics() {
        assert_eq!(select_metric(TaskCategory::Efficiency), Metric::Qep);
        assert_eq!(select_metric(TaskCategory::Management), Metric::Tcv);
        assert_eq!(select_metric(TaskCategory::Query), Metric::SoftEx);
        assert_eq!(select_metric(TaskCategory::Personalization), Metric::SoftEx);
    }

    #[test]
    fn percentile_matches_nearest_rank() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
    }
}
