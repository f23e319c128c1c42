//! Iteration Memory — a compressed, bounded history of recent agent
//! iterations, injected into planner prompts.
//!
//! A plain, owned list -- no shared or cyclic structure between Memory and
//! Actions is required.

use crate::planner::action::Action;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// How a single iteration's action changed the query's estimated cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Cost dropped by more than 5%.
    Improved,
    /// Cost rose by more than 5%.
    Regressed,
    /// Cost changed by 5% or less.
    Unchanged,
    /// The action itself failed (DDL error, timeout, …).
    Error,
}

/// One completed iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number.
    pub ordinal: u32,
    /// The action taken, summarised to roughly 16 tokens.
    pub action_summary: String,
    /// Estimated total cost before the action.
    pub cost_before: f64,
    /// Estimated total cost after the action.
    pub cost_after: f64,
    /// Classification of the cost delta.
    pub outcome: Outcome,
    /// An optional one-line insight, present when the outcome was
    /// `Regressed` or `Unchanged`.
    pub insight: Option<String>,
}

impl IterationRecord {
    /// Build a record from a taken action and the pre/post cost probe,
    /// classifying the outcome: `< -5%` improved, `> +5%` regressed,
    /// otherwise unchanged.
    pub fn new(ordinal: u32, action: &Action, cost_before: f64, cost_after: f64) -> Self {
        const EPSILON: f64 = 1e-9;
        let delta_pct = (cost_after - cost_before) / cost_before.max(EPSILON);
        let outcome = if delta_pct < -0.05 {
            Outcome::Improved
        } else if delta_pct > 0.05 {
            Outcome::Regressed
        } else {
            Outcome::Unchanged
        };

        let insight = match outcome {
            Outcome::Regressed => Some("action increased estimated cost".to_string()),
            Outcome::Unchanged if matches!(action, Action::CreateIndex { .. }) => {
                Some("index created but not used by planner".to_string())
            }
            Outcome::Unchanged => Some("no measurable change".to_string()),
            _ => None,
        };

        Self {
            ordinal,
            action_summary: action.summarize(),
            cost_before,
            cost_after,
            outcome,
            insight,
        }
    }

    /// Build a record for an action that errored before a cost re-probe
    /// could run.
    pub fn error(ordinal: u32, action: &Action, cost_before: f64, insight: impl Into<String>) -> Self {
        Self {
            ordinal,
            action_summary: action.summarize(),
            cost_before,
            cost_after: cost_before,
            outcome: Outcome::Error,
            insight: Some(insight.into()),
        }
    }

    fn delta_pct(&self) -> f64 {
        const EPSILON: f64 = 1e-9;
        (self.cost_after - self.cost_before) / self.cost_before.max(EPSILON) * 100.0
    }

    /// Render as `"Iter n: <summary> -> Δ%, outcome[, insight]"`.
    pub fn render(&self) -> String {
        let outcome_str = match self.outcome {
            Outcome::Improved => "improved",
            Outcome::Regressed => "regressed",
            Outcome::Unchanged => "unchanged",
            Outcome::Error => "error",
        };
        match &self.insight {
            Some(insight) => format!(
                "Iter {}: {} -> {:+.1}%, {outcome_str}, {insight}",
                self.ordinal,
                self.action_summary,
                self.delta_pct()
            ),
            None => format!(
                "Iter {}: {} -> {:+.1}%, {outcome_str}",
                self.ordinal,
                self.action_summary,
                self.delta_pct()
            ),
        }
    }

    /// Whether the planner should avoid repeating this exact action: a
    /// regressed or unchanged outcome means don't repeat it.
    pub fn should_avoid_repeat(&self) -> bool {
        matches!(self.outcome, Outcome::Regressed | Outcome::Unchanged)
    }
}

/// Bounded history of iterations, injected into planner prompts; only
/// the last H iterations are retained (default H=2).
#[derive(Debug, Clone)]
pub struct IterationMemory {
    records: VecDeque<IterationRecord>,
    horizon: usize,
}

impl IterationMemory {
    /// Default retained-history horizon.
    pub const DEFAULT_HORIZON: usize = 2;

    /// Create empty memory bounded to `horizon` records.
    pub fn new(horizon: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(horizon),
            horizon,
        }
    }

    /// Append a record, discarding the oldest entry once over the horizon.
    pub fn push(&mut self, record: IterationRecord) {
        self.records.push_back(record);
        while self.records.len() > self.horizon {
            self.records.pop_front();
        }
    }

    /// The records currently retained, oldest first -- never more than
    /// `horizon`, so the planner prompt never references more than H past
    /// iterations.
    pub fn recent(&self) -> impl Iterator<Item = &IterationRecord> {
        self.records.iter()
    }

    /// Render the retained records as planner-prompt lines.
    pub fn render_for_prompt(&self) -> Vec<String> {
        self.records.iter().map(IterationRecord::render).collect()
    }

    /// True if any retained record for `action_key` has outcome Regressed or
    /// Unchanged -- used by the Planner's "don't repeat" directive. Matching
    /// is on the action's summarised target text.
    pub fn was_unproductive(&self, action_summary: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.action_summary == action_summary && r.should_avoid_repeat())
    }

    /// Snapshot the currently-retained records, for inclusion in a
    /// completed task's `Solution`.
    pub fn snapshot(&self) -> Vec<IterationRecord> {
        self.records.iter().cloned().collect()
    }

    /// Number of records currently retained.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no iterations have completed yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for IterationMemory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_HORIZON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze_action() -> Action {
        Action::RunAnalyze {
            table: "orders".into(),
            rationale: "stale stats".into(),
            confidence: 0.8,
        }
    }

    #[test]
    fn classifies_improved_regressed_unchanged() {
        let improved = IterationRecord::new(1, &analyze_action(), 100.0, 90.0);
        assert_eq!(improved.outcome, Outcome::Improved);

        let regressed = IterationRecord::new(1, &analyze_action(), 100.0, 110.0);
        assert_eq!(regressed.outcome, Outcome::Regressed);

        let unchanged = IterationRecord::new(1, &analyze_action(), 100.0, 102.0);
        assert_eq!(unchanged.outcome, Outcome::Unchanged);
    }

    #[test]
    fn memory_never_exceeds_horizon() {
        let mut mem = IterationMemory::new(2);
        for i in 1..=5u32 {
            mem.push(IterationRecord::new(i, &analyze_action(), 100.0, 100.0));
        }
        assert_eq!(mem.len(), 2);
        let rendered = mem.render_for_prompt();
        assert_eq!(rendered.len(), 2);
        // Oldest records are discarded: only iterations 4 and 5 remain.
        assert!(rendered[0].contains("Iter 4"));
        assert!(rendered[1].contains("Iter 5"));
    }

    #[test]
    fn unchanged_index_creation_gets_specific_insight() {
        let action = Action::CreateIndex {
            ddl: "CREATE INDEX idx_t_c ON t(c)".into(),
            rationale: "r".into(),
            confidence: 0.9,
        };
        let record = IterationRecord::new(1, &action, 100.0, 100.0);
        assert_eq!(
            record.insight.as_deref(),
            Some("index created but not used by planner")
        );
    }

    #[test]
    fn was_unproductive_flags_regressed_and_unchanged_only() {
        let mut mem = IterationMemory::new(2);
        mem.push(IterationRecord::new(1, &analyze_action(), 100.0, 102.0));
        assert!(mem.was_unproductive(&analyze_action().summarize()));

        let mut mem2 = IterationMemory::new(2);
        mem2.push(IterationRecord::new(1, &analyze_action(), 100.0, 50.0));
        assert!(!mem2.was_unproductive(&analyze_action().summarize()));
    }
}
