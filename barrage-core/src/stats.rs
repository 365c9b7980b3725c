use crate::ThresholdRule;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Structured result of a run, handed to whatever presentation layer is attached.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    #[serde(with = "crate::duration")]
    pub elapsed: Duration,
    /// Set when a fatal threshold or an external signal ended the run early.
    pub aborted: bool,
    pub scenarios: BTreeMap<String, ScenarioReport>,
    pub thresholds: Vec<ThresholdOutcome>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        !self.aborted && self.thresholds.iter().all(|t| t.passed)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.thresholds.iter().filter(|t| !t.passed)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioReport {
    pub dispatch: DispatchStats,
    pub requests: MetricSummary,
    pub iterations: MetricSummary,
    #[serde(skip_serializing_if = "CheckSummary::is_empty")]
    pub checks: CheckSummary,
}

/// Tally of named checks for one scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckSummary {
    pub total: u64,
    pub passed: u64,
    /// Failure counts keyed by check name.
    pub failures: BTreeMap<String, u64>,
}

impl CheckSummary {
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.
        } else {
            self.passed as f64 / self.total as f64
        }
    }
}

/// Work accounting for one scenario. `attempted == completed + dropped` once the scenario is done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub attempted: u64,
    pub completed: u64,
    pub dropped: u64,
    /// Iterations cut short by a forced drain. Counted within `completed`.
    pub interrupted: u64,
    pub peak_workers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSummary {
    pub latency: Option<TrendSummary>,
    pub total: u64,
    pub failures: u64,
    pub error_rate: f64,
    /// Failure counts keyed by error tag.
    pub errors: BTreeMap<String, u64>,
}

/// Latency distribution summary in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdOutcome {
    pub rule: ThresholdRule,
    pub passed: bool,
    /// `None` when the series has no data for the requested aggregation.
    pub observed: Option<f64>,
}
