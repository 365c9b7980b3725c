//! Threshold evaluation against collected metrics.
use crate::collector::{MetricsCollector, Selector};
use barrage_core::{ThresholdOutcome, ThresholdRule};
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Evaluates every rule against the current state of `collector`. Never mutates it.
///
/// A rule with no data for its aggregation (an empty latency trend) passes with no observed value.
pub fn evaluate(rules: &[ThresholdRule], collector: &MetricsCollector) -> Vec<ThresholdOutcome> {
    rules
        .iter()
        .map(|rule| evaluate_rule(rule, collector))
        .collect()
}

pub fn evaluate_rule(rule: &ThresholdRule, collector: &MetricsCollector) -> ThresholdOutcome {
    let predicate = &rule.predicate;
    let observed = collector.observe(rule.metric, &rule.tags, predicate.aggregation);
    let passed = match observed {
        Some(value) => predicate.comparison.holds(value, predicate.bound),
        None => true,
    };
    trace!("{rule}: observed {observed:?}, passed {passed}");
    ThresholdOutcome {
        rule: rule.clone(),
        passed,
        observed,
    }
}

/// Rules of one run, with the mid-run abort check.
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    rules: Vec<ThresholdRule>,
}

impl ThresholdEvaluator {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    /// Series the collector must maintain for these rules.
    pub fn selectors(&self) -> impl Iterator<Item = Selector> + '_ {
        self.rules.iter().map(|rule| rule.tags.clone())
    }

    pub fn has_fatal(&self) -> bool {
        self.rules.iter().any(|rule| rule.abort_on_fail)
    }

    pub fn evaluate(&self, collector: &MetricsCollector) -> Vec<ThresholdOutcome> {
        evaluate(&self.rules, collector)
    }

    /// First fatal rule failing at `elapsed`, ignoring rules still inside their `delay_abort_eval`.
    pub fn check_abort(
        &self,
        collector: &MetricsCollector,
        elapsed: Duration,
    ) -> Option<ThresholdOutcome> {
        self.rules
            .iter()
            .filter(|rule| rule.abort_on_fail && elapsed >= rule.delay_abort_eval)
            .map(|rule| evaluate_rule(rule, collector))
            .find(|outcome| !outcome.passed)
    }
}
