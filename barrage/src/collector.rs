//! Aggregation of samples into per-scenario and per-selector series.
//!
//! A t-digest cannot be merged after the fact without losing accuracy, so every threshold selector
//! that spans more than one scenario gets a series of its own, fed at record time. Selectors that
//! match a single scenario share that scenario's series.
use crate::measurement::{summarize, summarize_checks, Rate, Trend};
use crate::sample::{ErrorTag, Outcome, Sample, SampleKind};
use arc_swap::ArcSwap;
use barrage_core::{Aggregation, CheckSummary, MetricName, MetricSummary, SCENARIO_TAG};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{trace, warn};

pub type Selector = Vec<(String, String)>;

#[derive(Debug, Clone)]
struct Stream {
    trend: Trend,
    rate: Rate,
}

impl Stream {
    fn new() -> Self {
        Self {
            trend: Trend::new(),
            rate: Rate::default(),
        }
    }

    fn record(&mut self, sample: &Sample) {
        if !sample.outcome().never_ran() {
            self.trend.record(sample.latency().as_secs_f64() * 1_000.);
        }
        let failure = match sample.outcome() {
            Outcome::Success { .. } => None,
            Outcome::Failure(tag) => Some(tag.to_string()),
        };
        self.rate.record(failure);
    }
}

#[derive(Debug, Clone)]
struct Series {
    requests: Stream,
    iterations: Stream,
    /// Failures are keyed by check name.
    checks: Rate,
    dropped: u64,
}

impl Series {
    fn new() -> Self {
        Self {
            requests: Stream::new(),
            iterations: Stream::new(),
            checks: Rate::default(),
            dropped: 0,
        }
    }

    fn record(&mut self, sample: &Sample) {
        match sample.kind() {
            SampleKind::Request => self.requests.record(sample),
            SampleKind::Iteration => {
                if sample.outcome().never_ran() {
                    self.dropped += 1;
                }
                self.iterations.record(sample)
            }
        }
    }

    fn completed_iterations(&self) -> u64 {
        self.iterations.rate.total() - self.dropped
    }

    fn observe(&self, metric: MetricName, aggregation: Aggregation) -> Option<f64> {
        match metric {
            MetricName::HttpReqDuration => self.requests.trend.aggregate(aggregation),
            MetricName::IterationDuration => self.iterations.trend.aggregate(aggregation),
            MetricName::HttpReqFailed => rate_value(&self.requests.rate, aggregation),
            MetricName::IterationFailed => rate_value(&self.iterations.rate, aggregation),
            MetricName::HttpReqs => Some(self.requests.rate.total() as f64),
            MetricName::Iterations => Some(self.completed_iterations() as f64),
            MetricName::DroppedIterations => Some(self.dropped as f64),
            MetricName::Checks => {
                let passed = self.checks.total() - self.checks.failures();
                match aggregation {
                    Aggregation::Rate if self.checks.total() == 0 => None,
                    Aggregation::Rate => Some(passed as f64 / self.checks.total() as f64),
                    Aggregation::Count => Some(passed as f64),
                    _ => None,
                }
            }
        }
    }
}

fn rate_value(rate: &Rate, aggregation: Aggregation) -> Option<f64> {
    match aggregation {
        Aggregation::Rate => Some(rate.rate()),
        Aggregation::Count => Some(rate.failures() as f64),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct Route {
    tags: BTreeMap<String, String>,
    targets: Vec<usize>,
}

/// Thread-safe sink for samples from every worker of a run.
#[derive(Debug)]
pub struct MetricsCollector {
    start: ArcSwap<Instant>,
    series: Vec<Mutex<Series>>,
    scenarios: HashMap<Arc<str>, Route>,
    selectors: HashMap<Selector, usize>,
}

impl MetricsCollector {
    /// `scenarios` maps each scenario name to its selection tags. Every selector that thresholds
    /// will be evaluated against must be registered here.
    pub fn new<I>(scenarios: BTreeMap<String, BTreeMap<String, String>>, selectors: I) -> Self
    where
        I: IntoIterator<Item = Selector>,
    {
        let mut series = vec![];
        let mut routes: HashMap<Arc<str>, Route> = HashMap::new();
        for (name, tags) in scenarios {
            routes.insert(
                Arc::from(name.as_str()),
                Route {
                    tags,
                    targets: vec![series.len()],
                },
            );
            series.push(Mutex::new(Series::new()));
        }

        let mut registered = HashMap::new();
        for mut selector in selectors {
            selector.sort();
            selector.dedup();
            if registered.contains_key(&selector) {
                continue;
            }

            let matching: Vec<_> = routes
                .iter()
                .filter(|(_, route)| matches(&route.tags, &selector))
                .map(|(name, _)| name.clone())
                .collect();

            let index = match matching.as_slice() {
                [single] => routes[single].targets[0],
                _ => {
                    if matching.is_empty() {
                        warn!("Threshold selector {selector:?} matches no scenario.");
                    }
                    let index = series.len();
                    series.push(Mutex::new(Series::new()));
                    for name in &matching {
                        if let Some(route) = routes.get_mut(name) {
                            route.targets.push(index);
                        }
                    }
                    index
                }
            };
            registered.insert(selector, index);
        }

        Self {
            start: ArcSwap::from_pointee(Instant::now()),
            series,
            scenarios: routes,
            selectors: registered,
        }
    }

    /// Collector for untagged scenarios with the given names.
    pub fn for_scenarios<'a, I, S>(names: I, selectors: S) -> Self
    where
        I: IntoIterator<Item = &'a str>,
        S: IntoIterator<Item = Selector>,
    {
        let scenarios = names
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    BTreeMap::from([(SCENARIO_TAG.to_string(), name.to_string())]),
                )
            })
            .collect();
        Self::new(scenarios, selectors)
    }

    /// Restart the run clock. Called when the run begins.
    pub fn start_clock(&self) {
        self.start.store(Arc::new(Instant::now()));
    }

    /// Run clock for sample timestamps: time since [`Self::start_clock`], or since creation if the
    /// clock was never started.
    pub fn elapsed(&self) -> Duration {
        self.start.load().elapsed()
    }

    pub fn record(&self, sample: Sample) {
        let Some(route) = self.scenarios.get(sample.scenario()) else {
            warn!("Sample for unknown scenario {}; discarded.", sample.scenario());
            return;
        };

        trace!(
            scenario = sample.scenario(),
            kind = ?sample.kind(),
            latency = ?sample.latency(),
            "sample"
        );

        for idx in &route.targets {
            self.lock(*idx).record(&sample);
        }

        #[cfg(feature = "metrics")]
        mirror(&sample);
    }

    /// Records the result of a named check. Checks feed only the `checks` metric.
    pub fn record_check(&self, scenario: &str, name: &str, passed: bool) {
        let Some(route) = self.scenarios.get(scenario) else {
            warn!("Check {name} for unknown scenario {scenario}; discarded.");
            return;
        };
        trace!(scenario, check = name, passed, "check");

        for idx in &route.targets {
            let failure = (!passed).then(|| name.to_string());
            self.lock(*idx).checks.record(failure);
        }

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "barrage_checks",
            "scenario" => scenario.to_string(),
            "check" => name.to_string(),
            "passed" => passed.to_string()
        )
        .increment(1);
    }

    /// Records an arrival that never reached a worker.
    pub fn record_dropped(&self, scenario: &Arc<str>, tag: ErrorTag) {
        self.record(Sample::dropped(scenario.clone(), self.elapsed(), tag));
    }

    /// Current value of `metric` aggregated over the series for `selector`.
    ///
    /// Returns `None` when the selector was never registered, or when the series holds no data
    /// for a trend aggregation.
    pub fn observe(
        &self,
        metric: MetricName,
        selector: &[(String, String)],
        aggregation: Aggregation,
    ) -> Option<f64> {
        let idx = self.series_index(selector)?;
        self.lock(idx).observe(metric, aggregation)
    }

    /// Request and iteration summaries for one scenario.
    pub fn scenario_summary(&self, scenario: &str) -> Option<(MetricSummary, MetricSummary)> {
        let route = self.scenarios.get(scenario)?;
        let series = self.lock(route.targets[0]);
        Some((
            summarize(&series.requests.trend, &series.requests.rate),
            summarize(&series.iterations.trend, &series.iterations.rate),
        ))
    }

    pub fn check_summary(&self, scenario: &str) -> Option<CheckSummary> {
        let route = self.scenarios.get(scenario)?;
        Some(summarize_checks(&self.lock(route.targets[0]).checks))
    }

    pub fn dropped(&self, scenario: &str) -> u64 {
        self.scenarios
            .get(scenario)
            .map(|route| self.lock(route.targets[0]).dropped)
            .unwrap_or(0)
    }

    fn series_index(&self, selector: &[(String, String)]) -> Option<usize> {
        let mut key = selector.to_vec();
        key.sort();
        key.dedup();
        if let Some(idx) = self.selectors.get(&key) {
            return Some(*idx);
        }

        let mut matching = self
            .scenarios
            .values()
            .filter(|route| matches(&route.tags, &key));
        match (matching.next(), matching.next()) {
            (Some(route), None) => Some(route.targets[0]),
            _ => None,
        }
    }

    fn lock(&self, idx: usize) -> MutexGuard<'_, Series> {
        self.series[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn matches(tags: &BTreeMap<String, String>, selector: &[(String, String)]) -> bool {
    selector
        .iter()
        .all(|(key, value)| tags.get(key).is_some_and(|v| v == value))
}

#[cfg(feature = "metrics")]
fn mirror(sample: &Sample) {
    let scenario = sample.scenario().to_string();
    let failed = sample.outcome().is_failure();
    match sample.kind() {
        SampleKind::Request => {
            metrics::counter!("barrage_http_reqs", "scenario" => scenario.clone()).increment(1);
            metrics::histogram!("barrage_http_req_duration_seconds", "scenario" => scenario.clone())
                .record(sample.latency().as_secs_f64());
            if failed {
                metrics::counter!("barrage_http_req_failed", "scenario" => scenario).increment(1);
            }
        }
        SampleKind::Iteration if sample.outcome().never_ran() => {
            metrics::counter!("barrage_dropped_iterations", "scenario" => scenario).increment(1);
        }
        SampleKind::Iteration => {
            metrics::counter!("barrage_iterations", "scenario" => scenario.clone()).increment(1);
            metrics::histogram!("barrage_iteration_duration_seconds", "scenario" => scenario.clone())
                .record(sample.latency().as_secs_f64());
            if failed {
                metrics::counter!("barrage_iteration_failed", "scenario" => scenario).increment(1);
            }
        }
    }
}
