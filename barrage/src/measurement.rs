use barrage_core::{Aggregation, CheckSummary, MetricSummary, TrendSummary};
use pdatastructs::tdigest::{TDigest, K1};
use std::collections::BTreeMap;
use tracing::error;

const TDIGEST_BACKLOG_SIZE: usize = 100;
// NOTE: Higher compression keeps more centroids. 100 keeps the tail quantiles within a couple of
// percent on smooth distributions.
const TDIGEST_COMPRESSION: f64 = 100.;

/// Streaming latency distribution, in milliseconds.
#[derive(Debug, Clone)]
pub(crate) struct Trend {
    digest: TDigest<K1>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Trend {
    pub fn new() -> Self {
        Self {
            digest: default_tdigest(),
            count: 0,
            sum: 0.,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn record(&mut self, ms: f64) {
        self.digest.insert(ms);
        self.count += 1;
        self.sum += ms;
        self.min = self.min.min(ms);
        self.max = self.max.max(ms);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Quantile in `[0, 1]`.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        if q <= 0. {
            return Some(self.min);
        }
        if q >= 1. {
            return Some(self.max);
        }

        let value = self.digest.quantile(q);
        if value.is_finite() {
            Some(value.clamp(self.min, self.max))
        } else {
            error!("Non-finite quantile from the digest (q={q}); falling back to the mean.");
            self.avg()
        }
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn aggregate(&self, aggregation: Aggregation) -> Option<f64> {
        match aggregation {
            Aggregation::Percentile(p) => self.quantile(p / 100.),
            Aggregation::Med => self.quantile(0.5),
            Aggregation::Avg => self.avg(),
            Aggregation::Min => (self.count > 0).then_some(self.min),
            Aggregation::Max => (self.count > 0).then_some(self.max),
            Aggregation::Count => Some(self.count as f64),
            Aggregation::Rate => None,
        }
    }

    pub fn summary(&self) -> Option<TrendSummary> {
        Some(TrendSummary {
            count: self.count,
            min: self.aggregate(Aggregation::Min)?,
            max: self.aggregate(Aggregation::Max)?,
            avg: self.avg()?,
            p50: self.quantile(0.5)?,
            p90: self.quantile(0.9)?,
            p95: self.quantile(0.95)?,
            p99: self.quantile(0.99)?,
        })
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(TDIGEST_COMPRESSION), TDIGEST_BACKLOG_SIZE)
}

/// Success/failure tally with a per-tag breakdown.
#[derive(Debug, Clone, Default)]
pub(crate) struct Rate {
    total: u64,
    failures: u64,
    errors: BTreeMap<String, u64>,
}

impl Rate {
    pub fn record(&mut self, failure: Option<String>) {
        self.total += 1;
        if let Some(tag) = failure {
            self.failures += 1;
            *self.errors.entry(tag).or_default() += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.
        } else {
            self.failures as f64 / self.total as f64
        }
    }
}

pub(crate) fn summarize(trend: &Trend, rate: &Rate) -> MetricSummary {
    MetricSummary {
        latency: trend.summary(),
        total: rate.total,
        failures: rate.failures,
        error_rate: rate.rate(),
        errors: rate.errors.clone(),
    }
}

pub(crate) fn summarize_checks(rate: &Rate) -> CheckSummary {
    CheckSummary {
        total: rate.total,
        passed: rate.total - rate.failures,
        failures: rate.errors.clone(),
    }
}
