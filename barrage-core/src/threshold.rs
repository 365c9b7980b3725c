//! Threshold rule parsing.
//!
//! Rules are declared as `metric{tag:value,...}` keys mapping to expressions like `p(95) < 600` or
//! `rate<0.01`.
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Built-in metrics a threshold can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    HttpReqDuration,
    HttpReqFailed,
    HttpReqs,
    IterationDuration,
    IterationFailed,
    Iterations,
    DroppedIterations,
    /// Pass rate of named checks. A failed check never fails its iteration.
    Checks,
}

/// Shape of a metric, which decides the aggregations it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Trend,
    Rate,
    Counter,
}

impl MetricName {
    pub const ALL: [MetricName; 8] = [
        MetricName::HttpReqDuration,
        MetricName::HttpReqFailed,
        MetricName::HttpReqs,
        MetricName::IterationDuration,
        MetricName::IterationFailed,
        MetricName::Iterations,
        MetricName::DroppedIterations,
        MetricName::Checks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::HttpReqDuration => "http_req_duration",
            MetricName::HttpReqFailed => "http_req_failed",
            MetricName::HttpReqs => "http_reqs",
            MetricName::IterationDuration => "iteration_duration",
            MetricName::IterationFailed => "iteration_failed",
            MetricName::Iterations => "iterations",
            MetricName::DroppedIterations => "dropped_iterations",
            MetricName::Checks => "checks",
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricName::HttpReqDuration | MetricName::IterationDuration => MetricKind::Trend,
            MetricName::HttpReqFailed | MetricName::IterationFailed | MetricName::Checks => {
                MetricKind::Rate
            }
            MetricName::HttpReqs | MetricName::Iterations | MetricName::DroppedIterations => {
                MetricKind::Counter
            }
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricName::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown metric \"{s}\""))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    /// Percentile in `[0, 100]`.
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
    Rate,
    Count,
}

impl Aggregation {
    fn supported_by(&self, kind: MetricKind) -> bool {
        use Aggregation::*;
        match kind {
            MetricKind::Trend => !matches!(self, Rate),
            MetricKind::Rate => matches!(self, Rate | Count),
            MetricKind::Counter => matches!(self, Count),
        }
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let agg = match s {
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "med" => Aggregation::Med,
            "rate" => Aggregation::Rate,
            "count" => Aggregation::Count,
            other => {
                // `p(95)`, `p(99.9)` and the shorthand `p95`
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .or_else(|| other.strip_prefix('p'))
                    .ok_or_else(|| format!("unknown aggregation \"{other}\""))?;
                let pct: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid percentile \"{other}\""))?;
                if !(0. ..=100.).contains(&pct) {
                    return Err(format!("percentile {pct} out of range"));
                }
                Aggregation::Percentile(pct)
            }
        };
        Ok(agg)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Percentile(p) => write!(f, "p({p})"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    // Two-character operators first so `<=` is not read as `<`.
    const TOKENS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => (observed - bound).abs() < f64::EPSILON,
            Comparison::Ne => (observed - bound).abs() >= f64::EPSILON,
        }
    }

    fn as_str(&self) -> &'static str {
        Self::TOKENS
            .iter()
            .find(|(_, c)| c == self)
            .map(|(tok, _)| *tok)
            .unwrap_or("?")
    }
}

/// `aggregation comparison bound`, e.g. `p(90) < 500`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicate {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub bound: f64,
}

impl FromStr for Predicate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pos, token, comparison) = Comparison::TOKENS
            .iter()
            .filter_map(|(tok, cmp)| s.find(tok).map(|pos| (pos, *tok, *cmp)))
            .min_by_key(|(pos, tok, _)| (*pos, usize::MAX - tok.len()))
            .ok_or_else(|| "missing comparison operator".to_string())?;

        let aggregation: Aggregation = s[..pos].trim().parse()?;
        let bound = s[pos + token.len()..].trim();
        let bound: f64 = bound
            .parse()
            .map_err(|_| format!("invalid bound \"{bound}\""))?;

        Ok(Predicate {
            aggregation,
            comparison,
            bound,
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.aggregation,
            self.comparison.as_str(),
            self.bound
        )
    }
}

/// A single pass/fail rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdRule {
    pub metric: MetricName,
    pub tags: Vec<(String, String)>,
    pub expression: String,
    #[serde(skip)]
    pub predicate: Predicate,
    pub abort_on_fail: bool,
    #[serde(with = "crate::duration")]
    pub delay_abort_eval: Duration,
}

impl ThresholdRule {
    pub fn new(
        metric: MetricName,
        tags: Vec<(String, String)>,
        expression: &str,
    ) -> Result<Self, ConfigError> {
        let key = render_metric_key(metric, &tags);
        let invalid = |reason: String| ConfigError::InvalidThreshold {
            key: key.clone(),
            expression: expression.to_string(),
            reason,
        };
        let predicate: Predicate = expression.parse().map_err(invalid)?;

        if !predicate.aggregation.supported_by(metric.kind()) {
            return Err(ConfigError::InvalidThreshold {
                key,
                expression: expression.to_string(),
                reason: format!("{} is not available on {metric}", predicate.aggregation),
            });
        }

        Ok(Self {
            metric,
            tags,
            expression: expression.to_string(),
            predicate,
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        })
    }

    pub fn abort_on_fail(mut self, abort: bool) -> Self {
        self.abort_on_fail = abort;
        self
    }

    pub fn delay_abort_eval(mut self, delay: Duration) -> Self {
        self.delay_abort_eval = delay;
        self
    }

    /// `metric{tag:value}` form of the rule's series.
    pub fn key(&self) -> String {
        render_metric_key(self.metric, &self.tags)
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key(), self.predicate)
    }
}

/// Parse `http_req_duration{test_type:load_test}` into its metric and tag selector.
pub fn parse_metric_key(key: &str) -> Result<(MetricName, Vec<(String, String)>), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidMetricKey {
        key: key.to_string(),
        reason,
    };

    let key = key.trim();
    let (metric, selector) = match key.find('{') {
        Some(open) => {
            let selector = key[open + 1..]
                .strip_suffix('}')
                .ok_or_else(|| invalid("unterminated tag selector".to_string()))?;
            (&key[..open], Some(selector))
        }
        None => (key, None),
    };

    let metric: MetricName = metric.trim().parse().map_err(invalid)?;

    let mut tags = vec![];
    for pair in selector.into_iter().flat_map(|s| s.split(',')) {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (k, v) = pair
            .split_once(':')
            .or_else(|| pair.split_once('='))
            .ok_or_else(|| invalid(format!("tag \"{pair}\" is not key:value")))?;
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() {
            return Err(invalid(format!("tag \"{pair}\" has an empty key")));
        }
        tags.push((k.to_string(), v.to_string()));
    }
    tags.sort();

    Ok((metric, tags))
}

pub fn render_metric_key(metric: MetricName, tags: &[(String, String)]) -> String {
    if tags.is_empty() {
        return metric.to_string();
    }

    let selector = tags
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{metric}{{{selector}}}")
}

/// Threshold declarations as they appear in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdSpec {
    One(String),
    Many(Vec<ThresholdEntry>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdEntry {
    Expression(String),
    Detailed {
        threshold: String,
        #[serde(default, alias = "abortOnFail")]
        abort_on_fail: bool,
        #[serde(
            default,
            alias = "delayAbortEval",
            with = "crate::duration::option",
            skip_serializing_if = "Option::is_none"
        )]
        delay_abort_eval: Option<Duration>,
    },
}

impl ThresholdSpec {
    /// Expand into rules for `key`.
    pub fn rules(&self, key: &str) -> Result<Vec<ThresholdRule>, ConfigError> {
        let (metric, tags) = parse_metric_key(key)?;
        let entries = match self {
            ThresholdSpec::One(expr) => vec![ThresholdEntry::Expression(expr.clone())],
            ThresholdSpec::Many(entries) => entries.clone(),
        };

        if entries.is_empty() {
            return Err(ConfigError::InvalidMetricKey {
                key: key.to_string(),
                reason: "empty threshold list".to_string(),
            });
        }

        entries
            .into_iter()
            .map(|entry| match entry {
                ThresholdEntry::Expression(expr) => ThresholdRule::new(metric, tags.clone(), &expr),
                ThresholdEntry::Detailed {
                    threshold,
                    abort_on_fail,
                    delay_abort_eval,
                } => Ok(ThresholdRule::new(metric, tags.clone(), &threshold)?
                    .abort_on_fail(abort_on_fail)
                    .delay_abort_eval(delay_abort_eval.unwrap_or_default())),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_predicates() {
        let p: Predicate = "p(90) < 500".parse().unwrap();
        assert_eq!(p.aggregation, Aggregation::Percentile(90.));
        assert_eq!(p.comparison, Comparison::Lt);
        assert_eq!(p.bound, 500.);

        let p: Predicate = "rate<0.01".parse().unwrap();
        assert_eq!(p.aggregation, Aggregation::Rate);
        assert_eq!(p.bound, 0.01);

        let p: Predicate = "avg<=200".parse().unwrap();
        assert_eq!(p.comparison, Comparison::Le);

        let p: Predicate = "p99.9 >= 3".parse().unwrap();
        assert_eq!(p.aggregation, Aggregation::Percentile(99.9));
        assert_eq!(p.comparison, Comparison::Ge);

        let p: Predicate = "count != 0".parse().unwrap();
        assert_eq!(p.comparison, Comparison::Ne);
    }

    #[test]
    fn rejects_bad_predicates() {
        assert!("p(90) 500".parse::<Predicate>().is_err());
        assert!("p(190) < 500".parse::<Predicate>().is_err());
        assert!("mode < 1".parse::<Predicate>().is_err());
        assert!("avg < fast".parse::<Predicate>().is_err());
    }

    #[test]
    fn parses_metric_keys() {
        let (metric, tags) = parse_metric_key("http_req_duration{test_type:load_test}").unwrap();
        assert_eq!(metric, MetricName::HttpReqDuration);
        assert_eq!(
            tags,
            vec![("test_type".to_string(), "load_test".to_string())]
        );

        let (metric, tags) = parse_metric_key("http_req_failed").unwrap();
        assert_eq!(metric, MetricName::HttpReqFailed);
        assert!(tags.is_empty());

        let (_, tags) = parse_metric_key("iterations{scenario=b, group = x}").unwrap();
        assert_eq!(
            tags,
            vec![
                ("group".to_string(), "x".to_string()),
                ("scenario".to_string(), "b".to_string())
            ]
        );

        assert!(parse_metric_key("http_req_duration{test_type:load_test").is_err());
        assert!(parse_metric_key("vus_max").is_err());
        assert!(parse_metric_key("http_reqs{nokey}").is_err());
    }

    #[test]
    fn aggregation_must_match_metric() {
        assert!(ThresholdRule::new(MetricName::HttpReqFailed, vec![], "rate<0.01").is_ok());
        assert!(ThresholdRule::new(MetricName::HttpReqFailed, vec![], "p(95)<1").is_err());
        assert!(ThresholdRule::new(MetricName::HttpReqDuration, vec![], "rate<1").is_err());
        assert!(ThresholdRule::new(MetricName::DroppedIterations, vec![], "count==0").is_ok());
    }

    #[test]
    fn checks_is_a_rate() {
        let (metric, tags) = parse_metric_key("checks{test_type:load_test}").unwrap();
        assert_eq!(metric, MetricName::Checks);
        assert_eq!(
            tags,
            vec![("test_type".to_string(), "load_test".to_string())]
        );
        assert!(ThresholdRule::new(MetricName::Checks, vec![], "rate>0.95").is_ok());
        assert!(ThresholdRule::new(MetricName::Checks, vec![], "avg>0.95").is_err());
    }

    #[test]
    fn expands_specs() {
        let spec: ThresholdSpec = serde_json::from_str(
            r#"["p(90) < 500", {"threshold": "p(99) < 1000", "abortOnFail": true, "delayAbortEval": "10s"}]"#,
        )
        .unwrap();
        let rules = spec.rules("http_req_duration{test_type:spike_test}").unwrap();
        assert_eq!(rules.len(), 2);
        assert!(!rules[0].abort_on_fail);
        assert!(rules[1].abort_on_fail);
        assert_eq!(rules[1].delay_abort_eval, Duration::from_secs(10));
        assert_eq!(rules[1].key(), "http_req_duration{test_type:spike_test}");

        let spec: ThresholdSpec = serde_json::from_str(r#""rate<0.01""#).unwrap();
        assert_eq!(spec.rules("http_req_failed").unwrap().len(), 1);

        let empty = ThresholdSpec::Many(vec![]);
        assert!(empty.rules("http_reqs").is_err());
    }
}
