use crate::{
    ConfigError, InvalidRampError, Ramp, Stage, ThresholdRule, ThresholdSpec,
    DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_EXEC, DEFAULT_EXPECTED_STATUSES, DEFAULT_GRACEFUL_STOP,
    DEFAULT_THRESHOLD_INTERVAL, DEFAULT_TICK, DEFAULT_TIME_UNIT, SCENARIO_TAG,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// How a scenario turns its ramp into work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorKind {
    /// Ramp targets are iterations started per `time_unit`, independent of how many are in flight.
    #[serde(
        rename = "arrival-rate",
        alias = "ramping-arrival-rate",
        alias = "constant-arrival-rate"
    )]
    ArrivalRate,

    /// Ramp targets are the number of workers looping over the exec function.
    #[serde(
        rename = "fixed-concurrency",
        alias = "ramping-vus",
        alias = "constant-vus"
    )]
    FixedConcurrency,
}

/// Immutable description of an entire run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub scenarios: BTreeMap<String, ScenarioConfig>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdSpec>,

    #[serde(default)]
    pub execs: BTreeMap<String, HttpProbeConfig>,

    #[serde(default = "default_tick", with = "crate::duration")]
    pub tick: Duration,

    #[serde(
        default = "default_threshold_interval",
        alias = "thresholdInterval",
        with = "crate::duration"
    )]
    pub threshold_interval: Duration,

    /// Replaces every scenario's duration. Ramps clamp at their last target when extended.
    #[serde(
        default,
        alias = "duration",
        alias = "durationOverride",
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_override: Option<Duration>,

    /// Treat every threshold as fatal.
    #[serde(default, alias = "abortOnFail")]
    pub abort_on_fail: bool,

    #[serde(
        default = "default_acquire_timeout",
        alias = "acquireTimeout",
        with = "crate::duration"
    )]
    pub acquire_timeout: Duration,
}

impl RunConfig {
    pub fn new() -> Self {
        Self {
            scenarios: BTreeMap::new(),
            thresholds: BTreeMap::new(),
            execs: BTreeMap::new(),
            tick: DEFAULT_TICK,
            threshold_interval: DEFAULT_THRESHOLD_INTERVAL,
            duration_override: None,
            abort_on_fail: false,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    pub fn scenario(mut self, name: &str, scenario: ScenarioConfig) -> Self {
        self.scenarios.insert(name.to_string(), scenario);
        self
    }

    pub fn threshold(mut self, key: &str, spec: ThresholdSpec) -> Self {
        self.thresholds.insert(key.to_string(), spec);
        self
    }

    /// Check every configuration-time invariant. Runtime failures never surface here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scenarios.is_empty() {
            return Err(ConfigError::NoScenarios);
        }

        for (field, value) in [
            ("tick", self.tick),
            ("threshold_interval", self.threshold_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration {
                    field: field.to_string(),
                });
            }
        }

        for (name, scenario) in &self.scenarios {
            scenario.validate(name)?;
        }

        for (name, probe) in &self.execs {
            probe.validate(name)?;
        }

        self.threshold_rules()?;
        Ok(())
    }

    /// All threshold rules, with the global `abort_on_fail` applied.
    pub fn threshold_rules(&self) -> Result<Vec<ThresholdRule>, ConfigError> {
        let mut rules = vec![];
        for (key, spec) in &self.thresholds {
            for rule in spec.rules(key)? {
                let fatal = rule.abort_on_fail || self.abort_on_fail;
                rules.push(rule.abort_on_fail(fatal));
            }
        }
        Ok(rules)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub executor: ExecutorKind,

    #[serde(default = "default_exec")]
    pub exec: String,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(
        default,
        alias = "preAllocatedVUs",
        alias = "pre_allocated_vus",
        skip_serializing_if = "Option::is_none"
    )]
    pub preallocated_workers: Option<usize>,

    /// Value the first stage ramps from.
    #[serde(
        default,
        alias = "startRate",
        alias = "startVUs",
        alias = "start_rate",
        alias = "start_vus",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_target: Option<f64>,

    #[serde(default = "default_time_unit", alias = "timeUnit", with = "crate::duration")]
    pub time_unit: Duration,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,

    /// Single flat stage shorthand, used when `stages` is empty.
    #[serde(default, alias = "rate", alias = "vus", skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,

    #[serde(
        default,
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,

    /// Delay between iterations of a fixed-concurrency worker. The worker is free during the
    /// pause; rejected for arrival-rate scenarios.
    #[serde(default, with = "crate::duration")]
    pub pause: Duration,

    #[serde(default, alias = "startTime", with = "crate::duration")]
    pub start_time: Duration,

    #[serde(
        default = "default_graceful_stop",
        alias = "gracefulStop",
        with = "crate::duration"
    )]
    pub graceful_stop: Duration,
}

impl ScenarioConfig {
    pub fn new(executor: ExecutorKind) -> Self {
        Self {
            executor,
            exec: DEFAULT_EXEC.to_string(),
            tags: BTreeMap::new(),
            preallocated_workers: None,
            start_target: None,
            time_unit: DEFAULT_TIME_UNIT,
            stages: vec![],
            target: None,
            duration: None,
            pause: Duration::ZERO,
            start_time: Duration::ZERO,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
        }
    }

    pub fn arrival_rate() -> Self {
        Self::new(ExecutorKind::ArrivalRate)
    }

    pub fn fixed_concurrency() -> Self {
        Self::new(ExecutorKind::FixedConcurrency)
    }

    pub fn exec(mut self, exec: &str) -> Self {
        self.exec = exec.to_string();
        self
    }

    pub fn stage(mut self, target: f64, duration: Duration) -> Self {
        self.stages.push(Stage::new(target, duration));
        self
    }

    pub fn start_target(mut self, start: f64) -> Self {
        self.start_target = Some(start);
        self
    }

    pub fn preallocated_workers(mut self, workers: usize) -> Self {
        self.preallocated_workers = Some(workers);
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    pub fn time_unit(mut self, time_unit: Duration) -> Self {
        self.time_unit = time_unit;
        self
    }

    pub fn ramp(&self) -> Result<Ramp, InvalidRampError> {
        let stages = match (self.stages.is_empty(), self.target, self.duration) {
            (true, Some(target), Some(duration)) => vec![Stage::new(target, duration)],
            _ => self.stages.clone(),
        };
        Ramp::new(self.start_target, stages)
    }

    /// Rewrites the ramp so the scenario runs for exactly `duration`.
    pub fn with_duration(mut self, duration: Duration) -> Result<Self, InvalidRampError> {
        let ramp = self.ramp()?.with_duration(duration)?;
        self.start_target = Some(ramp.start());
        self.stages = ramp.stages().to_vec();
        self.target = None;
        self.duration = None;
        Ok(self)
    }

    /// Worker pool size, defaulting to what the ramp needs at its peak.
    pub fn pool_size(&self, ramp: &Ramp) -> usize {
        self.preallocated_workers
            .unwrap_or_else(|| self.peak_workers(ramp).max(1))
    }

    /// Tags used for threshold selection, including the implicit `scenario` tag.
    pub fn selector_tags(&self, name: &str) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        tags.insert(SCENARIO_TAG.to_string(), name.to_string());
        tags
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let ramp = self.ramp().map_err(|source| ConfigError::InvalidRamp {
            scenario: name.to_string(),
            source,
        })?;

        if self.executor == ExecutorKind::ArrivalRate && self.time_unit.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: format!("scenarios.{name}.time_unit"),
            });
        }
        if self.executor == ExecutorKind::ArrivalRate && !self.pause.is_zero() {
            return Err(ConfigError::PauseOnArrivalRate {
                scenario: name.to_string(),
            });
        }

        let peak = self.peak_workers(&ramp);
        let pool = self.pool_size(&ramp);
        match self.executor {
            ExecutorKind::FixedConcurrency if pool < peak => {
                Err(ConfigError::InsufficientWorkers {
                    scenario: name.to_string(),
                    preallocated: pool,
                    peak,
                })
            }
            ExecutorKind::ArrivalRate if pool == 0 && ramp.peak() > 0. => {
                Err(ConfigError::NoWorkers {
                    scenario: name.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn peak_workers(&self, ramp: &Ramp) -> usize {
        match self.executor {
            ExecutorKind::FixedConcurrency => (ramp.peak() + 1e-9).floor() as usize,
            ExecutorKind::ArrivalRate => {
                (ramp.peak() / self.time_unit.as_secs_f64().max(f64::MIN_POSITIVE)).ceil() as usize
            }
        }
    }
}

/// A declarative HTTP probe usable as a scenario's exec function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpProbeConfig {
    #[serde(default = "default_method")]
    pub method: String,

    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default, alias = "expectedStatuses", skip_serializing_if = "Option::is_none")]
    pub expected_statuses: Option<Vec<u16>>,

    /// Status checks by name. A failed check feeds the `checks` metric and nothing else.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, Vec<u16>>,

    #[serde(
        default,
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    /// Think time after the request. Part of the iteration, so the worker stays busy.
    #[serde(default, alias = "think_time", with = "crate::duration")]
    pub sleep: Duration,
}

impl HttpProbeConfig {
    pub fn get(url: &str) -> Self {
        Self {
            method: default_method(),
            url: url.to_string(),
            body: None,
            headers: BTreeMap::new(),
            expected_statuses: None,
            checks: BTreeMap::new(),
            timeout: None,
            sleep: Duration::ZERO,
        }
    }

    pub fn check(mut self, name: &str, statuses: &[u16]) -> Self {
        self.checks.insert(name.to_string(), statuses.to_vec());
        self
    }

    pub fn sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn is_expected(&self, status: u16) -> bool {
        match &self.expected_statuses {
            Some(statuses) => statuses.contains(&status),
            None => DEFAULT_EXPECTED_STATUSES.contains(&status),
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidProbe {
            exec: name.to_string(),
            reason: reason.to_string(),
        };

        if self.url.trim().is_empty() {
            return Err(invalid("url is empty"));
        }
        if self.method.trim().is_empty() || !self.method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(invalid("method must be an alphabetic HTTP token"));
        }
        if matches!(&self.expected_statuses, Some(s) if s.is_empty()) {
            return Err(invalid("expected_statuses is empty"));
        }
        if let Some((check, _)) = self.checks.iter().find(|(_, statuses)| statuses.is_empty()) {
            return Err(invalid(&format!("check \"{check}\" lists no statuses")));
        }
        Ok(())
    }
}

fn default_tick() -> Duration {
    DEFAULT_TICK
}

fn default_threshold_interval() -> Duration {
    DEFAULT_THRESHOLD_INTERVAL
}

fn default_acquire_timeout() -> Duration {
    DEFAULT_ACQUIRE_TIMEOUT
}

fn default_time_unit() -> Duration {
    DEFAULT_TIME_UNIT
}

fn default_graceful_stop() -> Duration {
    DEFAULT_GRACEFUL_STOP
}

fn default_exec() -> String {
    DEFAULT_EXEC.to_string()
}

fn default_method() -> String {
    "GET".to_string()
}
