//! Run entry point: configuration in, report out.
use crate::collector::MetricsCollector;
use crate::dispatcher::{DispatchSettings, Dispatcher, ScenarioStatus};
use crate::scenario::{Exec, ExecError, ExecRegistry, SetupData};
use crate::threshold::ThresholdEvaluator;
use crate::ticker::Ticker;
use arc_swap::ArcSwap;
use barrage_core::{ConfigError, RunConfig, RunReport, ScenarioReport};
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};
use uuid::Uuid;

/// Builder for a run. Nothing starts until [`RunState::run`].
///
/// ```no_run
/// use barrage::prelude::*;
/// use std::time::Duration;
///
/// # async fn demo() -> Result<(), ConfigError> {
/// let config = RunConfig::new()
///     .scenario(
///         "smoke",
///         ScenarioConfig::arrival_rate().stage(10., Duration::from_secs(30)),
///     )
///     .threshold("http_req_failed", ThresholdSpec::One("rate<0.01".into()));
///
/// let report = Runner::new(config)
///     .exec("default", exec_fn(|_| async { Ok::<(), ExecError>(()) }))
///     .prepare()?
///     .run()
///     .await;
/// assert!(report.passed());
/// # Ok(())
/// # }
/// ```
pub struct Runner {
    config: RunConfig,
    registry: ExecRegistry,
    setup: Option<SetupFn>,
}

type SetupFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<SetupData, ExecError>> + Send>;

impl Runner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            registry: ExecRegistry::new(),
            setup: None,
        }
    }

    /// Runs once before any scenario starts. Its result reaches every iteration through
    /// [`ExecContext::setup_data`](crate::scenario::ExecContext::setup_data); if it fails, no
    /// scenario starts and the run is aborted.
    pub fn setup<F, Fut, T>(mut self, setup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ExecError>> + Send + 'static,
        T: Any + Send + Sync,
    {
        self.setup = Some(Box::new(move || {
            async move { setup().await.map(|data| Arc::new(data) as SetupData) }.boxed()
        }));
        self
    }

    pub fn exec<E: Exec>(mut self, name: &str, exec: E) -> Self {
        self.registry.insert(name, Arc::new(exec));
        self
    }

    pub fn registry(mut self, registry: ExecRegistry) -> Self {
        for name in registry.names() {
            if let Some(exec) = registry.get(name) {
                self.registry.insert(name, exec);
            }
        }
        self
    }

    /// Performs every configuration-time check and builds the run.
    pub fn prepare(self) -> Result<RunState, ConfigError> {
        let config = self.config;
        config.validate()?;
        let evaluator = ThresholdEvaluator::new(config.threshold_rules()?);

        let mut prepared = vec![];
        let mut tags = BTreeMap::new();
        for (name, scenario) in &config.scenarios {
            let exec = self
                .registry
                .get(&scenario.exec)
                .ok_or_else(|| ConfigError::UnknownExec {
                    scenario: name.clone(),
                    exec: scenario.exec.clone(),
                })?;

            let scenario = match config.duration_override {
                Some(duration) => scenario.clone().with_duration(duration).map_err(|source| {
                    ConfigError::InvalidRamp {
                        scenario: name.clone(),
                        source,
                    }
                })?,
                None => scenario.clone(),
            };

            tags.insert(name.clone(), scenario.selector_tags(name));
            prepared.push((name, scenario, exec));
        }

        let collector = Arc::new(MetricsCollector::new(tags, evaluator.selectors()));
        let settings = DispatchSettings {
            tick: config.tick,
            acquire_timeout: config.acquire_timeout,
        };
        let dispatchers = prepared
            .into_iter()
            .map(|(name, scenario, exec)| {
                Dispatcher::new(name, &scenario, exec, collector.clone(), settings)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RunState {
            run_id: Uuid::new_v4(),
            setup: self.setup,
            dispatchers,
            collector,
            evaluator: Arc::new(evaluator),
            cancel: CancellationToken::new(),
            threshold_interval: config.threshold_interval,
        })
    }
}

/// A prepared run: its scenarios, their shared collector and the threshold rules.
pub struct RunState {
    run_id: Uuid,
    setup: Option<SetupFn>,
    dispatchers: Vec<Dispatcher>,
    collector: Arc<MetricsCollector>,
    evaluator: Arc<ThresholdEvaluator>,
    cancel: CancellationToken,
    threshold_interval: Duration,
}

impl fmt::Debug for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunState")
            .field("run_id", &self.run_id)
            .field(
                "scenarios",
                &self.dispatchers.iter().map(|d| d.name()).collect::<Vec<_>>(),
            )
            .field("rules", &self.evaluator.rules().len())
            .field("setup", &self.setup.is_some())
            .finish()
    }
}

impl RunState {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Cancelling this token ends the run early. The report is then marked aborted.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn statuses(&self) -> Vec<(String, Arc<ArcSwap<ScenarioStatus>>)> {
        self.dispatchers
            .iter()
            .map(|d| (d.name().to_string(), d.status()))
            .collect()
    }

    #[instrument(name = "run", skip_all, fields(run_id = %self.run_id))]
    pub async fn run(self) -> RunReport {
        let RunState {
            run_id,
            setup,
            mut dispatchers,
            collector,
            evaluator,
            cancel,
            threshold_interval,
        } = self;

        info!(
            "Starting run {run_id} with {} scenarios and {} thresholds.",
            dispatchers.len(),
            evaluator.rules().len()
        );
        if let Some(setup) = setup {
            debug!("Running setup.");
            match setup().await {
                Ok(data) => {
                    for dispatcher in &mut dispatchers {
                        dispatcher.set_setup(data.clone());
                    }
                }
                Err(err) => {
                    error!("Setup failed: {err}; no scenario will start.");
                    let scenarios = dispatchers
                        .iter()
                        .map(|d| (d.name().to_string(), ScenarioReport::default()))
                        .collect();
                    return RunReport {
                        run_id: run_id.to_string(),
                        elapsed: Duration::ZERO,
                        aborted: true,
                        scenarios,
                        thresholds: evaluator.evaluate(&collector),
                    };
                }
            }
        }

        let started = Instant::now();
        collector.start_clock();
        let aborted = Arc::new(AtomicBool::new(false));

        let monitor = Monitor {
            statuses: dispatchers
                .iter()
                .map(|d| (d.name().to_string(), d.status()))
                .collect(),
            evaluator: evaluator.clone(),
            collector: collector.clone(),
            interval: threshold_interval,
            aborted: aborted.clone(),
            cancel: cancel.clone(),
        };
        let monitor_done = CancellationToken::new();
        let monitor_handle =
            tokio::spawn(monitor.run(started, monitor_done.clone()).in_current_span());

        let (names, handles): (Vec<_>, Vec<_>) = dispatchers
            .into_iter()
            .map(|dispatcher| {
                let name = dispatcher.name().to_string();
                (name, tokio::spawn(dispatcher.run(cancel.child_token())))
            })
            .unzip();
        let results = join_all(handles).await;

        monitor_done.cancel();
        if let Err(err) = monitor_handle.await {
            error!("Threshold monitor failed: {err}");
        }

        let mut scenarios = BTreeMap::new();
        for (name, result) in names.into_iter().zip(results) {
            let dispatch = result.unwrap_or_else(|err| {
                error!("Scenario {name} failed to complete: {err}");
                Default::default()
            });
            let (requests, iterations) = collector.scenario_summary(&name).unwrap_or_default();
            let checks = collector.check_summary(&name).unwrap_or_default();
            scenarios.insert(
                name,
                ScenarioReport {
                    dispatch,
                    requests,
                    iterations,
                    checks,
                },
            );
        }

        let thresholds = evaluator.evaluate(&collector);
        let aborted = aborted.load(Ordering::SeqCst) || cancel.is_cancelled();
        let report = RunReport {
            run_id: run_id.to_string(),
            elapsed: started.elapsed(),
            aborted,
            scenarios,
            thresholds,
        };

        info!(
            "Run {run_id} finished in {}: {} of {} thresholds passed{}.",
            humantime::format_duration(Duration::from_millis(report.elapsed.as_millis() as u64)),
            report.thresholds.iter().filter(|t| t.passed).count(),
            report.thresholds.len(),
            if aborted { ", aborted" } else { "" }
        );
        report
    }
}

/// Periodic status logging and fatal-threshold checks while scenarios run.
struct Monitor {
    statuses: Vec<(String, Arc<ArcSwap<ScenarioStatus>>)>,
    evaluator: Arc<ThresholdEvaluator>,
    collector: Arc<MetricsCollector>,
    interval: Duration,
    aborted: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Monitor {
    async fn run(self, started: Instant, done: CancellationToken) {
        let mut ticker = Ticker::new(self.interval).await;
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = ticker.tick() => {}
            }

            for (name, status) in &self.statuses {
                let status = status.load();
                info!(
                    scenario = %name,
                    phase = ?status.phase,
                    target = status.target,
                    active = status.active_workers,
                    attempted = status.dispatch.attempted,
                    dropped = status.dispatch.dropped,
                    "status"
                );
            }

            if !self.evaluator.has_fatal() {
                continue;
            }
            if let Some(outcome) = self.evaluator.check_abort(&self.collector, started.elapsed()) {
                error!(
                    "Threshold {} failed (observed {:?}); aborting run.",
                    outcome.rule, outcome.observed
                );
                self.aborted.store(true, Ordering::SeqCst);
                self.cancel.cancel();
                break;
            }
        }
    }
}
