//! Per-scenario dispatch: turns a ramp into work on the worker pool.
use crate::collector::MetricsCollector;
use crate::pool::{PoolExhaustedError, WorkerPool};
use crate::scenario::{Exec, SetupData};
use crate::worker::Worker;
use arc_swap::ArcSwap;
use barrage_core::{ConfigError, DispatchStats, ExecutorKind, Ramp, ScenarioConfig};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};

mod arrival_rate;
mod concurrency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting out the scenario's start delay.
    Pending,
    Ramping,
    Steady,
    Draining,
    Done,
}

/// Snapshot of a running scenario, published on every tick.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScenarioStatus {
    pub phase: Phase,
    /// Current ramp value: arrivals per time unit, or concurrent workers.
    pub target: f64,
    pub active_workers: usize,
    pub dispatch: DispatchStats,
    #[serde(with = "barrage_core::duration")]
    pub elapsed: Duration,
}

impl ScenarioStatus {
    fn pending() -> Self {
        Self {
            phase: Phase::Pending,
            target: 0.,
            active_workers: 0,
            dispatch: DispatchStats::default(),
            elapsed: Duration::ZERO,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("arrival dropped for scenario {scenario}: {source}")]
pub struct DroppedArrivalError {
    pub scenario: String,
    #[source]
    pub source: PoolExhaustedError,
}

#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
    attempted: AtomicU64,
    completed: AtomicU64,
    dropped: AtomicU64,
    interrupted: AtomicU64,
    peak_workers: AtomicUsize,
}

impl DispatchCounters {
    /// Returns the sequence number of the new attempt.
    pub fn attempt(&self) -> u64 {
        self.attempted.fetch_add(1, Ordering::Relaxed)
    }

    pub fn completed(&self, interrupted: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if interrupted {
            self.interrupted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_busy(&self, busy: usize) {
        self.peak_workers.fetch_max(busy, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            attempted: self.attempted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            peak_workers: self.peak_workers.load(Ordering::Relaxed),
        }
    }
}

/// Engine-wide dispatch settings shared by every scenario of a run.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub tick: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            tick: barrage_core::DEFAULT_TICK,
            acquire_timeout: barrage_core::DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

pub struct Dispatcher {
    name: Arc<str>,
    executor: ExecutorKind,
    ramp: Ramp,
    time_unit: Duration,
    pause: Duration,
    start_time: Duration,
    graceful_stop: Duration,
    settings: DispatchSettings,
    pool: WorkerPool,
    worker: Worker,
    counters: Arc<DispatchCounters>,
    status: Arc<ArcSwap<ScenarioStatus>>,
}

impl Dispatcher {
    pub fn new(
        name: &str,
        config: &ScenarioConfig,
        exec: Arc<dyn Exec>,
        collector: Arc<MetricsCollector>,
        settings: DispatchSettings,
    ) -> Result<Self, ConfigError> {
        config.validate(name)?;
        let ramp = config.ramp().map_err(|source| ConfigError::InvalidRamp {
            scenario: name.to_string(),
            source,
        })?;
        let pool = WorkerPool::new(config.pool_size(&ramp));
        let name: Arc<str> = Arc::from(name);
        let counters = Arc::new(DispatchCounters::default());

        Ok(Self {
            worker: Worker::new(name.clone(), exec, collector, counters.clone()),
            name,
            executor: config.executor,
            ramp,
            time_unit: config.time_unit,
            pause: config.pause,
            start_time: config.start_time,
            graceful_stop: config.graceful_stop,
            settings,
            pool,
            counters,
            status: Arc::new(ArcSwap::from_pointee(ScenarioStatus::pending())),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hands the run's setup data to every iteration of this scenario.
    pub fn set_setup(&mut self, setup: SetupData) {
        self.worker.set_setup(setup);
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Live status, updated by the dispatch loop.
    pub fn status(&self) -> Arc<ArcSwap<ScenarioStatus>> {
        self.status.clone()
    }

    /// Runs the scenario to completion, or until `stop` is cancelled, then drains.
    #[instrument(name = "scenario", skip_all, fields(scenario = %self.name))]
    pub async fn run(self, stop: CancellationToken) -> DispatchStats {
        if !self.start_time.is_zero() {
            debug!(
                "Delaying start by {}.",
                humantime::format_duration(self.start_time)
            );
            tokio::select! {
                _ = stop.cancelled() => {
                    info!("Scenario {} cancelled before starting.", self.name);
                    self.publish(Phase::Done, 0., 0, Duration::ZERO);
                    return self.counters.snapshot();
                }
                _ = tokio::time::sleep(self.start_time) => {}
            }
        }

        info!(
            "Scenario {} starting: {:?} for {} with {} workers.",
            self.name,
            self.executor,
            humantime::format_duration(self.ramp.total_duration()),
            self.pool.capacity()
        );

        let started = Instant::now();
        match self.executor {
            ExecutorKind::ArrivalRate => self.run_arrival_rate(&stop, started).await,
            ExecutorKind::FixedConcurrency => self.run_fixed_concurrency(&stop, started).await,
        }
        self.pool.close();

        let stats = self.counters.snapshot();
        self.publish(Phase::Done, 0., 0, started.elapsed());
        info!(
            "Scenario {} done: {} attempted, {} completed, {} dropped, {} interrupted.",
            self.name, stats.attempted, stats.completed, stats.dropped, stats.interrupted
        );
        stats
    }

    fn phase_at(&self, elapsed: Duration) -> Phase {
        match self.ramp.segment_at(elapsed) {
            Some(segment) if !segment.is_flat() => Phase::Ramping,
            _ => Phase::Steady,
        }
    }

    fn publish(&self, phase: Phase, target: f64, active_workers: usize, elapsed: Duration) {
        self.status.store(Arc::new(ScenarioStatus {
            phase,
            target,
            active_workers,
            dispatch: self.counters.snapshot(),
            elapsed,
        }));
    }

    /// Waits up to `graceful_stop` for in-flight work, then aborts whatever is left.
    async fn drain(&self, tasks: &mut JoinSet<()>, started: Instant) {
        self.publish(Phase::Draining, 0., self.pool.busy(), started.elapsed());
        if tasks.is_empty() {
            return;
        }

        debug!("Draining {} in-flight tasks.", tasks.len());
        let waited = tokio::time::timeout(self.graceful_stop, async {
            while let Some(res) = tasks.join_next().await {
                if let Err(err) = res {
                    if err.is_panic() {
                        error!("Worker task of {} panicked: {err}", self.name);
                    }
                }
            }
        })
        .await;

        if waited.is_err() {
            warn!(
                "{} tasks of {} still running after {}; aborting.",
                tasks.len(),
                self.name,
                humantime::format_duration(self.graceful_stop)
            );
            tasks.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{exec_fn, ExecError};
    use barrage_core::MetricName;
    use std::time::Duration;

    pub(super) fn sleeper(latency: Duration) -> Arc<dyn Exec> {
        Arc::new(exec_fn(move |_| async move {
            tokio::time::sleep(latency).await;
            Ok::<(), ExecError>(())
        }))
    }

    pub(super) fn dispatcher(
        config: &ScenarioConfig,
        exec: Arc<dyn Exec>,
    ) -> (Dispatcher, Arc<MetricsCollector>) {
        let collector = Arc::new(MetricsCollector::for_scenarios(["s"], [vec![]]));
        let dispatcher = Dispatcher::new(
            "s",
            config,
            exec,
            collector.clone(),
            DispatchSettings::default(),
        )
        .unwrap();
        (dispatcher, collector)
    }

    #[tokio::test(start_paused = true)]
    async fn start_time_is_honoured() {
        let config = ScenarioConfig::arrival_rate()
            .stage(10., Duration::from_secs(1))
            .preallocated_workers(5);
        let config = ScenarioConfig {
            start_time: Duration::from_secs(5),
            ..config
        };
        let (dispatcher, _) = dispatcher(&config, sleeper(Duration::from_millis(10)));
        let status = dispatcher.status();

        let handle = tokio::spawn(dispatcher.run(CancellationToken::new()));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(status.load().phase, Phase::Pending);

        let stats = handle.await.unwrap();
        assert_eq!(status.load().phase, Phase::Done);
        assert!(stats.attempted >= 9, "{stats:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start() {
        let config = ScenarioConfig {
            start_time: Duration::from_secs(60),
            ..ScenarioConfig::arrival_rate().stage(10., Duration::from_secs(1))
        };
        let (dispatcher, collector) = dispatcher(&config, sleeper(Duration::from_millis(10)));
        let stop = CancellationToken::new();
        let handle = tokio::spawn(dispatcher.run(stop.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats, DispatchStats::default());
        assert_eq!(
            collector.observe(MetricName::Iterations, &[], barrage_core::Aggregation::Count),
            Some(0.)
        );
    }

    #[test]
    fn rejects_invalid_config() {
        let config = ScenarioConfig::fixed_concurrency()
            .stage(10., Duration::from_secs(1))
            .preallocated_workers(2);
        let collector = Arc::new(MetricsCollector::for_scenarios(["s"], [vec![]]));
        let res = Dispatcher::new(
            "s",
            &config,
            sleeper(Duration::ZERO),
            collector,
            DispatchSettings::default(),
        );
        assert!(matches!(res, Err(ConfigError::InsufficientWorkers { .. })));
    }
}
