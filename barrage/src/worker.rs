use crate::collector::MetricsCollector;
use crate::dispatcher::DispatchCounters;
use crate::sample::{ErrorTag, Outcome, Sample};
use crate::scenario::{Exec, ExecContext, SetupData};
use crate::transaction::{TransactionData, TRANSACTION_HOOK};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Runs iterations of one scenario's exec function and accounts for them.
#[derive(Clone)]
pub(crate) struct Worker {
    scenario: Arc<str>,
    exec: Arc<dyn Exec>,
    collector: Arc<MetricsCollector>,
    counters: Arc<DispatchCounters>,
    setup: Option<SetupData>,
}

impl Worker {
    pub fn new(
        scenario: Arc<str>,
        exec: Arc<dyn Exec>,
        collector: Arc<MetricsCollector>,
        counters: Arc<DispatchCounters>,
    ) -> Self {
        Self {
            scenario,
            exec,
            collector,
            counters,
            setup: None,
        }
    }

    pub fn set_setup(&mut self, setup: SetupData) {
        self.setup = Some(setup);
    }

    /// Counts a new attempted iteration. The returned guard records it exactly once.
    pub fn arrive(&self) -> IterationGuard {
        IterationGuard {
            iteration: self.counters.attempt(),
            started: Instant::now(),
            scenario: self.scenario.clone(),
            collector: self.collector.clone(),
            counters: self.counters.clone(),
            settled: false,
        }
    }

    /// Counts an attempted iteration that never got a worker.
    pub fn reject(&self, tag: ErrorTag) {
        self.counters.attempt();
        self.counters.dropped();
        self.collector.record_dropped(&self.scenario, tag);
    }

    pub fn note_busy(&self, busy: usize) {
        self.counters.note_busy(busy);
    }

    pub async fn run(&self, guard: IterationGuard, worker_id: usize) {
        let ctx = ExecContext {
            scenario: self.scenario.clone(),
            worker_id,
            iteration: guard.iteration,
            setup: self.setup.clone(),
        };
        let hook = TransactionData {
            scenario: self.scenario.clone(),
            collector: self.collector.clone(),
        };

        let res = TRANSACTION_HOOK
            .scope(hook, AssertUnwindSafe(self.exec.exec(ctx)).catch_unwind())
            .await;

        let outcome = match res {
            Ok(Ok(())) => Outcome::OK,
            Ok(Err(err)) => {
                trace!("Iteration {} of {} failed: {err}", guard.iteration, self.scenario);
                Outcome::Failure(err.tag())
            }
            Err(panic) => {
                error!(
                    "Exec function of {} panicked: {}",
                    self.scenario,
                    panic_message(&*panic)
                );
                Outcome::Failure(ErrorTag::Panic)
            }
        };
        guard.finish(outcome);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "<non-string panic payload>"
    }
}

/// One attempted iteration. Dropped without [`IterationGuard::finish`], it records the iteration
/// as interrupted.
pub(crate) struct IterationGuard {
    iteration: u64,
    started: Instant,
    scenario: Arc<str>,
    collector: Arc<MetricsCollector>,
    counters: Arc<DispatchCounters>,
    settled: bool,
}

impl IterationGuard {
    pub fn finish(mut self, outcome: Outcome) {
        self.settle(outcome);
    }

    fn settle(&mut self, outcome: Outcome) {
        if self.settled {
            return;
        }
        self.settled = true;

        let interrupted = outcome == Outcome::Failure(ErrorTag::Interrupted);
        self.counters.completed(interrupted);
        self.collector.record(Sample::iteration(
            self.scenario.clone(),
            self.collector.elapsed(),
            self.started.elapsed(),
            outcome,
        ));
    }
}

impl Drop for IterationGuard {
    fn drop(&mut self) {
        self.settle(Outcome::Failure(ErrorTag::Interrupted));
    }
}
