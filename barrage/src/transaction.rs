use crate::collector::MetricsCollector;
use crate::sample::{ErrorTag, Outcome, Sample};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Time a fallible future and record it as a request sample of the running scenario.
///
/// Outside of a worker the future still runs, but nothing is recorded.
pub async fn transaction<T, R, E>(func: T) -> T::Output
where
    T: Future<Output = Result<R, E>>,
{
    let start = Instant::now();
    let res = func.await;
    let outcome = match res {
        Ok(_) => Outcome::OK,
        Err(_) => Outcome::Failure(ErrorTag::Exec),
    };
    record_request(start.elapsed(), outcome);
    res
}

/// Record a request sample against the scenario whose worker is running the current task.
pub fn record_request(latency: Duration, outcome: Outcome) {
    if TRANSACTION_HOOK
        .try_with(|hook| hook.record(latency, outcome))
        .is_err()
    {
        tracing::warn!("No transaction hook available; request sample discarded.");
    }
}

/// Record a named check against the running scenario and return `passed`.
///
/// A failed check shows up in the `checks` metric only; it neither fails the iteration nor
/// counts as a failed request.
pub fn check(name: &str, passed: bool) -> bool {
    if TRANSACTION_HOOK
        .try_with(|hook| hook.collector.record_check(&hook.scenario, name, passed))
        .is_err()
    {
        tracing::warn!("No transaction hook available; check {name} discarded.");
    }
    passed
}

#[derive(Clone)]
pub(crate) struct TransactionData {
    pub scenario: Arc<str>,
    pub collector: Arc<MetricsCollector>,
}

impl TransactionData {
    fn record(&self, latency: Duration, outcome: Outcome) {
        self.collector.record(Sample::request(
            self.scenario.clone(),
            self.collector.elapsed(),
            latency,
            outcome,
        ));
    }
}

tokio::task_local! {
    pub(crate) static TRANSACTION_HOOK: TransactionData;
}

#[cfg(test)]
mod tests {
    use super::*;
    use barrage_core::{Aggregation, MetricName};

    #[tokio::test]
    async fn records_within_hook_scope() {
        let collector = Arc::new(MetricsCollector::for_scenarios(["s"], [vec![]]));
        let data = TransactionData {
            scenario: Arc::from("s"),
            collector: collector.clone(),
        };

        TRANSACTION_HOOK
            .scope(data, async {
                let _ = transaction(async { Ok::<_, ()>(()) }).await;
                let _ = transaction(async { Err::<(), _>("boom") }).await;
            })
            .await;

        assert_eq!(
            collector.observe(MetricName::HttpReqs, &[], Aggregation::Count),
            Some(2.)
        );
        assert_eq!(
            collector.observe(MetricName::HttpReqFailed, &[], Aggregation::Rate),
            Some(0.5)
        );
    }

    #[tokio::test]
    async fn failed_checks_do_not_fail_requests() {
        let collector = Arc::new(MetricsCollector::for_scenarios(["s"], [vec![]]));
        let data = TransactionData {
            scenario: Arc::from("s"),
            collector: collector.clone(),
        };

        TRANSACTION_HOOK
            .scope(data, async {
                let _ = transaction(async { Ok::<_, ()>(()) }).await;
                assert!(check("status is 200", true));
                assert!(!check("status is 200", false));
                assert!(check("body is json", true));
                assert!(check("body is json", true));
            })
            .await;

        assert_eq!(
            collector.observe(MetricName::Checks, &[], Aggregation::Rate),
            Some(0.75)
        );
        assert_eq!(
            collector.observe(MetricName::HttpReqFailed, &[], Aggregation::Rate),
            Some(0.)
        );
        let checks = collector.check_summary("s").unwrap();
        assert_eq!(checks.passed, 3);
        assert_eq!(checks.failures.get("status is 200"), Some(&1));
    }

    #[tokio::test]
    async fn runs_without_hook() {
        let res = transaction(async { Ok::<_, ()>(7) }).await;
        assert_eq!(res, Ok(7));
    }
}
