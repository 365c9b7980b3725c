mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;

    use barrage::core::{Aggregation, MetricName};
    use barrage::prelude::*;
    use std::time::Duration;

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn steady_rate_against_delay_endpoint() {
        init().await;

        let config = RunConfig::new()
            .scenario(
                "steady",
                ScenarioConfig::arrival_rate()
                    .exec("delay")
                    .stage(200., Duration::from_secs(10))
                    .preallocated_workers(50),
            )
            .threshold("http_req_failed", ThresholdSpec::One("rate<0.01".into()))
            .threshold("http_req_duration", ThresholdSpec::One("p(95)<250".into()));

        let report = Runner::new(config)
            .exec("delay", probe("delay", "/delay/ms/10"))
            .prepare()
            .unwrap()
            .run()
            .await;

        let stats = report.scenarios["steady"].dispatch;
        assert!((1_950..=2_050).contains(&stats.attempted), "{stats:?}");
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.attempted, stats.completed + stats.dropped);
        assert!(report.passed(), "{:?}", report.thresholds);
    }

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn saturated_pool_drops_arrivals() {
        init().await;

        // The endpoint admits 50 TPS and queues the rest, so ten workers cannot keep up with 200/s.
        let config = RunConfig::new()
            .scenario(
                "saturated",
                ScenarioConfig::arrival_rate()
                    .exec("limited")
                    .stage(200., Duration::from_secs(5))
                    .preallocated_workers(10)
                    .graceful_stop(Duration::from_secs(5)),
            )
            .threshold("dropped_iterations", ThresholdSpec::One("count<10".into()));

        let state = Runner::new(config)
            .exec("limited", probe("limited", "/limited/50/delay/ms/0/server/saturated"))
            .prepare()
            .unwrap();
        let collector = state.collector();
        let report = state.run().await;

        let stats = report.scenarios["saturated"].dispatch;
        assert!(stats.dropped > 500, "{stats:?}");
        assert!(stats.completed < 400, "{stats:?}");
        assert_eq!(stats.attempted, stats.completed + stats.dropped);
        assert_eq!(stats.peak_workers, 10);
        assert_eq!(
            collector.observe(MetricName::DroppedIterations, &[], Aggregation::Count),
            Some(stats.dropped as f64)
        );
        assert!(!report.passed());
    }

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn injected_errors_fail_rate_threshold() {
        init().await;

        let config = RunConfig::new()
            .scenario(
                "flaky",
                ScenarioConfig::arrival_rate()
                    .exec("flaky")
                    .stage(100., Duration::from_secs(5))
                    .preallocated_workers(20),
            )
            .threshold("http_req_failed", ThresholdSpec::One("rate<0.01".into()));

        let report = Runner::new(config)
            .exec("flaky", probe("flaky", "/error/20/delay/ms/1"))
            .prepare()
            .unwrap()
            .run()
            .await;

        let outcome = &report.thresholds[0];
        assert!(!outcome.passed);
        let observed = outcome.observed.unwrap();
        assert!((0.1..0.3).contains(&observed), "{observed}");

        let requests = &report.scenarios["flaky"].requests;
        assert!(requests.errors["http_status_500"] > 0);
    }
}
