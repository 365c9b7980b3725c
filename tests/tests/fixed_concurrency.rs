mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;

    use barrage::prelude::*;
    use barrage::transaction::transaction;
    use reqwest::Client;
    use std::sync::OnceLock;
    use std::time::Duration;

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn workers_loop_against_delay_endpoint() {
        init().await;

        let config = RunConfig::new().scenario(
            "loop",
            ScenarioConfig::fixed_concurrency()
                .exec("delay")
                .stage(5., Duration::from_secs(5)),
        );

        let report = Runner::new(config)
            .exec("delay", probe("delay", "/delay/ms/50"))
            .prepare()
            .unwrap()
            .run()
            .await;

        let stats = report.scenarios["loop"].dispatch;
        // Five workers at roughly 20 iterations a second each.
        assert!((300..=505).contains(&stats.completed), "{stats:?}");
        assert_eq!(stats.peak_workers, 5);
        assert_eq!(stats.dropped, 0);
        assert!(report.passed());
    }

    static CLIENT: OnceLock<Client> = OnceLock::new();

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn closure_exec_records_transactions() {
        init().await;

        let exec = exec_fn(|_ctx: ExecContext| async move {
            let client = CLIENT.get_or_init(Client::new);
            transaction(async {
                client
                    .get(format!("{MOCK}/delay/ms/5"))
                    .send()
                    .await?
                    .error_for_status()
            })
            .await
            .map_err(|e| ExecError::msg(e.to_string()))?;
            Ok::<(), ExecError>(())
        });

        let config = RunConfig::new()
            .scenario(
                "closure",
                ScenarioConfig::fixed_concurrency()
                    .stage(2., Duration::from_secs(3))
                    .pause(Duration::from_millis(100)),
            )
            .threshold("http_reqs", ThresholdSpec::One("count>20".into()))
            .threshold("http_req_failed", ThresholdSpec::One("rate==0".into()));

        let report = Runner::new(config)
            .exec("default", exec)
            .prepare()
            .unwrap()
            .run()
            .await;

        let scenario = &report.scenarios["closure"];
        assert_eq!(scenario.requests.total, scenario.iterations.total);
        assert!(report.passed(), "{:?}", report.thresholds);
    }

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn fatal_threshold_aborts_run() {
        init().await;

        let mut config = RunConfig::new()
            .scenario(
                "broken",
                ScenarioConfig::fixed_concurrency()
                    .exec("broken")
                    .stage(2., Duration::from_secs(120))
                    .pause(Duration::from_millis(50)),
            )
            .threshold("http_req_failed", ThresholdSpec::One("rate<0.5".into()));
        config.abort_on_fail = true;
        config.threshold_interval = Duration::from_millis(500);

        let report = Runner::new(config)
            .exec("broken", probe("broken", "/status/503"))
            .prepare()
            .unwrap()
            .run()
            .await;

        assert!(report.aborted);
        assert!(report.elapsed < Duration::from_secs(10));
        assert_eq!(report.thresholds[0].observed, Some(1.));
    }
}
