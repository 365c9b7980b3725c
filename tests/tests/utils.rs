use barrage::prelude::*;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[allow(unused)]
pub const MOCK: &str = "http://0.0.0.0:3002";

#[allow(unused)]
pub async fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
            std::process::exit(1);
        }));

        let _ = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_env_filter("barrage=debug,mock_service=info")
            .try_init();

        PrometheusBuilder::new()
            .with_http_listener("0.0.0.0:8002".parse::<SocketAddr>().unwrap())
            .install()
            .unwrap();

        // Each #[tokio::test] owns a runtime that is torn down when the test ends; the mock
        // service lives on its own thread and runtime so later tests can still reach it.
        std::thread::Builder::new()
            .name("mock-service".into())
            .spawn(|| {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                let addr: SocketAddr = "0.0.0.0:3002".parse().unwrap();
                if let Err(err) = runtime.block_on(mock_service::run(addr)) {
                    error!("Mock service stopped: {err}");
                }
            })
            .unwrap();
    });

    wait_for_mock().await;
}

/// Blocks until the mock service accepts connections.
async fn wait_for_mock() {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect("127.0.0.1:3002").await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("mock service did not come up on port 3002");
}

/// Whether the mock service still answers on this test's runtime.
#[allow(unused)]
pub async fn mock_alive() -> bool {
    reqwest::get(format!("{MOCK}/status/200")).await.is_ok()
}

/// GET probe against a mock-service path.
#[allow(unused)]
pub fn probe(name: &str, path: &str) -> HttpProbe<ReqwestClient> {
    HttpProbe::from_config(
        name,
        &HttpProbeConfig::get(&format!("{MOCK}{path}")),
        ReqwestClient::new(Some(Duration::from_secs(5))).unwrap(),
    )
    .unwrap()
}
