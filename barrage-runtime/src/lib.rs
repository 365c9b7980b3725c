//! Command line front end: loads a run configuration from disk, turns its declarative HTTP probes
//! into exec functions, runs it and reports the outcome as a process exit code.
pub mod error;
pub mod report;

use crate::error::RuntimeError;
use crate::report::{JsonExporter, Reporter, TextReporter};
use barrage::core::{RunConfig, RunReport};
use barrage::http::{HttpProbe, ReqwestClient};
use barrage::scenario::ExecRegistry;
use barrage::{RunState, Runner};
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn, Instrument};

/// Every threshold passed.
pub const EXIT_PASSED: u8 = 0;
/// A threshold failed or the run was aborted.
pub const EXIT_FAILED: u8 = 1;
/// The run never started.
pub const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "barrage", version, about = "Ramped load tests with pass/fail thresholds")]
pub struct Cli {
    /// Log filter, in `tracing_subscriber::EnvFilter` syntax.
    #[arg(long, global = true, default_value = "barrage=info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the load test described by a configuration file.
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// A `.json` or `.toml` run configuration.
    pub config: PathBuf,

    /// Replace every scenario's duration, e.g. `30s` or `2m`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub duration_override: Option<Duration>,

    /// Stop the run as soon as any threshold fails.
    #[arg(long)]
    pub abort_on_fail: bool,

    /// Also write the run report as JSON to this path.
    #[arg(long)]
    pub summary_export: Option<PathBuf>,

    /// Serve Prometheus metrics on this address while the run is in progress.
    #[arg(long)]
    pub prometheus: Option<SocketAddr>,
}

/// Read a run configuration, picking the format from the file extension.
pub fn load_config(path: &Path) -> Result<RunConfig, RuntimeError> {
    enum Format {
        Json,
        Toml,
    }

    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Format::Json,
        Some("toml") => Format::Toml,
        _ => return Err(RuntimeError::UnsupportedFormat(path.to_path_buf())),
    };

    let raw = std::fs::read_to_string(path).map_err(|source| RuntimeError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed = match format {
        Format::Json => serde_json::from_str(&raw).map_err(|e| e.to_string()),
        Format::Toml => toml::from_str(&raw).map_err(|e| e.to_string()),
    };
    parsed.map_err(|reason| RuntimeError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

/// One `HttpProbe` per configured exec, each with its own client so per-probe timeouts apply.
pub fn build_registry(config: &RunConfig) -> Result<ExecRegistry, RuntimeError> {
    let mut registry = ExecRegistry::new();
    for (name, probe) in &config.execs {
        let client = ReqwestClient::new(probe.timeout).map_err(|source| RuntimeError::Client {
            exec: name.clone(),
            source,
        })?;
        let probe = HttpProbe::from_config(name, probe, client)?;
        debug!("Registered HTTP probe {name}.");
        registry.insert(name, Arc::new(probe));
    }
    Ok(registry)
}

/// Load, override and validate. Nothing has been started when this returns.
pub fn prepare(args: &RunArgs) -> Result<RunState, RuntimeError> {
    let mut config = load_config(&args.config)?;
    if let Some(duration) = args.duration_override {
        config.duration_override = Some(duration);
    }
    if args.abort_on_fail {
        config.abort_on_fail = true;
    }

    let registry = build_registry(&config)?;
    Ok(Runner::new(config).registry(registry).prepare()?)
}

/// Run to completion. `shutdown` resolving cancels the run, which then drains and reports as
/// aborted.
pub async fn execute<F>(args: &RunArgs, shutdown: F) -> Result<RunReport, RuntimeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Some(addr) = args.prometheus {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| RuntimeError::Prometheus(e.to_string()))?;
        info!("Serving Prometheus metrics on {addr}.");
    }

    let state = prepare(args)?;
    info!(
        "Starting run {} from {}.",
        state.run_id(),
        args.config.display()
    );

    let token = state.cancellation_token();
    let watcher = tokio::spawn(
        async move {
            shutdown.await;
            warn!("Shutdown requested; stopping run.");
            token.cancel();
        }
        .in_current_span(),
    );

    let report = state.run().await;
    watcher.abort();

    Ok(report)
}

pub fn exit_code(report: &RunReport) -> u8 {
    if report.passed() {
        EXIT_PASSED
    } else {
        EXIT_FAILED
    }
}

/// Entry point of `barrage run`: runs until done or Ctrl-C, prints the summary and returns the
/// process exit code.
pub async fn run(args: RunArgs) -> u8 {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    let report = match execute(&args, ctrl_c).await {
        Ok(report) => report,
        Err(err) => {
            error!("{err}");
            eprintln!("error: {err}");
            return err.exit_code();
        }
    };

    let mut reporters: Vec<Box<dyn Reporter>> =
        vec![Box::new(TextReporter::new(std::io::stdout()))];
    if let Some(path) = &args.summary_export {
        reporters.push(Box::new(JsonExporter::new(path)));
    }
    for reporter in reporters.iter_mut() {
        if let Err(err) = reporter.report(&report) {
            error!("{err}");
            return err.exit_code();
        }
    }

    exit_code(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use barrage::core::ConfigError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn args(path: &Path) -> RunArgs {
        RunArgs {
            config: path.to_path_buf(),
            duration_override: None,
            abort_on_fail: false,
            summary_export: None,
            prometheus: None,
        }
    }

    // Nothing listens on the discard port, so every request fails fast.
    const REFUSED: &str = r#"
        "execs": { "probe": { "url": "http://127.0.0.1:9/" } },
    "#;

    #[test]
    fn parses_run_command() {
        let cli = Cli::try_parse_from([
            "barrage",
            "run",
            "load.json",
            "--duration-override",
            "1m 30s",
            "--abort-on-fail",
            "--summary-export",
            "out.json",
        ])
        .unwrap();

        assert_eq!(cli.log, "barrage=info");
        let Command::Run(args) = cli.command;
        assert_eq!(args.config, PathBuf::from("load.json"));
        assert_eq!(args.duration_override, Some(Duration::from_secs(90)));
        assert!(args.abort_on_fail);
        assert_eq!(args.summary_export, Some(PathBuf::from("out.json")));
        assert_eq!(args.prometheus, None);
    }

    #[test]
    fn rejects_bad_duration_flag() {
        let res = Cli::try_parse_from(["barrage", "run", "x.json", "--duration-override", "soon"]);
        assert!(res.is_err());
    }

    #[test]
    fn loads_json_and_toml() {
        let json = config_file(
            ".json",
            r#"{
                "scenarios": {
                    "load": {
                        "executor": "ramping-arrival-rate",
                        "startRate": 2,
                        "preAllocatedVUs": 20,
                        "stages": [{ "target": 20, "duration": "15s" }]
                    }
                },
                "thresholds": { "http_req_failed": "rate<0.01" }
            }"#,
        );
        let config = load_config(json.path()).unwrap();
        assert_eq!(config.scenarios["load"].preallocated_workers, Some(20));
        assert_eq!(config.thresholds.len(), 1);

        let toml = config_file(
            ".toml",
            r#"
                [scenarios.soak]
                executor = "fixed-concurrency"
                target = 3
                duration = "2m"
                pause = "10s"
            "#,
        );
        let config = load_config(toml.path()).unwrap();
        assert_eq!(config.scenarios["soak"].pause, Duration::from_secs(10));
    }

    #[test]
    fn unreadable_files_are_config_errors() {
        let yaml = config_file(".yaml", "scenarios: {}");
        let err = load_config(yaml.path()).unwrap_err();
        assert!(matches!(err, RuntimeError::UnsupportedFormat(_)));
        assert_eq!(err.exit_code(), EXIT_CONFIG);

        let err = load_config(Path::new("/nonexistent/load.json")).unwrap_err();
        assert!(matches!(err, RuntimeError::Read { .. }));
        assert_eq!(err.exit_code(), EXIT_CONFIG);

        let broken = config_file(".json", "{ \"scenarios\": ");
        let err = load_config(broken.path()).unwrap_err();
        assert!(matches!(err, RuntimeError::Parse { .. }));
        assert_eq!(err.exit_code(), EXIT_CONFIG);
    }

    #[test]
    fn registry_holds_configured_probes() {
        let file = config_file(
            ".json",
            r#"{
                "scenarios": {},
                "execs": {
                    "home": { "url": "https://test-api.k6.io" },
                    "login": { "method": "POST", "url": "https://test-api.k6.io/login", "timeout": "2s" }
                }
            }"#,
        );
        let config = load_config(file.path()).unwrap();
        let registry = build_registry(&config).unwrap();
        assert!(registry.contains("home"));
        assert!(registry.contains("login"));
    }

    #[test]
    fn reference_demo_prepares() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos/load-testing.json");
        let state = prepare(&args(&path)).unwrap();

        let names: Vec<String> = state.statuses().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            ["load_test", "spike_test", "stress_test", "stress_test_vus"]
        );

        // Every scenario shares the exec's think time; the status check stays out of
        // http_req_failed.
        let config = load_config(&path).unwrap();
        let exec = &config.execs["runPerformanceTests"];
        assert_eq!(exec.sleep, Duration::from_secs(10));
        assert_eq!(exec.expected_statuses, None);
        assert_eq!(exec.checks["status is 200"], vec![200]);
        assert!(config.scenarios.values().all(|s| s.pause.is_zero()));
    }

    #[test]
    fn invalid_config_never_starts() {
        let file = config_file(
            ".json",
            &format!(
                r#"{{
                    {REFUSED}
                    "scenarios": {{ "s": {{ "executor": "constant-vus", "exec": "probe", "target": 1, "duration": "1s" }} }},
                    "thresholds": {{ "http_req_duration": "rate<0.01" }}
                }}"#
            ),
        );
        let err = prepare(&args(file.path())).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Config(ConfigError::InvalidThreshold { .. })
        ));
        assert_eq!(err.exit_code(), EXIT_CONFIG);

        let file = config_file(
            ".json",
            r#"{ "scenarios": { "s": { "executor": "constant-vus", "exec": "missing", "target": 1, "duration": "1s" } } }"#,
        );
        let err = prepare(&args(file.path())).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Config(ConfigError::UnknownExec { .. })
        ));
    }

    #[tokio::test]
    #[ntest::timeout(20_000)]
    async fn failing_threshold_exits_one() {
        let file = config_file(
            ".json",
            &format!(
                r#"{{
                    {REFUSED}
                    "scenarios": {{
                        "s": {{ "executor": "constant-arrival-rate", "exec": "probe", "target": 5, "duration": "1s", "preAllocatedVUs": 5 }}
                    }},
                    "thresholds": {{ "http_req_failed": "rate<0.01" }}
                }}"#
            ),
        );

        let report = execute(&args(file.path()), std::future::pending())
            .await
            .unwrap();

        assert!(!report.aborted);
        let outcome = &report.thresholds[0];
        assert!(!outcome.passed);
        assert_eq!(outcome.observed, Some(1.));
        assert_eq!(exit_code(&report), EXIT_FAILED);
    }

    #[tokio::test]
    #[ntest::timeout(20_000)]
    async fn passing_run_exits_zero_and_exports() {
        let file = config_file(
            ".json",
            &format!(
                r#"{{
                    {REFUSED}
                    "scenarios": {{
                        "s": {{ "executor": "constant-vus", "exec": "probe", "target": 1, "duration": "1m", "pause": "200ms" }}
                    }},
                    "thresholds": {{ "iterations": "count>0" }}
                }}"#
            ),
        );
        let export = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        let mut run_args = args(file.path());
        run_args.duration_override = Some(Duration::from_secs(1));

        let report = execute(&run_args, std::future::pending()).await.unwrap();
        assert!(report.elapsed < Duration::from_secs(10));
        assert_eq!(exit_code(&report), EXIT_PASSED);

        JsonExporter::new(export.path()).report(&report).unwrap();
        let exported: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(export.path()).unwrap()).unwrap();
        assert_eq!(exported["run_id"], report.run_id.as_str());
        assert!(exported["scenarios"]["s"]["dispatch"]["completed"].as_u64().unwrap() > 0);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(20_000)]
    async fn shutdown_aborts_run() {
        let file = config_file(
            ".json",
            &format!(
                r#"{{
                    {REFUSED}
                    "scenarios": {{
                        "s": {{ "executor": "constant-vus", "exec": "probe", "target": 2, "duration": "5m", "pause": "100ms" }}
                    }}
                }}"#
            ),
        );

        let shutdown = tokio::time::sleep(Duration::from_millis(500));
        let report = execute(&args(file.path()), shutdown).await.unwrap();

        assert!(report.aborted);
        assert!(report.elapsed < Duration::from_secs(10));
        assert_eq!(exit_code(&report), EXIT_FAILED);
        assert!(logs_contain("Shutdown requested"));
    }
}
