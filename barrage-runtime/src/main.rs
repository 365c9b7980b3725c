use barrage_runtime::{Cli, Command};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout carries the summary.
    FmtSubscriber::builder()
        .with_env_filter(cli.log.as_str())
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Command::Run(args) => barrage_runtime::run(args).await,
    };
    ExitCode::from(code)
}
