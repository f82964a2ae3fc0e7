use clap::Parser;
use code_bucket::cli::{run, Cli};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::Level;

const FATAL_EXIT_CODE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr so `scan` output stays clean on stdout.
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping");
            on_interrupt.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(code) => {
            tracing::info!(exit_code = code, "CLI completed");
            ExitCode::from(code)
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            eprintln!("Error: {e:#}");
            ExitCode::from(FATAL_EXIT_CODE)
        }
    }
}
