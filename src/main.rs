//! `rp` binary entry point.
//!
//! Parses the command line, installs the tracing subscriber, and dispatches
//! into [`rp::cli::run`]. All presentation and error-to-exit-code mapping
//! lives in the `cli` module; this binary is intentionally thin.

use clap::Parser;
use rp::cli::{self, Opts};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();

    match cli::run(opts).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
