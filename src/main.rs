//! Binary entry point for agenr.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use agenr::cli::output::{OutputFormat, format_error};
use agenr::cli::{Cli, execute};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = OutputFormat::from_json_flag(cli.json);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AGENR_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Shutdown is a process-wide flag: producers stop scheduling new
    // work, in-flight LLM calls and transactions finish.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("shutting down, finishing in-flight work...");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    match execute(cli, shutdown).await {
        Ok(output) => {
            if !output.text.is_empty() {
                // Tolerate broken pipes (e.g. piped into `head` or `jq`)
                if let Err(e) = write!(io::stdout(), "{}", output.text) {
                    if e.kind() != io::ErrorKind::BrokenPipe {
                        eprintln!("Error writing to stdout: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::from(output.exit_code)
        }
        Err(e) => {
            let rendered = format_error(&e, format);
            match format {
                OutputFormat::Json => println!("{rendered}"),
                OutputFormat::Text => eprintln!("Error: {rendered}"),
            }
            ExitCode::FAILURE
        }
    }
}
