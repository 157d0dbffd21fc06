//! archsend - archive files and send them to a remote listener

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use archsend::cli::Args;
use archsend::client::send_files;
use archsend::config;
use archsend::logger::{Logger, NoopLogger, TextLogger};

fn main() -> ExitCode {
    // Set up Ctrl-C handler
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    }) {
        eprintln!("Warning: could not install Ctrl-C handler: {e}");
    }

    let args = Args::parse();

    let cfg = match config::load(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let settings = match args.resolve(cfg) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error ({}): {}", e.kind(), e);
            return ExitCode::from(e.kind().exit_code());
        }
    };

    // Choose logger once
    let logger: Arc<dyn Logger> = match settings.log_file.as_ref() {
        Some(p) => match TextLogger::new(p).with_context(|| format!("open log file {}", p.display())) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                eprintln!("Warning: {e:#}; continuing without a log file");
                Arc::new(NoopLogger)
            }
        },
        None => Arc::new(NoopLogger),
    };

    match send_files(&settings, logger.as_ref()) {
        Ok(outcome) => {
            println!("Server says: {}", outcome.report.response.text);
            println!(
                "Done: {} bytes in {:.2}s (sha256 {})",
                outcome.report.body.bytes,
                outcome.elapsed.as_secs_f64(),
                outcome.report.body.sha256
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error ({}): {}", e.kind(), e);
            ExitCode::from(e.kind().exit_code())
        }
    }
}
