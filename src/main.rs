//! CLI entry point for the ripper tool.

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use ripper_core::pipeline::strip_fragment;
use ripper_core::{Pipeline, ProcessExit, parse_input_list, verify_dir};
use tracing::{debug, error, info, warn};

mod cli;

use cli::Args;

fn no_color_requested(flag: bool) -> bool {
    let env = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
    let dumb = std::env::var("TERM").is_ok_and(|value| value.eq_ignore_ascii_case("dumb"));
    flag || env || dumb
}

fn init_tracing(default_level: &str, no_color: bool) {
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_env_filter(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    init_tracing(args.default_log_level(), no_color_requested(args.no_color));

    match run(args).await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(e) => {
            let message = format!("{e:#}");
            error!(error = %message, "run failed");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}

async fn run(args: Args) -> Result<ProcessExit> {
    debug!(?args, "CLI arguments parsed");

    if let Some(dir) = &args.verify {
        let report = verify_dir(dir)?;
        for path in &report.missing_files {
            println!("missing: {}", path.display());
        }
        for book in &report.incomplete_books {
            println!(
                "incomplete: {} ({} of {} tracks)",
                book.folder.display(),
                book.mp3_files,
                book.expected_tracks
            );
        }
        println!(
            "Checked {} metadata file(s): {} missing file(s), {} incomplete book(s)",
            report.checked,
            report.missing_files.len(),
            report.incomplete_books.len()
        );
        return Ok(report.exit());
    }

    let mut inputs: Vec<String> = args.urls.iter().map(|url| strip_fragment(url)).collect();
    if let Some(path) = &args.txt {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?;
        inputs.extend(parse_input_list(&text));
    }
    if inputs.is_empty() {
        info!("No input provided. Pass URLs as arguments or use --txt FILE.");
        return Ok(ProcessExit::Success);
    }

    let config = args.run_config();
    config.validate()?;
    info!(
        inputs = inputs.len(),
        output = %config.output_dir.display(),
        threads = config.threads,
        format = %config.format,
        dry_run = config.dry_run,
        "ripper starting"
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let pipeline = Pipeline::new(config, Arc::clone(&interrupted))?;
    let report = pipeline.run(&inputs).await?;

    for input in report.inputs.iter().filter(|i| i.error.is_some()) {
        warn!(url = %input.url, error = input.error.as_deref().unwrap_or_default(), "input failed");
    }
    let summary = report.summary();
    for failure in &summary.failures {
        warn!(
            url = %failure.url,
            error = %failure.error,
            attempts = failure.attempts,
            "download failed"
        );
    }
    println!(
        "Done: {} downloaded, {} skipped, {} failed ({} bytes)",
        summary.success, summary.skipped, summary.failed, summary.bytes
    );

    if report.interrupted {
        warn!("Interrupted. Files already written are kept.");
    }
    Ok(report.exit())
}
