//! Inspect a sample produced by `sample`: per-file row counts plus a full
//! audit (headers, row order, referential closure) against the source
//! dataset.
//!
//! ## Usage
//!
//! ```sh
//! cargo run --release --bin inspect -- --input-dir input --sample-dir input-sample
//! cargo run --release --bin inspect -- --sample-dir input-sample --json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use notesample::audit::audit_sample;
use sieve::common::DatasetLayout;

#[derive(Parser, Debug)]
#[command(about = "Audit a sample against the dataset it was cut from")]
struct Args {
    /// Root of the full dataset.
    #[arg(long, default_value = "input")]
    input_dir: PathBuf,

    /// Root of the sample.
    #[arg(long, default_value = "input-sample")]
    sample_dir: PathBuf,

    /// Print the audit report as JSON instead of a table.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    let source = DatasetLayout::new(&args.input_dir);
    let sample = DatasetLayout::new(&args.sample_dir);
    let report = audit_sample(&source, &sample)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║  Sample: {}", args.sample_dir.display());
        println!("║  Source: {}", args.input_dir.display());
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║  Notes:      {:>10}", report.notes);
        println!("║  Raters:     {:>10}", report.raters);
        println!("╚══════════════════════════════════════════════════════════════╝");
        println!();
        for (file, rows) in &report.rows {
            println!("  {file:<36} {rows:>10} rows");
        }
        println!();
        if report.is_clean() {
            println!("  OK: no violations");
        } else {
            println!("  {} violation(s):", report.violations.len());
            for violation in &report.violations {
                println!("    {violation}");
            }
        }
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
