//! Cut a referentially-closed sample out of the notes dataset.
//!
//! ## Input
//!
//! A dataset directory with the following layout:
//! - `notes-00000.tsv`              - one row per note (`noteId`, author, ...)
//! - `ratings/ratings-000NN.tsv`    - 16 rating shards (`noteId`, rater, ...)
//! - `noteStatusHistory-00000.tsv`  - status rows keyed by `noteId`
//! - `userEnrollment-00000.tsv`     - enrollment rows keyed by user id
//!
//! ## Output
//!
//! The same layout under `--output-dir`, every file keeping its header and
//! only the rows that reference the sample.
//!
//! ## Usage
//!
//! ```sh
//! cargo run --release --bin sample -- --sample 10000
//! cargo run --release --bin sample -- --policy ranked --sample 500 --user-sample 2000
//! ```

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use sieve::pipeline::{self, DEFAULT_SAMPLE_SIZE, DEFAULT_USER_SAMPLE_SIZE, PipelineConfig, Policy};
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Build a referentially-closed sample of the notes dataset")]
struct Args {
    /// Root of the full dataset.
    #[arg(long, default_value = "input")]
    input_dir: PathBuf,

    /// Root the sample is written under. Created if missing.
    #[arg(long, default_value = "input-sample")]
    output_dir: PathBuf,

    /// Number of notes to sample. Zero or negative keeps headers only.
    #[arg(
        long = "sample",
        default_value_t = DEFAULT_SAMPLE_SIZE as i64,
        allow_negative_numbers = true
    )]
    sample_size: i64,

    /// How notes are chosen.
    #[arg(long, value_enum, default_value_t = Policy::Random)]
    policy: Policy,

    /// Number of top users to keep (ranked policy only).
    #[arg(
        long = "user-sample",
        default_value_t = DEFAULT_USER_SAMPLE_SIZE as i64,
        allow_negative_numbers = true
    )]
    user_sample_size: i64,

    /// RNG seed for the random policy. A fresh seed is drawn and logged when
    /// omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads for shard passes (default: one per core).
    #[arg(long)]
    threads: Option<usize>,

    /// Write a JSON run report to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Hide the shard progress bar.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            policy: self.policy,
            sample_size: size_at_least_zero(self.sample_size),
            user_sample_size: size_at_least_zero(self.user_sample_size),
            seed: self.seed,
            threads: self.threads,
            show_progress: !self.quiet,
            ..PipelineConfig::default()
        }
    }
}

/// Negative sizes select nothing.
fn size_at_least_zero(n: i64) -> usize {
    n.max(0) as usize
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let report = pipeline::run(&args.pipeline_config())?;

    if let Some(path) = args.report {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&path, json)?;
        info!("  Wrote report to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_sizes_clamp_to_zero() {
        let args = Args::try_parse_from(["sample", "--sample=-1", "--user-sample", "-5"]).unwrap();
        let config = args.pipeline_config();
        assert_eq!(config.sample_size, 0);
        assert_eq!(config.user_sample_size, 0);
    }

    #[test]
    fn test_default_sizes() {
        let config = Args::try_parse_from(["sample"]).unwrap().pipeline_config();
        assert_eq!(config.sample_size, DEFAULT_SAMPLE_SIZE);
        assert_eq!(config.user_sample_size, DEFAULT_USER_SAMPLE_SIZE);
        assert!(config.show_progress);
    }
}
