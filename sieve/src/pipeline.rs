//! Pipeline orchestrator: choose notes (and, ranked, users), then propagate
//! the selection across every dependent file in dependency order.
//!
//! ## Random policy
//! 1. Sample notes uniformly; harvest each chosen note's author.
//! 2. Filter the 16 rating shards by `noteId ∈ notes`; harvest raters.
//! 3. Filter status history by `noteId ∈ notes`.
//! 4. Filter enrollment by `userId ∈ participants` (authors ∪ raters).
//!
//! ## Ranked policy
//! 1. Rank notes by rating count over all shards; keep the top `sample_size`.
//! 2. Rank users by ratings on those notes; keep the top `user_sample_size`.
//! 3. Filter shards by `noteId ∈ notes AND userId ∈ users`.
//! 4. Filter status history by `noteId ∈ notes`.
//! 5. Filter enrollment by `userId ∈ users`.
//!
//! Shard passes run on a rayon pool. Every shard gets its own accumulator and
//! its own count table, merged back in shard order, so outputs match a
//! sequential run exactly.

use std::path::PathBuf;
use std::time::Instant;

use indexmap::IndexMap;
use indicatif::{HumanCount, HumanDuration, ProgressBar, ProgressStyle};
use rand::prelude::*;
use rand::rngs::SmallRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::{
    DatasetLayout, ENROLLMENT_USER_FIELD, IdentifierSet, NOTE_AUTHOR_FIELD, NOTE_ID_FIELD,
    NOTES_FILE, NUM_RATING_SHARDS, RATING_NOTE_FIELD, RATING_USER_FIELD, RATINGS_DIR,
    STATUS_HISTORY_FILE, STATUS_NOTE_FIELD, USER_ENROLLMENT_FILE, rating_shard_name,
};
use crate::error::Result;
use crate::filter::{Accumulator, FilterStats, Harvest, Membership, filter_file};
use crate::selector::{FrequencyTable, Selector, SelectorConfig, collect_candidates, tally_file};

pub const DEFAULT_SAMPLE_SIZE: usize = 1000;
pub const DEFAULT_USER_SAMPLE_SIZE: usize = 1000;

// ============================================================================
// Configuration
// ============================================================================

/// How the primary entities are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Uniform random notes; enrollment follows authors and raters.
    Random,
    /// Most-rated notes, then most active users on those notes.
    Ranked,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of the full dataset.
    pub input_dir: PathBuf,
    /// Root the sample is written under (mirrors the input layout).
    pub output_dir: PathBuf,
    pub policy: Policy,
    /// Target number of notes.
    pub sample_size: usize,
    /// Target number of users (ranked policy only).
    pub user_sample_size: usize,
    /// RNG seed for the random policy. Drawn fresh when unset.
    pub seed: Option<u64>,
    /// Worker threads for shard passes. `None` uses one per core.
    pub threads: Option<usize>,
    pub shard_count: usize,
    /// Draw a progress bar for shard passes.
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("input-sample"),
            policy: Policy::Random,
            sample_size: DEFAULT_SAMPLE_SIZE,
            user_sample_size: DEFAULT_USER_SAMPLE_SIZE,
            seed: None,
            threads: None,
            shard_count: NUM_RATING_SHARDS,
            show_progress: false,
        }
    }
}

// ============================================================================
// Run Report
// ============================================================================

/// Summary of a finished run, keyed by output path relative to the sample
/// root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub policy: Policy,
    pub seed: Option<u64>,
    pub sample_size: usize,
    pub user_sample_size: Option<usize>,
    pub selected_notes: usize,
    pub selected_users: Option<usize>,
    pub participants: Option<usize>,
    pub files: IndexMap<String, FilterStats>,
    pub elapsed_secs: f64,
}

impl RunReport {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            policy: config.policy,
            seed: None,
            sample_size: config.sample_size,
            user_sample_size: match config.policy {
                Policy::Random => None,
                Policy::Ranked => Some(config.user_sample_size),
            },
            selected_notes: 0,
            selected_users: None,
            participants: None,
            files: IndexMap::new(),
            elapsed_secs: 0.0,
        }
    }

    pub fn rows_kept(&self) -> u64 {
        self.files.values().map(|s| s.kept).sum()
    }

    pub fn rows_read(&self) -> u64 {
        self.files.values().map(|s| s.read).sum()
    }
}

fn shard_key(index: usize) -> String {
    format!("{RATINGS_DIR}/{}", rating_shard_name(index))
}

// ============================================================================
// Entry Point
// ============================================================================

pub fn run(config: &PipelineConfig) -> Result<RunReport> {
    let start = Instant::now();
    let input = DatasetLayout::new(&config.input_dir).with_shard_count(config.shard_count);
    let output = DatasetLayout::new(&config.output_dir).with_shard_count(config.shard_count);

    info!("Input:  {}", input.root().display());
    info!("Output: {}", output.root().display());
    info!("Policy: {:?}", config.policy);

    output.create_dirs()?;

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(threads) = config.threads {
        builder = builder.num_threads(threads);
    }
    let pool = builder.build()?;

    let mut report = pool.install(|| match config.policy {
        Policy::Random => run_random(config, &input, &output),
        Policy::Ranked => run_ranked(config, &input, &output),
    })?;

    let elapsed = start.elapsed();
    report.elapsed_secs = elapsed.as_secs_f64();
    info!("Sampling complete in {}!", HumanDuration(elapsed));
    info!("  Notes:     {}", HumanCount(report.selected_notes as u64));
    if let Some(users) = report.selected_users {
        info!("  Users:     {}", HumanCount(users as u64));
    }
    if let Some(participants) = report.participants {
        info!("  Participants: {}", HumanCount(participants as u64));
    }
    info!(
        "  Rows kept: {} of {}",
        HumanCount(report.rows_kept()),
        HumanCount(report.rows_read())
    );
    Ok(report)
}

fn run_random(
    config: &PipelineConfig,
    input: &DatasetLayout,
    output: &DatasetLayout,
) -> Result<RunReport> {
    let mut report = RunReport::new(config);
    let seed = config.seed.unwrap_or_else(|| rand::rng().random());
    report.seed = Some(seed);

    info!(
        "Step 1: Sampling {} notes uniformly (seed {seed})...",
        HumanCount(config.sample_size as u64)
    );
    let selector = Selector::new(SelectorConfig {
        sample_size: config.sample_size,
        key_field: NOTE_ID_FIELD,
    });
    let mut rng = SmallRng::seed_from_u64(seed);
    let selected_notes = selector.choose_uniform(&input.notes(), &mut rng)?;
    info!("  Selected {} notes", HumanCount(selected_notes.len() as u64));

    let propagation = propagate_sample(input, output, &selected_notes, config.show_progress)?;
    report.selected_notes = selected_notes.len();
    report.participants = Some(propagation.participants.len());
    report.files = propagation.files;
    Ok(report)
}

/// Everything the random policy does once the note set is fixed.
pub struct Propagation {
    pub participants: IdentifierSet,
    pub files: IndexMap<String, FilterStats>,
}

/// Emit the chosen notes and propagate them through ratings, status history
/// and enrollment. Participants are the authors of the chosen notes plus the
/// users of every kept rating.
pub fn propagate_sample(
    input: &DatasetLayout,
    output: &DatasetLayout,
    selected_notes: &IdentifierSet,
    show_progress: bool,
) -> Result<Propagation> {
    let mut files = IndexMap::new();
    let mut authors = Harvest::new(NOTE_AUTHOR_FIELD);
    let stats = filter_file(
        &input.notes(),
        &output.notes(),
        &Membership::field_in(NOTE_ID_FIELD, selected_notes),
        &mut authors,
    )?;
    files.insert(NOTES_FILE.to_owned(), stats);
    let mut participants = authors.into_ids();
    info!("  Wrote {} notes, {} authors", stats.kept, participants.len());

    info!("Step 2: Filtering {} rating shards...", input.shard_count());
    let admit = Membership::field_in(RATING_NOTE_FIELD, selected_notes);
    let shards = filter_shards(input, output, &admit, show_progress, || {
        Harvest::new(RATING_USER_FIELD)
    })?;
    for (index, (stats, raters)) in shards.into_iter().enumerate() {
        participants.extend(raters.into_ids());
        files.insert(shard_key(index), stats);
    }
    info!("  {} participants", HumanCount(participants.len() as u64));

    info!("Step 3: Filtering note status history...");
    let stats = filter_file(
        &input.status_history(),
        &output.status_history(),
        &Membership::field_in(STATUS_NOTE_FIELD, selected_notes),
        &mut (),
    )?;
    files.insert(STATUS_HISTORY_FILE.to_owned(), stats);

    info!("Step 4: Filtering user enrollment...");
    let stats = filter_file(
        &input.user_enrollment(),
        &output.user_enrollment(),
        &Membership::field_in(ENROLLMENT_USER_FIELD, &participants),
        &mut (),
    )?;
    files.insert(USER_ENROLLMENT_FILE.to_owned(), stats);

    Ok(Propagation {
        participants,
        files,
    })
}

fn run_ranked(
    config: &PipelineConfig,
    input: &DatasetLayout,
    output: &DatasetLayout,
) -> Result<RunReport> {
    let mut report = RunReport::new(config);
    let shards = input.rating_shards();

    info!(
        "Step 1: Ranking notes by rating count (top {})...",
        HumanCount(config.sample_size as u64)
    );
    let population = collect_candidates(&input.notes(), NOTE_ID_FIELD)?;
    let mut note_counts = FrequencyTable::with_population(population);
    let per_shard = tally_shards(&shards, RATING_NOTE_FIELD, &Membership::all(), Some(&note_counts))?;
    for table in per_shard {
        note_counts.absorb(table);
    }
    info!(
        "  Counted {} ratings over {} notes",
        HumanCount(note_counts.total()),
        HumanCount(note_counts.len() as u64)
    );
    let note_selector = Selector::new(SelectorConfig {
        sample_size: config.sample_size,
        key_field: NOTE_ID_FIELD,
    });
    let selected_notes = note_selector.choose_ranked(note_counts);
    let stats = note_selector.emit(&input.notes(), &output.notes(), &selected_notes, &mut ())?;
    report.files.insert(NOTES_FILE.to_owned(), stats);
    info!("  Selected {} notes", HumanCount(selected_notes.len() as u64));

    info!(
        "Step 2: Ranking users on selected notes (top {})...",
        HumanCount(config.user_sample_size as u64)
    );
    let on_selected = Membership::field_in(RATING_NOTE_FIELD, &selected_notes);
    let mut user_counts = FrequencyTable::new();
    for table in tally_shards(&shards, RATING_USER_FIELD, &on_selected, None)? {
        user_counts.absorb(table);
    }
    let user_selector = Selector::new(SelectorConfig {
        sample_size: config.user_sample_size,
        key_field: RATING_USER_FIELD,
    });
    let candidates = user_counts.len();
    let selected_users = user_selector.choose_ranked(user_counts);
    info!(
        "  Selected {} of {} users",
        HumanCount(selected_users.len() as u64),
        HumanCount(candidates as u64)
    );

    info!("Step 3: Filtering {} rating shards...", input.shard_count());
    let admit = Membership::field_in(RATING_NOTE_FIELD, &selected_notes)
        .and(RATING_USER_FIELD, &selected_users);
    let filtered = filter_shards(input, output, &admit, config.show_progress, || ())?;
    for (index, (stats, ())) in filtered.into_iter().enumerate() {
        report.files.insert(shard_key(index), stats);
    }

    info!("Step 4: Filtering note status history...");
    let stats = filter_file(
        &input.status_history(),
        &output.status_history(),
        &Membership::field_in(STATUS_NOTE_FIELD, &selected_notes),
        &mut (),
    )?;
    report.files.insert(STATUS_HISTORY_FILE.to_owned(), stats);

    info!("Step 5: Filtering user enrollment...");
    let stats = filter_file(
        &input.user_enrollment(),
        &output.user_enrollment(),
        &Membership::field_in(ENROLLMENT_USER_FIELD, &selected_users),
        &mut (),
    )?;
    report.files.insert(USER_ENROLLMENT_FILE.to_owned(), stats);

    report.selected_notes = selected_notes.len();
    report.selected_users = Some(selected_users.len());
    Ok(report)
}

// ============================================================================
// Shard Passes
// ============================================================================

fn shard_progress(len: usize, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("  Shards     {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}]")
    {
        pb.set_style(style);
    }
    pb
}

/// Filter every rating shard into the output layout. Results come back in
/// shard order, each with the accumulator that saw that shard's records.
fn filter_shards<A, F>(
    input: &DatasetLayout,
    output: &DatasetLayout,
    admit: &Membership<'_>,
    show_progress: bool,
    make_acc: F,
) -> Result<Vec<(FilterStats, A)>>
where
    A: Accumulator + Send,
    F: Fn() -> A + Sync,
{
    let pb = shard_progress(input.shard_count(), show_progress);
    let results = (0..input.shard_count())
        .into_par_iter()
        .map(|index| -> Result<(FilterStats, A)> {
            let mut acc = make_acc();
            let stats = filter_file(
                &input.rating_shard(index),
                &output.rating_shard(index),
                admit,
                &mut acc,
            )?;
            pb.inc(1);
            Ok((stats, acc))
        })
        .collect::<Result<Vec<_>>>();
    pb.finish_and_clear();
    results
}

/// Per-shard count tables, in shard order.
fn tally_shards(
    shards: &[PathBuf],
    field: usize,
    admit: &Membership<'_>,
    known: Option<&FrequencyTable>,
) -> Result<Vec<FrequencyTable>> {
    shards
        .par_iter()
        .map(|path| tally_file(path, field, admit, known))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
