//! Choosing the primary entities of a sample.
//!
//! Two interchangeable policies produce an [`IdentifierSet`] of at most `K`
//! ids:
//! - **uniform**: sampling without replacement, every size-`K` subset equally
//!   likely;
//! - **ranked**: the `K` ids with the highest occurrence counts in a reference
//!   stream. Ties keep first-seen order (stable sort), so a ranked run is
//!   fully reproducible.
//!
//! After choosing, [`Selector::emit`] makes a second, independent pass over
//! the primary file to write the chosen records.

use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use rand::prelude::*;
use tracing::debug;

use crate::common::{IdentifierSet, RecordStream};
use crate::error::Result;
use crate::filter::{Accumulator, FilterStats, Membership, filter_file};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Upper bound `K` on the number of chosen ids.
    pub sample_size: usize,
    /// Field holding the id in the primary file.
    pub key_field: usize,
}

// ============================================================================
// Candidate Universe
// ============================================================================

/// Distinct values of `field` across `path`, in first-seen order.
pub fn collect_candidates(path: &Path, field: usize) -> Result<IndexSet<String>> {
    let mut candidates = IndexSet::new();
    for record in RecordStream::open(path)? {
        let record = record?;
        let id = record.require(field)?;
        if !candidates.contains(id) {
            candidates.insert(id.to_owned());
        }
    }
    Ok(candidates)
}

/// Uniform sampling without replacement via partial Fisher–Yates: each draw
/// picks uniformly among the undrawn candidates and swaps it out of the pool
/// (`swap_remove`), so no draw pays for shifting the rest of the pool.
pub fn sample_uniform<R>(
    candidates: impl IntoIterator<Item = String>,
    sample_size: usize,
    rng: &mut R,
) -> IdentifierSet
where
    R: Rng + ?Sized,
{
    let mut pool: Vec<String> = candidates.into_iter().collect();
    let draws = sample_size.min(pool.len());
    let mut chosen = IdentifierSet::with_capacity(draws);
    for _ in 0..draws {
        let idx = rng.random_range(0..pool.len());
        chosen.insert(pool.swap_remove(idx));
    }
    chosen
}

// ============================================================================
// Frequency Tables
// ============================================================================

/// An id with its occurrence count. Only lives between counting and taking
/// the top-`K` slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredIdentifier {
    pub id: String,
    pub count: u64,
}

/// Occurrence counts keyed by id, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct FrequencyTable {
    counts: IndexMap<String, u64>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table whose population is fixed up front: every id starts at zero
    /// and its position is its first-seen rank.
    pub fn with_population(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            counts: ids.into_iter().map(|id| (id, 0)).collect(),
        }
    }

    pub fn record(&mut self, id: &str) {
        self.add(id, 1);
    }

    fn add(&mut self, id: &str, n: u64) {
        match self.counts.get_mut(id) {
            Some(count) => *count += n,
            None => {
                self.counts.insert(id.to_owned(), n);
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.counts.contains_key(id)
    }

    pub fn count(&self, id: &str) -> u64 {
        self.counts.get(id).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Add `other`'s counts. Ids new to `self` are appended in `other`'s
    /// order, so absorbing per-shard tables in shard order yields the same
    /// first-seen order as one sequential pass.
    pub fn absorb(&mut self, other: FrequencyTable) {
        for (id, n) in other.counts {
            match self.counts.get_mut(&id) {
                Some(count) => *count += n,
                None => {
                    self.counts.insert(id, n);
                }
            }
        }
    }

    /// All entries by count, descending; ties in first-seen order.
    pub fn ranked(self) -> Vec<ScoredIdentifier> {
        let mut scored: Vec<ScoredIdentifier> = self
            .counts
            .into_iter()
            .map(|(id, count)| ScoredIdentifier { id, count })
            .collect();
        scored.sort_by(|a, b| b.count.cmp(&a.count));
        scored
    }

    pub fn top_k(self, k: usize) -> IdentifierSet {
        self.ranked().into_iter().take(k).map(|s| s.id).collect()
    }
}

/// Count `field` over the records of `path` that `admit` lets through.
///
/// With `known`, only ids already present in that table are counted; the
/// returned table is always a fresh per-file table meant to be absorbed.
pub fn tally_file(
    path: &Path,
    field: usize,
    admit: &Membership<'_>,
    known: Option<&FrequencyTable>,
) -> Result<FrequencyTable> {
    let mut table = FrequencyTable::new();
    let mut skipped = 0u64;
    for record in RecordStream::open(path)? {
        let record = record?;
        if !admit.admits(&record)? {
            continue;
        }
        let id = record.require(field)?;
        match known {
            Some(known) if !known.contains(id) => skipped += 1,
            _ => table.record(id),
        }
    }
    if skipped > 0 {
        debug!(
            "{}: {} record(s) reference ids outside the population",
            path.display(),
            skipped
        );
    }
    Ok(table)
}

// ============================================================================
// Selector
// ============================================================================

pub struct Selector {
    config: SelectorConfig,
}

impl Selector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// First pass: read the key column of `source` and draw uniformly.
    pub fn choose_uniform<R>(&self, source: &Path, rng: &mut R) -> Result<IdentifierSet>
    where
        R: Rng + ?Sized,
    {
        let candidates = collect_candidates(source, self.config.key_field)?;
        debug!(
            "{}: {} distinct candidates",
            source.display(),
            candidates.len()
        );
        Ok(sample_uniform(candidates, self.config.sample_size, rng))
    }

    pub fn choose_ranked(&self, counts: FrequencyTable) -> IdentifierSet {
        counts.top_k(self.config.sample_size)
    }

    /// Second pass: copy the header and every record of `source` whose key is
    /// in `chosen` to `dest`, in file order, feeding each one to `acc`.
    pub fn emit<A>(
        &self,
        source: &Path,
        dest: &Path,
        chosen: &IdentifierSet,
        acc: &mut A,
    ) -> Result<FilterStats>
    where
        A: Accumulator + ?Sized,
    {
        let admit = Membership::field_in(self.config.key_field, chosen);
        filter_file(source, dest, &admit, acc)
    }
}

// ============================================================================
// Tests
// ============================================================================
