//! Propagating filter: copy the records of a dependent file whose key fields
//! are members of already-selected identifier sets.
//!
//! Side effects are explicit. Every admitted record is handed to an
//! [`Accumulator`] exactly once, before it is written; rejected records never
//! reach it. Nothing is buffered beyond the current record.

use std::io::{BufRead, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{IdentifierSet, Record, RecordSink, RecordStream};
use crate::error::Result;

// ============================================================================
// Admission
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Clause<'a> {
    field: usize,
    set: &'a IdentifierSet,
}

/// Conjunction of "field `i` is in set `S`" clauses. With no clauses every
/// record is admitted.
#[derive(Debug, Clone, Default)]
pub struct Membership<'a> {
    clauses: Vec<Clause<'a>>,
}

impl<'a> Membership<'a> {
    /// Admit everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn field_in(field: usize, set: &'a IdentifierSet) -> Self {
        Self::all().and(field, set)
    }

    pub fn and(mut self, field: usize, set: &'a IdentifierSet) -> Self {
        self.clauses.push(Clause { field, set });
        self
    }

    /// Clauses are checked in order and stop at the first miss, so a later
    /// clause's field is only required on records that passed the earlier
    /// ones.
    pub fn admits(&self, record: &Record) -> Result<bool> {
        for clause in &self.clauses {
            if !clause.set.contains(record.require(clause.field)?) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// ============================================================================
// Accumulators
// ============================================================================

/// Receives each admitted record once.
pub trait Accumulator {
    fn accept(&mut self, record: &Record) -> Result<()>;
}

/// No side effect.
impl Accumulator for () {
    fn accept(&mut self, _record: &Record) -> Result<()> {
        Ok(())
    }
}

impl<A: Accumulator + ?Sized> Accumulator for &mut A {
    fn accept(&mut self, record: &Record) -> Result<()> {
        (**self).accept(record)
    }
}

/// Collects one field of every admitted record, e.g. the author of each
/// selected note or the user of each kept rating.
#[derive(Debug, Clone)]
pub struct Harvest {
    field: usize,
    ids: IdentifierSet,
}

impl Harvest {
    pub fn new(field: usize) -> Self {
        Self {
            field,
            ids: IdentifierSet::new(),
        }
    }

    pub fn into_ids(self) -> IdentifierSet {
        self.ids
    }
}

impl Accumulator for Harvest {
    fn accept(&mut self, record: &Record) -> Result<()> {
        let id = record.require(self.field)?;
        if !self.ids.contains(id) {
            self.ids.insert(id.to_owned());
        }
        Ok(())
    }
}

// ============================================================================
// Filtering
// ============================================================================

/// Records read and kept by one filter pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub read: u64,
    pub kept: u64,
}

/// Stream `records` into `sink`, keeping admitted records in their original
/// order. The sink already holds the header.
pub fn filter_records<R, W, A>(
    records: RecordStream<R>,
    sink: &mut RecordSink<W>,
    admit: &Membership<'_>,
    acc: &mut A,
) -> Result<FilterStats>
where
    R: BufRead,
    W: Write,
    A: Accumulator + ?Sized,
{
    let mut stats = FilterStats::default();
    for record in records {
        let record = record?;
        stats.read += 1;
        if admit.admits(&record)? {
            acc.accept(&record)?;
            sink.write_record(&record)?;
            stats.kept += 1;
        }
    }
    Ok(stats)
}

/// Filter `source` into `dest`. The header is copied even when nothing is
/// kept. The source is opened before `dest` is created.
pub fn filter_file<A>(
    source: &Path,
    dest: &Path,
    admit: &Membership<'_>,
    acc: &mut A,
) -> Result<FilterStats>
where
    A: Accumulator + ?Sized,
{
    let records = RecordStream::open(source)?;
    let mut sink = RecordSink::create(dest, records.header_line())?;
    let stats = filter_records(records, &mut sink, admit, acc)?;
    sink.finish()?;
    debug!(
        "Filtered {}: kept {}/{}",
        source.display(),
        stats.kept,
        stats.read
    );
    Ok(stats)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SieveError;
    use std::fs;
    use std::io::Cursor;

    const RATINGS: &str = "noteId\tuserId\thelpful\nN1\tU1\t1\nN2\tU2\t0\nN1\tU3\t1\nN3\tU1\t1\n";

    fn ids(values: &[&str]) -> IdentifierSet {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn run(text: &str, admit: &Membership<'_>, acc: &mut impl Accumulator) -> (String, FilterStats) {
        let records = RecordStream::new(Cursor::new(text.as_bytes().to_vec()), "in.tsv").unwrap();
        let mut sink = RecordSink::new(Vec::new(), "out.tsv", records.header_line()).unwrap();
        let stats = filter_records(records, &mut sink, admit, acc).unwrap();
        (String::from_utf8(sink.finish().unwrap()).unwrap(), stats)
    }

    /// Counts calls, to check exactly-once delivery.
    #[derive(Default)]
    struct CallLog(Vec<usize>);

    impl Accumulator for CallLog {
        fn accept(&mut self, record: &Record) -> Result<()> {
            self.0.push(record.line_no());
            Ok(())
        }
    }

    #[test]
    fn test_keeps_admitted_rows_in_order() {
        let notes = ids(&["N1", "N3"]);
        let (out, stats) = run(RATINGS, &Membership::field_in(0, &notes), &mut ());
        assert_eq!(out, "noteId\tuserId\thelpful\nN1\tU1\t1\nN1\tU3\t1\nN3\tU1\t1\n");
        assert_eq!(stats, FilterStats { read: 4, kept: 3 });
    }

    #[test]
    fn test_header_written_when_nothing_passes() {
        let none = IdentifierSet::new();
        let (out, stats) = run(RATINGS, &Membership::field_in(0, &none), &mut ());
        assert_eq!(out, "noteId\tuserId\thelpful\n");
        assert_eq!(stats.kept, 0);
    }

    #[test]
    fn test_accumulator_fires_once_per_admitted_record() {
        let notes = ids(&["N1"]);
        let mut log = CallLog::default();
        run(RATINGS, &Membership::field_in(0, &notes), &mut log);
        assert_eq!(log.0, vec![2, 4]);
    }

    #[test]
    fn test_harvest_collects_secondary_key() {
        let notes = ids(&["N1"]);
        let mut users = Harvest::new(1);
        run(RATINGS, &Membership::field_in(0, &notes), &mut users);
        assert_eq!(users.into_ids(), ids(&["U1", "U3"]));
    }

    #[test]
    fn test_conjunction() {
        let notes = ids(&["N1", "N3"]);
        let users = ids(&["U1"]);
        let admit = Membership::field_in(0, &notes).and(1, &users);
        let (out, _) = run(RATINGS, &admit, &mut ());
        assert_eq!(out, "noteId\tuserId\thelpful\nN1\tU1\t1\nN3\tU1\t1\n");
    }

    #[test]
    fn test_all_admits_everything() {
        let (out, stats) = run(RATINGS, &Membership::all(), &mut ());
        assert_eq!(out, RATINGS);
        assert_eq!(stats.read, stats.kept);
    }

    #[test]
    fn test_short_record_is_fatal() {
        let notes = ids(&["N1"]);
        let records =
            RecordStream::new(Cursor::new(b"noteId\tuserId\nN1\n".to_vec()), "in.tsv").unwrap();
        let mut sink = RecordSink::new(Vec::new(), "out.tsv", records.header_line()).unwrap();
        let mut users = Harvest::new(1);
        let err = filter_records(records, &mut sink, &Membership::field_in(0, &notes), &mut users)
            .err()
            .unwrap();
        assert!(matches!(err, SieveError::MalformedRecord { line: 2, field: 1, .. }));
    }

    #[test]
    fn test_filter_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("ratings.tsv");
        fs::write(&source, RATINGS).unwrap();
        let notes = ids(&["N2", "N3"]);
        let admit = Membership::field_in(0, &notes);

        let first = dir.path().join("a.tsv");
        let second = dir.path().join("b.tsv");
        filter_file(&source, &first, &admit, &mut ()).unwrap();
        filter_file(&source, &second, &admit, &mut ()).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_missing_source_creates_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.tsv");
        let err = filter_file(&dir.path().join("missing.tsv"), &dest, &Membership::all(), &mut ())
            .err()
            .unwrap();
        assert!(matches!(err, SieveError::SourceUnavailable { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("ratings.tsv");
        fs::write(&source, RATINGS).unwrap();
        let dest = dir.path().join("no-such-dir").join("out.tsv");
        let err = filter_file(&source, &dest, &Membership::all(), &mut ())
            .err()
            .unwrap();
        assert!(matches!(err, SieveError::DestinationUnwritable { .. }));
    }
}
