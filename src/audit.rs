//! Verify a finished sample against the dataset it was cut from.
//!
//! Checks, per file:
//! - the header is byte-identical to the source header;
//! - rows are the source rows, in source order (a subsequence);
//! - ratings and status history only reference sampled notes;
//! - enrollment only references users who rated or authored a sampled note.
//!
//! Violations are collected rather than returned as errors; only I/O and
//! format failures abort the audit.

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use sieve::Result;
use sieve::common::{
    DatasetLayout, ENROLLMENT_USER_FIELD, NOTE_AUTHOR_FIELD, NOTE_ID_FIELD, NOTES_FILE,
    RATING_NOTE_FIELD, RATING_USER_FIELD, RATINGS_DIR, RecordStream, STATUS_HISTORY_FILE,
    STATUS_NOTE_FIELD, USER_ENROLLMENT_FILE, rating_shard_name,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    #[error("{file}: header differs from source")]
    HeaderChanged { file: String },

    #[error("{file}:{line}: row is not a source row in source order")]
    OutOfOrder { file: String, line: usize },

    #[error("{file}:{line}: note {note_id} is not in the sampled notes")]
    DanglingNote {
        file: String,
        line: usize,
        note_id: String,
    },

    #[error("{file}:{line}: user {user_id} neither rated nor authored a sampled note")]
    DanglingUser {
        file: String,
        line: usize,
        user_id: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    /// Rows per sample file, keyed by path relative to the sample root.
    pub rows: IndexMap<String, u64>,
    pub notes: usize,
    pub raters: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Key column to check against a reference set, for one file.
enum Reference<'a> {
    None,
    Notes(usize, &'a HashSet<String>),
    Users(usize, &'a HashSet<String>, &'a HashSet<String>),
}

pub fn audit_sample(source: &DatasetLayout, sample: &DatasetLayout) -> Result<AuditReport> {
    let mut report = AuditReport::default();

    let mut notes = HashSet::new();
    let mut authors = HashSet::new();
    check_file(
        &mut report,
        NOTES_FILE,
        &source.notes(),
        &sample.notes(),
        &Reference::None,
        |fields| {
            if let Some(id) = fields.get(NOTE_ID_FIELD) {
                notes.insert(id.to_string());
            }
            if let Some(author) = fields.get(NOTE_AUTHOR_FIELD) {
                authors.insert(author.to_string());
            }
        },
    )?;

    let mut raters = HashSet::new();
    for index in 0..source.shard_count() {
        check_file(
            &mut report,
            &format!("{RATINGS_DIR}/{}", rating_shard_name(index)),
            &source.rating_shard(index),
            &sample.rating_shard(index),
            &Reference::Notes(RATING_NOTE_FIELD, &notes),
            |fields| {
                if let Some(user) = fields.get(RATING_USER_FIELD) {
                    raters.insert(user.to_string());
                }
            },
        )?;
    }

    check_file(
        &mut report,
        STATUS_HISTORY_FILE,
        &source.status_history(),
        &sample.status_history(),
        &Reference::Notes(STATUS_NOTE_FIELD, &notes),
        |_| {},
    )?;
    check_file(
        &mut report,
        USER_ENROLLMENT_FILE,
        &source.user_enrollment(),
        &sample.user_enrollment(),
        &Reference::Users(ENROLLMENT_USER_FIELD, &raters, &authors),
        |_| {},
    )?;

    report.notes = notes.len();
    report.raters = raters.len();
    Ok(report)
}

/// Walk one sample file alongside its source. `visit` sees the fields of
/// every sample row.
fn check_file(
    report: &mut AuditReport,
    name: &str,
    source: &Path,
    sample: &Path,
    reference: &Reference<'_>,
    mut visit: impl FnMut(&[&str]),
) -> Result<()> {
    let mut source_rows = RecordStream::open(source)?;
    let sample_rows = RecordStream::open(sample)?;
    if source_rows.header() != sample_rows.header() {
        report.violations.push(Violation::HeaderChanged {
            file: name.to_owned(),
        });
    }

    let mut rows = 0u64;
    let mut in_order = true;
    for row in sample_rows {
        let row = row?;
        rows += 1;

        // Advance the source until it yields the same row. Once the source
        // runs out, every remaining sample row is out of order; report only
        // the first.
        if in_order {
            let mut found = false;
            for candidate in source_rows.by_ref() {
                if candidate?.content() == row.content() {
                    found = true;
                    break;
                }
            }
            if !found {
                in_order = false;
                report.violations.push(Violation::OutOfOrder {
                    file: name.to_owned(),
                    line: row.line_no(),
                });
            }
        }

        let fields: Vec<&str> = row.fields().collect();
        match reference {
            Reference::None => {}
            Reference::Notes(field, notes) => {
                let note_id = row.require(*field)?;
                if !notes.contains(note_id) {
                    report.violations.push(Violation::DanglingNote {
                        file: name.to_owned(),
                        line: row.line_no(),
                        note_id: note_id.to_owned(),
                    });
                }
            }
            Reference::Users(field, raters, authors) => {
                let user_id = row.require(*field)?;
                if !raters.contains(user_id) && !authors.contains(user_id) {
                    report.violations.push(Violation::DanglingUser {
                        file: name.to_owned(),
                        line: row.line_no(),
                        user_id: user_id.to_owned(),
                    });
                }
            }
        }
        visit(&fields);
    }

    debug!("{name}: {rows} rows");
    report.rows.insert(name.to_owned(), rows);
    Ok(())
}
