//! Error type shared by every stage of a sampling run.
//!
//! All variants are fatal: the pipeline stops at the first one and returns it
//! to the binary, which exits non-zero. Outputs already in progress may be
//! left truncated.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SieveError {
    /// A required input file could not be opened.
    #[error("source unavailable: {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An output file or directory could not be created or written.
    #[error("destination unwritable: {path}: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading failed part-way through a source (including invalid UTF-8).
    #[error("read failed: {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The source has no header line.
    #[error("malformed source: {path}: missing header line")]
    MissingHeader { path: PathBuf },

    /// A record is too short for the field a stage needs.
    #[error("malformed record: {path}:{line}: need field {field}, found {found} field(s)")]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        field: usize,
        found: usize,
    },

    #[error("could not start shard workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, SieveError>;
