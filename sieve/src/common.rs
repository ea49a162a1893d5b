//! Common types and constants used throughout the project: dataset file
//! layout, identifier sets, and the record stream / record sink pair every
//! stage reads and writes through.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, SieveError};

/// Read/write buffer size for every file pass. Rating shards are large and
/// read strictly forward, so a generous buffer pays off.
const IO_BUFFER_BYTES: usize = 1 << 20;

/// Field delimiter for every dataset file.
pub const FIELD_DELIMITER: char = '\t';

// ============================================================================
// Dataset Layout
// ============================================================================

pub const NOTES_FILE: &str = "notes-00000.tsv";
pub const RATINGS_DIR: &str = "ratings";
pub const STATUS_HISTORY_FILE: &str = "noteStatusHistory-00000.tsv";
pub const USER_ENROLLMENT_FILE: &str = "userEnrollment-00000.tsv";

/// The ratings corpus is always split into this many shards. The partitioning
/// rule is external; shards are only ever visited in numeric order.
pub const NUM_RATING_SHARDS: usize = 16;

// Field positions. Everything past these is carried along verbatim.
pub const NOTE_ID_FIELD: usize = 0;
pub const NOTE_AUTHOR_FIELD: usize = 1;
pub const RATING_NOTE_FIELD: usize = 0;
pub const RATING_USER_FIELD: usize = 1;
pub const STATUS_NOTE_FIELD: usize = 0;
pub const ENROLLMENT_USER_FIELD: usize = 0;

/// File name of rating shard `index`, e.g. `ratings-00003.tsv`.
pub fn rating_shard_name(index: usize) -> String {
    format!("ratings-{index:05}.tsv")
}

/// Paths of every dataset file under one root directory. The same layout
/// describes both the full input dataset and the sample written from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
    shard_count: usize,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shard_count: NUM_RATING_SHARDS,
        }
    }

    /// Override the shard count. Only fixtures use anything but
    /// [`NUM_RATING_SHARDS`].
    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn notes(&self) -> PathBuf {
        self.root.join(NOTES_FILE)
    }

    pub fn ratings_dir(&self) -> PathBuf {
        self.root.join(RATINGS_DIR)
    }

    pub fn rating_shard(&self, index: usize) -> PathBuf {
        self.ratings_dir().join(rating_shard_name(index))
    }

    /// All rating shards, in numeric order.
    pub fn rating_shards(&self) -> Vec<PathBuf> {
        (0..self.shard_count).map(|i| self.rating_shard(i)).collect()
    }

    pub fn status_history(&self) -> PathBuf {
        self.root.join(STATUS_HISTORY_FILE)
    }

    pub fn user_enrollment(&self) -> PathBuf {
        self.root.join(USER_ENROLLMENT_FILE)
    }

    /// Create the root and `ratings/` directories. Must run before any
    /// output file is opened.
    pub fn create_dirs(&self) -> Result<()> {
        let dir = self.ratings_dir();
        fs::create_dir_all(&dir).map_err(|source| SieveError::DestinationUnwritable {
            path: dir.clone(),
            source,
        })
    }
}

// ============================================================================
// Identifier Sets
// ============================================================================

/// Membership-only set of note or user ids. Built once by a single stage,
/// read-only afterwards.
pub type IdentifierSet = HashSet<String>;

// ============================================================================
// Records
// ============================================================================

/// One line of a dataset file.
///
/// The raw line is kept byte-for-byte (line ending included) so accepted
/// records can be re-emitted verbatim. Fields are split lazily from the line
/// with its ending removed.
#[derive(Debug, Clone)]
pub struct Record {
    line: String,
    line_no: usize,
    origin: Arc<Path>,
}

impl Record {
    pub fn new(line: String, line_no: usize, origin: Arc<Path>) -> Self {
        Self {
            line,
            line_no,
            origin,
        }
    }

    /// The raw line exactly as read, including its line ending (if any).
    pub fn raw(&self) -> &str {
        &self.line
    }

    /// 1-based line number in the source file (the header is line 1).
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    pub fn content(&self) -> &str {
        strip_line_ending(&self.line)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.content().split(FIELD_DELIMITER)
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields().nth(index)
    }

    pub fn field_count(&self) -> usize {
        self.fields().count()
    }

    /// Like [`Record::field`], but a missing field is a malformed record.
    pub fn require(&self, index: usize) -> Result<&str> {
        self.field(index).ok_or_else(|| SieveError::MalformedRecord {
            path: self.origin.to_path_buf(),
            line: self.line_no,
            field: index,
            found: self.field_count(),
        })
    }
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

// ============================================================================
// Record Stream
// ============================================================================

/// Header line followed by a lazy, single-pass sequence of records.
///
/// End of input is plain exhaustion. A read error is yielded once and ends
/// the stream. The stream cannot rewind; a second pass over the same file is
/// a second [`RecordStream::open`].
pub struct RecordStream<R> {
    reader: R,
    origin: Arc<Path>,
    header: String,
    line_no: usize,
    finished: bool,
}

impl RecordStream<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| SieveError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(BufReader::with_capacity(IO_BUFFER_BYTES, file), path)
    }
}

impl<R: BufRead> RecordStream<R> {
    /// Wrap an already-open reader. `origin` names the source in errors.
    pub fn new(mut reader: R, origin: impl AsRef<Path>) -> Result<Self> {
        let origin: Arc<Path> = Arc::from(origin.as_ref());
        let mut header = String::new();
        let read = reader
            .read_line(&mut header)
            .map_err(|source| SieveError::ReadFailed {
                path: origin.to_path_buf(),
                source,
            })?;
        if read == 0 {
            return Err(SieveError::MissingHeader {
                path: origin.to_path_buf(),
            });
        }
        Ok(Self {
            reader,
            origin,
            header,
            line_no: 1,
            finished: false,
        })
    }

    /// Header with its line ending removed.
    pub fn header(&self) -> &str {
        strip_line_ending(&self.header)
    }

    /// Header exactly as read.
    pub fn header_line(&self) -> &str {
        &self.header
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(_) => {
                self.line_no += 1;
                Some(Ok(Record::new(line, self.line_no, Arc::clone(&self.origin))))
            }
            Err(source) => {
                self.finished = true;
                Some(Err(SieveError::ReadFailed {
                    path: self.origin.to_path_buf(),
                    source,
                }))
            }
        }
    }
}

// ============================================================================
// Record Sink
// ============================================================================

/// Buffered writer for one output file: the source header first, then raw
/// record lines. Call [`RecordSink::finish`] to flush; dropping a sink
/// without finishing loses the flush error.
pub struct RecordSink<W: Write> {
    writer: W,
    path: PathBuf,
    written: u64,
}

impl RecordSink<BufWriter<File>> {
    pub fn create(path: &Path, header_line: &str) -> Result<Self> {
        let file = File::create(path).map_err(|source| SieveError::DestinationUnwritable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(BufWriter::with_capacity(IO_BUFFER_BYTES, file), path, header_line)
    }
}

impl<W: Write> RecordSink<W> {
    /// Wrap a writer and emit `header_line` verbatim. A header without a
    /// line ending gets a `\n` so records start on their own line.
    pub fn new(writer: W, path: impl Into<PathBuf>, header_line: &str) -> Result<Self> {
        let mut sink = Self {
            writer,
            path: path.into(),
            written: 0,
        };
        sink.write_raw(header_line)?;
        if !header_line.ends_with('\n') {
            sink.write_raw("\n")?;
        }
        Ok(sink)
    }

    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        self.write_raw(record.raw())?;
        self.written += 1;
        Ok(())
    }

    /// Records written so far, header excluded.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer
            .flush()
            .map_err(|source| SieveError::DestinationUnwritable {
                path: self.path.clone(),
                source,
            })?;
        Ok(self.writer)
    }

    fn write_raw(&mut self, text: &str) -> Result<()> {
        self.writer
            .write_all(text.as_bytes())
            .map_err(|source| SieveError::DestinationUnwritable {
                path: self.path.clone(),
                source,
            })
    }
}

// ============================================================================
// Tests
// ============================================================================
