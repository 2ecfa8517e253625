//! File I/O for JSON-Lines corpora.
//!
//! Reading handles plain and zstd-compressed inputs. Writing goes through a
//! `.partial` file that is renamed into place only once complete.

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::string::FromUtf8Error;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during I/O operations.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Cannot read input candidate: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("No input files matched: {}", .0.join(", "))]
    NoInputs(Vec<String>),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Removed-documents archive lock poisoned")]
    Poisoned,
}

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, IoError>;

/// One input line. Invalid UTF-8 is reported per line so callers can skip it.
pub type Line = std::result::Result<String, FromUtf8Error>;

const ZSTD_EXTENSION: &str = "zst";
const PARTIAL_SUFFIX: &str = ".partial";

/// Whether the path names a zstd-compressed file.
pub fn is_zstd<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ZSTD_EXTENSION))
}

/// Streaming line reader yielding `(line_number, line)`.
///
/// Line numbers are 1-based and count blank lines, which are skipped. A line
/// that is not valid UTF-8 is yielded as `Err` without ending the stream.
pub struct LineReader {
    reader: Box<dyn BufRead + Send>,
    line_num: usize,
}

impl LineReader {
    /// Open a file, decompressing `.zst` transparently.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader: Box<dyn BufRead + Send> = if is_zstd(path) {
            Box::new(BufReader::new(zstd::stream::read::Decoder::new(file)?))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self {
            reader,
            line_num: 0,
        })
    }
}

impl Iterator for LineReader {
    type Item = Result<(usize, Line)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut bytes = Vec::new();

        loop {
            bytes.clear();
            match self.reader.read_until(b'\n', &mut bytes) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_num += 1;
                    while matches!(bytes.last(), Some(b'\n' | b'\r')) {
                        bytes.pop();
                    }
                    match String::from_utf8(std::mem::take(&mut bytes)) {
                        Ok(line) if line.trim().is_empty() => continue,
                        line => return Some(Ok((self.line_num, line))),
                    }
                }
                Err(e) => return Some(Err(IoError::Io(e))),
            }
        }
    }
}

/// Read all non-blank lines of a file.
pub fn read_lines<P: AsRef<Path>>(path: P) -> Result<Vec<(usize, Line)>> {
    LineReader::open(path)?.collect()
}

/// Resolve input patterns to a sorted, de-duplicated list of files.
///
/// Patterns containing glob metacharacters are expanded; anything else is
/// taken as a literal path and must exist.
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for pattern in patterns {
        if pattern.contains(['*', '?', '[']) {
            for entry in glob::glob(pattern)? {
                let path = entry?;
                if path.is_file() {
                    files.push(path);
                }
            }
        } else {
            let path = PathBuf::from(pattern);
            if !path.is_file() {
                return Err(IoError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("input file not found: {}", path.display()),
                )));
            }
            files.push(path);
        }
    }

    files.sort();
    files.dedup();
    if files.is_empty() {
        return Err(IoError::NoInputs(patterns.to_vec()));
    }
    debug!(count = files.len(), "Resolved input files");
    Ok(files)
}

/// Output path for an input: same base name under `output_dir`, minus `.zst`.
pub fn output_path_for<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output_dir: Q) -> PathBuf {
    let input = input.as_ref();
    let name = if is_zstd(input) {
        input.file_stem()
    } else {
        input.file_name()
    };
    output_dir
        .as_ref()
        .join(name.unwrap_or_else(|| std::ffi::OsStr::new("output.jsonl")))
}

/// A JSONL output that appears at its final path only after [`finish`].
///
/// Dropping an unfinished writer deletes the partial file.
///
/// [`finish`]: AtomicLineWriter::finish
pub struct AtomicLineWriter {
    writer: Option<BufWriter<File>>,
    partial: PathBuf,
    target: PathBuf,
}

impl AtomicLineWriter {
    pub fn create<P: AsRef<Path>>(target: P) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut partial = target.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        let file = File::create(&partial)?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            partial,
            target,
        })
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{line}")?;
        }
        Ok(())
    }

    /// Flush and move the output into place.
    pub fn finish(mut self) -> Result<PathBuf> {
        let result = match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
        .and_then(|()| fs::rename(&self.partial, &self.target));

        if let Err(e) = result {
            let _ = fs::remove_file(&self.partial);
            return Err(e.into());
        }
        Ok(self.target.clone())
    }
}

impl Drop for AtomicLineWriter {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = fs::remove_file(&self.partial) {
                warn!(path = %self.partial.display(), error = %e, "Failed to remove partial output");
            }
        }
    }
}

#[derive(Serialize)]
struct RemovedRecord<'a> {
    text: &'a str,
    source: &'a str,
}

/// Append-only JSONL archive of rejected documents, shared between workers.
pub struct RemovedArchive {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl RemovedArchive {
    /// Open `path` for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one rejected document as `{"text": ..., "source": ...}`.
    pub fn append(&self, text: &str, source: &str) -> Result<()> {
        let line = serde_json::to_string(&RemovedRecord { text, source })?;
        let mut writer = self.writer.lock().map_err(|_| IoError::Poisoned)?;
        writeln!(writer, "{line}")?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.writer.lock().map_err(|_| IoError::Poisoned)?.flush()?;
        Ok(())
    }
}
