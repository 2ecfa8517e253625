//! Drives pipelines over input files.
//!
//! [`FileOrchestrator::run`] deduplicates a set of files in the configured
//! [`DedupMode`]:
//!
//! - **intra-file**: every file goes through the full pipeline (loader,
//!   content filters, signature, online dedup, dumper) against one shared
//!   store, one file per worker. Document order inside a file is kept.
//! - **cross-file**: signatures for every file are computed up front, then
//!   each document is rejected if any *other* file contains a document
//!   sharing a signature component. Rejections are appended to a shared
//!   removed-documents archive.
//!
//! [`FileOrchestrator::run_clean`] runs only the content filters over one
//! file on the worker pool, writing survivors in completion order.

use crate::broker::StoreBroker;
use crate::config::{ConfigError, DedupMode, RunConfig, StoreBackendKind};
use crate::dedup::LshDeduplicator;
use crate::document::Document;
use crate::filters::{
    DocumentLengthFilter, JsonDumper, JsonLoader, NgWordsFilter, QualityWarningsFilter,
    SpaceFilter,
};
use crate::io::{self, AtomicLineWriter, IoError, Line, LineReader, RemovedArchive};
use crate::parallel::{PoolError, WorkerPool};
use crate::pipeline::{Compose, Filter, FilterError};
use crate::signature::LshSignatureGenerator;
use crate::store::{DedupBackend, DedupStore, SharedStore, StoreError, StoreStats};
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{}: {}", .path.display(), .source)]
    File {
        path: PathBuf,
        #[source]
        source: IoError,
    },

    #[error("{}:{}: {}", .path.display(), .line, .source)]
    Document {
        path: PathBuf,
        line: usize,
        #[source]
        source: FilterError,
    },

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Cannot build pipeline: {0}")]
    Pipeline(#[from] FilterError),
}

/// Result type for runs.
pub type Result<T> = std::result::Result<T, RunError>;

/// What happened to one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Accepted,
    /// Rejected by the loader (only with `ignore_errors`).
    Malformed,
    /// Rejected by a content filter.
    Filtered,
    /// Rejected as a near-duplicate.
    Duplicate,
}

/// Document counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub read: usize,
    pub accepted: usize,
    pub malformed: usize,
    pub filtered: usize,
    pub duplicates: usize,
}

impl Counts {
    fn record(&mut self, outcome: Outcome) {
        self.read += 1;
        match outcome {
            Outcome::Accepted => self.accepted += 1,
            Outcome::Malformed => self.malformed += 1,
            Outcome::Filtered => self.filtered += 1,
            Outcome::Duplicate => self.duplicates += 1,
        }
    }

    fn add(&mut self, other: &Counts) {
        self.read += other.read;
        self.accepted += other.accepted;
        self.malformed += other.malformed;
        self.filtered += other.filtered;
        self.duplicates += other.duplicates;
    }

    /// All rejected documents, whatever the reason.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.malformed + self.filtered + self.duplicates
    }
}

/// Per-file results.
#[derive(Debug, Clone, Serialize)]
pub struct FileStats {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub counts: Counts,
}

/// Results of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// `None` for the clean stage.
    pub mode: Option<DedupMode>,
    pub files: Vec<FileStats>,
    pub totals: Counts,
    /// Store sizes at the end of an intra-file run.
    pub store: Option<StoreStats>,
    /// Archive of cross-file rejections.
    pub removed: Option<PathBuf>,
    pub elapsed_secs: f64,
}

impl RunSummary {
    fn new(mode: Option<DedupMode>, files: Vec<FileStats>, start: Instant) -> Self {
        let mut totals = Counts::default();
        for file in &files {
            totals.add(&file.counts);
        }
        Self {
            mode,
            files,
            totals,
            store: None,
            removed: None,
            elapsed_secs: start.elapsed().as_secs_f64(),
        }
    }

    /// Documents per second.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.totals.read as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

/// Loader, content filters and a mode-specific tail, run in that order.
///
/// Each segment is a [`Compose`]; processing stops after the first segment
/// that rejects, which is what tells the outcomes apart. A line that is not
/// valid UTF-8 never reaches the loader and is treated as malformed JSON.
struct DocumentPipeline {
    load: Compose,
    content: Compose,
    tail: Compose,
    ignore_errors: bool,
}

impl DocumentPipeline {
    fn run(
        &self,
        line: &Line,
        line_number: usize,
    ) -> std::result::Result<(Outcome, Document), FilterError> {
        let line = match line {
            Ok(line) => line.as_str(),
            Err(_) if self.ignore_errors => {
                let mut doc = Document::from_line("", line_number);
                doc.reject();
                return Ok((Outcome::Malformed, doc));
            }
            Err(e) => {
                return Err(FilterError::Parse {
                    line: line_number,
                    message: format!("invalid UTF-8: {e}"),
                })
            }
        };
        let mut doc = Document::from_line(line, line_number);
        let segments = [
            (&self.load, Outcome::Malformed),
            (&self.content, Outcome::Filtered),
            (&self.tail, Outcome::Duplicate),
        ];
        for (segment, outcome) in segments {
            segment.apply(&mut doc)?;
            if doc.is_rejected() {
                return Ok((outcome, doc));
            }
        }
        Ok((Outcome::Accepted, doc))
    }
}

/// A file's surviving documents with their signatures, for cross-file mode.
struct PreparedFile {
    input: PathBuf,
    docs: Vec<Document>,
    counts: Counts,
    components: HashSet<String>,
}

/// The store owner for one intra-file run.
enum StoreOwner {
    Shared(SharedStore),
    Broker(StoreBroker),
}

impl StoreOwner {
    fn start(store: DedupStore, kind: StoreBackendKind) -> std::result::Result<Self, StoreError> {
        Ok(match kind {
            StoreBackendKind::Mutex => Self::Shared(SharedStore::new(store)),
            StoreBackendKind::Broker => Self::Broker(StoreBroker::spawn(store)?),
        })
    }

    fn client(&self) -> Arc<dyn DedupBackend> {
        match self {
            Self::Shared(shared) => Arc::new(shared.clone()),
            Self::Broker(broker) => Arc::new(broker.handle()),
        }
    }

    fn finish(self) -> std::result::Result<(), StoreError> {
        if let Self::Broker(broker) = self {
            broker.shutdown()?;
        }
        Ok(())
    }
}

/// Runs pipelines over files according to a [`RunConfig`].
pub struct FileOrchestrator {
    config: RunConfig,
    progress: Option<ProgressBar>,
}

impl FileOrchestrator {
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            progress: None,
        }
    }

    /// Report progress on `bar`: files for dedup runs, lines for clean.
    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Deduplicate every input in the configured mode.
    pub fn run(&self) -> Result<RunSummary> {
        self.config.validate()?;
        let start = Instant::now();
        let inputs = io::expand_inputs(&self.config.inputs)?;
        let plan = self.plan_outputs(&inputs)?;
        if let Some(bar) = &self.progress {
            bar.set_length(plan.len() as u64);
        }

        info!(
            files = plan.len(),
            mode = ?self.config.mode,
            workers = self.config.workers,
            "Starting dedup run"
        );

        let summary = match self.config.mode {
            DedupMode::IntraFile => self.run_intra_file(plan, start)?,
            DedupMode::CrossFile => self.run_cross_file(plan, start)?,
        };

        info!(
            accepted = summary.totals.accepted,
            rejected = summary.totals.rejected(),
            elapsed_secs = summary.elapsed_secs,
            "Dedup run finished"
        );
        Ok(summary)
    }

    /// Run loader, content filters and dumper over one file on the pool.
    ///
    /// Output lines are in completion order, not input order.
    pub fn run_clean(&self, input: &Path, output: &Path) -> Result<RunSummary> {
        self.config.validate()?;
        let start = Instant::now();

        let pipeline = DocumentPipeline {
            load: self.loader(),
            content: self.content_filters()?,
            tail: Compose::new(vec![Box::new(JsonDumper::new())]),
            ignore_errors: self.config.ignore_errors,
        };
        let lines = io::read_lines(input).map_err(|source| RunError::File {
            path: input.to_path_buf(),
            source,
        })?;
        if let Some(bar) = &self.progress {
            bar.set_length(lines.len() as u64);
        }

        let pool = WorkerPool::new(self.config.workers)?;
        let mut writer = AtomicLineWriter::create(output).map_err(|source| RunError::File {
            path: output.to_path_buf(),
            source,
        })?;
        let mut counts = Counts::default();

        info!(input = %input.display(), workers = pool.workers(), "Cleaning file");

        pool.imap_unordered(
            lines,
            |(line_number, line)| {
                pipeline
                    .run(&line, line_number)
                    .map(|(outcome, doc)| (outcome, doc.text))
                    .map_err(|source| (line_number, source))
            },
            |results| -> Result<()> {
                for result in results {
                    match result? {
                        Ok((outcome, text)) => {
                            counts.record(outcome);
                            if outcome == Outcome::Accepted {
                                writer.write_line(&text).map_err(|source| RunError::File {
                                    path: output.to_path_buf(),
                                    source,
                                })?;
                            }
                            if let Some(bar) = &self.progress {
                                bar.inc(1);
                            }
                        }
                        Err((line, source)) => {
                            return Err(RunError::Document {
                                path: input.to_path_buf(),
                                line,
                                source,
                            })
                        }
                    }
                }
                Ok(())
            },
        )?;

        writer.finish().map_err(|source| RunError::File {
            path: output.to_path_buf(),
            source,
        })?;
        let file = FileStats {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            counts,
        };
        info!(
            accepted = counts.accepted,
            rejected = counts.rejected(),
            "Clean finished"
        );
        Ok(RunSummary::new(None, vec![file], start))
    }

    fn loader(&self) -> Compose {
        let loader = JsonLoader::new(self.config.text_field.clone())
            .with_metadata_keys(self.config.metadata_keys.clone())
            .with_metadata_root(self.config.metadata_root.clone())
            .ignore_errors(self.config.ignore_errors);
        Compose::new(vec![Box::new(loader)])
    }

    fn content_filters(&self) -> std::result::Result<Compose, FilterError> {
        let content = &self.config.content;
        let mut filters: Vec<Box<dyn Filter>> = Vec::new();

        if content.min_chars.is_some() || content.max_chars.is_some() {
            filters.push(Box::new(DocumentLengthFilter::new(
                content.min_chars.unwrap_or(0),
                content.max_chars.unwrap_or(usize::MAX),
            )));
        }
        if content.space_filter {
            filters.push(Box::new(SpaceFilter::default()));
        }
        if content.quality_warnings {
            filters.push(Box::new(QualityWarningsFilter::default()));
        }
        if let Some(path) = &content.ng_words_path {
            let ng_words = NgWordsFilter::from_file(path)?;
            debug!(words = ng_words.len(), "Loaded NG word list");
            filters.push(Box::new(ng_words));
        }

        let compose = Compose::new(filters);
        debug!(stages = ?compose.stage_names(), "Content filters");
        Ok(compose)
    }

    /// Pair every input with its output path, refusing collisions.
    fn plan_outputs(&self, inputs: &[PathBuf]) -> Result<Vec<(PathBuf, PathBuf)>> {
        std::fs::create_dir_all(&self.config.output_dir).map_err(|e| RunError::File {
            path: self.config.output_dir.clone(),
            source: IoError::Io(e),
        })?;
        let output_dir = std::fs::canonicalize(&self.config.output_dir).map_err(|e| {
            RunError::File {
                path: self.config.output_dir.clone(),
                source: IoError::Io(e),
            }
        })?;

        let mut claimed: HashMap<PathBuf, &PathBuf> = HashMap::new();
        let mut plan = Vec::with_capacity(inputs.len());
        for input in inputs {
            let output = io::output_path_for(input, &output_dir);
            if std::fs::canonicalize(input).ok().as_ref() == Some(&output) {
                return Err(ConfigError::Invalid(format!(
                    "output for {} would overwrite the input",
                    input.display()
                ))
                .into());
            }
            if let Some(other) = claimed.insert(output.clone(), input) {
                return Err(ConfigError::Invalid(format!(
                    "{} and {} would both write {}",
                    other.display(),
                    input.display(),
                    output.display()
                ))
                .into());
            }
            plan.push((input.clone(), output));
        }
        Ok(plan)
    }

    fn run_intra_file(&self, plan: Vec<(PathBuf, PathBuf)>, start: Instant) -> Result<RunSummary> {
        let store = DedupStore::open(&self.config.store_config())?;
        let owner = StoreOwner::start(store, self.config.store_backend)?;
        let backend = owner.client();

        let pipeline = DocumentPipeline {
            load: self.loader(),
            content: self.content_filters()?,
            tail: Compose::new(vec![
                Box::new(LshSignatureGenerator::new(self.config.signature)),
                Box::new(LshDeduplicator::new(backend.clone()).online(self.config.online)),
                Box::new(JsonDumper::new()),
            ]),
            ignore_errors: self.config.ignore_errors,
        };

        let workers = self.config.workers.min(plan.len());
        let files = if workers > 1 {
            let pool = WorkerPool::new(workers)?;
            pool.map(plan, |(input, output)| {
                self.dedup_file(&pipeline, backend.as_ref(), &input, &output)
            })?
            .into_iter()
            .collect::<Result<Vec<_>>>()?
        } else {
            plan.iter()
                .map(|(input, output)| self.dedup_file(&pipeline, backend.as_ref(), input, output))
                .collect::<Result<Vec<_>>>()?
        };

        backend.save()?;
        let store_stats = backend.stats()?;
        drop(pipeline);
        drop(backend);
        owner.finish()?;

        let mut summary = RunSummary::new(Some(DedupMode::IntraFile), files, start);
        summary.store = Some(store_stats);
        Ok(summary)
    }

    fn dedup_file(
        &self,
        pipeline: &DocumentPipeline,
        backend: &dyn DedupBackend,
        input: &Path,
        output: &Path,
    ) -> Result<FileStats> {
        let file_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| RunError::File { path, source }
        };
        debug!(input = %input.display(), output = %output.display(), "Deduplicating file");

        let reader = LineReader::open(input).map_err(file_err(input))?;
        let mut writer = AtomicLineWriter::create(output).map_err(file_err(output))?;
        let mut counts = Counts::default();

        for entry in reader {
            let (line_number, line) = entry.map_err(file_err(input))?;
            let (outcome, doc) =
                pipeline
                    .run(&line, line_number)
                    .map_err(|source| RunError::Document {
                        path: input.to_path_buf(),
                        line: line_number,
                        source,
                    })?;
            counts.record(outcome);
            if outcome == Outcome::Accepted {
                writer.write_line(&doc.text).map_err(file_err(output))?;
            }
        }

        writer.finish().map_err(file_err(output))?;
        if backend.save()? {
            debug!(input = %input.display(), "Blacklist saved");
        }
        if let Some(bar) = &self.progress {
            bar.inc(1);
        }

        info!(
            input = %input.display(),
            read = counts.read,
            accepted = counts.accepted,
            duplicates = counts.duplicates,
            "File done"
        );
        Ok(FileStats {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            counts,
        })
    }

    fn run_cross_file(&self, plan: Vec<(PathBuf, PathBuf)>, start: Instant) -> Result<RunSummary> {
        let pipeline = DocumentPipeline {
            load: self.loader(),
            content: self.content_filters()?,
            tail: Compose::new(vec![Box::new(LshSignatureGenerator::new(
                self.config.signature,
            ))]),
            ignore_errors: self.config.ignore_errors,
        };
        let pool = WorkerPool::new(self.config.workers)?;

        let inputs: Vec<PathBuf> = plan.iter().map(|(input, _)| input.clone()).collect();
        let prepared = pool
            .map(inputs, |input| self.prepare_file(&pipeline, input))?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        debug!(files = prepared.len(), "Signatures computed");

        let removed_path = self.config.removed_path();
        let archive = RemovedArchive::open(&removed_path).map_err(|source| RunError::File {
            path: removed_path.clone(),
            source,
        })?;
        let dumper = JsonDumper::new();

        let jobs: Vec<(usize, PathBuf)> = plan
            .into_iter()
            .enumerate()
            .map(|(index, (_, output))| (index, output))
            .collect();
        let files = pool
            .map(jobs, |(index, output)| {
                self.compare_file(&prepared, index, &output, &dumper, &archive)
            })?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        archive.flush().map_err(|source| RunError::File {
            path: removed_path.clone(),
            source,
        })?;
        let mut summary = RunSummary::new(Some(DedupMode::CrossFile), files, start);
        summary.removed = Some(removed_path);
        Ok(summary)
    }

    fn prepare_file(&self, pipeline: &DocumentPipeline, input: PathBuf) -> Result<PreparedFile> {
        let lines = io::read_lines(&input).map_err(|source| RunError::File {
            path: input.clone(),
            source,
        })?;

        let mut docs = Vec::new();
        let mut counts = Counts::default();
        let mut components = HashSet::new();
        for (line_number, line) in lines {
            let (outcome, doc) =
                pipeline
                    .run(&line, line_number)
                    .map_err(|source| RunError::Document {
                        path: input.clone(),
                        line: line_number,
                        source,
                    })?;
            if outcome == Outcome::Accepted {
                components.extend(doc.signature().iter().map(str::to_string));
                docs.push(doc);
            } else {
                counts.record(outcome);
            }
        }

        Ok(PreparedFile {
            input,
            docs,
            counts,
            components,
        })
    }

    fn compare_file(
        &self,
        files: &[PreparedFile],
        index: usize,
        output: &Path,
        dumper: &JsonDumper,
        archive: &RemovedArchive,
    ) -> Result<FileStats> {
        let output_err = |source| RunError::File {
            path: output.to_path_buf(),
            source,
        };
        let file = &files[index];
        let source = file.input.display().to_string();
        let mut writer = AtomicLineWriter::create(output).map_err(output_err)?;
        let mut counts = file.counts;

        for doc in &file.docs {
            let duplicate = files
                .iter()
                .enumerate()
                .filter(|&(other, _)| other != index)
                .any(|(_, other)| doc.signature().iter().any(|c| other.components.contains(c)));

            if duplicate {
                archive
                    .append(&doc.text, &source)
                    .map_err(|source| RunError::File {
                        path: archive.path().to_path_buf(),
                        source,
                    })?;
                counts.record(Outcome::Duplicate);
            } else {
                let mut out = doc.clone();
                dumper.apply(&mut out)?;
                writer.write_line(&out.text).map_err(output_err)?;
                counts.record(Outcome::Accepted);
            }
        }

        writer.finish().map_err(output_err)?;
        if let Some(bar) = &self.progress {
            bar.inc(1);
        }
        info!(
            input = %file.input.display(),
            accepted = counts.accepted,
            duplicates = counts.duplicates,
            "File compared"
        );
        Ok(FileStats {
            input: file.input.clone(),
            output: output.to_path_buf(),
            counts,
        })
    }
}
